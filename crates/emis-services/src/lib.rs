//! HTTP client and per-resource API modules for the EMIS backend.

pub mod batch;
pub mod catalog;
pub mod http;
pub mod resource;
pub mod retry;
pub mod session;
pub mod transfer;

pub use batch::BatchOutcome;
pub use http::{server_message, ApiClient};
pub use resource::{EntityApi, Filters, ResourceApi, ResourceDescriptor};
pub use retry::RetryConfig;
pub use session::{LoginRequest, Session};
pub use transfer::{Download, MultipartUpload};
