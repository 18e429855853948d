//! Client-side query cache and mutation coordination for the EMIS console.
//!
//! Reads go through a per-resource [`Coordinator`], which keys them into a
//! shared [`QueryCache`] and de-duplicates identical in-flight fetches.
//! Writes invalidate the affected keys; deletes are applied to cached lists
//! optimistically and rolled back if the server refuses them.

pub mod cache;
pub mod console;
pub mod coordinator;
pub mod entity;
pub mod error;
pub mod key;
pub mod mutation;
pub mod notify;

pub use cache::{Cached, QueryCache, Snapshot};
pub use console::Console;
pub use coordinator::{Coordinator, QueryState};
pub use error::QueryError;
pub use key::{CacheKey, Scope, Selector};
pub use mutation::{MutationKind, MutationOutcome, MutationState};
pub use notify::{ChannelNotifier, LogNotifier, Notification, NotificationKind, Notifier};
