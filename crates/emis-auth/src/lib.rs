pub mod storage;

pub use storage::{CredentialStore, FileCredentialStore, MemoryCredentialStore, TokenSet};
