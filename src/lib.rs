//! Coach/client session store.
//!
//! ARCHITECTURE
//! ============
//! `services::session::SessionStore` is the entry point: construct it with a
//! `backend::DocumentStore`, a `backend::CredentialService` and a
//! `config::SessionConfig`, then drive it with sign-up, sign-in and the group
//! operations. Observers read `state::SessionState` from its watch channel.
//! `backend::memory` provides an in-process backend for tests and the demo.

pub mod backend;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod state;

pub use backend::memory::{MemoryCredentials, MemoryStore};
pub use config::SessionConfig;
pub use error::ErrorCode;
pub use models::{Group, Role, User};
pub use services::session::{SessionError, SessionStore};
pub use state::{SessionPhase, SessionState};
