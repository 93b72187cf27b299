//! Domain services.
//!
//! ARCHITECTURE
//! ============
//! `session` owns the cached signed-in view and its live subscriptions.
//! `auth`, `group` and `role` hold the stateless pieces it composes: error
//! mapping and input normalization, join-code handling and group writes, and
//! the coach/client permission gate.

pub mod auth;
pub mod group;
pub mod role;
pub mod session;
