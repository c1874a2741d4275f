//! Authenticated access to the upstream mail and calendar APIs: OAuth
//! credential lifecycle in [`session`], request forwarding with 401 recovery
//! in [`client`].

pub mod client;
pub mod session;

pub use client::BackendClient;
pub use session::{Credential, SessionManager};
