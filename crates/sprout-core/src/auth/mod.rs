//! Authentication
//!
//! - `backend`: the authentication service seam and an in-process service
//! - `client`: [`AuthClient`], the signed-in identity and its change stream
//! - `session`: persistence of the signed-in identity across restarts

mod backend;
mod client;
mod session;

pub use backend::{
    AuthBackend, FederatedCredential, FederatedProvider, MemoryAuthBackend, MAX_FAILED_ATTEMPTS,
};
pub use client::AuthClient;
pub use session::SessionStore;
