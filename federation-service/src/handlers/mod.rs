//! HTTP handlers for federation-service.

pub mod auth;
pub mod recipients;
pub mod session;
pub mod settings;

pub use auth::AuthenticatedUser;
pub use recipients::*;
pub use session::*;
pub use settings::*;
