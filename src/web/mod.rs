pub mod auth;
pub mod error;
pub mod handlers;
pub mod server;

pub use auth::{ApiKeyStore, RequireApiKey, API_KEY_HEADER};
pub use error::ApiError;
pub use server::{build_router, ApiServer, AppState};
