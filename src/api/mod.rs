pub mod auth;
pub mod client;

pub use auth::{AccessTokenAuth, ApiAuth, ApiKeyAuth};
pub use client::{ApiClient, CreateVideoRequest};
