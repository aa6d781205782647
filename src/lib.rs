// Session Gateway - Library root

pub mod api_client;
pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;

pub use api_client::ApiClient;
pub use error::{ClientError, Result};
