//! Spirit Server: axum route binding and server lifecycle for compiled models.

pub mod app;
pub mod config;
pub mod error;
pub mod network;
pub mod routes;

pub use app::SpiritServer;
pub use config::ServerConfig;
pub use error::{ApiError, ServerError};
pub use network::{NetworkConfig, NetworkModule};

