//! Networking types, configuration and middleware.

pub mod config;
pub mod middleware;
pub mod module;

pub use config::NetworkConfig;
pub use middleware::apply_http_layers;
pub use module::NetworkModule;
