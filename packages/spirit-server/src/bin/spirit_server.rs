//! Spirit server binary.
//!
//! Serves the JSON model declarations found in the given directories over
//! the in-memory datasource:
//!
//! ```text
//! spirit-server --models ./models --port 8080
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use spirit_core::MemoryConnector;
use spirit_server::{NetworkConfig, ServerConfig, SpiritServer};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "spirit-server")]
#[command(about = "Serves decorated model declarations as a versioned REST API")]
struct Cli {
    /// Bind address.
    #[arg(long, env = "SPIRIT_HOST", default_value = "0.0.0.0")]
    host: String,
    /// Listen port; 0 picks a free one.
    #[arg(long, env = "SPIRIT_PORT", default_value_t = 8080)]
    port: u16,
    /// API version segment.
    #[arg(long, env = "SPIRIT_API_VERSION", default_value = "v1")]
    api_version: String,
    /// Directories holding `*.json` model declarations.
    #[arg(long = "models", env = "SPIRIT_MODELS", value_delimiter = ',')]
    model_dirs: Vec<PathBuf>,
    /// Datasource key of the in-memory connector and default for models.
    #[arg(long, env = "SPIRIT_DATASOURCE", default_value = "memory")]
    datasource: String,
    /// Allowed CORS origins.
    #[arg(long, env = "SPIRIT_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,
    /// Request timeout in seconds.
    #[arg(long, env = "SPIRIT_REQUEST_TIMEOUT", default_value_t = 30)]
    request_timeout: u64,
    /// Emit logs as JSON.
    #[arg(long, env = "SPIRIT_LOG_JSON")]
    log_json: bool,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            network: NetworkConfig {
                host: self.host.clone(),
                port: self.port,
                cors_origins: self.cors_origins.clone(),
                request_timeout: Duration::from_secs(self.request_timeout),
            },
            api_version: self.api_version.clone(),
            model_dirs: self.model_dirs.clone(),
            default_datasource: self.datasource.clone(),
            export_plain_classes: true,
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("spirit_server=info,spirit_core=info,tower_http=info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "unable to install ctrl+c handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut server = SpiritServer::new(cli.server_config());
    server.add_connector(Arc::new(MemoryConnector::with_datasource(cli.datasource.as_str())));
    server.init().await?;
    let port = server.start().await?;
    info!(port, "spirit server listening");
    server.serve(shutdown_signal()).await
}
