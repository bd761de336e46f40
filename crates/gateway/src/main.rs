use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use conclave_domain::Config;
use conclave_gateway::cli::{load_config, Cli, Command, ConfigCommand};
use conclave_gateway::{api, AppState};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _path) = load_config()?;
            run_server(config).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, path) = load_config()?;
            println!("# effective config (from {})", path.display());
            println!("{}", toml::to_string_pretty(&config).context("serializing effective config")?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("conclave-gateway {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match std::env::var("CONCLAVE_LOG_FORMAT").as_deref() {
        Ok("json") => subscriber.json().init(),
        _ => subscriber.init(),
    }
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing::info!(bind_addr = %config.bind_addr, "conclave gateway starting");
    if config.api_token.is_none() {
        tracing::warn!("no api token configured — running with authentication disabled");
    }

    let state = AppState::new(&config);

    let heartbeat = std::time::Duration::from_secs(config.heartbeat_secs);
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat);
            loop {
                interval.tick().await;
                tracing::debug!(
                    connected = state.connected_ws_clients.load(std::sync::atomic::Ordering::SeqCst),
                    "heartbeat tick"
                );
            }
        });
    }

    let cors = build_cors_layer();
    let max_concurrent: usize = std::env::var("CONCLAVE_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(256);

    let app = api::router(state)
        .layer(cors)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding to {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "conclave gateway listening");

    axum::serve(listener, app).await.context("axum server error")?;
    Ok(())
}

/// Permissive by default (any origin), matching local-first deployments;
/// operators fronting this with a browser client should narrow this with a
/// reverse proxy rather than reconfiguring the binary.
fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|_origin: &HeaderValue, _| true))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
