mod config;
mod db;
mod evolution;
mod handlers;
mod ingest;
mod metrics;
mod models;
mod provisioning;
mod repository;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::http::Request;
use axum::routing::{get, patch, post};
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{Span, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

use crate::config::{CopilotConfig, FileConfig};
use crate::db::Database;
use crate::evolution::EvolutionClient;
use crate::metrics::ServerMetrics;
use crate::provisioning::Provisioner;
use crate::repository::CrmRepository;

/// Tags every request span with a fresh id so concurrent webhook and
/// dashboard traffic can be told apart in the logs.
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> tower_http::trace::MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %Uuid::new_v4(),
        )
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub repository: Arc<CrmRepository>,
    pub metrics: Arc<ServerMetrics>,
    pub gateway: Option<Arc<EvolutionClient>>,
    pub provisioner: Option<Arc<Provisioner>>,
}

#[derive(Parser)]
#[command(
    name = "clinic-copilot",
    about = "WhatsApp CRM backend for clinic dashboards",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Data directory (default: ~/.clinic-copilot)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve(ServeArgs),
}

#[derive(Args, Default)]
struct ServeArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    debug: bool,

    /// Delete the database before starting
    #[arg(long)]
    reset_db: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Serve(args)) => run_server(args, cli.data_dir).await,
        None => run_server(ServeArgs::default(), cli.data_dir).await,
    }
}

async fn run_server(args: ServeArgs, data_dir: Option<PathBuf>) -> Result<()> {
    let default_directive = if args.debug {
        "clinic_copilot=debug,tower_http=debug,info"
    } else {
        "clinic_copilot=info,tower_http=info,warn"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter)
        .init();

    info!("🏥 Starting clinic-copilot");

    let config = CopilotConfig::new(data_dir)?;
    info!("📁 Data directory: {}", config.data_dir.display());

    if args.reset_db {
        warn!("Resetting database at user request");
        config.reset_database()?;
    }

    let file_config: FileConfig = config::load_config(&config.data_dir)
        .extract()
        .context("Failed to load configuration")?;

    let host = args.host.unwrap_or_else(|| file_config.server.host.clone());
    let port = args.port.unwrap_or(file_config.server.port);

    let database = Database::new(&config).await?;
    let repository = Arc::new(CrmRepository::new(database.pool.clone()));
    let metrics = Arc::new(ServerMetrics::new());

    let webhook_url = file_config.evolution.webhook_url_or(&host, port);
    let gateway = if file_config.evolution.is_configured() {
        info!("🔌 Evolution gateway: {}", file_config.evolution.base_url);
        info!("   Webhook target: {}", webhook_url);
        Some(Arc::new(EvolutionClient::new(
            &file_config.evolution.base_url,
            &file_config.evolution.api_key,
            Duration::from_secs(file_config.evolution.timeout_secs),
        )?))
    } else {
        warn!(
            "Evolution gateway not configured; webhook ingestion stays up but provisioning \
             and sending are disabled (set COPILOT_EVOLUTION__BASE_URL and COPILOT_EVOLUTION__API_KEY)"
        );
        None
    };
    let provisioner = gateway.as_ref().map(|gateway| {
        Arc::new(Provisioner::new(
            repository.clone(),
            gateway.clone(),
            webhook_url.clone(),
        ))
    });

    let app_state = AppState {
        db: Arc::new(database),
        repository,
        metrics,
        gateway,
        provisioner,
    };

    let app = Router::new()
        .route(
            "/webhook/evolution",
            post(handlers::evolution_webhook_handler),
        )
        .route(
            "/api/whatsapp/connect",
            post(handlers::connect_whatsapp_handler),
        )
        .route(
            "/api/whatsapp/status/{tenant_id}",
            get(handlers::whatsapp_status_handler),
        )
        .route("/api/whatsapp/send", post(handlers::send_message_handler))
        .route(
            "/api/whatsapp/logout",
            post(handlers::logout_whatsapp_handler),
        )
        .route("/api/leads", get(handlers::list_leads_handler))
        .route(
            "/api/leads/{id}/messages",
            get(handlers::lead_messages_handler),
        )
        .route("/api/leads/{id}", patch(handlers::update_lead_handler))
        .route("/api/admin/stats", get(handlers::database_stats_handler))
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(app_state.clone());

    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("Failed to read local address")?;

    info!("🚀 Listening on http://{}", local_addr);
    info!("   Webhook sink:  POST /webhook/evolution");
    info!("   Dashboard API: /api/whatsapp/*, /api/leads");
    info!("   Health:        /health, /health/live, /health/ready, /metrics");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Closing database pool...");
    app_state.db.pool.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("🛑 Shutdown signal received");
}
