//! # Huddle Server
//!
//! Single binary running the realtime core:
//! - WebSocket gateway (presence, chat fan-out, call signaling)
//! - Call lifecycle dispatcher and invitation sweeper
//! - Health endpoint
//!
//! Registration, login and uploads belong to the HTTP service sharing the
//! same database.

mod health;

use clap::{Parser, Subcommand};
use huddle_common::auth::issue_token;
use huddle_db::Database;
use huddle_gateway::{GatewayConfig, GatewayState};
use huddle_voice::SystemClock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Parser)]
#[command(name = "huddle", version, about = "Realtime chat and call signaling server")]
struct Cli {
    /// Config file (without extension); defaults to ./huddle.*
    #[arg(long, short, env = "HUDDLE_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway (default).
    Serve,
    /// Print a signed access token, for local testing.
    IssueToken {
        #[arg(long)]
        user_id: i64,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long, default_value_t = 3600)]
        ttl_secs: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = huddle_common::config::init(cli.config.as_deref())?;

    // Initialize tracing (structured logging)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,tower_http=debug".into()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::IssueToken {
            user_id,
            email,
            ttl_secs,
        } => {
            let token = issue_token(user_id, &email, &config.auth.jwt_secret, ttl_secs)?;
            println!("{token}");
            Ok(())
        }
    }
}

async fn serve(config: &'static huddle_common::config::AppConfig) -> anyhow::Result<()> {
    tracing::info!("🚀 Starting Huddle v{}", env!("CARGO_PKG_VERSION"));

    // Connect to the database
    let db = Database::connect(&config.database).await?;

    // Run migrations
    db.migrate().await?;

    // === Gateway + call coordination ===
    let (gateway, lifecycle) = GatewayState::new(
        db.clone(),
        GatewayConfig::from_app(config),
        Arc::new(SystemClock),
    );
    let background = gateway.spawn_background(lifecycle);
    tracing::info!(
        invite_ttl_secs = config.calls.invite_ttl_secs,
        "📞 Call coordinator ready"
    );

    let app = huddle_gateway::build_router(gateway)
        .merge(health::router(health::HealthState {
            db,
            started: Instant::now(),
        }))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!("🔌 Gateway listening on ws://{addr}/gateway");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    for task in background {
        task.abort();
    }
    Ok(())
}
