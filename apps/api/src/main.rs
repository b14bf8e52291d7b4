mod auth;
mod broadcast;
mod config;
mod db;
mod errors;
mod llm_client;
mod models;
mod pipeline;
mod routes;
mod state;
mod storage;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::broadcast::StatusBroadcaster;
use crate::config::Config;
use crate::db::create_pool;
use crate::llm_client::LlmClient;
use crate::pipeline::grade::{HeuristicGrader, LlmGrader, ResumeGrader};
use crate::pipeline::ocr::{DisabledOcr, HttpOcrEngine, OcrEngine};
use crate::pipeline::orchestrator::{Orchestrator, PipelineSettings};
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::S3PgGateway;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails fast on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting resume evaluation API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;

    // Initialize S3 / MinIO
    let s3 = build_s3_client(&config).await;
    info!("S3 client initialized (bucket: {})", config.s3_bucket);

    // Grading backend: deterministic heuristic by default, LLM on opt-in
    let grader: Arc<dyn ResumeGrader> = if config.enable_llm_grading {
        let api_key = config.anthropic_api_key.clone().ok_or_else(|| {
            anyhow::anyhow!("ENABLE_LLM_GRADING requires ANTHROPIC_API_KEY to be set")
        })?;
        info!("Grading backend: LLM (model: {})", llm_client::MODEL);
        Arc::new(LlmGrader(LlmClient::new(api_key)))
    } else {
        info!("Grading backend: heuristic");
        Arc::new(HeuristicGrader)
    };

    // OCR backend: sidecar when configured, otherwise scanned PDFs fail
    // the parsability check with an actionable message
    let ocr: Arc<dyn OcrEngine> = match &config.ocr_endpoint {
        Some(endpoint) => {
            info!("OCR backend: {endpoint}");
            Arc::new(HttpOcrEngine::new(endpoint.clone()))
        }
        None => {
            info!("OCR backend: disabled");
            Arc::new(DisabledOcr)
        }
    };

    let broadcaster = Arc::new(StatusBroadcaster::new());
    let gateway = Arc::new(S3PgGateway::new(
        db.clone(),
        s3,
        config.s3_bucket.clone(),
        config.s3_endpoint.clone(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        gateway.clone(),
        broadcaster.clone(),
        ocr,
        grader,
        PipelineSettings {
            max_file_size_bytes: config.max_file_size_bytes,
            min_parsable_chars: config.min_parsable_chars,
            stage_timeout: Duration::from_secs(config.stage_timeout_secs),
        },
    ));

    let state = AppState {
        db,
        config: config.clone(),
        broadcaster: broadcaster.clone(),
        gateway,
        orchestrator,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Close event channels and cancel in-flight runs so the process drains.
    broadcaster.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "resume-eval-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
