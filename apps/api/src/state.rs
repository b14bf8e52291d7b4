use std::sync::Arc;

use sqlx::PgPool;

use crate::broadcast::StatusBroadcaster;
use crate::config::Config;
use crate::pipeline::orchestrator::Orchestrator;
use crate::storage::StorageGateway;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    /// Per-user realtime channels plus cancellation handles. The SSE route
    /// subscribes here; the orchestrator emits here.
    pub broadcaster: Arc<StatusBroadcaster>,
    /// Persistence seam used by both the pipeline and the lookup route.
    pub gateway: Arc<dyn StorageGateway>,
    pub orchestrator: Arc<Orchestrator>,
}
