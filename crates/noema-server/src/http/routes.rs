use super::{AppError, AppResult, AppState, JsonResponse};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use noema_core::{
    BackupHandle, ConsolidationReport, EngineStats, Fact, FactId, FactPattern, Interaction,
    PipelineRequest, PipelineResult, ProcessingMode, Term,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/process", post(process))
        .route("/facts", get(list_facts).post(create_fact))
        .route("/facts/:id", delete(retract_fact))
        .route("/interactions", post(record_interaction))
        .route("/consolidate", post(consolidate))
        .route("/snapshots", get(list_snapshots).post(create_snapshot))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    healthy: bool,
    version: String,
    uptime_seconds: u64,
    fact_count: u64,
    active_facts: u64,
    pending_events: u64,
    rules_version: String,
}

async fn health(State(state): State<AppState>) -> AppResult<Json<JsonResponse<HealthResponse>>> {
    let stats = state.engine.stats()?;
    Ok(Json(JsonResponse::ok(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        fact_count: stats.store.fact_count,
        active_facts: stats.store.active_facts,
        pending_events: stats.store.pending_events,
        rules_version: stats.rules_version,
    })))
}

async fn stats(State(state): State<AppState>) -> AppResult<Json<JsonResponse<EngineStats>>> {
    Ok(Json(JsonResponse::ok(state.engine.stats()?)))
}

// ── Processing ──

#[derive(Deserialize)]
struct ProcessBody {
    text: String,
    #[serde(default)]
    context: Vec<String>,
    mode: Option<String>,
}

async fn process(
    State(state): State<AppState>,
    Json(body): Json<ProcessBody>,
) -> AppResult<Json<JsonResponse<PipelineResult>>> {
    let mut request = PipelineRequest::new(body.text).with_context(body.context);
    if let Some(mode) = body.mode {
        let mode: ProcessingMode = mode.parse().map_err(AppError::bad_request)?;
        request = request.with_mode(mode);
    }
    Ok(Json(JsonResponse::ok(state.engine.process(request).await)))
}

// ── Facts ──

#[derive(Deserialize)]
struct FactQuery {
    subject: Option<String>,
    predicate: Option<String>,
    object: Option<String>,
    /// Match `object` as a literal value instead of an entity label.
    #[serde(default)]
    literal: bool,
    limit: Option<usize>,
    #[serde(default)]
    include_inactive: bool,
}

impl FactQuery {
    fn pattern(&self) -> FactPattern {
        let mut pattern = FactPattern::any();
        if let Some(subject) = &self.subject {
            pattern = pattern.subject(Term::entity(subject));
        }
        if let Some(predicate) = &self.predicate {
            pattern = pattern.predicate(predicate);
        }
        if let Some(object) = &self.object {
            let term = if self.literal {
                Term::literal(object.as_str())
            } else {
                Term::entity(object)
            };
            pattern = pattern.object(term);
        }
        if let Some(limit) = self.limit {
            pattern = pattern.with_limit(limit);
        }
        if self.include_inactive {
            pattern = pattern.including_inactive();
        }
        pattern
    }
}

async fn list_facts(
    State(state): State<AppState>,
    Query(query): Query<FactQuery>,
) -> AppResult<Json<JsonResponse<Vec<Fact>>>> {
    Ok(Json(JsonResponse::ok(state.engine.query(query.pattern())?)))
}

#[derive(Deserialize)]
struct CreateFactBody {
    subject: String,
    predicate: String,
    object: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

#[derive(Serialize)]
struct CreatedFact {
    id: FactId,
}

async fn create_fact(
    State(state): State<AppState>,
    Json(body): Json<CreateFactBody>,
) -> AppResult<Json<JsonResponse<CreatedFact>>> {
    let id = state
        .engine
        .assert(&body.subject, &body.predicate, &body.object, body.confidence)?;
    Ok(Json(JsonResponse::ok(CreatedFact { id })))
}

#[derive(Serialize)]
struct Retracted {
    id: FactId,
    retracted: bool,
}

async fn retract_fact(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<JsonResponse<Retracted>>> {
    let id = FactId::parse(&id)
        .ok_or_else(|| AppError::bad_request(format!("Invalid fact id '{}'", id)))?;
    state.engine.retract(&id)?;
    Ok(Json(JsonResponse::ok(Retracted { id, retracted: true })))
}

// ── Learning ──

#[derive(Serialize)]
struct RecordedEvent {
    event_id: String,
}

async fn record_interaction(
    State(state): State<AppState>,
    Json(interaction): Json<Interaction>,
) -> AppResult<Json<JsonResponse<RecordedEvent>>> {
    let id = state.engine.record_interaction(interaction).await?;
    Ok(Json(JsonResponse::ok(RecordedEvent {
        event_id: id.to_string(),
    })))
}

async fn consolidate(
    State(state): State<AppState>,
) -> AppResult<Json<JsonResponse<ConsolidationReport>>> {
    Ok(Json(JsonResponse::ok(state.engine.consolidate().await?)))
}

// ── Snapshots ──

async fn create_snapshot(
    State(state): State<AppState>,
) -> AppResult<Json<JsonResponse<BackupHandle>>> {
    Ok(Json(JsonResponse::ok(state.engine.snapshot()?)))
}

async fn list_snapshots(
    State(state): State<AppState>,
) -> AppResult<Json<JsonResponse<Vec<BackupHandle>>>> {
    Ok(Json(JsonResponse::ok(state.engine.list_snapshots()?)))
}
