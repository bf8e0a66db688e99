//! HTTP JSON surface for the form: option lists, per-session selections and
//! predictions.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::json;
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::{
    catalog::ReferenceCatalog,
    error::Error,
    model::PredictionService,
    selector::CascadingSelector,
    types::{
        OptionsOut, OptionsQuery, OutcomeStatus, PredictionOut, PredictionResult, Selection, SessionOut, SetFieldRequest,
    },
};

pub const INCOMPLETE_MESSAGE: &str = "Please select a value for all fields before predicting.";
pub const UNAVAILABLE_MESSAGE: &str = "Prediction is unavailable: model files could not be loaded.";
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

type Rejection = (StatusCode, Json<serde_json::Value>);

// ---------- Server state ----------

struct Session {
    selector: CascadingSelector,
    touched: Instant,
}

#[derive(Clone)]
pub struct AppState {
    catalog: Arc<ReferenceCatalog>,
    service: Option<Arc<PredictionService>>,
    sessions: Arc<Mutex<HashMap<u64, Session>>>,
    next_id: Arc<AtomicU64>,
    session_ttl: Duration,
}

impl AppState {
    /// `service` is `None` when the model artifacts failed to load; option
    /// lists keep working and prediction answers 503.
    pub fn new(catalog: Arc<ReferenceCatalog>, service: Option<Arc<PredictionService>>) -> Self {
        Self {
            catalog,
            service,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }

    /// Sessions untouched for longer than `ttl` are dropped.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Drops idle sessions and returns how many were removed.
    pub fn evict_idle(&self) -> usize {
        let ttl = self.session_ttl;
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, s| s.touched.elapsed() <= ttl);
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::debug!("evicted {evicted} idle sessions");
        }
        evicted
    }

    /// Runs `f` on a live session and marks it as used. An expired session
    /// is removed and reported as missing.
    fn with_session<T>(&self, id: u64, f: impl FnOnce(&mut CascadingSelector) -> T) -> Result<T, Rejection> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(&id).ok_or_else(|| no_session(id))?;
        if session.touched.elapsed() > self.session_ttl {
            sessions.remove(&id);
            tracing::debug!("session {id} expired");
            return Err(no_session(id));
        }
        session.touched = Instant::now();
        Ok(f(&mut session.selector))
    }
}

/// Resolves when `signal` fires. If the signal handler could not be
/// installed the error is logged and the future never resolves, so the
/// server keeps running instead of shutting down at once.
pub async fn shutdown_on<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(e) => {
            tracing::error!("failed to install shutdown signal handler: {e}");
            std::future::pending::<()>().await;
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/options", get(options))
        .route("/predict", post(predict))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(get_session).put(set_field).delete(end_session))
        .route("/sessions/:id/predict", post(predict_session))
        .with_state(state)
}

// ---------- Error mapping ----------

fn status_of(e: &Error) -> StatusCode {
    match e {
        Error::DataUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        Error::InvalidSelectionOrder { .. } => StatusCode::CONFLICT,
        Error::IncompleteSelection { .. } | Error::Transform(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::UnknownOption { .. } => StatusCode::BAD_REQUEST,
        Error::Model(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(e: Error) -> Rejection {
    (status_of(&e), Json(json!({ "error": e.to_string() })))
}

fn no_session(id: u64) -> Rejection {
    (StatusCode::NOT_FOUND, Json(json!({ "error": format!("no session {id}") })))
}

/// Renders a prediction outcome the way the form's output region shows it.
fn prediction_out(outcome: Result<PredictionResult, Error>) -> (StatusCode, Json<PredictionOut>) {
    let (status, out) = match outcome {
        Ok(result) => (
            StatusCode::OK,
            PredictionOut { status: OutcomeStatus::Ok, message: result.message(), result: Some(result) },
        ),
        Err(e @ Error::IncompleteSelection { .. }) => (
            status_of(&e),
            PredictionOut { status: OutcomeStatus::Warning, message: INCOMPLETE_MESSAGE.to_string(), result: None },
        ),
        Err(Error::Transform(details)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            PredictionOut {
                status: OutcomeStatus::Error,
                message: format!(
                    "Error during data transformation. Please check the inputs. Details: {details}"
                ),
                result: None,
            },
        ),
        Err(e @ Error::DataUnavailable { .. }) => (
            status_of(&e),
            PredictionOut { status: OutcomeStatus::Unavailable, message: e.to_string(), result: None },
        ),
        Err(e) => {
            tracing::warn!("prediction failed: {e}");
            (status_of(&e), PredictionOut { status: OutcomeStatus::Error, message: e.to_string(), result: None })
        }
    };
    (status, Json(out))
}

fn run_prediction(state: &AppState, selection: &Selection) -> (StatusCode, Json<PredictionOut>) {
    let Some(service) = state.service.as_ref() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(PredictionOut {
                status: OutcomeStatus::Unavailable,
                message: UNAVAILABLE_MESSAGE.to_string(),
                result: None,
            }),
        );
    };
    prediction_out(service.predict(selection))
}

fn session_out(id: u64, sel: &CascadingSelector) -> SessionOut {
    SessionOut {
        id,
        selection: sel.selection().clone(),
        stage: sel.stage(),
        complete: sel.is_complete(),
        options: sel.options(),
    }
}

// ---------- Handlers ----------

async fn options(State(state): State<AppState>, Query(q): Query<OptionsQuery>) -> Json<OptionsOut> {
    let c = &state.catalog;
    Json(OptionsOut {
        towns: c.towns(),
        substations: c.substations_for(q.town.as_deref()),
        feeders: c.feeders_for(q.substation.as_deref()),
        locality_classes: c.locality_classes(),
    })
}

/// Stateless prediction from a full selection. Completeness is checked
/// before the values are validated against the catalog. A body that does not
/// parse is answered in the same `PredictionOut` shape.
async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<Selection>, JsonRejection>,
) -> (StatusCode, Json<PredictionOut>) {
    let selection = match payload {
        Ok(Json(selection)) => selection,
        Err(rejection) => {
            let out = PredictionOut { status: OutcomeStatus::Error, message: rejection.body_text(), result: None };
            return (rejection.status(), Json(out));
        }
    };
    if !selection.is_complete() {
        return prediction_out(Err(Error::IncompleteSelection { missing: selection.missing_fields() }));
    }
    let mut sel = CascadingSelector::new(state.catalog.clone());
    if let Err(e) = replay(&mut sel, &selection) {
        return prediction_out(Err(e));
    }
    run_prediction(&state, sel.selection())
}

/// Applies a selection field by field so every value is checked against
/// the catalog in cascade order.
fn replay(sel: &mut CascadingSelector, selection: &Selection) -> Result<(), Error> {
    sel.set_town(selection.town.clone())?;
    sel.set_substation(selection.substation.clone())?;
    sel.set_feeder(selection.feeder.clone())?;
    sel.set_locality_class(selection.locality_class)
}

async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionOut>) {
    state.evict_idle();
    let id = state.next_id.fetch_add(1, Ordering::Relaxed);
    let selector = CascadingSelector::new(state.catalog.clone());
    let out = session_out(id, &selector);
    state.sessions.lock().insert(id, Session { selector, touched: Instant::now() });
    tracing::debug!("session {id} created");
    (StatusCode::CREATED, Json(out))
}

async fn get_session(State(state): State<AppState>, Path(id): Path<u64>) -> Result<Json<SessionOut>, Rejection> {
    state.with_session(id, |sel| Json(session_out(id, sel)))
}

async fn set_field(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(req): Json<SetFieldRequest>,
) -> Result<Json<SessionOut>, Rejection> {
    state.with_session(id, |sel| -> Result<Json<SessionOut>, Rejection> {
        sel.set(req.field, req.value).map_err(reject)?;
        Ok(Json(session_out(id, sel)))
    })?
}

async fn end_session(State(state): State<AppState>, Path(id): Path<u64>) -> Result<StatusCode, Rejection> {
    state.sessions.lock().remove(&id).ok_or_else(|| no_session(id))?;
    tracing::debug!("session {id} ended");
    Ok(StatusCode::NO_CONTENT)
}

/// Predicts from a session's selection; the session is discarded once a
/// prediction has been produced.
async fn predict_session(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<(StatusCode, Json<PredictionOut>), Rejection> {
    let selection = state.with_session(id, |sel| sel.selection().clone())?;
    let (status, out) = run_prediction(&state, &selection);
    if status == StatusCode::OK {
        state.sessions.lock().remove(&id);
    }
    Ok((status, out))
}
