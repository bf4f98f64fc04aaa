//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::errors::TrackerError;
use crate::journey::{DonationRequest, JourneyRecord};
use crate::projections::{self, HudSummary, JourneyView, MapMarker};
use crate::records::SmsLog;
use crate::scheduler::TickReport;
use crate::service::TrackerState;

pub type ApiState = Arc<TrackerState>;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/journeys", get(list_journeys))
        .route("/journeys/:id", get(get_journey))
        .route("/donations", post(create_donation))
        .route("/hud", get(hud))
        .route("/map", get(map))
        .route("/sms", get(sms_inbox))
        .route("/admin/reset", post(admin_reset))
        .route("/admin/step-duration", put(set_step_duration))
        .route("/admin/tick", post(admin_tick))
        .route("/admin/scheduler/start", post(scheduler_start))
        .route("/admin/scheduler/stop", post(scheduler_stop))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct JourneysResponse {
    pub count: usize,
    pub journeys: Vec<JourneyRecord>,
}

#[derive(Serialize)]
pub struct HudResponse {
    #[serde(flatten)]
    pub summary: HudSummary,
    pub step_duration_secs: u64,
    pub scheduler_running: bool,
    pub ticks: u64,
    pub sync_failures: u64,
}

#[derive(Serialize)]
pub struct MapResponse {
    pub markers: Vec<MapMarker>,
}

#[derive(Serialize)]
pub struct SmsResponse {
    pub count: usize,
    pub messages: Vec<SmsLog>,
}

#[derive(Debug, Deserialize)]
pub struct SmsQuery {
    pub donor_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StepDurationRequest {
    pub seconds: u64,
}

#[derive(Serialize)]
pub struct SchedulerResponse {
    pub running: bool,
    pub step_duration_secs: u64,
}

#[derive(Serialize)]
pub struct TickResponse {
    pub skipped: bool,
    pub advanced: usize,
    pub completed: usize,
    pub removed: usize,
}

impl From<TickReport> for TickResponse {
    fn from(report: TickReport) -> Self {
        Self {
            skipped: report.skipped,
            advanced: report.advanced,
            completed: report.completed,
            removed: report.removed,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

fn scheduler_response(state: &TrackerState) -> Json<SchedulerResponse> {
    Json(SchedulerResponse {
        running: state.scheduler.is_running(),
        step_duration_secs: state.scheduler.step_duration_secs(),
    })
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /journeys`
///
/// Tracked journeys (active and recently completed), newest first.
pub async fn list_journeys(State(state): State<ApiState>) -> impl IntoResponse {
    let journeys = state.store.list();
    Json(JourneysResponse {
        count: journeys.len(),
        journeys,
    })
}

/// `GET /journeys/:id`
pub async fn get_journey(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.store.get(&id) {
        Some(journey) => {
            let view: JourneyView = projections::journey_view(&journey);
            (StatusCode::OK, Json(view)).into_response()
        }
        None => error_response(StatusCode::NOT_FOUND, format!("journey {id} is not tracked")),
    }
}

/// `POST /donations`
///
/// Triggers a donation and opens its journey at stage 1.
pub async fn create_donation(
    State(state): State<ApiState>,
    Json(request): Json<DonationRequest>,
) -> Response {
    match state.store.create(request) {
        Ok(journey) => (StatusCode::CREATED, Json(journey)).into_response(),
        Err(e @ TrackerError::NoRouteAvailable(_)) => {
            error_response(StatusCode::UNPROCESSABLE_ENTITY, e)
        }
        Err(e @ TrackerError::InvalidRequest(_)) => error_response(StatusCode::BAD_REQUEST, e),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// `GET /hud`
pub async fn hud(State(state): State<ApiState>) -> impl IntoResponse {
    let journeys = state.store.list();
    Json(HudResponse {
        summary: projections::hud(&journeys),
        step_duration_secs: state.scheduler.step_duration_secs(),
        scheduler_running: state.scheduler.is_running(),
        ticks: state.scheduler.tick_count(),
        sync_failures: state.store.sync_stats().failed(),
    })
}

/// `GET /map`
pub async fn map(State(state): State<ApiState>) -> impl IntoResponse {
    Json(MapResponse {
        markers: projections::map_markers(&state.store.list()),
    })
}

/// `GET /sms?donor_id=…`
pub async fn sms_inbox(
    State(state): State<ApiState>,
    Query(query): Query<SmsQuery>,
) -> impl IntoResponse {
    let messages = projections::sms_inbox(&state.store.list(), query.donor_id.as_deref());
    Json(SmsResponse {
        count: messages.len(),
        messages,
    })
}

/// `POST /admin/reset` — clears every journey, locally and remotely.
pub async fn admin_reset(State(state): State<ApiState>) -> impl IntoResponse {
    state.store.reset_all();
    StatusCode::NO_CONTENT
}

/// `PUT /admin/step-duration`
pub async fn set_step_duration(
    State(state): State<ApiState>,
    Json(body): Json<StepDurationRequest>,
) -> Response {
    match state.scheduler.set_step_duration(body.seconds) {
        Ok(()) => scheduler_response(&state).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e),
    }
}

/// `POST /admin/tick` — run one tick by hand (replay step).
pub async fn admin_tick(State(state): State<ApiState>) -> impl IntoResponse {
    Json(TickResponse::from(state.scheduler.tick()))
}

/// `POST /admin/scheduler/start`
pub async fn scheduler_start(State(state): State<ApiState>) -> impl IntoResponse {
    state.scheduler.start();
    scheduler_response(&state)
}

/// `POST /admin/scheduler/stop`
pub async fn scheduler_stop(State(state): State<ApiState>) -> impl IntoResponse {
    state.scheduler.stop();
    scheduler_response(&state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::journey::tests::t0;
    use crate::journey::RouteRequest;
    use crate::reference::ReferenceData;
    use crate::scheduler::ProgressionScheduler;
    use crate::store::JourneyStore;
    use rust_decimal::Decimal;
    use serde_json::Value;

    fn state() -> ApiState {
        let store = JourneyStore::builder(ReferenceData::seed())
            .clock(Arc::new(ManualClock::new(t0())))
            .rng_seed(1)
            .build();
        let scheduler = ProgressionScheduler::new(store.clone(), 5, 30).unwrap();
        Arc::new(TrackerState { store, scheduler })
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn donation_is_created_at_stage_one() {
        let state = state();
        let response = create_donation(
            State(state.clone()),
            Json(DonationRequest::general(Decimal::new(100, 0))),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["current_stage"], 1);
        assert_eq!(body["status"], "active");
        assert_eq!(body["waypoints"].as_array().unwrap().len(), 5);
        assert_eq!(state.store.list().len(), 1);
    }

    #[tokio::test]
    async fn unroutable_donation_is_unprocessable() {
        let state = state();
        let request = DonationRequest::general(Decimal::ONE).with_route(RouteRequest::LocationFixed {
            governorate: "Matrouh".to_string(),
        });
        let response = create_donation(State(state.clone()), Json(request)).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(state.store.list().is_empty());
    }

    #[tokio::test]
    async fn invalid_donation_is_bad_request() {
        let response =
            create_donation(State(state()), Json(DonationRequest::general(Decimal::ZERO))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_journey_is_not_found() {
        let response = get_journey(State(state()), Path("TRK-nope".to_string())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn manual_tick_and_views_agree() {
        let state = state();
        let journey = state
            .store
            .create(DonationRequest::general(Decimal::new(30, 0)).with_donor("d-1", "Hoda"))
            .unwrap();
        admin_tick(State(state.clone())).await;

        let view = body_json(get_journey(State(state.clone()), Path(journey.id.clone())).await).await;
        assert_eq!(view["current_stage"], 2);

        let hud = body_json(hud(State(state.clone())).await.into_response()).await;
        assert_eq!(hud["active"], 1);
        assert_eq!(hud["ticks"], 1);

        let map = body_json(map(State(state.clone())).await.into_response()).await;
        assert_eq!(map["markers"][0]["stage"], 2);

        let sms = body_json(
            sms_inbox(
                State(state.clone()),
                Query(SmsQuery {
                    donor_id: Some("d-1".to_string()),
                }),
            )
            .await
            .into_response(),
        )
        .await;
        assert_eq!(sms["count"], 2);
    }

    #[tokio::test]
    async fn step_duration_validation() {
        let state = state();
        let ok = set_step_duration(State(state.clone()), Json(StepDurationRequest { seconds: 2 })).await;
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(state.scheduler.step_duration_secs(), 2);

        let bad = set_step_duration(State(state.clone()), Json(StepDurationRequest { seconds: 0 })).await;
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.scheduler.step_duration_secs(), 2);
    }

    #[tokio::test]
    async fn reset_empties_the_store() {
        let state = state();
        state
            .store
            .create(DonationRequest::general(Decimal::ONE))
            .unwrap();
        let response = admin_reset(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(state.store.list().is_empty());
    }

    #[tokio::test]
    async fn scheduler_can_be_started_and_stopped() {
        let state = state();
        let started = body_json(scheduler_start(State(state.clone())).await.into_response()).await;
        assert_eq!(started["running"], true);
        let stopped = body_json(scheduler_stop(State(state.clone())).await.into_response()).await;
        assert_eq!(stopped["running"], false);
    }
}
