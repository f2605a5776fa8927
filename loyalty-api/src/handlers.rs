use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use loyalty_common::eventqueue::{EntityKind, NewChangeEvent, PgEventQueue, QueueError};
use loyalty_common::records::{CUSTOMERS, VISITS};
use loyalty_common::store::{DocumentStore, FieldSet, StoreError};

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn DocumentStore>,
    queue: Arc<PgEventQueue>,
}

pub fn add_routes(
    router: Router<AppState>,
    store: Arc<dyn DocumentStore>,
    queue: Arc<PgEventQueue>,
) -> Router {
    router
        .route("/", get(index))
        .route("/_liveness", get(liveness))
        .route("/greeting", post(greeting))
        .route("/points/quote", post(points_quote))
        .route("/customers", post(create_customer))
        .route("/visits", post(create_visit))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { store, queue })
}

/// Enumeration of errors surfaced to API callers.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("transient store error, please retry")]
    Store(#[from] StoreError),
    #[error("transient queue error, please retry")]
    Queue(#[from] QueueError),
    #[error("a record with id {0} already exists")]
    Conflict(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            ApiError::Store(_) | ApiError::Queue(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            ApiError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
        }
        .into_response()
    }
}

async fn index() -> &'static str {
    "loyalty api"
}

#[derive(Serialize)]
struct LivenessResponse {
    status: &'static str,
    message: &'static str,
    timestamp: DateTime<Utc>,
}

/// Static liveness probe: reports healthy whenever the process serves HTTP.
async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "healthy",
        message: "loyalty api is running",
        timestamp: Utc::now(),
    })
}

#[derive(Deserialize)]
pub struct GreetingRequest {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Serialize)]
pub struct GreetingResponse {
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
}

pub fn greeting_message(name: Option<&str>) -> String {
    format!("Hello, {}! Welcome to the loyalty program", name.unwrap_or("User"))
}

async fn greeting(Json(request): Json<GreetingRequest>) -> Json<GreetingResponse> {
    let message = greeting_message(request.name.as_deref());
    tracing::info!("greeting requested for {}", request.name.as_deref().unwrap_or("User"));

    Json(GreetingResponse {
        message,
        timestamp: Utc::now(),
        success: true,
    })
}

#[derive(Deserialize)]
pub struct QuoteRequest {
    #[serde(default)]
    pub amount: f64,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsQuote {
    pub points: i64,
    pub purchase_amount: f64,
    pub bonus_applied: bool,
    pub message: &'static str,
}

/// Quote loyalty points for a purchase: 1 point for every $10 spent,
/// doubled for purchases over $100. Stateless; the quote is computed server
/// side so clients cannot manipulate point awards.
pub fn quote_points(purchase_amount: f64) -> PointsQuote {
    let mut points = (purchase_amount / 10.0).floor() as i64;
    let bonus_applied = purchase_amount > 100.0;

    if bonus_applied {
        points *= 2;
    }

    PointsQuote {
        points,
        purchase_amount,
        bonus_applied,
        message: if bonus_applied {
            "Bonus! You earned 2x points!"
        } else {
            "Points calculated successfully"
        },
    }
}

async fn points_quote(Json(request): Json<QuoteRequest>) -> Json<PointsQuote> {
    Json(quote_points(request.amount))
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCustomerRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shop_owner_id: Option<String>,
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVisitRequest {
    pub customer_id: String,
    #[serde(default)]
    pub points_earned: i64,
}

#[derive(Serialize)]
pub struct CreatedResponse {
    pub id: String,
}

/// The write path for customer records: create the document, then notify
/// the aggregation workers with a "customer created" event carrying a
/// snapshot of the record.
async fn create_customer(
    State(state): State<AppState>,
    Json(request): Json<CreateCustomerRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let payload = serde_json::to_value(&request)?;
    create_record(&state, EntityKind::Customer, CUSTOMERS, payload, FieldSet::new()).await
}

/// The write path for visit records. Visits are immutable once created;
/// workers only ever read them through the event payload.
async fn create_visit(
    State(state): State<AppState>,
    Json(request): Json<CreateVisitRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let payload = serde_json::to_value(&request)?;
    let extra = FieldSet::new().server_timestamp("createdAt");
    create_record(&state, EntityKind::Visit, VISITS, payload, extra).await
}

async fn create_record(
    state: &AppState,
    entity_kind: EntityKind,
    collection: &str,
    payload: serde_json::Value,
    extra: FieldSet,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let id = Uuid::now_v7().to_string();

    let fields = match payload.clone() {
        serde_json::Value::Object(document) => FieldSet::from(document),
        _ => FieldSet::new(),
    }
    .extend(extra);

    if !state
        .store
        .insert_if_absent(collection, &id, fields)
        .await?
    {
        return Err(ApiError::Conflict(id));
    }

    state
        .queue
        .enqueue(NewChangeEvent::new(entity_kind, &id, payload))
        .await?;

    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_large_purchase_doubles_its_points() {
        let quote = quote_points(150.0);

        assert_eq!(quote.points, 30);
        assert!(quote.bonus_applied);
        assert_eq!(quote.message, "Bonus! You earned 2x points!");
    }

    #[test]
    fn a_small_purchase_earns_one_point_per_ten_dollars() {
        let quote = quote_points(95.0);

        assert_eq!(quote.points, 9);
        assert!(!quote.bonus_applied);
    }

    #[test]
    fn exactly_one_hundred_dollars_earns_no_bonus() {
        let quote = quote_points(100.0);

        assert_eq!(quote.points, 10);
        assert!(!quote.bonus_applied);
    }

    #[test]
    fn a_missing_amount_quotes_zero_points() {
        let quote = quote_points(0.0);

        assert_eq!(quote.points, 0);
        assert!(!quote.bonus_applied);
    }

    #[test]
    fn greets_by_name_with_a_fallback() {
        assert_eq!(
            greeting_message(Some("Alex")),
            "Hello, Alex! Welcome to the loyalty program"
        );
        assert_eq!(
            greeting_message(None),
            "Hello, User! Welcome to the loyalty program"
        );
    }
}
