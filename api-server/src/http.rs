//! HTTP surface: liveness, health, recommendations, chat

use std::collections::HashMap;

use axum::{
    async_trait,
    body::Bytes,
    extract::{rejection::JsonRejection, FromRequest, Multipart, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use agri_ml_binding::{
    fields_from_json, Domain, EnsembleResult, RecommendError, RecommendationService,
};

use crate::chat::{ChatClient, ChatError};

#[derive(Clone)]
pub struct AppState {
    pub service: RecommendationService,
    pub chat: ChatClient,
}

/// Every failure is reported as `{"error": "..."}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Recommend(#[from] RecommendError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Recommend(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Recommend(_) | ApiError::Chat(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "rejected request");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Request fields by name, from a multipart form, a urlencoded form or a JSON object
#[derive(Debug, Default)]
pub struct FieldMap(pub HashMap<String, String>);

#[async_trait]
impl<S> FromRequest<S> for FieldMap
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let mut multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            let mut fields = HashMap::new();
            while let Some(field) = multipart
                .next_field()
                .await
                .map_err(|e| ApiError::BadRequest(e.to_string()))?
            {
                let Some(name) = field.name().map(str::to_string) else {
                    continue;
                };
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
                fields.insert(name, value);
            }
            Ok(FieldMap(fields))
        } else if content_type.starts_with("application/json") {
            let body = Bytes::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            let value: Value = serde_json::from_slice(&body)
                .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))?;
            let fields = fields_from_json(value).ok_or_else(|| {
                ApiError::BadRequest("request body must be a JSON object".to_string())
            })?;
            Ok(FieldMap(fields))
        } else {
            let Form(fields) = Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            Ok(FieldMap(fields))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// An absent message is sent as an empty prompt
    #[serde(default)]
    pub message: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/predict_crop", post(predict_crop_handler))
        .route("/predict_fertilizer", post(predict_fertilizer_handler))
        .route("/chat", post(chat_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root_handler() -> &'static str {
    "API is running!"
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let domains: serde_json::Map<String, Value> = Domain::ALL
        .into_iter()
        .map(|d| (d.to_string(), Value::Bool(state.service.is_available(d))))
        .collect();
    Json(json!({ "status": "ok", "domains": domains }))
}

/// Inference is CPU-bound; keep it off the async workers
async fn recommend(
    state: AppState,
    domain: Domain,
    FieldMap(fields): FieldMap,
) -> Result<Json<EnsembleResult>, ApiError> {
    let service = state.service;
    let result = tokio::task::spawn_blocking(move || service.recommend(domain, &fields))
        .await
        .map_err(|e| ApiError::Internal(format!("inference task failed: {e}")))??;
    tracing::info!(%domain, final_prediction = %result.final_prediction, "recommendation served");
    Ok(Json(result))
}

async fn predict_crop_handler(
    State(state): State<AppState>,
    fields: FieldMap,
) -> Result<Json<EnsembleResult>, ApiError> {
    recommend(state, Domain::Crop, fields).await
}

async fn predict_fertilizer_handler(
    State(state): State<AppState>,
    fields: FieldMap,
) -> Result<Json<EnsembleResult>, ApiError> {
    recommend(state, Domain::Fertilizer, fields).await
}

async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let reply = state.chat.complete(&request.message).await?;
    Ok(Json(json!({ "response": reply })))
}
