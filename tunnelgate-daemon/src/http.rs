//! HTTP surface: the device-facing redemption endpoint.
//!
//! ```text
//! curl -X POST http://host:5000/get_config \
//!   --form tokenOne=vague --form tokenTwo=soldier --form tokenThree=noodle \
//!   --form 'capabilities={"uri":"/on","string":"Turn on","method":"POST"}' \
//!   -o device.conf
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tunnelgate_core::{TokenPosition, TokenWords};

use crate::error::EnrollmentError;
use crate::services::{Enrollment, EnrollmentRateLimiter, RateLimited};

/// Shared state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub enrollment: Arc<Enrollment>,
    pub rate_limiter: EnrollmentRateLimiter,
}

/// Errors a handler turns into an HTTP response.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),
    #[error("missing form field `{0}`")]
    MissingField(&'static str),
    #[error("invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error(transparent)]
    RateLimited(#[from] RateLimited),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::MissingField(_) | ApiError::Multipart(_) => {
                (StatusCode::BAD_REQUEST, "invalid request")
            }
            ApiError::Enrollment(EnrollmentError::MalformedCapability(_)) => {
                (StatusCode::BAD_REQUEST, "malformed capability")
            }
            ApiError::Enrollment(EnrollmentError::CredentialNotFound) => {
                (StatusCode::NOT_FOUND, "credential not found")
            }
            ApiError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "rate limited"),
            ApiError::Enrollment(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal error"),
        };

        // Server faults get a generic body; details stay in the log.
        let body = if status.is_server_error() {
            json!({ "error": message })
        } else {
            json!({ "error": message, "detail": self.to_string() })
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Build the router (exported for testing).
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/get_config", post(get_config))
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Enrollment endpoint listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

async fn health() -> &'static str {
    "ok"
}

/// Form fields of a redemption request.
#[derive(Default)]
struct RedeemForm {
    words: [Option<String>; 3],
    capabilities: Option<String>,
}

impl RedeemForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = RedeemForm::default();
        while let Some(field) = multipart.next_field().await? {
            let slot = match field.name() {
                Some("token_one" | "tokenOne") => &mut form.words[0],
                Some("token_two" | "tokenTwo") => &mut form.words[1],
                Some("token_three" | "tokenThree") => &mut form.words[2],
                Some("capabilities") => &mut form.capabilities,
                _ => continue,
            };
            *slot = Some(field.text().await?);
        }
        Ok(form)
    }

    fn into_parts(self) -> Result<(TokenWords, String), ApiError> {
        let [one, two, three] = self.words;
        let one = one.ok_or(ApiError::MissingField(TokenPosition::One.column()))?;
        let two = two.ok_or(ApiError::MissingField(TokenPosition::Two.column()))?;
        let three = three.ok_or(ApiError::MissingField(TokenPosition::Three.column()))?;
        let capabilities = self
            .capabilities
            .ok_or(ApiError::MissingField("capabilities"))?;
        Ok((TokenWords::new(one, two, three), capabilities))
    }
}

async fn get_config(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    state.rate_limiter.check()?;

    let (words, capabilities) = RedeemForm::read(multipart).await?.into_parts()?;
    let released = state.enrollment.redeem(&words, &capabilities).await?;

    let disposition = format!("attachment; filename=\"{}\"", released.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        released.contents.to_vec(),
    ))
}
