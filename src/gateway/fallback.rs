//! Fallback responses for routes whose forward failed or whose breaker is open.
//!
//! Always answers 503 with `{"message": ...}`. The message comes from the
//! classifier templates for the triggering error; when no error was recorded
//! the handler still answers, with an "unknown reason" message.

use axum::Json;
use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::warn;

use super::ExchangeContext;
use crate::classifier::classify;
use crate::error::GatewayError;
use crate::metrics;

#[derive(Debug, Serialize)]
struct FallbackBody {
    message: String,
}

pub fn fallback_message(service_id: &str, cause: Option<&GatewayError>) -> String {
    match cause {
        Some(error) => classify(error, service_id).message,
        None => format!("Service '{service_id}' failed due to an unknown reason."),
    }
}

/// Build the fallback response and tag it with the exchange context.
pub fn fallback_response(service_id: &str, cause: Option<&GatewayError>) -> Response {
    let message = fallback_message(service_id, cause);
    let cause_kind = cause.map_or("unknown", GatewayError::kind);

    warn!(service = service_id, cause = cause_kind, "Serving fallback response");
    metrics::record_fallback(service_id, cause_kind);

    let mut context = ExchangeContext::new(service_id);
    context.failure = cause.cloned();

    let mut response =
        (StatusCode::SERVICE_UNAVAILABLE, Json(FallbackBody { message })).into_response();
    response.extensions_mut().insert(context);
    response
}

/// `ANY /fallback/{service_id}`.
///
/// Reads the triggering error from the exchange context when one was
/// attached; a direct call carries none.
pub async fn fallback_handler(
    Path(service_id): Path<String>,
    context: Option<Extension<ExchangeContext>>,
) -> Response {
    let cause = context.and_then(|Extension(ctx)| ctx.failure);
    fallback_response(&service_id, cause.as_ref())
}
