//! Catch-all handler that forwards matched requests to their backend.

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Extension, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::Response;
use tracing::{debug, instrument};

use super::ExchangeContext;
use super::fallback::fallback_response;
use super::route::RouteDescriptor;
use super::upstream::UpstreamRequest;
use crate::auth::Identity;
use crate::classifier::{UNKNOWN_SERVICE, error_response};
use crate::error::{GatewayError, GatewayResult};
use crate::state::AppState;

/// Outbound header naming the service the request was routed to.
pub const SERVICE_NAME_HEADER: &str = "x-service-name";

pub const AUTH_SUBJECT_HEADER: &str = "x-auth-subject";
pub const AUTH_ROLES_HEADER: &str = "x-auth-roles";
pub const TENANT_ID_HEADER: &str = "x-tenant-id";

/// Headers only the gateway may set. Inbound copies are always dropped.
const GATEWAY_OWNED_HEADERS: [&str; 4] = [
    SERVICE_NAME_HEADER,
    AUTH_SUBJECT_HEADER,
    AUTH_ROLES_HEADER,
    TENANT_ID_HEADER,
];

/// Forward a request to the service whose prefix matches its path.
///
/// The call runs through the route's circuit breaker. An open breaker, a
/// transport failure or a configured breaker status diverts to the fallback
/// with the triggering error attached; any other backend status is relayed
/// as-is. The response always carries an [`ExchangeContext`] naming the
/// service.
#[instrument(skip_all, fields(method = %method, path = %uri.path()))]
pub async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    identity: Option<Extension<Identity>>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let path = uri.path();

    let Some(route) = state.routes.match_path(path) else {
        return error_response(&GatewayError::RouteNotFound(path.to_string()), UNKNOWN_SERVICE, path);
    };

    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            let error = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                GatewayError::PayloadTooLarge(rejection.body_text())
            } else {
                GatewayError::Unclassified(rejection.body_text())
            };
            return with_context(
                error_response(&error, &route.service_id, path),
                ExchangeContext::new(&route.service_id).with_failure(error),
            );
        }
    };

    let identity = identity.as_ref().map(|Extension(identity)| identity);
    let headers = match outbound_headers(
        headers,
        route,
        identity,
        state.config.forward_identity_headers,
    ) {
        Ok(headers) => headers,
        Err(error) => return fallback_response(&route.service_id, Some(&error)),
    };

    let path_and_query = uri
        .path_and_query()
        .map_or(path, |pq| pq.as_str());
    let request = UpstreamRequest {
        method,
        path_and_query: route.strip_prefix(path_and_query),
        headers,
        body,
    };

    debug!(service = %route.service_id, target = %request.path_and_query, "Dispatching");

    let upstream = &state.upstream;
    let trip_codes = &state.config.circuit_breaker_status_codes;
    let outcome = state
        .breakers
        .run(&route.breaker_id, move || async move {
            let response = upstream.forward(route, request).await?;
            let status = response.status();
            if trip_codes.contains(&status.as_u16()) {
                return Err(GatewayError::UpstreamStatus {
                    code: status.as_u16(),
                    detail: status.canonical_reason().unwrap_or("unexpected status").to_string(),
                });
            }
            Ok(response)
        })
        .await;

    match outcome {
        Ok(response) => with_context(response, ExchangeContext::new(&route.service_id)),
        Err(error) => fallback_response(&route.service_id, Some(&error)),
    }
}

/// Build the header set sent to the backend.
///
/// Gateway-owned headers supplied by the client are removed, the service
/// name is injected, and the verified identity is added only when
/// `forward_identity` is set.
pub fn outbound_headers(
    mut headers: HeaderMap,
    route: &RouteDescriptor,
    identity: Option<&Identity>,
    forward_identity: bool,
) -> GatewayResult<HeaderMap> {
    for name in GATEWAY_OWNED_HEADERS {
        headers.remove(name);
    }

    headers.insert(SERVICE_NAME_HEADER, header_value(&route.service_id)?);

    if let (true, Some(identity)) = (forward_identity, identity) {
        headers.insert(AUTH_SUBJECT_HEADER, header_value(identity.subject())?);

        let roles = identity
            .authorities()
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",");
        headers.insert(AUTH_ROLES_HEADER, header_value(&roles)?);

        if let Some(tenant) = identity.tenant() {
            headers.insert(TENANT_ID_HEADER, header_value(tenant)?);
        }
    }

    Ok(headers)
}

fn header_value(value: &str) -> GatewayResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| GatewayError::Unclassified(format!("cannot encode header value: {e}")))
}

fn with_context(mut response: Response, context: ExchangeContext) -> Response {
    response.extensions_mut().insert(context);
    response
}
