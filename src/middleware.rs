use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::env;
use uuid::Uuid;

use crate::error::AppError;

/// The authenticated account acting on this request.
///
/// Authentication itself happens upstream (the auth-terminating proxy);
/// this service receives the already-established identity per request and
/// re-checks ownership against it on every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity(pub Uuid);

/// Header carrying the authenticated account id, set by the upstream proxy.
pub const IDENTITY_HEADER: &str = "x-identity-id";

fn unauthorized() -> Response {
    AppError::AuthRequired.into_response()
}

/// Middleware establishing the request identity for the dashboard API.
///
/// If the `SERVICE_SECRET` environment variable is set and non-empty, the
/// request must carry a matching `Authorization` header (the shared
/// secret between this service and the proxy). The check is skipped when
/// the variable is unset.
///
/// The `x-identity-id` header must then hold the acting account's UUID;
/// requests without one fail as unauthenticated. The parsed identity is
/// inserted into request extensions for handlers to consume.
pub async fn identity_middleware(
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, Response> {
    if let Ok(service_secret) = env::var("SERVICE_SECRET") {
        if !service_secret.is_empty() {
            match headers.get("Authorization") {
                Some(header_value) => match header_value.to_str() {
                    Ok(header_str) => {
                        if header_str != service_secret {
                            return Err(unauthorized());
                        }
                    }
                    Err(_) => return Err(unauthorized()),
                },
                None => return Err(unauthorized()),
            }
        }
    }

    let identity = headers
        .get(IDENTITY_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value.trim()).ok());

    match identity {
        Some(id) => {
            request.extensions_mut().insert(Identity(id));
            Ok(next.run(request).await)
        }
        None => Err(unauthorized()),
    }
}
