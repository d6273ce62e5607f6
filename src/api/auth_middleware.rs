use super::AppState;
use crate::auth::{SessionError, SessionIssuer};
use axum::{
    extract::{Request, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;


/// Authenticated caller, inserted as a request extension by [`require_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub user_id: Uuid,
    pub spotify_user_id: String,
}

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRejection(pub SessionError);

impl SessionRejection {
    /// Body text for the 401 response.
    pub fn message(&self) -> &'static str {
        match self.0 {
            SessionError::Missing => "unauthorized",
            SessionError::Expired => "session expired",
            SessionError::Invalid | SessionError::Signing => "invalid session",
        }
    }

    /// Expired cookies are removed so the browser stops sending them.
    pub fn clears_cookie(&self) -> bool {
        self.0 == SessionError::Expired
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
}

/// Resolve the session cookie in `headers` to a caller identity.
///
/// # Flow
/// 1. Read the session cookie (absent → `Missing`)
/// 2. Validate signature and expiry
/// 3. Return the identity carried in the claims
pub fn authenticate(
    headers: &HeaderMap,
    issuer: &SessionIssuer,
) -> Result<SessionIdentity, SessionRejection> {
    let token = issuer.read_cookie(headers).map_err(SessionRejection)?;
    let claims = issuer.validate(&token).map_err(SessionRejection)?;

    Ok(SessionIdentity {
        user_id: claims.user_id,
        spotify_user_id: claims.spotify_user_id,
    })
}

/// Middleware for routes that need a logged-in user.
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticate(request.headers(), &state.issuer) {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(rejection) => {
            debug!(path = %request.uri().path(), reason = rejection.message(), "Session rejected");
            rejection_response(&state.issuer, rejection)
        }
    }
}

fn rejection_response(issuer: &SessionIssuer, rejection: SessionRejection) -> Response {
    let body = Json(ErrorResponse {
        error: rejection.message(),
    });

    if rejection.clears_cookie() {
        (
            StatusCode::UNAUTHORIZED,
            [(SET_COOKIE, issuer.clear_cookie())],
            body,
        )
            .into_response()
    } else {
        (StatusCode::UNAUTHORIZED, body).into_response()
    }
}
