//! HTTP Basic authentication.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::debug;

use super::state::ServerState;

pub const AUTH_REALM: &str = "library-server";

/// Proof that the request passed authentication, or that none is configured.
#[derive(Debug)]
pub struct Authorized;

pub struct AuthRejection;

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            [(
                header::WWW_AUTHENTICATE,
                format!("Basic realm=\"{}\"", AUTH_REALM),
            )],
        )
            .into_response()
    }
}

/// Decodes a `Basic` authorization value into user name and password.
pub fn parse_basic_credentials(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

impl FromRequestParts<ServerState> for Authorized {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = &state.config.auth_password else {
            return Ok(Authorized);
        };
        let credentials = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_basic_credentials);
        match credentials {
            Some((_, password)) if password == *expected => Ok(Authorized),
            Some((user, _)) => {
                debug!("Wrong password for user {:?}", user);
                Err(AuthRejection)
            }
            None => Err(AuthRejection),
        }
    }
}
