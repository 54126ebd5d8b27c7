//! Extractor checking the shared upload secret.

use axum::{extract::FromRequestParts, http::request::Parts};
use subtle::ConstantTimeEq;
use tracing::{instrument, trace};

use crate::{
    AppState,
    errors::{Error, Result},
};

/// Proof that the request carried the configured secret.
#[derive(Debug, Clone, Copy)]
pub struct Authorized;

/// Compare a presented header value with the expected secret in constant time.
pub fn secret_matches(presented: &[u8], expected: &str) -> bool {
    !expected.is_empty() && bool::from(presented.ct_eq(expected.as_bytes()))
}

impl FromRequestParts<AppState> for Authorized {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let auth = &state.config.auth;
        let Some(expected) = auth.secret.as_deref() else {
            return Err(Error::AuthorizationFailed);
        };

        let presented = parts
            .headers
            .get(auth.header_name.as_str())
            .map(|value| value.as_bytes())
            .unwrap_or_default();

        if secret_matches(presented, expected) {
            trace!("Shared secret accepted");
            Ok(Authorized)
        } else {
            Err(Error::AuthorizationFailed)
        }
    }
}
