//! Webhook request authentication (spec §4.11): bearer token (constant-time
//! compare) or HTTP basic (bcrypt-aware).

use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

use crate::error::Error;
use crate::k8s::ingester::WebhookAuth;
use crate::webhook_server::secrets::SecretCache;

/// Checks `headers` against `auth`'s requirement. Returns `Ok(true)` on
/// success, `Ok(false)` on a credential mismatch (caller responds 401 with
/// no body detail, per spec), and `Err` only when the backing secret itself
/// could not be fetched (caller responds 500 with a `[CONFIG_ERROR]` log).
pub async fn authenticate(
    auth: &WebhookAuth,
    secrets: &SecretCache,
    namespace: &str,
    headers: &HeaderMap,
) -> Result<bool, Error> {
    match auth {
        WebhookAuth::Bearer { secret_name } => {
            let expected = secrets.get(namespace, secret_name, "token").await?;
            let Some(provided) = bearer_token(headers) else {
                return Ok(false);
            };
            Ok(constant_time_eq(provided.as_bytes(), &expected))
        }
        WebhookAuth::Basic { secret_name } => {
            let expected_user = secrets.get(namespace, secret_name, "username").await?;
            let expected_hash = secrets.get(namespace, secret_name, "password").await?;
            let Some((user, pass)) = basic_credentials(headers) else {
                return Ok(false);
            };
            if !constant_time_eq(user.as_bytes(), &expected_user) {
                return Ok(false);
            }
            let expected_hash = String::from_utf8_lossy(&expected_hash);
            Ok(bcrypt::verify(pass, &expected_hash).unwrap_or(false))
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::to_string)
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_rejects_length_mismatch() {
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[test]
    fn constant_time_eq_accepts_equal_bytes() {
        assert!(constant_time_eq(b"token123", b"token123"));
    }
}
