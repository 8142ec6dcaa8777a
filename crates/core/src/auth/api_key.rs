//! Shared-secret authentication for service-to-service calls.

use async_trait::async_trait;

use super::{AuthError, AuthRequest, Authenticator, Identity};

/// User id used when a key-holding caller does not forward a user.
pub const SERVICE_USER: &str = "api_key_user";

/// Validates requests against a configured API key, sent either as
/// `Authorization: Bearer <key>` or `X-API-Key: <key>`.
///
/// A valid caller may act on behalf of a platform user through `x-user-id`.
pub struct ApiKeyAuthenticator {
    expected_key: String,
}

impl ApiKeyAuthenticator {
    pub fn new(api_key: String) -> Self {
        Self {
            expected_key: api_key,
        }
    }

    fn extract_key<'a>(&self, request: &'a AuthRequest) -> Option<&'a str> {
        if let Some(value) = request.headers.get("authorization") {
            let bearer = value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "));
            if bearer.is_some() {
                return bearer;
            }
        }
        request.headers.get("x-api-key").map(String::as_str)
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError> {
        let provided = self
            .extract_key(request)
            .ok_or(AuthError::NotAuthenticated)?;

        if !constant_time_eq(provided.as_bytes(), self.expected_key.as_bytes()) {
            return Err(AuthError::InvalidCredentials("Invalid API key".to_string()));
        }

        let user = request.forwarded_user().unwrap_or(SERVICE_USER);
        Ok(Identity::new(user, "api_key"))
    }

    fn method_name(&self) -> &'static str {
        "api_key"
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
