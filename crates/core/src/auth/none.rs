use async_trait::async_trait;

use super::{AuthError, AuthRequest, Authenticator, Identity};

/// Trusts the forwarded user header and lets everyone else through as anonymous.
/// Intended for deployments where a gateway already authenticated the caller.
#[derive(Default)]
pub struct NoneAuthenticator;

impl NoneAuthenticator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Authenticator for NoneAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError> {
        Ok(match request.forwarded_user() {
            Some(user) => Identity::new(user, "none"),
            None => Identity::anonymous(),
        })
    }

    fn method_name(&self) -> &'static str {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::IpAddr;

    fn request(user: Option<&str>) -> AuthRequest {
        let mut headers = HashMap::new();
        if let Some(user) = user {
            headers.insert("x-user-id".to_string(), user.to_string());
        }
        AuthRequest {
            headers,
            source_ip: "127.0.0.1".parse::<IpAddr>().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_without_header_is_anonymous() {
        let identity = NoneAuthenticator::new()
            .authenticate(&request(None))
            .await
            .unwrap();
        assert!(identity.is_anonymous());
        assert_eq!(identity.method, "none");
    }

    #[tokio::test]
    async fn test_forwarded_user_is_trusted() {
        let identity = NoneAuthenticator::new()
            .authenticate(&request(Some("reader-7")))
            .await
            .unwrap();
        assert_eq!(identity.user_id, "reader-7");
    }
}
