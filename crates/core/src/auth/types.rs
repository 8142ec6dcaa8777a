use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

/// Header carrying the caller's platform user id, set by the gateway in front of us.
pub const USER_ID_HEADER: &str = "x-user-id";

/// User id assigned to callers that did not identify themselves.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Request information for authentication. Header names are lowercase.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub headers: HashMap<String, String>,
    pub source_ip: IpAddr,
}

impl AuthRequest {
    /// The forwarded user id, if present and non-blank.
    pub fn forwarded_user(&self) -> Option<&str> {
        self.headers
            .get(USER_ID_HEADER)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Authenticated identity. Wallet and vote endpoints act on `user_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub method: String,
    pub claims: HashMap<String, serde_json::Value>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, method: &str) -> Self {
        Self {
            user_id: user_id.into(),
            method: method.to_string(),
            claims: HashMap::new(),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS_USER, "none")
    }

    /// Anonymous callers may read but cannot spend tickets.
    pub fn is_anonymous(&self) -> bool {
        self.user_id == ANONYMOUS_USER
    }
}
