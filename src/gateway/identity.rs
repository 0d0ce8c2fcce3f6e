use reqwest::header::HeaderMap;
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Longest accepted user id, in characters.
pub const MAX_IDENTITY_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    User,
    Ip,
    Anonymous,
}

/// Who a request is accounted to, for both rate limiting and usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestIdentity {
    kind: IdentityKind,
    id: String,
}

impl RequestIdentity {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: IdentityKind::User,
            id: id.into(),
        }
    }

    pub fn ip(addr: IpAddr) -> Self {
        Self {
            kind: IdentityKind::Ip,
            id: addr.to_string(),
        }
    }

    pub fn anonymous() -> Self {
        Self {
            kind: IdentityKind::Anonymous,
            id: "anonymous".to_string(),
        }
    }

    /// `x-user-id` header if present and non-blank, else the client address,
    /// else `anonymous`.
    pub fn from_headers(headers: &HeaderMap, client_ip: Option<IpAddr>) -> Self {
        let user = headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        match (user, client_ip) {
            (Some(user), _) => Self::user(user),
            (None, Some(ip)) => Self::ip(ip),
            (None, None) => Self::anonymous(),
        }
    }

    pub fn kind(&self) -> IdentityKind {
        self.kind
    }

    /// Identifier recorded in usage records and budget checks.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Rate limiter key: `user:<id>`, `ip:<addr>` or `anonymous`.
    ///
    /// Characters outside `[A-Za-z0-9._@-]` are replaced so a user id can
    /// never break out of its namespace in the store.
    pub fn limiter_key(&self) -> String {
        let clean: String = self
            .id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        match self.kind {
            IdentityKind::User => format!("user:{}", clean),
            IdentityKind::Ip => format!("ip:{}", clean),
            IdentityKind::Anonymous => "anonymous".to_string(),
        }
    }
}

impl fmt::Display for RequestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
