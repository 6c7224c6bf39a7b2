use std::sync::{Arc, RwLock};

use hex::ToHex;
use http::HeaderMap;
use http::header;
use sha2::Digest;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const API_KEY_SCHEME: &str = "ApiKey";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AuthError {}

/// Shared, replaceable access secret. Clones observe the same value, and
/// every check reads whatever is current at that moment.
#[derive(Clone, Default)]
pub struct AccessSecret {
    inner: Arc<RwLock<Option<String>>>,
}

impl std::fmt::Debug for AccessSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessSecret")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl AccessSecret {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(normalize(secret))),
        }
    }

    pub fn current(&self) -> Option<String> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, secret: Option<String>) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = normalize(secret);
    }

    pub fn is_enabled(&self) -> bool {
        self.current().is_some()
    }
}

fn normalize(secret: Option<String>) -> Option<String> {
    secret.filter(|s| !s.trim().is_empty())
}

/// Allows the request when no secret is configured, or when any presented
/// credential equals the configured secret.
pub fn authorize(headers: &HeaderMap, secret: &AccessSecret) -> Result<(), AuthError> {
    let Some(expected) = secret.current() else {
        return Ok(());
    };

    let presented = presented_credentials(headers);
    if presented.is_empty() {
        return Err(AuthError {
            code: "ERR_AUTH_REQUIRED",
            message: "missing API key".to_string(),
        });
    }

    let expected_digest = sha256_hex(expected.as_bytes());
    if presented
        .iter()
        .any(|candidate| sha256_hex(candidate.as_bytes()) == expected_digest)
    {
        return Ok(());
    }

    Err(AuthError {
        code: "ERR_AUTH_INVALID",
        message: "invalid API key".to_string(),
    })
}

fn presented_credentials(headers: &HeaderMap) -> Vec<String> {
    let mut out = Vec::with_capacity(2);

    if let Some(key) = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
    {
        out.push(key.to_string());
    }

    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(api_key_token)
    {
        out.push(token);
    }

    out
}

fn api_key_token(authz: &str) -> Option<String> {
    let authz = authz.trim();
    let (scheme, token) = authz.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case(API_KEY_SCHEME) {
        return None;
    }

    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(bytes);
    hasher.finalize().encode_hex::<String>()
}
