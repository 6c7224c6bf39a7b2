use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

pub const DEFAULT_DB_URL: &str = "sqlite://policies.db";
pub const DEFAULT_APP_NAME: &str = "policy-registry";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub db_url: String,
    pub db_max_connections: u32,
    pub db_timeout_ms: u64,
    pub api_key: Option<String>,
    pub app_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

impl GatewayConfig {
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("POLREG_CONFIG_PATH") {
            let config_path = config_path.trim();
            if !config_path.is_empty() {
                let file_kv = parse_env_file(config_path)?;
                merged.extend(file_kv);
            }
        }

        merged.extend(std::env::vars());

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let bind_addr = parse_or(
            kv,
            "POLREG_BIND_ADDR",
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000),
            "a valid host:port socket address",
        )?;

        let api_key = optional_nonempty(kv, "POLREG_API_KEY");

        // POLREG_DEV_ALLOW_NONLOCAL_BIND only covers the unspecified address
        // (containers); a concrete non-loopback address always needs a key.
        let escape_hatch =
            flag(kv, "POLREG_DEV_ALLOW_NONLOCAL_BIND") && bind_addr.ip().is_unspecified();
        if !bind_addr.ip().is_loopback() && api_key.is_none() && !escape_hatch {
            return Err(StartupError {
                code: "ERR_NONLOCAL_BIND_REQUIRES_AUTH",
                message: "non-local bind requires POLREG_API_KEY; refuse startup".to_string(),
            });
        }

        let db_url = optional_nonempty(kv, "POLREG_DB_URL")
            .unwrap_or_else(|| DEFAULT_DB_URL.to_string());
        if !db_url.starts_with("sqlite:") {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "POLREG_DB_URL must be a sqlite: URL".to_string(),
            });
        }

        let db_max_connections: u32 =
            parse_or(kv, "POLREG_DB_MAX_CONNECTIONS", 8, "an integer")?;
        if db_max_connections == 0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "POLREG_DB_MAX_CONNECTIONS must be >= 1".to_string(),
            });
        }

        let db_timeout_ms: u64 = parse_or(kv, "POLREG_DB_TIMEOUT_MS", 2000, "an integer")?;

        let app_name = optional_nonempty(kv, "POLREG_APP_NAME")
            .unwrap_or_else(|| DEFAULT_APP_NAME.to_string());

        Ok(Self {
            bind_addr,
            db_url,
            db_max_connections,
            db_timeout_ms,
            api_key,
            app_name,
        })
    }
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StartupError {
        code: "ERR_CONFIG_FILE_READ",
        message: format!("failed to read config file at {}", path),
    })?;

    parse_env_lines(&contents)
}

fn parse_env_lines(contents: &str) -> Result<HashMap<String, String>, StartupError> {
    let mut kv = HashMap::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| StartupError {
            code: "ERR_CONFIG_FILE_PARSE",
            message: format!("invalid config line {} (expected KEY=VALUE)", idx + 1),
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(StartupError {
                code: "ERR_CONFIG_FILE_PARSE",
                message: format!("invalid config line {} (empty key)", idx + 1),
            });
        }

        kv.insert(key.to_string(), strip_quotes(value.trim()));
    }

    Ok(kv)
}

fn strip_quotes(s: &str) -> String {
    for quote in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(quote).and_then(|rest| rest.strip_suffix(quote)) {
            return inner.to_string();
        }
    }
    s.to_string()
}

fn optional_nonempty(kv: &HashMap<String, String>, key: &str) -> Option<String> {
    kv.get(key)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Parses `key` when present and non-blank, otherwise returns `default`.
fn parse_or<T: FromStr>(
    kv: &HashMap<String, String>,
    key: &'static str,
    default: T,
    expected: &str,
) -> Result<T, StartupError> {
    match kv.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(v) => v.parse::<T>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be {}", key, expected),
        }),
    }
}

fn flag(kv: &HashMap<String, String>, key: &str) -> bool {
    kv.get(key)
        .map(|v| v.trim())
        .is_some_and(|v| ["1", "true", "yes"].iter().any(|t| v.eq_ignore_ascii_case(t)))
}
