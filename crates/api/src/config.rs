//! Server configuration, read from `JOBWARD_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::Duration;
use thiserror::Error;

use jobward_core::WorkerId;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:9488";
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error(
        "refusing to listen on non-loopback address {addr}: requires JOBWARD_ALLOW_NON_LOOPBACK=true, JOBWARD_AUTH_TOKEN and JOBWARD_MAX_BODY_BYTES"
    )]
    NonLoopback { addr: SocketAddr },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub root: PathBuf,
    pub listen: SocketAddr,
    /// Bearer token required on `/v1` routes when set.
    pub auth_token: Option<String>,
    pub max_body_bytes: usize,
    pub lease_ttl: Duration,
    pub worker_id: WorkerId,
    /// Advance jobs in the background after submit and approve.
    pub auto_advance: bool,
    /// Recorded as the approver when a request names none.
    pub default_approver: String,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let root = PathBuf::from(get("JOBWARD_ROOT").unwrap_or_else(|| ".jobward".to_string()));
        let listen: SocketAddr = parse_var("JOBWARD_LISTEN", get("JOBWARD_LISTEN"), DEFAULT_LISTEN.parse())?;
        let auth_token = get("JOBWARD_AUTH_TOKEN");
        let explicit_body_limit = get("JOBWARD_MAX_BODY_BYTES");
        let max_body_bytes: usize = parse_var(
            "JOBWARD_MAX_BODY_BYTES",
            explicit_body_limit.clone(),
            Ok(DEFAULT_MAX_BODY_BYTES),
        )?;
        if max_body_bytes == 0 {
            return Err(invalid("JOBWARD_MAX_BODY_BYTES", "0", "must be positive"));
        }
        let allow_non_loopback = parse_flag("JOBWARD_ALLOW_NON_LOOPBACK", get("JOBWARD_ALLOW_NON_LOOPBACK"), false)?;
        let ttl_secs: i64 = parse_var("JOBWARD_LEASE_TTL_SECS", get("JOBWARD_LEASE_TTL_SECS"), Ok(30))?;
        if ttl_secs <= 0 {
            return Err(invalid(
                "JOBWARD_LEASE_TTL_SECS",
                &ttl_secs.to_string(),
                "must be positive",
            ));
        }
        let worker_raw = get("JOBWARD_WORKER_ID").unwrap_or_else(|| "jobward-api".to_string());
        let worker_id = WorkerId::new(&worker_raw)
            .map_err(|e| invalid("JOBWARD_WORKER_ID", &worker_raw, e.message()))?;
        let auto_advance = parse_flag("JOBWARD_AUTO_ADVANCE", get("JOBWARD_AUTO_ADVANCE"), true)?;
        let default_approver = get("JOBWARD_APPROVED_BY")
            .or_else(|| get("USER"))
            .unwrap_or_else(|| "unknown".to_string());

        if !listen.ip().is_loopback()
            && !(allow_non_loopback && auth_token.is_some() && explicit_body_limit.is_some())
        {
            return Err(ConfigError::NonLoopback { addr: listen });
        }

        Ok(Self {
            root,
            listen,
            auth_token,
            max_body_bytes,
            lease_ttl: Duration::seconds(ttl_secs),
            worker_id,
            auto_advance,
            default_approver,
        })
    }

    /// Defaults rooted at `root` on an ephemeral loopback port, with
    /// auto-advance off. Ignores the process environment.
    pub fn local(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::from_lookup(|_| None)?;
        config.root = root.into();
        config.listen = SocketAddr::from(([127, 0, 0, 1], 0));
        config.auto_advance = false;
        Ok(config)
    }
}

fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_var<T>(
    var: &'static str,
    raw: Option<String>,
    default: Result<T, T::Err>,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw.parse().map_err(|e: T::Err| invalid(var, &raw, e.to_string())),
        None => default.map_err(|e| invalid(var, "<default>", e.to_string())),
    }
}

fn parse_flag(var: &'static str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(var, &raw, "expected true or false")),
    }
}
