use std::{path::PathBuf, time::Duration};

use crate::error::ConfigError;
use crate::models::BackendKind;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Credential and endpoint of one upstream service.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub xai: Option<Endpoint>,
    pub deepseek: Option<Endpoint>,
    pub replicate: Option<Endpoint>,
    pub port: u16,
    pub scratch_dir: PathBuf,
    pub audit_dir: PathBuf,
    pub font_path: PathBuf,
    pub face_model_path: Option<PathBuf>,
    pub upstream_timeout: Duration,
    pub max_upload_bytes: usize,
    /// Sessions untouched for longer than this are dropped.
    pub session_idle: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let endpoint = |key: &str, base: &str, default_base: &str| {
            var(key).map(|api_key| Endpoint {
                api_key,
                base_url: var(base).unwrap_or_else(|| default_base.to_string()).trim_end_matches('/').to_string(),
            })
        };

        let xai = endpoint("XAI_API_KEY", "XAI_API_BASE", "https://api.x.ai/v1");
        let deepseek = endpoint("DEEPSEEK_API_KEY", "DEEPSEEK_API_BASE", "https://api.deepseek.com");
        let replicate = endpoint("REPLICATE_API_TOKEN", "REPLICATE_API_BASE", "https://api.replicate.com/v1");

        if xai.is_none() && deepseek.is_none() && replicate.is_none() {
            return Err(ConfigError::NoCredentials);
        }

        let port = parse_or(var("PORT"), "PORT", 8080u16)?;
        let timeout_secs = parse_or(var("UPSTREAM_TIMEOUT_SECS"), "UPSTREAM_TIMEOUT_SECS", 120u64)?;
        let max_upload_bytes = parse_or(var("MAX_UPLOAD_BYTES"), "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;
        let idle_secs = parse_or(var("SESSION_IDLE_SECS"), "SESSION_IDLE_SECS", 3600u64)?;

        let scratch_dir = PathBuf::from(var("SCRATCH_DIR").unwrap_or_else(|| "temp".into()));
        let audit_dir = var("AUDIT_DIR").map(PathBuf::from).unwrap_or_else(|| scratch_dir.join("responses"));

        Ok(Self {
            xai,
            deepseek,
            replicate,
            port,
            scratch_dir,
            audit_dir,
            font_path: PathBuf::from(var("REPORT_FONT_PATH").unwrap_or_else(|| "static/fonts/NotoSansTC-Regular.ttf".into())),
            face_model_path: var("FACE_MODEL_PATH").map(PathBuf::from),
            upstream_timeout: Duration::from_secs(timeout_secs),
            max_upload_bytes,
            session_idle: Duration::from_secs(idle_secs),
        })
    }

    pub fn endpoint(&self, kind: BackendKind) -> Option<&Endpoint> {
        match kind {
            BackendKind::Grok => self.xai.as_ref(),
            BackendKind::DeepSeek => self.deepseek.as_ref(),
            BackendKind::Replicate => self.replicate.as_ref(),
        }
    }

    /// Vision backends that have a credential, in call order.
    pub fn configured_backends(&self) -> Vec<BackendKind> {
        BackendKind::ALL.into_iter().filter(|k| self.endpoint(*k).is_some()).collect()
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { name, value }),
    }
}

/// Masks a credential for logging.
pub fn mask(secret: &str) -> String {
    format!("{}...", secret.chars().take(6).collect::<String>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn no_credentials_is_fatal() {
        let err = AppConfig::from_lookup(lookup(&[("PORT", "9000")])).unwrap_err();
        assert!(matches!(err, ConfigError::NoCredentials));
    }

    #[test]
    fn blank_credentials_count_as_missing() {
        let err = AppConfig::from_lookup(lookup(&[("XAI_API_KEY", "  ")])).unwrap_err();
        assert!(matches!(err, ConfigError::NoCredentials));
    }

    #[test]
    fn only_credentialed_backends_are_offered() {
        let cfg = AppConfig::from_lookup(lookup(&[("REPLICATE_API_TOKEN", "r8_x"), ("XAI_API_KEY", "xai-1")])).unwrap();
        assert_eq!(cfg.configured_backends(), vec![BackendKind::Grok, BackendKind::Replicate]);
        assert!(cfg.deepseek.is_none());
        assert_eq!(cfg.xai.unwrap().base_url, "https://api.x.ai/v1");
    }

    #[test]
    fn defaults_and_overrides() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("DEEPSEEK_API_KEY", "sk-1"),
            ("DEEPSEEK_API_BASE", "http://localhost:9999/"),
            ("SCRATCH_DIR", "/tmp/scratch"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.deepseek.unwrap().base_url, "http://localhost:9999");
        assert_eq!(cfg.audit_dir, PathBuf::from("/tmp/scratch/responses"));
        assert_eq!(cfg.upstream_timeout, Duration::from_secs(120));
        assert_eq!(cfg.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(cfg.session_idle, Duration::from_secs(3600));
        assert!(cfg.face_model_path.is_none());
    }

    #[test]
    fn malformed_port_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("XAI_API_KEY", "k"), ("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "PORT", .. }));
    }

    #[test]
    fn mask_keeps_short_prefix() {
        assert_eq!(mask("xai-abcdefghijkl"), "xai-ab...");
    }
}
