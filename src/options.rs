//! Session and run configuration
//!
//! Both option types are string-keyed maps. Session entries are read once when
//! an [`InferenceSession`](crate::InferenceSession) is created and snapshotted
//! into a typed [`CloudConfig`]; run entries are read on every call.
//!
//! ## Session keys
//!
//! | Key | Meaning |
//! |-----|---------|
//! | `cloud.endpoint_type` | Remote protocol (`triton`) |
//! | `cloud.uri` | Endpoint base URI |
//! | `cloud.model_name` | Remote model name |
//! | `cloud.model_version` | Remote model version (optional) |
//! | `cloud.verbose` | Log request/response bodies (`true`/`false`) |
//! | `cloud.timeout_secs` | Request timeout in seconds (default 60) |
//!
//! ## Run keys
//!
//! | Key | Meaning |
//! |-----|---------|
//! | `use_cloud` | `"1"` dispatches the run to the endpoint |
//! | `cloud.auth_key` | Bearer credential for the endpoint |

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, StratusError};

/// Session key selecting the remote protocol
pub const CLOUD_ENDPOINT_TYPE: &str = "cloud.endpoint_type";
/// Session key holding the endpoint base URI
pub const CLOUD_URI: &str = "cloud.uri";
/// Session key holding the remote model name
pub const CLOUD_MODEL_NAME: &str = "cloud.model_name";
/// Session key holding the remote model version
pub const CLOUD_MODEL_VERSION: &str = "cloud.model_version";
/// Session key enabling verbose wire logging
pub const CLOUD_VERBOSE: &str = "cloud.verbose";
/// Session key overriding the request timeout
pub const CLOUD_TIMEOUT_SECS: &str = "cloud.timeout_secs";
/// Run key enabling remote dispatch
pub const USE_CLOUD: &str = "use_cloud";
/// Run key holding the bearer credential
pub const CLOUD_AUTH_KEY: &str = "cloud.auth_key";

/// Default request timeout for cloud endpoints
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Per-session configuration entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    entries: BTreeMap<String, String>,
}

impl SessionOptions {
    /// Create empty session options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a configuration entry, replacing any previous value
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if `key` is empty.
    pub fn add_session_config_entry(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        insert_entry(&mut self.entries, key.into(), value.into())
    }

    /// Look up a configuration entry
    #[must_use]
    pub fn get_session_config_entry(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// All entries in key order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Log severity for a single run, ordered from most to least verbose
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Everything
    Verbose = 0,
    /// Informational progress, plus wire payloads when `cloud.verbose` is set
    Info = 1,
    /// Warnings only
    Warning = 2,
    /// Errors only
    Error = 3,
    /// Fatal errors only
    Fatal = 4,
}

impl TryFrom<i32> for Severity {
    type Error = StratusError;

    fn try_from(level: i32) -> Result<Self> {
        match level {
            0 => Ok(Severity::Verbose),
            1 => Ok(Severity::Info),
            2 => Ok(Severity::Warning),
            3 => Ok(Severity::Error),
            4 => Ok(Severity::Fatal),
            other => Err(StratusError::InvalidConfiguration(format!(
                "log severity level must be in 0..=4, got {other}"
            ))),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Verbose => "verbose",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
        };
        write!(f, "{name}")
    }
}

/// Per-call configuration entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    entries: BTreeMap<String, String>,
    log_severity_level: Severity,
    run_tag: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            log_severity_level: Severity::Warning,
            run_tag: None,
        }
    }
}

impl RunOptions {
    /// Create run options with warning-level logging
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a configuration entry, replacing any previous value
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if `key` is empty.
    pub fn add_run_config_entry(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        insert_entry(&mut self.entries, key.into(), value.into())
    }

    /// Look up a configuration entry
    #[must_use]
    pub fn get_run_config_entry(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Set the numeric log severity (0 verbose .. 4 fatal)
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for levels outside `0..=4`.
    pub fn set_log_severity_level(&mut self, level: i32) -> Result<()> {
        self.log_severity_level = Severity::try_from(level)?;
        Ok(())
    }

    /// Current log severity
    #[must_use]
    pub fn log_severity_level(&self) -> Severity {
        self.log_severity_level
    }

    /// Whether events of `severity` should be emitted for this run
    #[must_use]
    pub fn logs(&self, severity: Severity) -> bool {
        severity >= self.log_severity_level
    }

    /// Attach a tag recorded on the run's log span
    #[must_use]
    pub fn with_run_tag(mut self, tag: impl Into<String>) -> Self {
        self.run_tag = Some(tag.into());
        self
    }

    /// Tag recorded on the run's log span
    #[must_use]
    pub fn run_tag(&self) -> Option<&str> {
        self.run_tag.as_deref()
    }

    /// Whether this run is dispatched to the cloud endpoint
    #[must_use]
    pub fn use_cloud(&self) -> bool {
        self.get_run_config_entry(USE_CLOUD) == Some("1")
    }

    /// Bearer credential for the endpoint, if set
    #[must_use]
    pub fn auth_key(&self) -> Option<&str> {
        self.get_run_config_entry(CLOUD_AUTH_KEY)
    }

    /// Read `cloud.auth_key` from an environment variable
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if the variable is unset or empty.
    pub fn with_auth_key_from_env(mut self, var: &str) -> Result<Self> {
        let key = std::env::var(var)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                StratusError::InvalidConfiguration(format!(
                    "environment variable {var} must hold the endpoint auth key"
                ))
            })?;
        self.add_run_config_entry(CLOUD_AUTH_KEY, key)?;
        Ok(self)
    }
}

fn insert_entry(entries: &mut BTreeMap<String, String>, key: String, value: String) -> Result<()> {
    if key.is_empty() {
        return Err(StratusError::InvalidConfiguration(
            "config entry key cannot be empty".to_string(),
        ));
    }
    entries.insert(key, value);
    Ok(())
}

/// Remote inference protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointType {
    /// KServe v2 / Triton HTTP JSON protocol
    Triton,
}

impl std::str::FromStr for EndpointType {
    type Err = StratusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "triton" => Ok(Self::Triton),
            other => Err(StratusError::UnsupportedOperation {
                operation: "cloud dispatch".to_string(),
                reason: format!("unknown endpoint type '{other}' (supported: triton)"),
            }),
        }
    }
}

impl fmt::Display for EndpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Triton => write!(f, "triton"),
        }
    }
}

/// Typed snapshot of the `cloud.*` session entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudConfig {
    /// Remote protocol
    pub endpoint_type: EndpointType,
    /// Endpoint base URI
    pub uri: String,
    /// Remote model name
    pub model_name: String,
    /// Remote model version; empty selects the unversioned route
    pub model_version: String,
    /// Log request and response bodies
    pub verbose: bool,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl CloudConfig {
    /// Create a Triton config with default version, verbosity and timeout
    #[must_use]
    pub fn triton(uri: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            endpoint_type: EndpointType::Triton,
            uri: uri.into(),
            model_name: model_name.into(),
            model_version: String::new(),
            verbose: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Builder: set the model version
    #[must_use]
    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = version.into();
        self
    }

    /// Builder: enable verbose wire logging
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Extract the cloud config from session options
    ///
    /// Returns `Ok(None)` when no `cloud.*` entry is present.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` when `cloud.uri` or `cloud.model_name`
    /// is missing, or a boolean/integer entry does not parse, and
    /// `UnsupportedOperation` for an unknown endpoint type.
    pub fn from_session_options(options: &SessionOptions) -> Result<Option<Self>> {
        if !options.entries().any(|(k, _)| k.starts_with("cloud.")) {
            return Ok(None);
        }
        Self::from_lookup(|key| options.get_session_config_entry(key).map(str::to_string))
            .map(Some)
    }

    /// Build a cloud config from `STRATUS_CLOUD_*` environment variables
    ///
    /// Reads `STRATUS_CLOUD_URI`, `STRATUS_CLOUD_MODEL_NAME`,
    /// `STRATUS_CLOUD_MODEL_VERSION`, `STRATUS_CLOUD_ENDPOINT_TYPE`,
    /// `STRATUS_CLOUD_VERBOSE` and `STRATUS_CLOUD_TIMEOUT_SECS`.
    ///
    /// # Errors
    ///
    /// Same as [`CloudConfig::from_session_options`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| {
            let var = format!("STRATUS_{}", key.replace('.', "_").to_ascii_uppercase());
            std::env::var(var).ok()
        })
    }

    /// Write this config back as session entries
    ///
    /// # Errors
    ///
    /// Never fails for a config built by this module; propagates entry errors.
    pub fn apply_to(&self, options: &mut SessionOptions) -> Result<()> {
        options.add_session_config_entry(CLOUD_ENDPOINT_TYPE, self.endpoint_type.to_string())?;
        options.add_session_config_entry(CLOUD_URI, self.uri.clone())?;
        options.add_session_config_entry(CLOUD_MODEL_NAME, self.model_name.clone())?;
        if !self.model_version.is_empty() {
            options.add_session_config_entry(CLOUD_MODEL_VERSION, self.model_version.clone())?;
        }
        options.add_session_config_entry(CLOUD_VERBOSE, self.verbose.to_string())?;
        options.add_session_config_entry(CLOUD_TIMEOUT_SECS, self.timeout_secs.to_string())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key).filter(|v| !v.is_empty()).ok_or_else(|| {
                StratusError::InvalidConfiguration(format!("'{key}' is required for cloud dispatch"))
            })
        };

        let endpoint_type = match lookup(CLOUD_ENDPOINT_TYPE) {
            Some(t) if !t.is_empty() => t.parse()?,
            _ => EndpointType::Triton,
        };
        let uri = required(CLOUD_URI)?;
        let model_name = required(CLOUD_MODEL_NAME)?;
        let model_version = lookup(CLOUD_MODEL_VERSION).unwrap_or_default();
        let verbose = match lookup(CLOUD_VERBOSE) {
            Some(v) => parse_flag(CLOUD_VERBOSE, &v)?,
            None => false,
        };
        let timeout_secs = match lookup(CLOUD_TIMEOUT_SECS) {
            Some(v) => match v.parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(StratusError::InvalidConfiguration(format!(
                        "'{CLOUD_TIMEOUT_SECS}' must be a positive integer, got '{v}'"
                    )))
                },
            },
            None => DEFAULT_TIMEOUT_SECS,
        };

        if !uri.starts_with("http://") && !uri.starts_with("https://") {
            return Err(StratusError::InvalidConfiguration(format!(
                "'{CLOUD_URI}' must be an http(s) URI, got '{uri}'"
            )));
        }

        Ok(Self {
            endpoint_type,
            uri,
            model_name,
            model_version,
            verbose,
            timeout_secs,
        })
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        _ => Err(StratusError::InvalidConfiguration(format!(
            "'{key}' must be true/false, got '{value}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn addf_options() -> SessionOptions {
        let mut opts = SessionOptions::new();
        opts.add_session_config_entry(CLOUD_ENDPOINT_TYPE, "triton").unwrap();
        opts.add_session_config_entry(CLOUD_URI, "https://endpoint.example.com").unwrap();
        opts.add_session_config_entry(CLOUD_MODEL_NAME, "addf").unwrap();
        opts.add_session_config_entry(CLOUD_MODEL_VERSION, "1").unwrap();
        opts.add_session_config_entry(CLOUD_VERBOSE, "true").unwrap();
        opts
    }

    #[test]
    fn test_session_entries_overwrite() {
        let mut opts = SessionOptions::new();
        opts.add_session_config_entry("a", "1").unwrap();
        opts.add_session_config_entry("a", "2").unwrap();
        assert_eq!(opts.get_session_config_entry("a"), Some("2"));
        assert_eq!(opts.entries().count(), 1);
    }

    #[test]
    fn test_empty_key_rejected() {
        let mut opts = SessionOptions::new();
        assert!(matches!(
            opts.add_session_config_entry("", "x"),
            Err(StratusError::InvalidConfiguration(_))
        ));
        let mut run = RunOptions::new();
        assert!(run.add_run_config_entry("", "x").is_err());
    }

    #[test]
    fn test_cloud_config_full() {
        let cfg = CloudConfig::from_session_options(&addf_options()).unwrap().unwrap();
        assert_eq!(cfg.endpoint_type, EndpointType::Triton);
        assert_eq!(cfg.uri, "https://endpoint.example.com");
        assert_eq!(cfg.model_name, "addf");
        assert_eq!(cfg.model_version, "1");
        assert!(cfg.verbose);
        assert_eq!(cfg.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_cloud_config_absent() {
        let mut opts = SessionOptions::new();
        opts.add_session_config_entry("session.intra_op_threads", "1").unwrap();
        assert_eq!(CloudConfig::from_session_options(&opts).unwrap(), None);
    }

    #[test]
    fn test_cloud_config_missing_uri() {
        let mut opts = SessionOptions::new();
        opts.add_session_config_entry(CLOUD_MODEL_NAME, "addf").unwrap();
        let err = CloudConfig::from_session_options(&opts).unwrap_err();
        assert!(err.to_string().contains("cloud.uri"));
    }

    #[test]
    fn test_cloud_config_rejects_unknown_endpoint_type() {
        let mut opts = addf_options();
        opts.add_session_config_entry(CLOUD_ENDPOINT_TYPE, "openai").unwrap();
        assert!(matches!(
            CloudConfig::from_session_options(&opts),
            Err(StratusError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn test_cloud_config_rejects_bad_verbose_and_timeout() {
        let mut opts = addf_options();
        opts.add_session_config_entry(CLOUD_VERBOSE, "loud").unwrap();
        assert!(CloudConfig::from_session_options(&opts).is_err());

        let mut opts = addf_options();
        opts.add_session_config_entry(CLOUD_TIMEOUT_SECS, "0").unwrap();
        assert!(CloudConfig::from_session_options(&opts).is_err());

        let mut opts = addf_options();
        opts.add_session_config_entry(CLOUD_TIMEOUT_SECS, "5").unwrap();
        let cfg = CloudConfig::from_session_options(&opts).unwrap().unwrap();
        assert_eq!(cfg.timeout_secs, 5);
    }

    #[test]
    fn test_cloud_config_rejects_non_http_uri() {
        let mut opts = addf_options();
        opts.add_session_config_entry(CLOUD_URI, "ftp://endpoint").unwrap();
        assert!(CloudConfig::from_session_options(&opts).is_err());
    }

    #[test]
    fn test_apply_to_round_trips() {
        let cfg = CloudConfig::triton("http://localhost:8000", "and")
            .with_model_version("3")
            .with_verbose(true);
        let mut opts = SessionOptions::new();
        cfg.apply_to(&mut opts).unwrap();
        assert_eq!(CloudConfig::from_session_options(&opts).unwrap(), Some(cfg));
    }

    #[test]
    fn test_run_options_defaults() {
        let run = RunOptions::new();
        assert_eq!(run.log_severity_level(), Severity::Warning);
        assert!(!run.use_cloud());
        assert!(run.auth_key().is_none());
        assert!(run.logs(Severity::Error));
        assert!(!run.logs(Severity::Info));
    }

    #[test]
    fn test_use_cloud_requires_exact_one() {
        let mut run = RunOptions::new();
        run.add_run_config_entry(USE_CLOUD, "true").unwrap();
        assert!(!run.use_cloud());
        run.add_run_config_entry(USE_CLOUD, "1").unwrap();
        assert!(run.use_cloud());
    }

    #[test]
    fn test_log_severity_range() {
        let mut run = RunOptions::new();
        run.set_log_severity_level(1).unwrap();
        assert_eq!(run.log_severity_level(), Severity::Info);
        assert!(run.logs(Severity::Info));
        assert!(!run.logs(Severity::Verbose));
        assert!(run.set_log_severity_level(5).is_err());
        assert!(run.set_log_severity_level(-1).is_err());
    }

    #[test]
    fn test_run_tag() {
        let run = RunOptions::new().with_run_tag("addf-smoke");
        assert_eq!(run.run_tag(), Some("addf-smoke"));
    }

    #[test]
    #[serial]
    fn test_auth_key_from_env() {
        std::env::set_var("STRATUS_TEST_AUTH_KEY", "secret-token");
        let run = RunOptions::new()
            .with_auth_key_from_env("STRATUS_TEST_AUTH_KEY")
            .unwrap();
        assert_eq!(run.auth_key(), Some("secret-token"));

        std::env::remove_var("STRATUS_TEST_AUTH_KEY");
        assert!(RunOptions::new()
            .with_auth_key_from_env("STRATUS_TEST_AUTH_KEY")
            .is_err());
    }

    #[test]
    #[serial]
    fn test_cloud_config_from_env() {
        std::env::set_var("STRATUS_CLOUD_URI", "http://127.0.0.1:8000");
        std::env::set_var("STRATUS_CLOUD_MODEL_NAME", "addi4");
        std::env::set_var("STRATUS_CLOUD_MODEL_VERSION", "1");
        std::env::set_var("STRATUS_CLOUD_VERBOSE", "0");
        let cfg = CloudConfig::from_env().unwrap();
        for var in [
            "STRATUS_CLOUD_URI",
            "STRATUS_CLOUD_MODEL_NAME",
            "STRATUS_CLOUD_MODEL_VERSION",
            "STRATUS_CLOUD_VERBOSE",
        ] {
            std::env::remove_var(var);
        }
        assert_eq!(cfg.model_name, "addi4");
        assert_eq!(cfg.model_version, "1");
        assert!(!cfg.verbose);
        assert_eq!(cfg.endpoint_type, EndpointType::Triton);
    }
}
