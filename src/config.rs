//! Tracer configuration
//!
//! Values come from built-in defaults, optionally a TOML file, and finally
//! `CALLMAP_*` environment variables. Unparseable numeric overrides are
//! ignored with a warning rather than failing start-up.

use crate::error::{CallmapError, Result};
use crate::governor::{GovernorConfig, DEFAULT_MAX_CALLS, DEFAULT_PATH_VISIT_LIMIT};
use crate::record::CallSite;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_ENABLED: &str = "CALLMAP_TRACE_ENABLED";
pub const ENV_OUTPUT_DIR: &str = "CALLMAP_OUTPUT_DIR";
pub const ENV_MAX_CALLS: &str = "CALLMAP_MAX_CALLS";
pub const ENV_PATH_VISITS: &str = "CALLMAP_PATH_VISITS";
pub const ENV_INCLUDE: &str = "CALLMAP_INCLUDE";
pub const ENV_EXCLUDE: &str = "CALLMAP_EXCLUDE";
pub const ENV_CORRELATION_ID: &str = "CALLMAP_CORRELATION_ID";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Gate for auto-start
    pub enabled: bool,

    /// Directory receiving the exported artifacts
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_max_calls")]
    pub max_calls: usize,

    #[serde(default = "default_path_visit_limit")]
    pub path_visit_limit: usize,

    /// Module or file path prefixes to trace; empty traces everything
    pub include_paths: Vec<String>,

    /// Module or file path prefixes never traced
    pub exclude_paths: Vec<String>,

    /// Correlation id echoed into the trace document
    pub correlation_id: Option<String>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./.callmap/traces")
}

fn default_max_calls() -> usize {
    DEFAULT_MAX_CALLS
}

fn default_path_visit_limit() -> usize {
    DEFAULT_PATH_VISIT_LIMIT
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output_dir: default_output_dir(),
            max_calls: default_max_calls(),
            path_visit_limit: default_path_visit_limit(),
            include_paths: Vec::new(),
            exclude_paths: Vec::new(),
            correlation_id: None,
        }
    }
}

impl TracerConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load a TOML file, then apply environment overrides
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env();
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_calls == 0 {
            return Err(CallmapError::InvalidConfig(
                "max_calls must be greater than zero".to_string(),
            ));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(CallmapError::InvalidConfig(
                "output_dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Overlay `CALLMAP_*` variables onto this config
    pub fn apply_env(&mut self) {
        if let Ok(value) = std::env::var(ENV_ENABLED) {
            self.enabled = parse_flag(&value);
        }

        if let Ok(dir) = std::env::var(ENV_OUTPUT_DIR) {
            if !dir.trim().is_empty() {
                self.output_dir = PathBuf::from(dir);
            }
        }

        if let Some(max_calls) = parse_count(ENV_MAX_CALLS) {
            if max_calls > 0 {
                self.max_calls = max_calls;
            }
        }

        if let Some(visits) = parse_count(ENV_PATH_VISITS) {
            self.path_visit_limit = visits;
        }

        if let Ok(include) = std::env::var(ENV_INCLUDE) {
            self.include_paths = split_prefixes(&include);
        }

        if let Ok(exclude) = std::env::var(ENV_EXCLUDE) {
            self.exclude_paths = split_prefixes(&exclude);
        }

        if let Ok(id) = std::env::var(ENV_CORRELATION_ID) {
            if !id.is_empty() {
                self.correlation_id = Some(id);
            }
        }
    }

    pub fn governor(&self) -> GovernorConfig {
        GovernorConfig {
            max_calls: self.max_calls,
            path_visit_limit: self.path_visit_limit,
        }
    }

    pub fn site_filter(&self) -> SiteFilter {
        SiteFilter::new(self.include_paths.clone(), self.exclude_paths.clone())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_count(var: &str) -> Option<usize> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!("ignoring invalid {}={:?}", var, raw);
            None
        }
    }
}

fn split_prefixes(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

/// Include/exclude prefix filter over call sites
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl SiteFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    /// Excludes win; an empty include list admits everything else
    pub fn allows(&self, site: &CallSite<'_>) -> bool {
        let hit = |prefix: &String| {
            site.module.starts_with(prefix.as_str()) || site.file_path.starts_with(prefix.as_str())
        };
        if self.exclude.iter().any(hit) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(hit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ALL_VARS: [&str; 7] = [
        ENV_ENABLED,
        ENV_OUTPUT_DIR,
        ENV_MAX_CALLS,
        ENV_PATH_VISITS,
        ENV_INCLUDE,
        ENV_EXCLUDE,
        ENV_CORRELATION_ID,
    ];

    fn clear_env() {
        for var in ALL_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults() {
        let config = TracerConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.output_dir, PathBuf::from("./.callmap/traces"));
        assert_eq!(config.max_calls, 100_000);
        assert_eq!(config.path_visit_limit, 1);
        assert!(config.include_paths.is_empty());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var(ENV_ENABLED, "true");
        std::env::set_var(ENV_OUTPUT_DIR, "/tmp/callmap-out");
        std::env::set_var(ENV_MAX_CALLS, "250");
        std::env::set_var(ENV_INCLUDE, "myapp, /srv/app ,");
        std::env::set_var(ENV_CORRELATION_ID, "corr-9");

        let config = TracerConfig::from_env();
        clear_env();

        assert!(config.enabled);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/callmap-out"));
        assert_eq!(config.max_calls, 250);
        assert_eq!(config.include_paths, vec!["myapp", "/srv/app"]);
        assert_eq!(config.correlation_id.as_deref(), Some("corr-9"));
    }

    #[test]
    #[serial]
    fn test_invalid_numbers_are_ignored() {
        clear_env();
        std::env::set_var(ENV_MAX_CALLS, "lots");
        std::env::set_var(ENV_PATH_VISITS, "-3");

        let config = TracerConfig::from_env();
        clear_env();

        assert_eq!(config.max_calls, DEFAULT_MAX_CALLS);
        assert_eq!(config.path_visit_limit, DEFAULT_PATH_VISIT_LIMIT);
    }

    #[test]
    #[serial]
    fn test_enable_flag_values() {
        clear_env();
        for (value, expected) in [("1", true), ("TRUE", true), ("0", false), ("nope", false)] {
            std::env::set_var(ENV_ENABLED, value);
            assert_eq!(TracerConfig::from_env().enabled, expected, "value {value}");
        }
        clear_env();
    }

    #[test]
    fn test_toml_config() {
        let config = TracerConfig::from_toml_str(
            r#"
            enabled = true
            output_dir = "/var/trace"
            max_calls = 10
            exclude_paths = ["vendor"]
            "#,
        )
        .unwrap();
        assert!(config.enabled);
        assert_eq!(config.max_calls, 10);
        assert_eq!(config.path_visit_limit, DEFAULT_PATH_VISIT_LIMIT);
        assert_eq!(config.exclude_paths, vec!["vendor"]);
    }

    #[test]
    fn test_toml_rejects_zero_max_calls() {
        let err = TracerConfig::from_toml_str("max_calls = 0").unwrap_err();
        assert!(matches!(err, CallmapError::InvalidConfig(_)));
    }

    #[test]
    fn test_toml_rejects_bad_syntax() {
        let err = TracerConfig::from_toml_str("max_calls = [").unwrap_err();
        assert!(matches!(err, CallmapError::Toml(_)));
    }

    #[test]
    fn test_site_filter() {
        let filter = SiteFilter::new(
            vec!["myapp".to_string()],
            vec!["myapp::vendored".to_string(), "/usr/".to_string()],
        );
        fn site(module: &'static str, file: &'static str) -> CallSite<'static> {
            CallSite::new("f", module, file, 1)
        }

        assert!(filter.allows(&site("myapp::db", "/srv/db.rs")));
        assert!(!filter.allows(&site("myapp::vendored::x", "/srv/x.rs")));
        assert!(!filter.allows(&site("myapp::db", "/usr/lib/db.rs")));
        assert!(!filter.allows(&site("other", "/srv/other.rs")));
        assert!(SiteFilter::default().allows(&site("anything", "anywhere")));
    }
}
