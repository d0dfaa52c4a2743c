//! Grind configuration loaded from `grind.toml`.
//!
//! [`GrindConfig`] holds the default [`ResultOptions`] a host applies to
//! jobs it assembles. Keys missing from the file fall back to the documented
//! baseline. The `GRIND_DIAGNOSTIC_LEVEL` environment variable takes
//! precedence over the file.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::options::{DiagnosticLevel, ResultOptions};

pub const CONFIG_FILE: &str = "grind.toml";
pub const LEVEL_ENV: &str = "GRIND_DIAGNOSTIC_LEVEL";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GrindConfig {
    #[serde(default)]
    pub diagnostic_level: DiagnosticLevel,

    /// Stop a job at its first failing step.
    #[serde(default = "default_halt_on_error")]
    pub halt_on_error: bool,

    /// Per-step timeout in milliseconds. Absent means tasks bound themselves.
    #[serde(default)]
    pub step_timeout_ms: Option<u64>,
}

fn default_halt_on_error() -> bool {
    true
}

impl Default for GrindConfig {
    fn default() -> Self {
        Self {
            diagnostic_level: DiagnosticLevel::default(),
            halt_on_error: default_halt_on_error(),
            step_timeout_ms: None,
        }
    }
}

impl GrindConfig {
    /// Loads `grind.toml` from the current directory.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Loads the given file, using defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<GrindConfig>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(level) = std::env::var(LEVEL_ENV)
            && !level.is_empty()
        {
            config.diagnostic_level = level
                .parse()
                .map_err(|e: String| anyhow::anyhow!("{LEVEL_ENV}: {e}"))?;
        }

        Ok(config)
    }

    pub fn result_options(&self) -> ResultOptions {
        ResultOptions {
            diagnostic_level: self.diagnostic_level,
            halt_on_error: self.halt_on_error,
            step_timeout: self.step_timeout_ms.map(Duration::from_millis),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Serialises tests that read or write the level variable.
    fn env_guard(level: Option<&str>) -> MutexGuard<'static, ()> {
        let guard = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // SAFETY: every test touching the process environment holds ENV_LOCK.
        unsafe {
            match level {
                Some(level) => std::env::set_var(LEVEL_ENV, level),
                None => std::env::remove_var(LEVEL_ENV),
            }
        }
        guard
    }

    #[test]
    fn default_config_matches_default_options() {
        let config = GrindConfig::default();
        assert_eq!(config.result_options(), ResultOptions::default());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            diagnostic_level = "info"
            step_timeout_ms = 30000
        "#;
        let config: GrindConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.diagnostic_level, DiagnosticLevel::Info);
        assert!(config.halt_on_error);

        let opts = config.result_options();
        assert_eq!(opts.step_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn rejects_unknown_level() {
        let result = toml::from_str::<GrindConfig>(r#"diagnostic_level = "loud""#);
        assert!(result.is_err());
    }

    #[test]
    fn load_from_file() {
        let _env = env_guard(None);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "halt_on_error = false\n").unwrap();

        let config = GrindConfig::load_from(&path).unwrap();
        assert!(!config.halt_on_error);
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let _env = env_guard(None);
        let dir = tempfile::tempdir().unwrap();
        let config = GrindConfig::load_from(&dir.path().join("missing.toml")).unwrap();
        assert!(config.halt_on_error);
        assert!(config.step_timeout_ms.is_none());
    }

    #[test]
    fn malformed_file_reports_path() {
        let _env = env_guard(None);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "halt_on_error = \"maybe\"").unwrap();

        let err = GrindConfig::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse"));
    }

    #[test]
    fn environment_overrides_file_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "diagnostic_level = \"info\"\n").unwrap();

        let env = env_guard(Some("trace"));
        let config = GrindConfig::load_from(&path).unwrap();
        assert_eq!(config.diagnostic_level, DiagnosticLevel::Trace);
        drop(env);

        let _env = env_guard(Some(""));
        let config = GrindConfig::load_from(&path).unwrap();
        assert_eq!(config.diagnostic_level, DiagnosticLevel::Info);
    }

    #[test]
    fn invalid_environment_level_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let _env = env_guard(Some("loud"));

        let err = GrindConfig::load_from(&dir.path().join("missing.toml")).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains(LEVEL_ENV));
        assert!(message.contains("unknown diagnostic level 'loud'"));
    }
}
