//! Per-source configuration loaded from `sources.yaml`.
//!
//! Credentials are referenced by environment-variable name in the file and
//! resolved exactly once at load time, producing immutable [`SourceConfig`]
//! values that are passed to the collection coordinator explicitly.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::ConfigError;

/// Names of the environment variables holding a source's credentials.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialRefs {
    pub username_env: Option<String>,
    pub password_env: Option<String>,
    pub token_env: Option<String>,
}

/// One source as written in the YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_multiplier")]
    pub target_multiplier: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub credentials: CredentialRefs,
}

fn default_multiplier() -> u32 {
    1
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct SourcesFile {
    pub sources: Vec<SourceEntry>,
}

/// Resolved credentials for one source. `Debug` never prints secret values.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SourceCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

impl std::fmt::Debug for SourceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceCredentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .field("token", &self.token.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// Immutable configuration for one source, ready to hand to the coordinator.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    /// Per-source wall-clock limit; `None` means the coordinator default.
    pub timeout_secs: Option<u64>,
    pub target_multiplier: u32,
    pub credentials: SourceCredentials,
}

impl SourceConfig {
    /// Build a config with no command and no credentials. Useful for
    /// in-process collectors that only need a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: String::new(),
            args: Vec::new(),
            timeout_secs: None,
            target_multiplier: 1,
            credentials: SourceCredentials::default(),
        }
    }

    /// Target count this source should be asked for.
    #[must_use]
    pub fn scaled_target(&self, target_count: u32) -> u32 {
        target_count.saturating_mul(self.target_multiplier.max(1))
    }
}

/// Load, validate and resolve the sources file. Disabled sources are dropped.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_sources(path: &Path) -> Result<Vec<SourceConfig>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::SourcesFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    let file: SourcesFile = serde_yaml::from_str(&content)?;
    validate_sources(&file)?;

    Ok(resolve_sources(file, |key| std::env::var(key).ok()))
}

fn validate_sources(file: &SourcesFile) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for source in &file.sources {
        let name = source.name.trim();
        if name.is_empty() {
            return Err(ConfigError::Validation(
                "source name must be non-empty".to_string(),
            ));
        }
        if source.command.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "source '{name}' has an empty command"
            )));
        }
        if source.timeout_secs == Some(0) {
            return Err(ConfigError::Validation(format!(
                "source '{name}' has timeout_secs = 0"
            )));
        }
        if source.target_multiplier == 0 {
            return Err(ConfigError::Validation(format!(
                "source '{name}' has target_multiplier = 0"
            )));
        }
        if !seen.insert(name.to_lowercase()) {
            return Err(ConfigError::Validation(format!(
                "duplicate source name: '{name}'"
            )));
        }
    }

    Ok(())
}

fn resolve_sources<F>(file: SourcesFile, lookup: F) -> Vec<SourceConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let resolve = |var: Option<&String>| var.and_then(|v| lookup(v.as_str()));

    file.sources
        .into_iter()
        .filter(|s| s.enabled)
        .map(|s| SourceConfig {
            name: s.name.trim().to_string(),
            credentials: SourceCredentials {
                username: resolve(s.credentials.username_env.as_ref()),
                password: resolve(s.credentials.password_env.as_ref()),
                token: resolve(s.credentials.token_env.as_ref()),
            },
            command: s.command,
            args: s.args,
            timeout_secs: s.timeout_secs,
            target_multiplier: s.target_multiplier,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> SourcesFile {
        serde_yaml::from_str(yaml).expect("yaml should parse")
    }

    #[test]
    fn defaults_are_applied() {
        let file = parse(
            "sources:\n  - name: twitter\n    command: ./collectors/twitter\n",
        );
        validate_sources(&file).unwrap();
        let sources = resolve_sources(file, |_| None);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].name, "twitter");
        assert_eq!(sources[0].target_multiplier, 1);
        assert!(sources[0].timeout_secs.is_none());
        assert!(sources[0].args.is_empty());
    }

    #[test]
    fn credentials_resolve_through_lookup() {
        let file = parse(
            "sources:
  - name: facebook
    command: fb
    credentials:
      username_env: FB_USER
      password_env: FB_PASS
",
        );
        let sources = resolve_sources(file, |key| match key {
            "FB_USER" => Some("alice".to_string()),
            "FB_PASS" => Some("hunter2".to_string()),
            _ => None,
        });
        let creds = &sources[0].credentials;
        assert_eq!(creds.username.as_deref(), Some("alice"));
        assert_eq!(creds.password.as_deref(), Some("hunter2"));
        assert!(creds.token.is_none());
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn disabled_sources_are_dropped() {
        let file = parse(
            "sources:
  - name: a
    command: a
  - name: b
    command: b
    enabled: false
",
        );
        let sources = resolve_sources(file, |_| None);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].name, "a");
    }

    #[test]
    fn duplicate_names_are_rejected_case_insensitively() {
        let file = parse(
            "sources:\n  - name: Twitter\n    command: a\n  - name: twitter\n    command: b\n",
        );
        let err = validate_sources(&file).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref m) if m.contains("duplicate")));
    }

    #[test]
    fn empty_command_is_rejected() {
        let file = parse("sources:\n  - name: a\n    command: \"  \"\n");
        assert!(validate_sources(&file).is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let file = parse("sources:\n  - name: a\n    command: a\n    timeout_secs: 0\n");
        assert!(validate_sources(&file).is_err());
    }

    #[test]
    fn scaled_target_multiplies() {
        let mut source = SourceConfig::named("linkedin");
        source.target_multiplier = 5;
        assert_eq!(source.scaled_target(10), 50);
    }

    #[test]
    fn load_sources_reports_missing_file() {
        let err = load_sources(Path::new("/definitely/not/here/sources.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::SourcesFileIo { .. }));
    }
}
