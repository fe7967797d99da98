//! Source collectors.
//!
//! A collector turns `(topic, credentials, target_count)` into flat
//! interaction records. The bundled [`CommandCollector`] runs an external
//! program per call, so a crash or hang stays inside that child process.

use std::process::Stdio;

use async_trait::async_trait;
use pulse_core::{InteractionRecord, SourceConfig, SourceCredentials};
use serde_json::Value;

use crate::error::HarvestError;

/// Everything a collector receives for one run.
#[derive(Debug, Clone)]
pub struct CollectRequest {
    pub topic: String,
    pub target_count: u32,
    pub credentials: SourceCredentials,
}

#[async_trait]
pub trait SourceCollector: Send + Sync {
    /// Collect records for `request.topic`. May take as long as it likes;
    /// the coordinator enforces the wall clock.
    async fn collect(&self, request: CollectRequest)
        -> Result<Vec<InteractionRecord>, HarvestError>;
}

/// Runs `command args...` and reads a JSON array of records from stdout.
///
/// `{topic}` and `{count}` in arguments are substituted. The topic, target
/// count and credentials are also exported as `PULSE_TOPIC`,
/// `PULSE_TARGET_COUNT`, `PULSE_SOURCE_USERNAME`, `PULSE_SOURCE_PASSWORD`
/// and `PULSE_SOURCE_TOKEN`. The child is killed if the call is dropped.
#[derive(Debug, Clone)]
pub struct CommandCollector {
    source_name: String,
    command: String,
    args: Vec<String>,
}

impl CommandCollector {
    #[must_use]
    pub fn new(
        source_name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            command: command.into(),
            args,
        }
    }

    #[must_use]
    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(&config.name, &config.command, config.args.clone())
    }

    fn render_args(&self, request: &CollectRequest) -> Vec<String> {
        let count = request.target_count.to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{topic}", &request.topic)
                    .replace("{count}", &count)
            })
            .collect()
    }
}

#[async_trait]
impl SourceCollector for CommandCollector {
    async fn collect(
        &self,
        request: CollectRequest,
    ) -> Result<Vec<InteractionRecord>, HarvestError> {
        let mut command = tokio::process::Command::new(&self.command);
        command
            .args(self.render_args(&request))
            .env("PULSE_TOPIC", &request.topic)
            .env("PULSE_TARGET_COUNT", request.target_count.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let credentials = &request.credentials;
        for (var, value) in [
            ("PULSE_SOURCE_USERNAME", &credentials.username),
            ("PULSE_SOURCE_PASSWORD", &credentials.password),
            ("PULSE_SOURCE_TOKEN", &credentials.token),
        ] {
            if let Some(value) = value {
                command.env(var, value);
            }
        }

        let output = command
            .output()
            .await
            .map_err(|e| HarvestError::SourceUnavailable {
                source_name: self.source_name.clone(),
                reason: format!("failed to run '{}': {e}", self.command),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = stderr_tail(&stderr);
            return Err(HarvestError::SourceUnavailable {
                source_name: self.source_name.clone(),
                reason: format!("exited with {}: {tail}", output.status),
            });
        }

        parse_records(&self.source_name, &output.stdout)
    }
}

/// Last few hundred characters of a child's stderr, for error messages.
fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let skip = trimmed.chars().count().saturating_sub(200);
    trimmed.chars().skip(skip).collect()
}

/// Decode a collector's stdout: a JSON array of record objects.
///
/// Blank output means no records. Elements that do not decode as a record
/// are dropped with a warning; the rest are kept in order.
///
/// # Errors
///
/// Returns [`HarvestError::SourceData`] if the output is not a JSON array.
pub fn parse_records(
    source_name: &str,
    stdout: &[u8],
) -> Result<Vec<InteractionRecord>, HarvestError> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let items: Vec<Value> =
        serde_json::from_slice(stdout).map_err(|e| HarvestError::SourceData {
            source_name: source_name.to_string(),
            reason: format!("expected a JSON array of records: {e}"),
        })?;

    let mut records = Vec::with_capacity(items.len());
    for (position, item) in items.into_iter().enumerate() {
        if !item.is_object() {
            tracing::warn!(source = source_name, position, "dropping non-object record");
            continue;
        }
        match serde_json::from_value::<InteractionRecord>(item) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(
                    source = source_name,
                    position,
                    error = %e,
                    "dropping malformed record"
                );
            }
        }
    }

    Ok(records)
}
