use std::io::ErrorKind;
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use cadence_db::models::UserPreferences;

use super::WeekGenerator;
use crate::context::ProgressionContext;

#[derive(Serialize)]
struct GenerateRequest<'a> {
    preferences: &'a serde_json::Value,
    context: &'a ProgressionContext,
}

/// Runs an external program once per week.
///
/// The program receives `{"preferences": ..., "context": ...}` as JSON on
/// stdin and must print the generated week as JSON on stdout and exit 0.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
}

impl CommandGenerator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl WeekGenerator for CommandGenerator {
    fn name(&self) -> &str {
        "command"
    }

    async fn generate(
        &self,
        preferences: &UserPreferences,
        context: &ProgressionContext,
    ) -> Result<serde_json::Value> {
        let request = serde_json::to_vec(&GenerateRequest {
            preferences: &preferences.preferences,
            context,
        })
        .context("failed to encode generator request")?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn generator '{}'", self.program))?;

        let stdin = child.stdin.take();
        let write = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&request).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output.with_context(|| format!("generator '{}' did not finish", self.program))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            bail!(
                "generator '{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            );
        }
        if let Err(e) = written {
            // The program may legitimately exit without reading its input.
            if e.kind() != ErrorKind::BrokenPipe {
                return Err(e).context("failed to write generator request");
            }
        }

        serde_json::from_slice(&output.stdout).with_context(|| {
            format!(
                "generator '{}' printed invalid JSON (stderr: {})",
                self.program,
                stderr.trim()
            )
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    use cadence_db::models::Phase;

    use crate::context;

    fn prefs() -> UserPreferences {
        UserPreferences {
            user_id: Uuid::new_v4(),
            preferences: json!({"days_per_week": 4}),
            updated_at: Utc::now(),
        }
    }

    fn ctx() -> ProgressionContext {
        context::build(None, Phase::Base, false, false, 2, 12, Some(10))
    }

    fn sh(script: &str) -> CommandGenerator {
        CommandGenerator::new("sh", vec!["-c".into(), script.into()])
    }

    #[tokio::test]
    async fn passes_request_on_stdin() {
        let week = sh("cat").generate(&prefs(), &ctx()).await.unwrap();
        assert_eq!(week["preferences"]["days_per_week"], 4);
        assert_eq!(week["context"]["target_week"], 2);
        assert_eq!(week["context"]["new_phase"], "BASE");
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let err = sh("cat >/dev/null; echo 'model overloaded' >&2; exit 3")
            .generate(&prefs(), &ctx())
            .await
            .unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("model overloaded"), "{msg}");
    }

    #[tokio::test]
    async fn invalid_json_is_an_error() {
        let err = sh("cat >/dev/null; echo not-json")
            .generate(&prefs(), &ctx())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("invalid JSON"));
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let generator = CommandGenerator::new("/nonexistent/cadence-generator", vec![]);
        assert!(generator.generate(&prefs(), &ctx()).await.is_err());
    }
}
