//! Model capability backed by an external CLI.
//!
//! The prompt is written to the command's stdin and its stdout is the
//! completion. Argument placeholders `{model}` and `{temperature}` are
//! substituted per call.

use std::io;
use std::process::Command;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::CompletionError;
use crate::model::process::{Exit, run_piped};
use crate::model::{CompletionOptions, LanguageModel};

/// `[model]` section of the run configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandModelConfig {
    /// Command argv (e.g. `["llm", "-m", "{model}"]`).
    pub command: Vec<String>,
    /// Wall-clock limit for one completion.
    pub timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for CommandModelConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "llm".to_string(),
                "-m".to_string(),
                "{model}".to_string(),
                "-o".to_string(),
                "temperature".to_string(),
                "{temperature}".to_string(),
            ],
            timeout_secs: 120,
            output_limit_bytes: 200_000,
        }
    }
}

/// Model that spawns one process per completion.
#[derive(Debug, Clone)]
pub struct CommandModel {
    config: CommandModelConfig,
}

impl CommandModel {
    pub fn new(config: CommandModelConfig) -> Self {
        Self { config }
    }

    fn argv(&self, options: &CompletionOptions) -> Vec<String> {
        let temperature = format!("{}", options.temperature);
        self.config
            .command
            .iter()
            .map(|arg| {
                arg.replace("{model}", &options.model)
                    .replace("{temperature}", &temperature)
            })
            .collect()
    }
}

impl LanguageModel for CommandModel {
    #[instrument(skip_all, fields(model = %options.model, prompt_bytes = prompt.len()))]
    fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        let argv = self.argv(options);
        let Some((program, args)) = argv.split_first() else {
            return Err(CompletionError::Misconfigured(
                "model.command must be a non-empty array".to_string(),
            ));
        };
        info!(program = %program, "starting model command");

        let mut cmd = Command::new(program);
        cmd.args(args);
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = run_piped(
            cmd,
            prompt.as_bytes(),
            timeout,
            self.config.output_limit_bytes,
        )
        .map_err(process_error)?;

        match output.exit {
            Exit::TimedOut => {
                warn!(timeout_secs = self.config.timeout_secs, "model command timed out");
                return Err(CompletionError::Timeout {
                    secs: self.config.timeout_secs,
                });
            }
            Exit::Finished(status) if !status.success() => {
                warn!(exit_code = ?status.code(), "model command failed");
                return Err(CompletionError::Failed {
                    code: status.code(),
                    stderr: output.stderr.text(),
                });
            }
            Exit::Finished(_) => {}
        }

        let text = output.stdout.text();
        if text.is_empty() {
            return Err(CompletionError::Empty);
        }
        debug!(completion_bytes = text.len(), "model command completed");
        Ok(text)
    }
}

/// A command that cannot be started will not start on retry either.
fn process_error(err: anyhow::Error) -> CompletionError {
    let kind = err.downcast_ref::<io::Error>().map(io::Error::kind);
    match kind {
        Some(io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied) => {
            CompletionError::Misconfigured(format!("{err:#}"))
        }
        _ => CompletionError::Transport(format!("{err:#}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> CompletionOptions {
        CompletionOptions {
            model: "tiny".to_string(),
            temperature: 0.5,
        }
    }

    fn model(command: &[&str]) -> CommandModel {
        CommandModel::new(CommandModelConfig {
            command: command.iter().map(|s| s.to_string()).collect(),
            timeout_secs: 5,
            output_limit_bytes: 10_000,
        })
    }

    #[test]
    fn substitutes_placeholders() {
        let argv = CommandModel::new(CommandModelConfig::default()).argv(&options());
        assert_eq!(argv, vec!["llm", "-m", "tiny", "-o", "temperature", "0.5"]);
    }

    #[test]
    fn empty_command_is_misconfigured() {
        let err = model(&[]).complete("p", &options()).unwrap_err();
        assert!(matches!(err, CompletionError::Misconfigured(_)));
        assert!(!err.is_transient());
    }

    /// Verifies a missing binary is not retried as a transport failure.
    #[test]
    fn missing_binary_is_misconfigured() {
        let err = model(&["rff-no-such-model-binary"])
            .complete("p", &options())
            .unwrap_err();
        assert!(matches!(err, CompletionError::Misconfigured(_)), "{err:?}");
        assert!(!err.is_transient());
    }

    #[test]
    fn other_process_errors_stay_transient() {
        let err = process_error(anyhow::anyhow!("output reader thread panicked"));
        assert!(matches!(err, CompletionError::Transport(_)));
        assert!(err.is_transient());
    }

    #[cfg(unix)]
    #[test]
    fn returns_trimmed_stdout() {
        let out = model(&["sh", "-c", "cat >/dev/null; echo ' {model} '", "x"])
            .complete("prompt", &options())
            .expect("complete");
        // Placeholders are substituted inside every argv element.
        assert_eq!(out, "tiny");
    }

    #[cfg(unix)]
    #[test]
    fn maps_failures_to_completion_errors() {
        let err = model(&["sh", "-c", "echo boom >&2; exit 3"])
            .complete("prompt", &options())
            .unwrap_err();
        assert_eq!(
            err,
            CompletionError::Failed {
                code: Some(3),
                stderr: "boom".to_string()
            }
        );

        let err = model(&["sh", "-c", "cat >/dev/null"])
            .complete("prompt", &options())
            .unwrap_err();
        assert_eq!(err, CompletionError::Empty);
    }
}
