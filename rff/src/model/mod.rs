//! Text-completion capability consumed by the proposer, stepper and verifier.
//!
//! The [`LanguageModel`] trait decouples the controller from the backend.
//! [`CommandModel`] shells out to a configured model CLI; [`RetryingModel`]
//! wraps any model with a backoff policy. Tests use scripted models or plain
//! closures.

pub mod command;
pub mod process;
pub mod retry;

pub use command::{CommandModel, CommandModelConfig};
pub use retry::{RetryPolicy, RetryingModel};

use crate::error::CompletionError;

/// Per-call options forwarded to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub model: String,
    /// Sampling temperature in `[0, 1]`.
    pub temperature: f32,
}

/// Opaque text-completion capability.
///
/// Implementations may be slow and non-deterministic. They must be shareable
/// across threads so independent runs can reuse one instance.
pub trait LanguageModel: Send + Sync {
    fn complete(&self, prompt: &str, options: &CompletionOptions)
    -> Result<String, CompletionError>;
}

impl<F> LanguageModel for F
where
    F: Fn(&str, &CompletionOptions) -> Result<String, CompletionError> + Send + Sync,
{
    fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        self(prompt, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_models() {
        let model = |prompt: &str, options: &CompletionOptions| -> Result<String, CompletionError> {
            Ok(format!("{}@{}", prompt, options.model))
        };
        let options = CompletionOptions {
            model: "m".to_string(),
            temperature: 0.0,
        };
        assert_eq!(model.complete("hi", &options).expect("complete"), "hi@m");

        let shared: &dyn LanguageModel = &model;
        assert_eq!(shared.complete("yo", &options).expect("complete"), "yo@m");
    }
}
