//! Model invocation boundary.
//!
//! [`ModelClient`] is the seam between the benchmark and whatever actually
//! talks to a model. The bundled [`CommandClient`] is OFFLINE-FIRST: it shells
//! out to an installed CLI tool (`llm`, `ollama`, ...) instead of speaking a
//! provider's HTTP API.

use crate::config::CommandConfig;
use crate::prompt::{Message, Role};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors that can occur while invoking a model
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("CLI tool not found: {0}")]
    ToolNotFound(String),

    #[error("CLI execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invocation timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Prompt and completion token counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the request
    pub prompt_tokens: u64,
    /// Tokens in the response
    pub completion_tokens: u64,
}

/// One model invocation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRequest {
    /// Model identifier
    pub model: String,
    /// Ordered role-tagged messages; the last one is the prompt
    pub messages: Vec<Message>,
    /// Optional reasoning-effort hint
    pub reasoning_effort: Option<String>,
    /// Provider-specific parameter overrides
    pub params: BTreeMap<String, String>,
    /// Invocation timeout
    pub timeout: Duration,
}

/// Successful model reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelReply {
    /// Response text
    pub text: String,
    /// Token usage
    pub usage: TokenUsage,
}

/// Anything that can answer a [`ModelRequest`]
pub trait ModelClient {
    /// Invoke the model once
    ///
    /// # Errors
    ///
    /// Returns an error on any transport, provider or timeout failure.
    fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError>;
}

impl<C: ModelClient + ?Sized> ModelClient for &C {
    fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        (**self).complete(request)
    }
}

impl<C: ModelClient + ?Sized> ModelClient for Box<C> {
    fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        (**self).complete(request)
    }
}

/// Subprocess-backed model client
pub struct CommandClient {
    config: CommandConfig,
}

impl CommandClient {
    /// Create a client for a command configuration
    #[must_use]
    pub const fn new(config: CommandConfig) -> Self {
        Self { config }
    }

    /// Adapter name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Check if the CLI tool is available
    #[must_use]
    pub fn is_available(&self) -> bool {
        Command::new("which")
            .arg(&self.config.command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }

    /// Expand the argument template for one request
    ///
    /// # Errors
    ///
    /// Returns `ModelError::ExecutionFailed` if the template is not valid
    /// shell-words syntax (e.g. an unterminated quote).
    pub fn build_args(&self, request: &ModelRequest) -> Result<Vec<String>, ModelError> {
        let prompt = render_transcript(&request.messages);
        let effort = request.reasoning_effort.clone().unwrap_or_default();
        // Split before substitution so prompt text never needs shell escaping.
        let template = shell_words::split(&self.config.args_template).map_err(|e| {
            ModelError::ExecutionFailed(format!(
                "invalid args template {:?}: {e}",
                self.config.args_template
            ))
        })?;
        Ok(template
            .into_iter()
            .map(|arg| {
                let mut arg = arg
                    .replace("{model}", &request.model)
                    .replace("{reasoning_effort}", &effort);
                for (key, value) in &request.params {
                    arg = arg.replace(&format!("{{{key}}}"), value);
                }
                arg.replace("{prompt}", &prompt)
            })
            .collect())
    }
}

impl ModelClient for CommandClient {
    fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        if !self.is_available() {
            return Err(ModelError::ToolNotFound(self.config.command.clone()));
        }

        let args = self.build_args(request)?;
        let start = Instant::now();
        let mut child = Command::new(&self.config.command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain pipes on helper threads so a chatty child cannot block on write.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_reader = std::thread::spawn(move || read_all(stdout));
        let err_reader = std::thread::spawn(move || read_all(stderr));

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if start.elapsed() > request.timeout {
                child.kill().ok();
                child.wait().ok();
                return Err(ModelError::Timeout(request.timeout));
            }
            std::thread::sleep(Duration::from_millis(10));
        };

        let response = out_reader.join().unwrap_or_default();
        let stderr = err_reader.join().unwrap_or_default();

        if !status.success() {
            return Err(ModelError::ExecutionFailed(format!(
                "{} exited with {status}: {}",
                self.config.command,
                stderr.trim()
            )));
        }

        let text = response.trim().to_string();
        Ok(ModelReply {
            usage: estimate_usage(&request.messages, &text),
            text,
        })
    }
}

fn read_all<R: Read>(pipe: Option<R>) -> String {
    let mut buf = String::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_string(&mut buf).ok();
    }
    buf
}

/// Flatten messages into a single prompt for tools that take one string.
///
/// A lone user message is passed through unchanged.
#[must_use]
pub fn render_transcript(messages: &[Message]) -> String {
    if let [only] = messages {
        if only.role == Role::User {
            return only.content.clone();
        }
    }
    messages
        .iter()
        .map(|m| match m.role {
            Role::System => m.content.clone(),
            Role::User => format!("User: {}", m.content),
            Role::Assistant => format!("Assistant: {}", m.content),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Token usage for tools that report none, counted in characters
#[must_use]
pub fn estimate_usage(messages: &[Message], reply: &str) -> TokenUsage {
    let prompt_chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
    TokenUsage {
        prompt_tokens: estimate_tokens(prompt_chars),
        completion_tokens: estimate_tokens(reply.chars().count()),
    }
}

/// Rough token estimation (4 chars per token average)
#[must_use]
pub const fn estimate_tokens(chars: usize) -> u64 {
    chars.div_ceil(4) as u64
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn request(messages: Vec<Message>) -> ModelRequest {
        ModelRequest {
            model: "gpt-4o".to_string(),
            messages,
            reasoning_effort: Some("low".to_string()),
            params: BTreeMap::from([("temperature".to_string(), "0".to_string())]),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(0), 0);
        assert_eq!(estimate_tokens(4), 1);
        assert_eq!(estimate_tokens(5), 2);
        assert_eq!(estimate_tokens(1000), 250);
    }

    #[test]
    fn test_estimate_usage_counts_chars_not_bytes() {
        // Four multi-byte characters each side
        let usage = estimate_usage(&[Message::user("9÷×3")], "×÷×÷");
        assert_eq!(usage.prompt_tokens, 1);
        assert_eq!(usage.completion_tokens, 1);
    }

    #[test]
    fn test_build_args_malformed_template() {
        let client = CommandClient::new(CommandConfig {
            name: "broken".to_string(),
            command: "echo".to_string(),
            args_template: "-m {model} \"{prompt}".to_string(),
        });
        let err = client
            .build_args(&request(vec![Message::user("1 + 1")]))
            .unwrap_err();
        assert!(matches!(err, ModelError::ExecutionFailed(ref m) if m.contains("args template")));
    }

    #[test]
    #[cfg(unix)]
    fn test_complete_malformed_template_fails() {
        let client = CommandClient::new(CommandConfig {
            name: "broken".to_string(),
            command: "echo".to_string(),
            args_template: "'{prompt}".to_string(),
        });
        if !client.is_available() {
            return;
        }
        let err = client.complete(&request(vec![Message::user("x")])).unwrap_err();
        assert!(matches!(err, ModelError::ExecutionFailed(_)));
    }

    #[test]
    fn test_render_transcript_single_user() {
        let text = render_transcript(&[Message::user("1 + 1")]);
        assert_eq!(text, "1 + 1");
    }

    #[test]
    fn test_render_transcript_dialogue() {
        let text = render_transcript(&[
            Message::system("Be terse."),
            Message::user("hi"),
            Message::new(Role::Assistant, "hello"),
            Message::user("2 × 3"),
        ]);
        assert_eq!(text, "Be terse.\n\nUser: hi\n\nAssistant: hello\n\nUser: 2 × 3");
    }

    #[test]
    fn test_build_args_substitutes_per_argument() {
        let client = CommandClient::new(CommandConfig {
            name: "custom".to_string(),
            command: "tool".to_string(),
            args_template: "-m {model} --effort={reasoning_effort} -t {temperature} \"{prompt}\""
                .to_string(),
        });
        let args = client
            .build_args(&request(vec![Message::user("it's \"12\" ÷ 4\nnow")]))
            .unwrap();
        assert_eq!(
            args,
            vec![
                "-m",
                "gpt-4o",
                "--effort=low",
                "-t",
                "0",
                "it's \"12\" ÷ 4\nnow"
            ]
        );
    }

    #[test]
    fn test_client_name() {
        let client = CommandClient::new(CommandConfig::ollama());
        assert_eq!(client.name(), "ollama");
    }

    #[test]
    fn test_complete_tool_not_found() {
        let client = CommandClient::new(CommandConfig {
            name: "missing".to_string(),
            command: "this-tool-definitely-does-not-exist-12345".to_string(),
            args_template: "{prompt}".to_string(),
        });
        assert!(!client.is_available());
        let err = client.complete(&request(vec![Message::user("1 + 1")])).unwrap_err();
        assert!(matches!(err, ModelError::ToolNotFound(_)));
    }

    #[test]
    #[cfg(unix)]
    fn test_complete_with_echo() {
        let client = CommandClient::new(CommandConfig {
            name: "echo".to_string(),
            command: "echo".to_string(),
            args_template: "{prompt}".to_string(),
        });
        if !client.is_available() {
            return;
        }
        let reply = client.complete(&request(vec![Message::user("42")])).unwrap();
        assert_eq!(reply.text, "42");
        assert_eq!(reply.usage.completion_tokens, 1);
    }

    #[test]
    #[cfg(unix)]
    fn test_complete_nonzero_exit() {
        let client = CommandClient::new(CommandConfig {
            name: "false".to_string(),
            command: "false".to_string(),
            args_template: String::new(),
        });
        if !client.is_available() {
            return;
        }
        let err = client.complete(&request(vec![Message::user("x")])).unwrap_err();
        assert!(matches!(err, ModelError::ExecutionFailed(_)));
    }

    #[test]
    #[cfg(unix)]
    fn test_complete_timeout() {
        let client = CommandClient::new(CommandConfig {
            name: "sleep".to_string(),
            command: "sleep".to_string(),
            args_template: "5".to_string(),
        });
        if !client.is_available() {
            return;
        }
        let mut req = request(vec![Message::user("x")]);
        req.timeout = Duration::from_millis(50);
        let err = client.complete(&req).unwrap_err();
        assert!(matches!(err, ModelError::Timeout(_)));
    }

    #[test]
    fn test_model_error_display() {
        let err = ModelError::Timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30"));
        let err = ModelError::ToolNotFound("llm".to_string());
        assert!(err.to_string().contains("llm"));
    }
}
