//! Repair Oracle Client.
//!
//! [`Oracle`] is the transport seam: one prompt in, one completion out.
//! [`ChatOracle`] speaks the OpenAI-compatible chat completions protocol.
//! [`RepairClient`] builds the prompt, calls the oracle, strips fences, and
//! atomically overwrites the target file. It never returns an error: every
//! failure becomes `PatchResult { success: false, .. }` with a diagnostic.

use std::fs;
use std::path::Path;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::console::{Notice, Reporter};
use crate::core::fence::strip_fences;
use crate::core::types::PatchResult;
use crate::error::StageError;
use crate::io::atomic::write_atomic;
use crate::io::config::{OracleConfig, OracleCredentials};
use crate::io::prompt::{RepairPrompt, render_repair_prompt};

/// Bytes of an error response body kept in a transport diagnostic.
const ERROR_BODY_LIMIT: usize = 500;

pub trait Oracle {
    /// Model identifier, for display.
    fn model(&self) -> &str;

    /// Send one user-role prompt and return the raw completion text.
    fn complete(&self, prompt: &str) -> Result<String, StageError>;
}

impl<O: Oracle + ?Sized> Oracle for &O {
    fn model(&self) -> &str {
        (**self).model()
    }

    fn complete(&self, prompt: &str) -> Result<String, StageError> {
        (**self).complete(prompt)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Blocking client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatOracle {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f64,
}

impl ChatOracle {
    /// Build a client. A missing credential or a client that cannot be
    /// constructed is a configuration error; no request is made here.
    pub fn new(cfg: &OracleConfig, credentials: &OracleCredentials) -> Result<Self, StageError> {
        let api_key = credentials.api_key.clone().ok_or_else(|| {
            StageError::Configuration(format!("{} is not set", cfg.api_key_env))
        })?;
        let model = credentials
            .model_override
            .clone()
            .unwrap_or_else(|| cfg.model.clone());
        if model.trim().is_empty() {
            return Err(StageError::Configuration("oracle model is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(cfg.timeout())
            .build()
            .map_err(|err| StageError::Configuration(format!("build http client: {err}")))?;

        Ok(Self {
            client,
            endpoint: chat_endpoint(&cfg.base_url),
            api_key,
            model,
            temperature: cfg.temperature,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Oracle for ChatOracle {
    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model, endpoint = %self.endpoint))]
    fn complete(&self, prompt: &str) -> Result<String, StageError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
        };

        debug!(prompt_bytes = prompt.len(), "sending chat completion");
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|err| transport_error(&err))?;

        let status = resp.status();
        let text = resp
            .text()
            .map_err(|err| StageError::Transport(format!("read response body: {err}")))?;

        if !status.is_success() {
            warn!(%status, "oracle returned an error status");
            return Err(StageError::Transport(format!(
                "oracle returned {status}: {}",
                truncate(&text, ERROR_BODY_LIMIT)
            )));
        }

        parse_completion(&text)
    }
}

fn chat_endpoint(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

fn transport_error(err: &reqwest::Error) -> StageError {
    if err.is_timeout() {
        return StageError::Transport(format!("request timed out: {err}"));
    }
    if err.is_connect() {
        return StageError::Transport(format!("connection failed: {err}"));
    }
    StageError::Transport(err.to_string())
}

/// Pull the first choice's message text out of a chat completions body.
fn parse_completion(body: &str) -> Result<String, StageError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|err| StageError::MalformedResponse(format!("invalid json: {err}")))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| StageError::MalformedResponse("response has no message content".to_string()))
}

fn truncate(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Prompt construction, oracle call, and file overwrite for one repair.
pub struct RepairClient<O> {
    oracle: Result<O, String>,
}

impl<O: Oracle> RepairClient<O> {
    pub fn new(oracle: O) -> Self {
        Self { oracle: Ok(oracle) }
    }

    /// Wrap the result of building an oracle. A build failure is kept and
    /// turns every later `repair` into an immediate failure.
    pub fn from_setup(setup: Result<O, StageError>) -> Self {
        let oracle = setup.map_err(|err| match err {
            StageError::Configuration(message) => message,
            other => other.to_string(),
        });
        Self { oracle }
    }

    pub fn is_ready(&self) -> bool {
        self.oracle.is_ok()
    }

    /// Rewrite `source_path` with the oracle's fix for the failures in `report_path`.
    pub fn repair(
        &self,
        source_path: &Path,
        report_path: &Path,
        reporter: &dyn Reporter,
    ) -> PatchResult {
        match self.try_repair(source_path, report_path, reporter) {
            Ok(source) => PatchResult::applied(source),
            Err(err) => {
                warn!(kind = err.kind(), err = %err, "repair failed");
                let diagnostic = err.to_string();
                reporter.emit(Notice::RepairFailed {
                    diagnostic: diagnostic.clone(),
                });
                PatchResult::failed(diagnostic)
            }
        }
    }

    /// Same as [`RepairClient::repair`], with the classified error kept.
    #[instrument(skip_all, fields(source = %source_path.display(), report = %report_path.display()))]
    pub fn try_repair(
        &self,
        source_path: &Path,
        report_path: &Path,
        reporter: &dyn Reporter,
    ) -> Result<String, StageError> {
        let oracle = self
            .oracle
            .as_ref()
            .map_err(|message| StageError::Configuration(message.clone()))?;

        let source =
            fs::read_to_string(source_path).map_err(|err| StageError::io(source_path, err))?;
        let report =
            fs::read_to_string(report_path).map_err(|err| StageError::io(report_path, err))?;

        let prompt = render_repair_prompt(&RepairPrompt {
            source_path,
            source: &source,
            report: &report,
        })?;

        reporter.emit(Notice::RepairStarted {
            source_path: source_path.to_path_buf(),
            model: oracle.model().to_string(),
        });
        let raw = oracle.complete(&prompt)?;

        let fixed = strip_fences(&raw);
        if fixed.is_empty() {
            return Err(StageError::MalformedResponse(
                "response is empty after removing code fences".to_string(),
            ));
        }

        write_atomic(source_path, fixed).map_err(|err| StageError::io(source_path, err))?;
        info!(bytes = fixed.len(), "patched source file");
        reporter.emit(Notice::RepairApplied {
            source_path: source_path.to_path_buf(),
        });
        Ok(fixed.to_string())
    }
}
