use serde_json::{json, Value};

use super::common::safe_tail;
use super::pack::ClassifierPack;
use super::Classifier;
use crate::agents::{AgentState, Verdict};
use crate::config::ClassifierSettings;
use crate::error::ClassifierError;

const SYSTEM_PROMPT: &str = r#"You monitor an interactive terminal session that hosts a command-line agent. Read the visible screen and decide what the session is doing right now.

States:
- READY: the agent or shell is idle at its prompt and can take new input.
- BUSY: output is streaming or a command/agent is still working.
- NEEDS_CONFIRMATION: the screen asks a human to confirm, choose, or enter something (y/N, password, numbered choices).
- ERROR: the last operation clearly failed (traceback, fatal error, crashed agent) and needs attention.

Reply with a single JSON object and nothing else:
{"state": "READY|BUSY|NEEDS_CONFIRMATION|ERROR", "summary": "<one short sentence>", "actions_needed": ["<what the human should do>", ...] or null}"#;

/// Classifier backed by a chat-completions endpoint
pub struct RemoteClassifier {
    agent: ureq::Agent,
    endpoint: String,
    model: String,
    api_key: String,
    settings: ClassifierSettings,
}

impl RemoteClassifier {
    pub fn new(settings: &ClassifierSettings, api_key: String) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(settings.timeout()))
            .build();

        Self {
            agent: ureq::Agent::new_with_config(config),
            endpoint: settings.endpoint.clone(),
            model: settings.model.clone(),
            api_key,
            settings: settings.clone(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the chat completion request for one snapshot
    fn build_request(&self, snapshot: &str, pack: &ClassifierPack) -> Value {
        let mut messages = vec![json!({"role": "system", "content": SYSTEM_PROMPT})];

        for example in &pack.examples {
            messages.push(json!({
                "role": "user",
                "content": format!("Agent type: {}\nScreen:\n{}", pack.name, example.snapshot),
            }));
            messages.push(json!({
                "role": "assistant",
                "content": json!({
                    "state": example.state,
                    "summary": example.summary,
                    "actions_needed": Value::Null,
                })
                .to_string(),
            }));
        }

        messages.push(json!({
            "role": "user",
            "content": format!(
                "Agent type: {}\nScreen:\n{}",
                pack.name,
                safe_tail(snapshot, self.settings.max_snapshot_bytes)
            ),
        }));

        json!({
            "model": self.model,
            "temperature": 0,
            "response_format": {"type": "json_object"},
            "messages": messages,
        })
    }

    /// One request with the timeout enforced around the blocking call
    async fn attempt(&self, body: &Value) -> Result<Verdict, ClassifierError> {
        let agent = self.agent.clone();
        let endpoint = self.endpoint.clone();
        let auth = format!("Bearer {}", self.api_key);
        let body = body.clone();
        let timeout = self.settings.timeout();

        let call = tokio::task::spawn_blocking(move || -> Result<String, ClassifierError> {
            let mut response = agent
                .post(&endpoint)
                .header("Authorization", &auth)
                .send_json(&body)
                .map_err(|e| match e {
                    ureq::Error::StatusCode(code) => ClassifierError::HttpStatus(code),
                    ureq::Error::Timeout(_) => ClassifierError::Timeout(timeout),
                    other => ClassifierError::Transport(other.to_string()),
                })?;
            response
                .body_mut()
                .read_to_string()
                .map_err(|e| ClassifierError::Transport(e.to_string()))
        });

        let text = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_err)) => return Err(ClassifierError::Transport(join_err.to_string())),
            Err(_) => return Err(ClassifierError::Timeout(timeout)),
        };

        parse_completion(&text)
    }
}

impl Classifier for RemoteClassifier {
    /// Retries every failure up to `max_attempts`, then yields the unavailable verdict
    async fn classify(&self, snapshot: &str, pack: &ClassifierPack) -> Verdict {
        let body = self.build_request(snapshot, pack);
        let max_attempts = self.settings.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.attempt(&body).await {
                Ok(verdict) => return verdict,
                Err(e) => {
                    tracing::warn!(attempt, max_attempts, pack = %pack.name, error = %e, "Remote classification failed");
                    if attempt < max_attempts {
                        tokio::time::sleep(self.settings.backoff_after(attempt)).await;
                    }
                }
            }
        }

        Verdict::unavailable()
    }
}

/// Parse a classifier response body into a verdict
///
/// Accepts a chat completion whose message content holds the verdict JSON
/// (optionally inside a markdown fence) or the bare verdict object.
pub fn parse_completion(body: &str) -> Result<Verdict, ClassifierError> {
    let value: Value = serde_json::from_str(body.trim())
        .map_err(|e| ClassifierError::MalformedResponse(format!("invalid JSON: {}", e)))?;

    let verdict_value = match value.get("choices") {
        Some(choices) => {
            let content = choices
                .get(0)
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_str())
                .ok_or_else(|| {
                    ClassifierError::MalformedResponse("completion has no message content".into())
                })?;
            serde_json::from_str(strip_fence(content)).map_err(|e| {
                ClassifierError::MalformedResponse(format!("content is not JSON: {}", e))
            })?
        }
        None => value,
    };

    verdict_from_value(&verdict_value)
}

fn verdict_from_value(value: &Value) -> Result<Verdict, ClassifierError> {
    let raw_state = value
        .get("state")
        .and_then(|s| s.as_str())
        .ok_or_else(|| ClassifierError::MalformedResponse("missing state".into()))?;
    let state = AgentState::parse_lenient(raw_state).ok_or_else(|| {
        ClassifierError::MalformedResponse(format!("unknown state {:?}", raw_state))
    })?;

    let summary = value
        .get("summary")
        .and_then(|s| s.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(state.as_str())
        .to_string();

    let actions = match value.get("actions_needed").or_else(|| value.get("actions")) {
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    Ok(Verdict {
        state,
        summary,
        actions,
    })
}

/// Remove a surrounding ``` / ```json fence
fn strip_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
