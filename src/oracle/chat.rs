//! OpenAI-compatible chat-completions oracle

use super::prompts;
use super::{BackoffPolicy, Revision, RevisionOracle, RevisionRequest, TestRequest};
use crate::config::OracleConfig;
use crate::error::OracleError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

/// Name of the function the model is forced to call
pub const CODE_FUNCTION_NAME: &str = "add_function_to_file";

pub struct ChatOracle {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    backoff: BackoffPolicy,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
    /// Older servers answer with a bare function call
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct CodeArguments {
    function_code: String,
    #[serde(default)]
    import_statements: String,
}

impl ChatOracle {
    pub fn from_config(config: &OracleConfig) -> Result<Self, OracleError> {
        // An empty variable name means the server needs no key
        let api_key = match config.api_key_env.as_deref().filter(|v| !v.is_empty()) {
            Some(var) => Some(
                std::env::var(var)
                    .ok()
                    .filter(|key| !key.is_empty())
                    .ok_or_else(|| OracleError::MissingApiKey(var.to_string()))?,
            ),
            None => None,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            backoff: config.backoff_policy(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body(&self, prompt: &str) -> Value {
        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": prompts::SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "tools": [{
                "type": "function",
                "function": {
                    "name": CODE_FUNCTION_NAME,
                    "description": "Add a new function to a Python file.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "function_code": {
                                "type": "string",
                                "description": "Python code for the function, without imports.",
                            },
                            "import_statements": {
                                "type": "string",
                                "description": "Import statements the function needs, one per line.",
                            },
                        },
                        "required": ["function_code", "import_statements"],
                    },
                },
            }],
            "tool_choice": {"type": "function", "function": {"name": CODE_FUNCTION_NAME}},
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<ChatResponse, OracleError> {
        let mut request = self.client.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| OracleError::Decode(e.to_string()))
    }

    /// Send the prompt, retrying transient failures with backoff. Never errors:
    /// a terminal failure becomes [`Revision::Failed`].
    async fn complete(&self, prompt: &str) -> Revision {
        let body = self.request_body(prompt);
        let max_tries = self.backoff.max_tries.max(1);

        for attempt in 1..=max_tries {
            match self.send(&body).await {
                Ok(response) => return revision_from_response(response),
                Err(e) if e.is_retryable() && attempt < max_tries => {
                    let delay = self.backoff.delay_with_jitter(attempt);
                    tracing::warn!(
                        "Oracle request failed ({}), retrying in {:.1}s",
                        e,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!("Oracle request failed after {} attempt(s): {}", attempt, e);
                    return Revision::failed(e.to_string());
                }
            }
        }

        Revision::failed("no attempts made")
    }
}

#[async_trait]
impl RevisionOracle for ChatOracle {
    async fn revise(&self, request: &RevisionRequest) -> Revision {
        self.complete(&prompts::revision_prompt(request)).await
    }

    async fn generate_test(&self, request: &TestRequest) -> Revision {
        self.complete(&prompts::test_prompt(request)).await
    }
}

fn revision_from_response(response: ChatResponse) -> Revision {
    let Some(choice) = response.choices.into_iter().next() else {
        return Revision::failed("response had no choices");
    };
    let message = choice.message;

    let arguments = message
        .tool_calls
        .into_iter()
        .next()
        .map(|call| call.function.arguments)
        .or_else(|| message.function_call.map(|call| call.arguments));

    match arguments {
        Some(arguments) => match decode_arguments(&arguments) {
            Ok(revision) => revision,
            Err(e) => {
                tracing::debug!("Undecodable function arguments: {}", arguments);
                Revision::failed(e.to_string())
            }
        },
        None => Revision::failed(format!(
            "model answered without calling {}: {}",
            CODE_FUNCTION_NAME,
            message.content.unwrap_or_default()
        )),
    }
}

/// Decode `{function_code, import_statements}`, repairing backslash-newline
/// sequences that models sometimes emit inside JSON strings
pub(crate) fn decode_arguments(arguments: &str) -> Result<Revision, OracleError> {
    let parsed: CodeArguments = match serde_json::from_str(arguments) {
        Ok(parsed) => parsed,
        Err(first) => {
            tracing::debug!("Retrying argument decode after escape repair: {}", first);
            serde_json::from_str(&arguments.replace("\\\n", "\\n"))
                .map_err(|e| OracleError::Decode(e.to_string()))?
        }
    };

    if parsed.function_code.trim().is_empty() {
        return Err(OracleError::Decode("empty function_code".to_string()));
    }

    let imports = parsed
        .import_statements
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();

    Ok(Revision::Revised {
        code: parsed.function_code,
        imports,
    })
}
