//! Chat completion client for an OpenAI-compatible provider.
//!
//! [`CompletionClient::complete`] never fails: every provider problem is
//! turned into one of the fallback strings below and logged.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::relay::turn::ConversationTurn;

/// Returned without any network call when no provider key is configured.
pub const FALLBACK_NOT_CONFIGURED: &str =
    "⚠️ A inteligência artificial ainda não está configurada. Tente novamente mais tarde.";

/// Returned when the provider answered but without completion text.
pub const FALLBACK_EMPTY: &str = "Não consegui gerar uma resposta agora.";

/// Returned on timeouts, network failures and non-2xx responses.
pub const FALLBACK_ERROR: &str =
    "Desculpe, tive um problema para falar com a IA. Tente novamente em instantes.";

pub const SYSTEM_PROMPT: &str = "Você é o BRO.AI, um assistente especializado em gestão de pequenos \
negócios. Responda em português do Brasil, de forma clara, direta e prática. Explique conceitos \
de finanças e operação (CMV, margem, precificação, fluxo de caixa, estoque) com exemplos simples. \
Se a pergunta fugir do tema, responda brevemente e ofereça ajuda com o negócio.";

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub api_key: Option<String>,
    /// Base URL up to and including the version segment, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    /// Hard bound on a single attempt.
    pub timeout: Duration,
    /// Extra attempts after a retryable failure. 0 means exactly one attempt.
    pub retries: u32,
}

pub struct CompletionClient {
    config: CompletionConfig,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug)]
enum Error {
    Http(String),
    Timeout(Duration),
    Api { status: StatusCode, body: String },
    Parse(String),
    Empty,
}

impl Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::Timeout(_) => true,
            Error::Api { status, .. } => status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS,
            Error::Parse(_) | Error::Empty => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Timeout(d) => write!(f, "timed out after {d:?}"),
            Error::Api { status, body } => write!(f, "API error: {status}: {body}"),
            Error::Parse(e) => write!(f, "Parse error: {e}"),
            Error::Empty => write!(f, "Empty response"),
        }
    }
}

impl CompletionClient {
    pub fn new(config: CompletionConfig) -> Self {
        if config.api_key.is_none() {
            warn!("No completion provider key configured, replies will use the fallback message");
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build HTTP client with timeout, using defaults");
                reqwest::Client::new()
            });
        Self { config, http }
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    /// Generate a reply to a single utterance.
    pub async fn complete(&self, utterance: &str) -> String {
        self.complete_with_history(&[], utterance).await
    }

    /// Generate a reply, sending `history` (oldest first) between the system
    /// instruction and the utterance.
    pub async fn complete_with_history(&self, history: &[ConversationTurn], utterance: &str) -> String {
        let Some(api_key) = self.config.api_key.as_deref() else {
            debug!("Completion skipped: provider not configured");
            return FALLBACK_NOT_CONFIGURED.to_string();
        };

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ApiMessage {
            role: "system",
            content: SYSTEM_PROMPT,
        });
        messages.extend(history.iter().map(|turn| ApiMessage {
            role: turn.role.as_str(),
            content: &turn.content,
        }));
        messages.push(ApiMessage {
            role: "user",
            content: utterance,
        });

        let request = ApiRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
        };

        match self.request_with_retry(api_key, &request).await {
            Ok(text) => {
                info!("🤖 Completion: {} chars", text.chars().count());
                text
            }
            Err(Error::Empty) => {
                warn!("Completion response had no text");
                FALLBACK_EMPTY.to_string()
            }
            Err(e) => {
                error!(error = %e, "Completion request failed");
                FALLBACK_ERROR.to_string()
            }
        }
    }

    async fn request_with_retry(&self, api_key: &str, request: &ApiRequest<'_>) -> Result<String, Error> {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.config.timeout, self.request_once(api_key, request)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(self.config.timeout)),
            };

            match result {
                Err(e) if e.is_retryable() && attempt < self.config.retries => {
                    let delay = backoff(attempt);
                    warn!(error = %e, attempt = attempt + 1, "Completion attempt failed, retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn request_once(&self, api_key: &str, request: &ApiRequest<'_>) -> Result<String, Error> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Http(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(Error::Api { status, body });
        }

        let parsed: ApiResponse = serde_json::from_str(&body).map_err(|e| Error::Parse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(Error::Empty)
    }
}

fn backoff(attempt: u32) -> Duration {
    BACKOFF_BASE.saturating_mul(2u32.saturating_pow(attempt)).min(BACKOFF_CAP)
}
