use crate::error::DecantError;
use crate::oracle::prompts::Prompt;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::{Value, json};
use std::env;
use std::fmt;
use std::time::Duration;

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_URL: &str = "https://api.openai.com/v1/responses";
const GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEEPSEEK_URL: &str = "https://api.deepseek.com";

/// Model tiers accepted by `--model`.
pub const MODEL_TIERS: [(&str, &str); 3] = [
    ("haiku", "claude-haiku-4-5-20251001"),
    ("sonnet", "claude-sonnet-4-5-20250929"),
    ("opus", "claude-opus-4-6"),
];

/// A failed provider call. `transient` failures are worth retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallError {
    pub transient: bool,
    pub reason: String,
}

impl CallError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            transient: true,
            reason: reason.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self {
            transient: false,
            reason: reason.into(),
        }
    }

    fn from_status(provider: Provider, status: StatusCode, body: &str) -> Self {
        let detail = body.trim();
        let reason = if detail.is_empty() {
            format!("{} call failed with status {status}", provider.label())
        } else {
            format!(
                "{} call failed with status {status}: {}",
                provider.label(),
                crate::decant::util::truncate_with_ellipsis(detail, 300)
            )
        };
        Self {
            transient: is_transient_status(status.as_u16()),
            reason,
        }
    }

    fn from_transport(provider: Provider, err: &reqwest::Error) -> Self {
        Self::transient(format!("{} request failed: {err}", provider.label()))
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

pub fn is_transient_status(code: u16) -> bool {
    matches!(code, 408 | 409 | 425 | 429 | 529) || (500..600).contains(&code)
}

/// One completion backend.
pub trait Completion {
    fn label(&self) -> String;
    fn complete(&self, prompt: &Prompt) -> Result<String, CallError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    OpenAi,
    Gemini,
    OpenAiCompatible,
}

impl Provider {
    pub fn label(self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
            Provider::OpenAiCompatible => "openai-compatible",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSelection {
    Local,
    Remote { provider: Provider, model: String },
}

fn env_non_empty(var: &str) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

fn parse_provider_alias(raw: &str) -> Option<Provider> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "anthropic" | "claude" => Some(Provider::Anthropic),
        "openai" => Some(Provider::OpenAi),
        "gemini" | "google" => Some(Provider::Gemini),
        "openai-compatible" | "compatible" | "deepseek" => Some(Provider::OpenAiCompatible),
        _ => None,
    }
}

fn infer_provider_from_model(model: &str) -> Option<Provider> {
    let lower = model.trim().to_ascii_lowercase();
    if lower.starts_with("deepseek-") {
        return Some(Provider::OpenAiCompatible);
    }
    if lower.starts_with("claude-") {
        return Some(Provider::Anthropic);
    }
    if lower.starts_with("gemini-") {
        return Some(Provider::Gemini);
    }
    if lower.starts_with("gpt-")
        || lower.starts_with("o1")
        || lower.starts_with("o3")
        || lower.starts_with("o4")
    {
        return Some(Provider::OpenAi);
    }
    None
}

fn tier_model(raw: &str) -> Option<&'static str> {
    MODEL_TIERS
        .iter()
        .find(|(tier, _)| tier.eq_ignore_ascii_case(raw))
        .map(|(_, model)| *model)
}

/// Turn a `--model` value into a provider and model id.
pub fn resolve_model(raw: &str) -> Result<ModelSelection, DecantError> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("local") {
        return Ok(ModelSelection::Local);
    }
    if let Some(model) = tier_model(trimmed) {
        return Ok(ModelSelection::Remote {
            provider: Provider::Anthropic,
            model: model.to_string(),
        });
    }
    if let Some((prefix, model)) = trimmed.split_once(':')
        && let Some(provider) = parse_provider_alias(prefix)
        && !model.trim().is_empty()
    {
        let model = tier_model(model.trim()).unwrap_or(model.trim());
        return Ok(ModelSelection::Remote {
            provider,
            model: model.to_string(),
        });
    }
    match infer_provider_from_model(trimmed) {
        Some(provider) => Ok(ModelSelection::Remote {
            provider,
            model: trimmed.to_string(),
        }),
        None => Err(DecantError::OracleUnavailable {
            stage: "model selection",
            attempts: 0,
            reason: format!(
                "unknown model `{trimmed}`; use haiku, sonnet, opus, local or provider:model"
            ),
        }),
    }
}

#[derive(Debug, Clone)]
enum Credential {
    ApiKey(String),
    Bearer(String),
}

fn resolve_credential(provider: Provider) -> Option<Credential> {
    match provider {
        Provider::Anthropic => env_non_empty("ANTHROPIC_API_KEY")
            .map(Credential::ApiKey)
            .or_else(|| env_non_empty("ANTHROPIC_AUTH_TOKEN").map(Credential::Bearer)),
        Provider::OpenAi => env_non_empty("OPENAI_API_KEY").map(Credential::Bearer),
        Provider::Gemini => env_non_empty("GEMINI_API_KEY").map(Credential::ApiKey),
        Provider::OpenAiCompatible => env_non_empty("DECANT_API_KEY")
            .or_else(|| env_non_empty("DEEPSEEK_API_KEY"))
            .map(Credential::Bearer),
    }
}

fn credential_hint(provider: Provider) -> &'static str {
    match provider {
        Provider::Anthropic => "ANTHROPIC_API_KEY or ANTHROPIC_AUTH_TOKEN",
        Provider::OpenAi => "OPENAI_API_KEY",
        Provider::Gemini => "GEMINI_API_KEY",
        Provider::OpenAiCompatible => "DECANT_API_KEY",
    }
}

fn resolve_compatible_base_url(model: &str) -> Option<String> {
    if let Some(base) = env_non_empty("DECANT_BASE_URL") {
        return Some(base);
    }
    if model.trim().to_ascii_lowercase().starts_with("deepseek-") {
        return Some(DEEPSEEK_URL.to_string());
    }
    None
}

/// Blocking HTTP completion against one of the hosted APIs.
pub struct HttpCompletion {
    provider: Provider,
    model: String,
    credential: Credential,
    base_url: Option<String>,
    client: Client,
}

fn setup_error(reason: impl Into<String>) -> DecantError {
    DecantError::OracleUnavailable {
        stage: "oracle setup",
        attempts: 0,
        reason: reason.into(),
    }
}

impl HttpCompletion {
    pub fn new(provider: Provider, model: &str, timeout_secs: u64) -> Result<Self, DecantError> {
        let credential = resolve_credential(provider).ok_or_else(|| {
            setup_error(format!(
                "no credentials for {}; set {}",
                provider.label(),
                credential_hint(provider)
            ))
        })?;
        let base_url = match provider {
            Provider::OpenAiCompatible => Some(resolve_compatible_base_url(model).ok_or_else(
                || setup_error("openai-compatible provider needs DECANT_BASE_URL"),
            )?),
            _ => None,
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|err| setup_error(format!("failed to build http client: {err}")))?;
        Ok(Self {
            provider,
            model: model.to_string(),
            credential,
            base_url,
            client,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match (&self.credential, self.provider) {
            (Credential::ApiKey(key), Provider::Anthropic) => request
                .header("x-api-key", key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            (Credential::Bearer(token), Provider::Anthropic) => request
                .bearer_auth(token)
                .header("anthropic-version", ANTHROPIC_VERSION),
            (Credential::ApiKey(key), Provider::Gemini) => request.header("x-goog-api-key", key),
            (Credential::ApiKey(key), _) | (Credential::Bearer(key), _) => request.bearer_auth(key),
        }
    }

    fn request(&self, prompt: &Prompt) -> RequestBuilder {
        let request = match self.provider {
            Provider::Anthropic => self.client.post(ANTHROPIC_URL).json(&json!({
                "model": self.model,
                "max_tokens": prompt.max_tokens,
                "system": prompt.system,
                "messages": [{"role": "user", "content": prompt.user}]
            })),
            Provider::OpenAi => self.client.post(OPENAI_URL).json(&json!({
                "model": self.model,
                "instructions": prompt.system,
                "input": prompt.user,
                "max_output_tokens": prompt.max_tokens
            })),
            Provider::Gemini => self
                .client
                .post(format!("{GEMINI_URL}/{}:generateContent", self.model))
                .json(&json!({
                    "systemInstruction": {"parts": [{"text": prompt.system}]},
                    "contents": [{"role": "user", "parts": [{"text": prompt.user}]}],
                    "generationConfig": {"maxOutputTokens": prompt.max_tokens}
                })),
            Provider::OpenAiCompatible => {
                let base = self.base_url.as_deref().unwrap_or(DEEPSEEK_URL);
                self.client
                    .post(format!("{}/v1/chat/completions", base.trim_end_matches('/')))
                    .json(&json!({
                        "model": self.model,
                        "max_tokens": prompt.max_tokens,
                        "messages": [
                            {"role": "system", "content": prompt.system},
                            {"role": "user", "content": prompt.user}
                        ]
                    }))
            }
        };
        self.authorize(request)
    }
}

impl Completion for HttpCompletion {
    fn label(&self) -> String {
        format!("{}:{}", self.provider.label(), self.model)
    }

    fn complete(&self, prompt: &Prompt) -> Result<String, CallError> {
        let response = self
            .request(prompt)
            .send()
            .map_err(|err| CallError::from_transport(self.provider, &err))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(CallError::from_status(self.provider, status, &body));
        }
        let json: Value = response.json().map_err(|err| {
            CallError::fatal(format!("{} response is not JSON: {err}", self.provider.label()))
        })?;
        extract_text(self.provider, &json).ok_or_else(|| {
            CallError::fatal(format!(
                "{} response missing text content",
                self.provider.label()
            ))
        })
    }
}

fn join_text_parts(parts: &[Value]) -> Option<String> {
    let chunks = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>();
    if chunks.is_empty() {
        None
    } else {
        Some(chunks.join("\n"))
    }
}

fn extract_anthropic_text(json: &Value) -> Option<String> {
    join_text_parts(json.get("content")?.as_array()?)
}

fn extract_openai_text(json: &Value) -> Option<String> {
    if let Some(text) = json.get("output_text").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    let parts = json
        .get("output")?
        .as_array()?
        .iter()
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .cloned()
        .collect::<Vec<_>>();
    join_text_parts(&parts)
}

fn extract_gemini_text(json: &Value) -> Option<String> {
    let parts = json
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;
    join_text_parts(parts)
}

fn extract_openai_compatible_text(json: &Value) -> Option<String> {
    let content = json
        .get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?;
    match content {
        Value::String(s) => Some(s.to_string()),
        Value::Array(parts) => join_text_parts(parts),
        _ => None,
    }
}

pub fn extract_text(provider: Provider, json: &Value) -> Option<String> {
    match provider {
        Provider::Anthropic => extract_anthropic_text(json),
        Provider::OpenAi => extract_openai_text(json),
        Provider::Gemini => extract_gemini_text(json),
        Provider::OpenAiCompatible => extract_openai_compatible_text(json),
    }
}

#[cfg(test)]
mod tests {
    use super::{ModelSelection, Provider, extract_text, is_transient_status, resolve_model};
    use serde_json::json;

    #[test]
    fn tiers_and_prefixes_resolve() {
        assert_eq!(
            resolve_model("haiku").expect("tier"),
            ModelSelection::Remote {
                provider: Provider::Anthropic,
                model: "claude-haiku-4-5-20251001".to_string()
            }
        );
        assert_eq!(resolve_model(" LOCAL ").expect("local"), ModelSelection::Local);
        assert_eq!(
            resolve_model("openai:gpt-4.1-mini").expect("prefixed"),
            ModelSelection::Remote {
                provider: Provider::OpenAi,
                model: "gpt-4.1-mini".to_string()
            }
        );
        assert_eq!(
            resolve_model("gemini-2.5-flash").expect("inferred"),
            ModelSelection::Remote {
                provider: Provider::Gemini,
                model: "gemini-2.5-flash".to_string()
            }
        );
        assert_eq!(
            resolve_model("deepseek-chat").expect("inferred"),
            ModelSelection::Remote {
                provider: Provider::OpenAiCompatible,
                model: "deepseek-chat".to_string()
            }
        );
        assert!(resolve_model("mystery-model").is_err());
    }

    #[test]
    fn retryable_statuses() {
        for code in [408, 409, 425, 429, 500, 503, 529] {
            assert!(is_transient_status(code), "{code} should retry");
        }
        for code in [400, 401, 403, 404, 422] {
            assert!(!is_transient_status(code), "{code} should not retry");
        }
    }

    #[test]
    fn response_text_extraction_per_provider() {
        let anthropic = json!({"content": [{"type": "text", "text": "a1"}, {"type": "text", "text": "a2"}]});
        assert_eq!(extract_text(Provider::Anthropic, &anthropic).as_deref(), Some("a1\na2"));

        let openai = json!({"output": [{"content": [{"type": "output_text", "text": "o1"}]}]});
        assert_eq!(extract_text(Provider::OpenAi, &openai).as_deref(), Some("o1"));
        let openai_flat = json!({"output_text": "flat"});
        assert_eq!(extract_text(Provider::OpenAi, &openai_flat).as_deref(), Some("flat"));

        let gemini = json!({"candidates": [{"content": {"parts": [{"text": "g1"}]}}]});
        assert_eq!(extract_text(Provider::Gemini, &gemini).as_deref(), Some("g1"));

        let compat = json!({"choices": [{"message": {"content": "c1"}}]});
        assert_eq!(extract_text(Provider::OpenAiCompatible, &compat).as_deref(), Some("c1"));

        assert_eq!(extract_text(Provider::Anthropic, &json!({"content": []})), None);
    }
}
