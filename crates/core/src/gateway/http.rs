//! # HTTP Gateway
//!
//! Talks to the configured provider over its public HTTP API. Three wire
//! dialects cover every supported provider:
//!
//! | Dialect              | Providers                              |
//! |----------------------|----------------------------------------|
//! | `OpenAiChat`         | OpenAI, OpenRouter, Grok, DeepSeek     |
//! | `AnthropicMessages`  | Anthropic                              |
//! | `GeminiGenerate`     | Gemini                                 |
//!
//! Streaming responses are server-sent events; each `data:` payload is
//! decoded into zero or one text fragment.

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::Duration;

use super::sse::SseDecoder;
use super::{GatewayError, GenerationGateway, GenerationRequest, TextStream};
use crate::models::{ModelConfig, WireDialect};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 8192;
const ERROR_BODY_LIMIT: usize = 500;

/// Gateway backed by a provider's HTTP API
pub struct HttpGateway {
    client: reqwest::Client,
    config: ModelConfig,
    api_key: String,
}

impl HttpGateway {
    /// Read the provider's API key from its conventional environment variable
    pub fn from_env(config: ModelConfig) -> Result<Self, GatewayError> {
        let var = config.provider.api_key_env();
        let api_key = std::env::var(var)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| GatewayError::MissingApiKey(var.to_string()))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(
        config: ModelConfig,
        api_key: impl Into<String>,
    ) -> Result<Self, GatewayError> {
        // Streams can legitimately run for minutes, so there is no client-wide
        // total timeout; streams bound each chunk wait instead.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            config,
            api_key: api_key.into(),
        })
    }

    fn dialect(&self) -> WireDialect {
        self.config.provider.dialect()
    }

    fn build(&self, request: &GenerationRequest, stream: bool) -> reqwest::RequestBuilder {
        let url = endpoint(&self.config, stream);
        let body = request_body(&self.config, request, stream);
        let builder = self.client.post(url).json(&body);
        match self.dialect() {
            WireDialect::OpenAiChat => builder.bearer_auth(&self.api_key),
            WireDialect::AnthropicMessages => builder
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            WireDialect::GeminiGenerate => builder.header("x-goog-api-key", &self.api_key),
        }
    }
}

/// Turn a non-2xx response into an `Http` error carrying a truncated body
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Http {
        status: status.as_u16(),
        body: body.chars().take(ERROR_BODY_LIMIT).collect(),
    })
}

#[async_trait]
impl GenerationGateway for HttpGateway {
    fn name(&self) -> &str {
        self.config.provider.display_name()
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<TextStream, GatewayError> {
        tracing::debug!(
            step = request.step_tag(),
            model = %self.config.model,
            "opening generation stream"
        );
        let idle = Duration::from_secs(self.config.timeout_secs);
        let response = tokio::time::timeout(idle, self.build(request, true).send())
            .await
            .map_err(|_| GatewayError::Timeout)??;
        let response = check_status(response).await?;

        let body: ByteStream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(GatewayError::from))
            .boxed();

        Ok(decode_stream(body, self.dialect(), idle))
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GatewayError> {
        tracing::debug!(
            step = request.step_tag(),
            model = %self.config.model,
            "requesting completion"
        );
        let response = self
            .build(request, false)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .send()
            .await?;
        let value: Value = check_status(response).await?.json().await?;
        let text = parse_completion(self.dialect(), &value)?;
        if text.trim().is_empty() {
            return Err(GatewayError::Empty);
        }
        Ok(text)
    }
}

type ByteStream = BoxStream<'static, Result<Vec<u8>, GatewayError>>;

/// Decode an SSE body into text fragments
///
/// `idle` bounds the wait for each body chunk; a stalled provider yields
/// one `Timeout` and ends the stream.
fn decode_stream(body: ByteStream, dialect: WireDialect, idle: Duration) -> TextStream {
    let state = StreamState {
        body,
        decoder: SseDecoder::new(),
        queue: VecDeque::new(),
        dialect,
        finished: false,
    };

    stream::unfold(state, move |mut state| async move {
        loop {
            if let Some(item) = state.queue.pop_front() {
                if item.is_err() {
                    state.finished = true;
                    state.queue.clear();
                }
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match tokio::time::timeout(idle, state.body.next()).await {
                Ok(Some(Ok(chunk))) => {
                    for payload in state.decoder.push(&chunk) {
                        state.absorb(&payload);
                    }
                }
                Ok(Some(Err(err))) => state.queue.push_back(Err(err)),
                Ok(None) => {
                    if let Some(payload) = state.decoder.finish() {
                        state.absorb(&payload);
                    }
                    state.finished = true;
                }
                Err(_) => {
                    tracing::warn!(idle_secs = idle.as_secs_f64(), "generation stream stalled");
                    state.queue.push_back(Err(GatewayError::Timeout));
                }
            }
        }
    })
    .boxed()
}

struct StreamState {
    body: ByteStream,
    decoder: SseDecoder,
    queue: VecDeque<Result<String, GatewayError>>,
    dialect: WireDialect,
    finished: bool,
}

impl StreamState {
    fn absorb(&mut self, payload: &str) {
        if self.finished {
            return;
        }
        match parse_stream_payload(self.dialect, payload) {
            Ok(StreamPiece::Text(text)) => self.queue.push_back(Ok(text)),
            Ok(StreamPiece::Skip) => {}
            Ok(StreamPiece::Done) => self.finished = true,
            Err(err) => self.queue.push_back(Err(err)),
        }
    }
}

/// What one SSE payload contributed to the stream
#[derive(Debug, PartialEq)]
enum StreamPiece {
    Text(String),
    Skip,
    Done,
}

fn endpoint(config: &ModelConfig, stream: bool) -> String {
    let base = config.resolved_base_url();
    match config.provider.dialect() {
        WireDialect::OpenAiChat => format!("{}/chat/completions", base),
        WireDialect::AnthropicMessages => format!("{}/v1/messages", base),
        WireDialect::GeminiGenerate if stream => format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            base, config.model
        ),
        WireDialect::GeminiGenerate => {
            format!("{}/v1beta/models/{}:generateContent", base, config.model)
        }
    }
}

fn request_body(config: &ModelConfig, request: &GenerationRequest, stream: bool) -> Value {
    match config.provider.dialect() {
        WireDialect::OpenAiChat => {
            let mut messages = Vec::new();
            if !request.system.is_empty() {
                messages.push(json!({ "role": "system", "content": request.system }));
            }
            messages.push(json!({ "role": "user", "content": request.prompt }));
            let mut body = json!({
                "model": config.model,
                "messages": messages,
                "stream": stream,
            });
            if let Some(temperature) = config.temperature {
                body["temperature"] = json!(temperature);
            }
            body
        }
        WireDialect::AnthropicMessages => {
            let mut body = json!({
                "model": config.model,
                "max_tokens": ANTHROPIC_MAX_TOKENS,
                "messages": [{ "role": "user", "content": request.prompt }],
                "stream": stream,
            });
            if !request.system.is_empty() {
                body["system"] = json!(request.system);
            }
            if let Some(temperature) = config.temperature {
                body["temperature"] = json!(temperature);
            }
            body
        }
        WireDialect::GeminiGenerate => {
            let mut body = json!({
                "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            });
            if !request.system.is_empty() {
                body["systemInstruction"] = json!({ "parts": [{ "text": request.system }] });
            }
            if let Some(temperature) = config.temperature {
                body["generationConfig"] = json!({ "temperature": temperature });
            }
            body
        }
    }
}

fn gemini_text(value: &Value) -> String {
    value
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

fn parse_stream_payload(dialect: WireDialect, payload: &str) -> Result<StreamPiece, GatewayError> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(StreamPiece::Skip);
    }
    if dialect == WireDialect::OpenAiChat && payload == "[DONE]" {
        return Ok(StreamPiece::Done);
    }

    let value: Value = serde_json::from_str(payload)
        .map_err(|e| GatewayError::Decode(format!("bad stream payload: {}", e)))?;

    let text = match dialect {
        WireDialect::OpenAiChat => value
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
            .map(str::to_string),
        WireDialect::AnthropicMessages => {
            match value.get("type").and_then(Value::as_str).unwrap_or("") {
                "content_block_delta" => value
                    .pointer("/delta/text")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                "message_stop" => return Ok(StreamPiece::Done),
                "error" => {
                    let message = value
                        .pointer("/error/message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown stream error");
                    return Err(GatewayError::Decode(message.to_string()));
                }
                _ => None,
            }
        }
        WireDialect::GeminiGenerate => Some(gemini_text(&value)),
    };

    Ok(match text {
        Some(text) if !text.is_empty() => StreamPiece::Text(text),
        _ => StreamPiece::Skip,
    })
}

fn parse_completion(dialect: WireDialect, value: &Value) -> Result<String, GatewayError> {
    let text = match dialect {
        WireDialect::OpenAiChat => value
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string),
        WireDialect::AnthropicMessages => value
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|block| block.get("text").and_then(Value::as_str))
                    .collect::<String>()
            }),
        WireDialect::GeminiGenerate => Some(gemini_text(value)),
    };
    text.ok_or_else(|| GatewayError::Decode("completion has no text content".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LlmProvider;

    #[test]
    fn test_endpoints() {
        let openai = ModelConfig::with_provider(LlmProvider::OpenAI, "gpt-4o")
            .with_base_url("http://localhost:4000/v1/");
        assert_eq!(
            endpoint(&openai, true),
            "http://localhost:4000/v1/chat/completions"
        );

        let anthropic = ModelConfig::default();
        assert_eq!(
            endpoint(&anthropic, false),
            "https://api.anthropic.com/v1/messages"
        );

        let gemini = ModelConfig::with_provider(LlmProvider::Gemini, "gemini-2.5-pro");
        assert!(endpoint(&gemini, true).ends_with(":streamGenerateContent?alt=sse"));
        assert!(endpoint(&gemini, false).ends_with("gemini-2.5-pro:generateContent"));
    }

    #[test]
    fn test_openai_body() {
        let mut config = ModelConfig::with_provider(LlmProvider::DeepSeek, "deepseek-chat");
        config.temperature = Some(0.2);
        let request = GenerationRequest::new("Draw it").with_system("You draw");
        let body = request_body(&config, &request, true);

        assert_eq!(body["model"], "deepseek-chat");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Draw it");
        assert!(body["temperature"].is_number());
    }

    #[test]
    fn test_anthropic_body_puts_system_top_level() {
        let request = GenerationRequest::new("Draw it").with_system("You draw");
        let body = request_body(&ModelConfig::default(), &request, false);

        assert_eq!(body["system"], "You draw");
        assert_eq!(body["max_tokens"], ANTHROPIC_MAX_TOKENS);
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(1));
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_gemini_body() {
        let config = ModelConfig::with_provider(LlmProvider::Gemini, "gemini-2.5-pro");
        let request = GenerationRequest::new("Draw it").with_system("You draw");
        let body = request_body(&config, &request, true);

        assert_eq!(body["contents"][0]["parts"][0]["text"], "Draw it");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "You draw");
    }

    #[test]
    fn test_openai_stream_payloads() {
        let chunk = r#"{"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(
            parse_stream_payload(WireDialect::OpenAiChat, chunk).unwrap(),
            StreamPiece::Text("Hel".into())
        );
        let role_only = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(
            parse_stream_payload(WireDialect::OpenAiChat, role_only).unwrap(),
            StreamPiece::Skip
        );
        assert_eq!(
            parse_stream_payload(WireDialect::OpenAiChat, "[DONE]").unwrap(),
            StreamPiece::Done
        );
        assert!(parse_stream_payload(WireDialect::OpenAiChat, "{not json").is_err());
    }

    #[test]
    fn test_anthropic_stream_payloads() {
        let delta = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"flow"}}"#;
        assert_eq!(
            parse_stream_payload(WireDialect::AnthropicMessages, delta).unwrap(),
            StreamPiece::Text("flow".into())
        );
        let ping = r#"{"type":"ping"}"#;
        assert_eq!(
            parse_stream_payload(WireDialect::AnthropicMessages, ping).unwrap(),
            StreamPiece::Skip
        );
        let stop = r#"{"type":"message_stop"}"#;
        assert_eq!(
            parse_stream_payload(WireDialect::AnthropicMessages, stop).unwrap(),
            StreamPiece::Done
        );
        let error = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        assert_eq!(
            parse_stream_payload(WireDialect::AnthropicMessages, error),
            Err(GatewayError::Decode("Overloaded".into()))
        );
    }

    #[test]
    fn test_gemini_stream_payload_joins_parts() {
        let chunk = r#"{"candidates":[{"content":{"parts":[{"text":"a"},{"text":"b"}]}}]}"#;
        assert_eq!(
            parse_stream_payload(WireDialect::GeminiGenerate, chunk).unwrap(),
            StreamPiece::Text("ab".into())
        );
    }

    #[test]
    fn test_parse_completions() {
        let openai = json!({"choices":[{"message":{"role":"assistant","content":"done"}}]});
        assert_eq!(
            parse_completion(WireDialect::OpenAiChat, &openai).unwrap(),
            "done"
        );

        let anthropic = json!({"content":[{"type":"text","text":"one "},{"type":"text","text":"two"}]});
        assert_eq!(
            parse_completion(WireDialect::AnthropicMessages, &anthropic).unwrap(),
            "one two"
        );

        let missing = json!({"choices":[]});
        assert!(parse_completion(WireDialect::OpenAiChat, &missing).is_err());
    }

    #[tokio::test]
    async fn test_decode_stream_yields_fragments_in_order() {
        let body: ByteStream = stream::iter(vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\nda".to_vec()),
            Ok(b"ta: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n\n".to_vec()),
        ])
        .boxed();

        let fragments: Vec<_> = decode_stream(body, WireDialect::OpenAiChat, Duration::from_secs(5))
            .collect()
            .await;
        assert_eq!(fragments, vec![Ok("Hel".to_string()), Ok("lo".to_string())]);
    }

    #[tokio::test]
    async fn test_stalled_body_times_out() {
        let body: ByteStream = stream::pending().boxed();

        let fragments: Vec<_> =
            decode_stream(body, WireDialect::OpenAiChat, Duration::from_millis(50))
                .collect()
                .await;
        assert_eq!(fragments, vec![Err(GatewayError::Timeout)]);
    }

    #[tokio::test]
    async fn test_stall_after_first_fragment_times_out() {
        let first: ByteStream = stream::iter(vec![Ok(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n".to_vec(),
        )])
        .boxed();
        let body: ByteStream = first.chain(stream::pending()).boxed();

        let fragments: Vec<_> =
            decode_stream(body, WireDialect::OpenAiChat, Duration::from_millis(50))
                .collect()
                .await;
        assert_eq!(
            fragments,
            vec![Ok("partial".to_string()), Err(GatewayError::Timeout)]
        );
    }

    #[test]
    fn test_with_api_key_builds() {
        let gateway = HttpGateway::with_api_key(ModelConfig::default(), "sk-test").unwrap();
        assert_eq!(gateway.name(), "Anthropic");
    }
}
