// src/llm.rs

use crate::config::{EndpointConfig, LlmBackend, LlmSection};
use crate::error::LlmError;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Resolved endpoint configuration ready to make API calls.
#[derive(Debug, Clone)]
pub struct ResolvedEndpoint {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

/// Resolve the LLM config section into a concrete endpoint.
///
/// Returns `None` for the heuristics backend, which never talks to a model.
pub fn resolve_endpoint(llm: &LlmSection) -> Option<ResolvedEndpoint> {
    let (section, fixed_key) = match llm.backend {
        LlmBackend::Ollama => (&llm.ollama, Some("ollama")), // required by API but ignored
        LlmBackend::Cliproxy => (&llm.cliproxy, Some("cliproxy")), // OAuth upstream, not keys
        LlmBackend::Remote => (&llm.remote, None),
        LlmBackend::Heuristics => return None,
    };

    let api_key = section
        .api_key_env
        .as_deref()
        .and_then(read_key)
        .or_else(|| fixed_key.map(str::to_string));

    if api_key.is_none() {
        warn!(
            backend = ?llm.backend,
            env = ?section.api_key_env,
            "No API key found; LLM calls will fail and results will be empty"
        );
    }

    info!(
        backend = ?llm.backend,
        url = %section.base_url,
        model = %section.model,
        "Using LLM backend"
    );
    Some(endpoint_from(section, api_key))
}

fn read_key(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|k| !k.trim().is_empty())
}

fn endpoint_from(section: &EndpointConfig, api_key: Option<String>) -> ResolvedEndpoint {
    ResolvedEndpoint {
        base_url: section.base_url.trim_end_matches('/').to_string(),
        model: section.model.clone(),
        api_key,
    }
}

/// Thin OpenAI-compatible chat-completions client shared by extraction and summaries.
pub struct LlmClient {
    client: Client,
    endpoint: ResolvedEndpoint,
}

impl LlmClient {
    pub fn new(endpoint: ResolvedEndpoint) -> Self {
        Self {
            client: Client::new(),
            endpoint,
        }
    }

    pub fn model(&self) -> &str {
        &self.endpoint.model
    }

    /// Check if an Ollama server is reachable. Only logs; callers degrade on failure anyway.
    pub async fn check_ollama_health(&self) -> bool {
        // Ollama's health endpoint is at the root (not under /v1)
        let health_url = self.endpoint.base_url.trim_end_matches("/v1");

        match self
            .client
            .get(health_url)
            .timeout(Duration::from_secs(3))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                info!("Ollama server is reachable");
                true
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "Ollama server returned non-OK status");
                false
            }
            Err(e) => {
                warn!(error = %e, "Ollama server not reachable. Start it with: ollama serve");
                false
            }
        }
    }

    /// Send one chat request at temperature 0 and return the reply parsed as a JSON object.
    pub async fn chat_json(
        &self,
        messages: &[ChatMessage],
        response_format: Option<&Value>,
    ) -> Result<Value, LlmError> {
        let request = ChatRequest {
            model: &self.endpoint.model,
            messages,
            temperature: 0.0,
            response_format,
        };

        let url = format!("{}/chat/completions", self.endpoint.base_url);
        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.endpoint.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status, body });
        }

        let chat_response: ChatResponse = response.json().await?;
        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(LlmError::EmptyResponse)?;

        debug!(response = %content, "LLM response");
        parse_json_reply(&content)
    }
}

/// Reasoning blocks emitted by thinking models (qwen3, deepseek-r1).
static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think>.*?</think>").expect("valid think-block regex"));

/// Parse a model reply into JSON, tolerating reasoning blocks, markdown fences and chatter.
pub fn parse_json_reply(content: &str) -> Result<Value, LlmError> {
    let without_thinking = THINK_BLOCK.replace_all(content, "");

    // Strip markdown fences if the model added them despite instructions
    let stripped = without_thinking
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let json_str = extract_json_object(stripped)?;
    Ok(serde_json::from_str(json_str)?)
}

/// Extract the outermost JSON object from a string that may contain
/// surrounding text (e.g. thinking tokens).
fn extract_json_object(s: &str) -> Result<&str, LlmError> {
    let start = s
        .find('{')
        .ok_or_else(|| LlmError::MalformedJson("no '{' found".to_string()))?;
    let end = s
        .rfind('}')
        .ok_or_else(|| LlmError::MalformedJson("no '}' found".to_string()))?;
    if end <= start {
        return Err(LlmError::MalformedJson("unbalanced braces".to_string()));
    }
    Ok(&s[start..=end])
}

/// Cut `text` to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// One-shot HTTP server standing in for a chat-completions endpoint.
#[cfg(test)]
pub(crate) mod stub_server {
    use super::{LlmClient, ResolvedEndpoint};
    use serde_json::{Value, json};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    /// What the client sent: the raw head (lowercased) and the JSON body.
    pub(crate) struct Captured {
        pub head: String,
        pub body: Value,
    }

    pub(crate) struct StubServer {
        pub base_url: String,
        handle: JoinHandle<Captured>,
    }

    impl StubServer {
        /// Answer the next request with `status` (e.g. "200 OK") and `body`.
        pub(crate) async fn start(status: &'static str, body: String) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let handle = tokio::spawn(async move {
                let (mut stream, _) = listener.accept().await.unwrap();
                let raw = read_request(&mut stream).await;
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.ok();

                let (head, body) = raw.split_once("\r\n\r\n").unwrap();
                Captured {
                    head: head.to_lowercase(),
                    body: serde_json::from_str(body).unwrap(),
                }
            });
            Self {
                base_url: format!("http://{addr}/v1"),
                handle,
            }
        }

        pub(crate) fn client(&self, api_key: Option<&str>) -> LlmClient {
            LlmClient::new(ResolvedEndpoint {
                base_url: self.base_url.clone(),
                model: "stub-model".to_string(),
                api_key: api_key.map(str::to_string),
            })
        }

        pub(crate) async fn captured(self) -> Captured {
            self.handle.await.unwrap()
        }
    }

    /// A chat-completions body whose first choice carries `content`.
    pub(crate) fn chat_reply(content: Option<&str>) -> String {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        })
        .to_string()
    }

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::stub_server::{StubServer, chat_reply};
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_json() {
        let v = parse_json_reply(r#"{"total": 1.5}"#).unwrap();
        assert_eq!(v, json!({"total": 1.5}));
    }

    #[test]
    fn test_parse_fenced_json() {
        let v = parse_json_reply("```json\n{\"vendor\": \"Tesco\"}\n```").unwrap();
        assert_eq!(v["vendor"], "Tesco");
    }

    #[test]
    fn test_parse_with_thinking_prefix() {
        let v = parse_json_reply(
            "<think>Draft: {\"total\": 42.5}. Looks right.</think>\n{\"total\": 42.5, \"tax\": 3.5}",
        )
        .unwrap();
        assert_eq!(v, json!({"total": 42.5, "tax": 3.5}));

        let v = parse_json_reply("<THINK>\n{ nope }\n</THINK>\n```json\n{\"tax\": 2}\n```").unwrap();
        assert_eq!(v, json!({"tax": 2}));
    }

    #[test]
    fn test_parse_with_surrounding_chatter() {
        let v = parse_json_reply("Sure! Here it is:\n{\"tax\": 2}\nHope that helps.").unwrap();
        assert_eq!(v["tax"], 2);
    }

    #[test]
    fn test_parse_no_object() {
        assert!(matches!(
            parse_json_reply("I cannot read this receipt."),
            Err(LlmError::MalformedJson(_))
        ));
        assert!(matches!(
            parse_json_reply("} backwards {"),
            Err(LlmError::MalformedJson(_))
        ));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("€€€", 0), "");
    }

    #[test]
    fn test_heuristics_has_no_endpoint() {
        let llm = LlmSection {
            backend: LlmBackend::Heuristics,
            ..Default::default()
        };
        assert!(resolve_endpoint(&llm).is_none());
    }

    #[test]
    fn test_ollama_endpoint_uses_placeholder_key() {
        let llm = LlmSection {
            backend: LlmBackend::Ollama,
            ..Default::default()
        };
        let ep = resolve_endpoint(&llm).unwrap();
        assert_eq!(ep.api_key.as_deref(), Some("ollama"));
        assert_eq!(ep.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn test_remote_without_key_still_resolves() {
        let mut llm = LlmSection::default();
        llm.remote.api_key_env = Some("RECEIPTS_TEST_KEY_THAT_IS_NEVER_SET".to_string());
        llm.remote.base_url = "https://api.example.com/v1/".to_string();
        let ep = resolve_endpoint(&llm).unwrap();
        assert!(ep.api_key.is_none());
        assert_eq!(ep.base_url, "https://api.example.com/v1");
    }

    #[tokio::test]
    async fn test_chat_json_request_and_reply() {
        let server = StubServer::start(
            "200 OK",
            chat_reply(Some("```json\n{\"total\": 42.5, \"vendor\": \"Walmart\"}\n```")),
        )
        .await;
        let client = server.client(Some("sk-test"));
        let format = json!({ "type": "json_object" });

        let reply = client
            .chat_json(&[ChatMessage::user("Total: $42.50")], Some(&format))
            .await
            .unwrap();
        assert_eq!(reply, json!({"total": 42.5, "vendor": "Walmart"}));

        let sent = server.captured().await;
        assert!(sent.head.starts_with("post /v1/chat/completions "));
        assert!(sent.head.contains("authorization: bearer sk-test"));
        assert_eq!(sent.body["model"], "stub-model");
        assert_eq!(sent.body["temperature"], 0.0);
        assert_eq!(sent.body["response_format"], format);
        assert_eq!(
            sent.body["messages"],
            json!([{ "role": "user", "content": "Total: $42.50" }])
        );
    }

    #[tokio::test]
    async fn test_chat_json_without_key_or_format() {
        let server = StubServer::start("200 OK", chat_reply(Some("{}"))).await;
        server
            .client(None)
            .chat_json(&[ChatMessage::user("hi")], None)
            .await
            .unwrap();

        let sent = server.captured().await;
        assert!(!sent.head.contains("authorization:"));
        assert!(sent.body.get("response_format").is_none());
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = StubServer::start(
            "500 Internal Server Error",
            r#"{"error":"overloaded"}"#.to_string(),
        )
        .await;
        let err = server
            .client(None)
            .chat_json(&[ChatMessage::user("hi")], None)
            .await
            .unwrap_err();
        match err {
            LlmError::Status { status, body } => {
                assert_eq!(status, 500);
                assert!(body.contains("overloaded"));
            }
            other => panic!("expected status error, got {other:?}"),
        }
        server.captured().await;
    }

    #[tokio::test]
    async fn test_null_content_is_empty_response() {
        let server = StubServer::start("200 OK", chat_reply(None)).await;
        let err = server
            .client(None)
            .chat_json(&[ChatMessage::user("hi")], None)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse));
        server.captured().await;
    }

    #[tokio::test]
    async fn test_no_choices_is_empty_response() {
        let server = StubServer::start("200 OK", json!({ "choices": [] }).to_string()).await;
        let err = server
            .client(None)
            .chat_json(&[ChatMessage::user("hi")], None)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse));
        server.captured().await;
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let client = LlmClient::new(ResolvedEndpoint {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            model: "test".to_string(),
            api_key: None,
        });
        let err = client
            .chat_json(&[ChatMessage::user("hi")], None)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Transport(_)));
    }
}
