use crate::config::Config;
use crate::error::GatewayError;
use futures_util::{Stream, StreamExt};
use relay_shared::{BackendChatRequest, Conversation, GenerationOptions, UpstreamFrame};
use std::time::Duration;
use tracing::{info, warn};

/// Talks to the Ollama `/api/chat` endpoint.
pub struct OllamaClient {
    http: reqwest::Client,
    chat_url: String,
    keep_alive: String,
    num_predict: i64,
    timeout: Duration,
}

impl OllamaClient {
    pub fn new(config: &Config) -> Self {
        info!("Initializing Ollama client for {}", config.chat_url());
        Self {
            http: reqwest::Client::new(),
            chat_url: config.chat_url(),
            keep_alive: config.keep_alive.clone(),
            num_predict: config.num_predict,
            timeout: config.connection_timeout,
        }
    }

    fn request_body(
        &self,
        model: String,
        messages: Conversation,
        stream: bool,
    ) -> BackendChatRequest {
        BackendChatRequest {
            model,
            messages,
            stream,
            keep_alive: self.keep_alive.clone(),
            options: GenerationOptions {
                num_predict: self.num_predict,
            },
        }
    }

    /// Non-streaming call. Returns the assistant's final content; any
    /// `thinking` in the reply is discarded.
    pub async fn chat(&self, model: String, messages: Conversation) -> Result<String, GatewayError> {
        let body = self.request_body(model, messages, false);
        let response = self
            .http
            .post(&self.chat_url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let reply: UpstreamFrame = response.json().await?;
        if let Some(err) = reply.error {
            return Err(GatewayError::UpstreamUnavailable(err));
        }
        Ok(reply.message.map(|m| m.content).unwrap_or_default())
    }

    /// Streaming call. Resolves once Ollama has answered with a success
    /// status; the returned stream then yields raw NDJSON lines as they
    /// arrive.
    ///
    /// No timeout applies: a model may think for minutes between tokens.
    /// Dropping the stream closes the upstream connection.
    pub async fn open_stream(
        &self,
        model: String,
        messages: Conversation,
    ) -> Result<impl Stream<Item = Result<String, reqwest::Error>> + Send + 'static, GatewayError>
    {
        let body = self.request_body(model, messages, true);
        let response = self.http.post(&self.chat_url).json(&body).send().await?;
        let response = ensure_success(response).await?;
        Ok(ndjson_lines(response))
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    warn!(%status, body = %text, "Ollama rejected the request");
    let detail = match serde_json::from_str::<UpstreamFrame>(&text) {
        Ok(UpstreamFrame { error: Some(err), .. }) => err,
        _ => text,
    };
    Err(GatewayError::UpstreamUnavailable(format!("{status}: {detail}")))
}

/// Longest upstream line kept. Anything longer is dropped up to its newline.
const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Split a response body into lines. Bytes are buffered across chunk
/// boundaries so a multi-byte character split between chunks survives.
fn ndjson_lines(
    response: reqwest::Response,
) -> impl Stream<Item = Result<String, reqwest::Error>> + Send + 'static {
    async_stream::stream! {
        let mut body = std::pin::pin!(response.bytes_stream());
        let mut splitter = LineSplitter::new(MAX_LINE_BYTES);

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            for line in splitter.push(&chunk) {
                yield Ok(line);
            }
        }

        if let Some(line) = splitter.finish() {
            yield Ok(line);
        }
    }
}

/// Incremental newline splitter. `scanned` marks how much of `buf` is known
/// to hold no newline, so each byte is searched once.
struct LineSplitter {
    buf: Vec<u8>,
    scanned: usize,
    max_line: usize,
    discarding: bool,
}

impl LineSplitter {
    fn new(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_line,
            discarding: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();

        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            let line: Vec<u8> = self.buf.drain(..=end).collect();
            self.scanned = 0;
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            lines.push(decode(&line));
        }
        self.scanned = self.buf.len();

        if self.buf.len() > self.max_line {
            if !self.discarding {
                warn!(limit = self.max_line, "upstream line too long, skipping it");
            }
            self.buf.clear();
            self.scanned = 0;
            self.discarding = true;
        }
        lines
    }

    fn finish(self) -> Option<String> {
        if self.discarding || self.buf.is_empty() {
            return None;
        }
        Some(decode(&self.buf))
    }
}

fn decode(line: &[u8]) -> String {
    String::from_utf8_lossy(line).trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_shared::MessageRole;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(base_url: String) -> Config {
        Config {
            model: "gpt-oss".into(),
            greeting: String::new(),
            base_url,
            connection_timeout: Duration::from_secs(5),
            keep_alive: "30m".into(),
            num_predict: 64,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
        }
    }

    fn history() -> Conversation {
        let mut messages = Conversation::new();
        messages.push(MessageRole::User, "Hi");
        messages
    }

    #[tokio::test]
    async fn chat_sends_tuning_options() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-oss",
                "stream": false,
                "keep_alive": "30m",
                "options": {"num_predict": 64}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-oss",
                "message": {"role": "assistant", "content": "Hello there", "thinking": "greet"},
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OllamaClient::new(&config_for(server.uri()));
        let reply = client.chat("gpt-oss".into(), history()).await.unwrap();
        assert_eq!(reply, "Hello there");
    }

    #[tokio::test]
    async fn chat_without_message_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"done": true})),
            )
            .mount(&server)
            .await;

        let client = OllamaClient::new(&config_for(server.uri()));
        let reply = client.chat("gpt-oss".into(), history()).await.unwrap();
        assert_eq!(reply, "");
    }

    #[tokio::test]
    async fn non_success_status_carries_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"error": "model \"nope\" not found"})),
            )
            .mount(&server)
            .await;

        let client = OllamaClient::new(&config_for(server.uri()));
        let err = client.chat("nope".into(), history()).await.unwrap_err();
        match err {
            GatewayError::UpstreamUnavailable(cause) => {
                assert!(cause.starts_with("404"), "got {cause}");
                assert!(cause.contains("not found"), "got {cause}");
            }
            other => panic!("expected UpstreamUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn open_stream_fails_before_yielding_on_bad_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&config_for(server.uri()));
        let result = client.open_stream("gpt-oss".into(), history()).await;
        assert!(matches!(result, Err(GatewayError::UpstreamUnavailable(_))));
    }

    #[tokio::test]
    async fn open_stream_yields_lines_in_order() {
        let server = MockServer::start().await;
        let body = "{\"message\":{\"content\":\"a\"},\"done\":false}\r\n\n{\"done\":true}";
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&config_for(server.uri()));
        let lines: Vec<String> = client
            .open_stream("gpt-oss".into(), history())
            .await
            .unwrap()
            .map(|line| line.unwrap())
            .collect()
            .await;

        assert_eq!(
            lines,
            vec![
                "{\"message\":{\"content\":\"a\"},\"done\":false}".to_string(),
                String::new(),
                "{\"done\":true}".to_string(),
            ]
        );
    }

    #[test]
    fn splitter_joins_lines_across_chunks() {
        let mut splitter = LineSplitter::new(1024);
        assert!(splitter.push(b"{\"a\":").is_empty());
        assert_eq!(splitter.push(b"1}\r\n{\"b\""), vec!["{\"a\":1}".to_string()]);
        assert_eq!(splitter.push(b":2}\n\n"), vec!["{\"b\":2}".to_string(), String::new()]);
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn splitter_keeps_characters_split_between_chunks() {
        let text = "caf\u{e9} \u{1f600}\n".as_bytes();
        let mut splitter = LineSplitter::new(1024);
        let mut lines = Vec::new();
        for byte in text {
            lines.extend(splitter.push(std::slice::from_ref(byte)));
        }
        assert_eq!(lines, vec!["caf\u{e9} \u{1f600}".to_string()]);
    }

    #[test]
    fn splitter_returns_unterminated_tail() {
        let mut splitter = LineSplitter::new(1024);
        assert!(splitter.push(b"{\"done\":true}").is_empty());
        assert_eq!(splitter.finish(), Some("{\"done\":true}".to_string()));
    }

    #[test]
    fn splitter_skips_overlong_line_and_recovers() {
        let mut splitter = LineSplitter::new(8);
        assert!(splitter.push(b"0123456789").is_empty());
        assert!(splitter.push(b"abcdef").is_empty());
        assert_eq!(splitter.push(b"tail\nok\n"), vec!["ok".to_string()]);
        assert_eq!(splitter.finish(), None);
    }
}
