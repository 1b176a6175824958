use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// Ordered chat history. The browser owns it and resends all of it on every
/// request; the server never keeps a copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation(Vec<ChatMessage>);

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, role: MessageRole, content: impl Into<String>) {
        self.0.push(ChatMessage {
            role,
            content: content.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Request from browser to server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientChatRequest {
    /// Falls back to the configured model when absent.
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Conversation,
}

/// Request from server to the Ollama `/api/chat` endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendChatRequest {
    pub model: String,
    pub messages: Conversation,
    pub stream: bool,
    pub keep_alive: String,
    pub options: GenerationOptions,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub num_predict: i64,
}

/// Buffered reply sent back to the browser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// One decoded NDJSON line from Ollama. The buffered reply has the same shape.
///
/// Every field is optional on the wire: keep-alive lines from some Ollama
/// versions carry no `message`, error lines carry only `error`, and `null`
/// stands in for an absent field.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UpstreamFrame {
    #[serde(default)]
    pub message: Option<FrameMessage>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FrameMessage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    /// Model reasoning. Parsed so it can be recognised, never forwarded.
    #[serde(default)]
    pub thinking: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// What the relay hands to the event encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    Content(String),
    Done,
}
