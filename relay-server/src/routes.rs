use crate::config::Config;
use crate::error::GatewayError;
use crate::ollama::OllamaClient;
use crate::page::render_index;
use crate::sse::{encode, relay};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{stream, Stream, StreamExt};
use relay_shared::{ChatResponse, ClientChatRequest, OutputEvent};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ollama: Arc<OllamaClient>,
    /// Cancelled on process shutdown; every open stream watches it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config, shutdown: CancellationToken) -> Self {
        let ollama = Arc::new(OllamaClient::new(&config));
        Self {
            config: Arc::new(config),
            ollama,
            shutdown,
        }
    }

    fn model_for(&self, requested: Option<String>) -> String {
        requested
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.config.model.clone())
    }
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/chat", post(chat))
        .route("/chat-stream", post(chat_stream));

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .merge(api.clone())
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn index(State(state): State<AppState>) -> Html<String> {
    Html(render_index(&state.config))
}

async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ClientChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, GatewayError> {
    let Json(request) = payload?;
    let model = state.model_for(request.model);
    info!(%model, messages = request.messages.len(), "buffered chat");

    let message = state
        .ollama
        .chat(model, request.messages)
        .await
        .map_err(|e| {
            error!("Buffered chat failed: {}", e);
            e
        })?;

    Ok(Json(ChatResponse { message }))
}

async fn chat_stream(
    State(state): State<AppState>,
    payload: Result<Json<ClientChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, GatewayError> {
    let Json(request) = payload?;
    let model = state.model_for(request.model);
    info!(%model, messages = request.messages.len(), "streaming chat");

    // Opening has no timeout (the model may still be loading), so shutdown
    // must be able to abandon it. Dropping the pending request closes the
    // upstream connection.
    let opened = tokio::select! {
        biased;
        _ = state.shutdown.cancelled() => None,
        opened = state.ollama.open_stream(model, request.messages) => Some(opened),
    };

    let events = match opened {
        Some(Ok(lines)) => relay(lines, state.shutdown.clone()).boxed(),
        Some(Err(e)) => {
            // Headers are not sent yet, but the page reads a stream: end it
            // cleanly rather than leave it waiting for a marker.
            warn!("Failed to open upstream stream: {}", e);
            stream::once(async { OutputEvent::Done }).boxed()
        }
        None => {
            info!("shutdown requested before the upstream answered");
            stream::empty::<OutputEvent>().boxed()
        }
    };

    Ok(Sse::new(encode(events)))
}
