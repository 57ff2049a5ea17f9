//! Streaming chat endpoint.
//!
//! `POST /api/chat` accepts a turn request and responds with
//! `text/event-stream`. The orchestrator runs on its own task and pushes
//! [`TurnEvent`]s through a channel; this handler frames each as an SSE
//! `data:` line, ending with the literal `[DONE]`. Dropping the connection
//! drops the receiver, which aborts the turn upstream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::mpsc;
use tracing::debug;

use tandem_agent::{ChatTurnRequest, TurnEvent};

use crate::state::AppState;

/// Handle one streaming chat turn.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ChatTurnRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let user_id = state.user_id(&headers);
    debug!(user = %user_id, messages = request.messages.len(), "chat turn accepted");

    let (tx, rx) = mpsc::channel::<TurnEvent>(64);
    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        // Errors were already emitted onto the stream as error frames.
        let _ = orchestrator.run_turn(&user_id, request, tx).await;
    });

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let frame = match event.to_json() {
            Some(payload) => Event::default().data(payload.to_string()),
            None => Event::default().data("[DONE]"),
        };
        Some((Ok::<_, Infallible>(frame), rx))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
