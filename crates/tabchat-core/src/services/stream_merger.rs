use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::controllers::ConversationEngine;
use crate::error::EngineResult;
use crate::models::ConversationAction;

/// One item of a model reply stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    Text(String),
    Done,
    Error(String),
}

/// Status of a stream lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    Active,
    Completed,
    Cancelled,
    Error(String),
}

struct StreamState {
    status: StreamStatus,
    /// Reply text accumulated so far.
    content: String,
    cancel_flag: Arc<AtomicBool>,
}

/// Fold one chunk into the text accumulated so far.
///
/// Providers either resend the whole reply so far (cumulative) or only the new
/// piece (incremental). A chunk that starts with the accumulated text is taken
/// as cumulative; anything else is appended.
pub fn merge_delta(previous: &str, chunk: &str) -> String {
    if chunk.starts_with(previous) {
        chunk.to_string()
    } else {
        let mut merged = String::with_capacity(previous.len() + chunk.len());
        merged.push_str(previous);
        merged.push_str(chunk);
        merged
    }
}

/// Folds streamed reply chunks into the conversation they belong to.
///
/// Each chunk is written through the engine: via dispatch when the
/// conversation is the active one, otherwise straight to the record store, so
/// a reply keeps landing even after the user switched away from it.
///
/// Also tracks the lifecycle of every stream (status and cancellation) keyed
/// by conversation id. Starting a new stream for a conversation supersedes
/// the one already running.
pub struct StreamMerger {
    engine: Arc<ConversationEngine>,
    streams: Mutex<HashMap<String, StreamState>>,
}

impl StreamMerger {
    pub fn new(engine: Arc<ConversationEngine>) -> Self {
        Self {
            engine,
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Register a stream for `conv_id` and return its cancellation flag.
    /// A stream already registered for the conversation is cancelled first.
    pub fn begin(&self, conv_id: &str) -> Arc<AtomicBool> {
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let previous = self.streams.lock().insert(
            conv_id.to_string(),
            StreamState {
                status: StreamStatus::Active,
                content: String::new(),
                cancel_flag: cancel_flag.clone(),
            },
        );

        if let Some(previous) = previous
            && previous.status == StreamStatus::Active
        {
            previous.cancel_flag.store(true, Ordering::Relaxed);
            debug!(conv_id = %conv_id, "Cancelled existing stream before registering new one");
        }

        cancel_flag
    }

    /// Process one chunk for the active stream of `conv_id`.
    pub async fn handle_chunk(&self, conv_id: &str, chunk: StreamChunk) -> EngineResult<()> {
        self.apply_chunk(conv_id, chunk, None).await
    }

    async fn apply_chunk(
        &self,
        conv_id: &str,
        chunk: StreamChunk,
        owner: Option<&Arc<AtomicBool>>,
    ) -> EngineResult<()> {
        match chunk {
            StreamChunk::Text(text) => {
                let Some(merged) = self.accumulate(conv_id, &text, owner) else {
                    return Ok(());
                };
                let focused = self
                    .engine
                    .apply_to_conversation(
                        conv_id,
                        &ConversationAction::UpdateStreamingMessage { content: merged },
                    )
                    .await?;
                if !focused {
                    debug!(conv_id = %conv_id, "Chunk written to background conversation");
                }
                Ok(())
            }
            StreamChunk::Done => self.finish(conv_id).await,
            StreamChunk::Error(message) => {
                self.fail(conv_id, message);
                Ok(())
            }
        }
    }

    /// Merge `text` into the stream's accumulated content. `None` when there
    /// is no active stream for `conv_id` (or it belongs to another owner).
    fn accumulate(
        &self,
        conv_id: &str,
        text: &str,
        owner: Option<&Arc<AtomicBool>>,
    ) -> Option<String> {
        let mut streams = self.streams.lock();
        let Some(state) = streams.get_mut(conv_id) else {
            warn!(conv_id = %conv_id, "Chunk for unknown stream ignored");
            return None;
        };
        if state.status != StreamStatus::Active {
            debug!(conv_id = %conv_id, status = ?state.status, "Chunk after stream ended ignored");
            return None;
        }
        if owner.is_some_and(|owner| !Arc::ptr_eq(owner, &state.cancel_flag)) {
            debug!(conv_id = %conv_id, "Chunk from superseded stream ignored");
            return None;
        }

        state.content = merge_delta(&state.content, text);
        Some(state.content.clone())
    }

    /// Write the final text and mark the stream completed.
    pub async fn finish(&self, conv_id: &str) -> EngineResult<()> {
        let content = {
            let mut streams = self.streams.lock();
            let Some(state) = streams.get_mut(conv_id) else {
                warn!(conv_id = %conv_id, "finish called but no stream found");
                return Ok(());
            };
            if state.status != StreamStatus::Active {
                return Ok(());
            }
            state.status = StreamStatus::Completed;
            std::mem::take(&mut state.content)
        };

        if !content.is_empty() {
            self.engine
                .apply_to_conversation(
                    conv_id,
                    &ConversationAction::UpdateStreamingMessage { content },
                )
                .await?;
        }
        info!(conv_id = %conv_id, "Stream completed");
        Ok(())
    }

    /// Mark the stream failed. Text already written stays in the conversation.
    pub fn fail(&self, conv_id: &str, message: String) {
        let mut streams = self.streams.lock();
        if let Some(state) = streams.get_mut(conv_id) {
            error!(conv_id = %conv_id, error = %message, "Stream error");
            state.content.clear();
            state.status = StreamStatus::Error(message);
        }
    }

    /// Stop the stream for `conv_id`. Returns whether one was running.
    pub fn cancel(&self, conv_id: &str) -> bool {
        let mut streams = self.streams.lock();
        match streams.get_mut(conv_id) {
            Some(state) if state.status == StreamStatus::Active => {
                state.cancel_flag.store(true, Ordering::Relaxed);
                state.content.clear();
                state.status = StreamStatus::Cancelled;
                debug!(conv_id = %conv_id, "Stream stopped");
                true
            }
            _ => false,
        }
    }

    pub fn is_streaming(&self, conv_id: &str) -> bool {
        self.streams
            .lock()
            .get(conv_id)
            .is_some_and(|state| state.status == StreamStatus::Active)
    }

    pub fn status(&self, conv_id: &str) -> Option<StreamStatus> {
        self.streams
            .lock()
            .get(conv_id)
            .map(|state| state.status.clone())
    }

    /// Register a stream for `conv_id` and drive `chunks` into it until it
    /// ends, fails or is cancelled. Returns the final status.
    pub async fn consume<S>(&self, conv_id: &str, chunks: S) -> EngineResult<StreamStatus>
    where
        S: Stream<Item = StreamChunk> + Send,
    {
        let cancel_flag = self.begin(conv_id);
        let mut chunks = std::pin::pin!(chunks);

        while let Some(chunk) = chunks.next().await {
            if cancel_flag.load(Ordering::Relaxed) {
                debug!(conv_id = %conv_id, "Stream consumer observed cancellation");
                return Ok(StreamStatus::Cancelled);
            }

            let terminal = !matches!(chunk, StreamChunk::Text(_));
            if let Err(e) = self.apply_chunk(conv_id, chunk, Some(&cancel_flag)).await {
                self.fail(conv_id, e.to_string());
                return Err(e);
            }
            if terminal {
                break;
            }
        }

        if cancel_flag.load(Ordering::Relaxed) {
            return Ok(StreamStatus::Cancelled);
        }
        // A stream that ends without an explicit Done is complete.
        if self.is_streaming(conv_id) {
            self.finish(conv_id).await?;
        }
        Ok(self.status(conv_id).unwrap_or(StreamStatus::Completed))
    }
}
