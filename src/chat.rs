// Player analysis chat channel
// One WebSocket, one outstanding question at a time, no reconnect

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
    Errored,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChatError {
    #[error("Prompt is empty")]
    EmptyPrompt,

    #[error("Chat channel is not open ({0:?})")]
    NotOpen(ChannelState),

    #[error("A question is already pending")]
    Busy,

    #[error("Failed to connect to chat: {0}")]
    Connect(String),

    #[error("Chat transport error: {0}")]
    Transport(String),

    #[error("Chat channel closed")]
    Closed,

    /// Error frame from the analysis service
    #[error("{0}")]
    Remote(String),

    #[error("Failed to encode chat request: {0}")]
    Encode(String),
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    prompt: &'a str,

    #[serde(rename = "enableAIInsights", skip_serializing_if = "Option::is_none")]
    enable_ai_insights: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatFrame {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Clears the pending flag even if `ask` is dropped mid-flight
struct PendingGuard<'a>(&'a AtomicBool);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Both halves are `None` until the handshake completes
pub struct ChatChannel {
    url: String,
    sink: Mutex<Option<SplitSink<WsStream, Message>>>,
    stream: Mutex<Option<SplitStream<WsStream>>>,
    state: watch::Sender<ChannelState>,
    pending: AtomicBool,
}

impl ChatChannel {
    /// A channel for `url` in the Connecting state; call [`open`](Self::open) to connect
    pub fn new(url: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ChannelState::Connecting);
        Self {
            url: url.into(),
            sink: Mutex::new(None),
            stream: Mutex::new(None),
            state,
            pending: AtomicBool::new(false),
        }
    }

    /// Create and open a channel in one step
    pub async fn connect(url: &str) -> Result<Self, ChatError> {
        let channel = Self::new(url);
        channel.open().await?;
        Ok(channel)
    }

    /// Perform the WebSocket handshake
    ///
    /// Only valid from Connecting; a failed handshake leaves the channel Errored.
    pub async fn open(&self) -> Result<(), ChatError> {
        let mut sink = self.sink.lock().await;
        match self.state() {
            ChannelState::Connecting => {}
            ChannelState::Open => return Ok(()),
            other => return Err(ChatError::NotOpen(other)),
        }

        tracing::debug!(url = %self.url, "Connecting to chat channel");
        let ws = match tokio_tungstenite::connect_async(self.url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "Chat connect failed");
                self.transition(ChannelState::Errored);
                return Err(ChatError::Connect(e.to_string()));
            }
        };

        let (ws_sink, ws_stream) = ws.split();
        *sink = Some(ws_sink);
        *self.stream.lock().await = Some(ws_stream);
        self.transition(ChannelState::Open);
        Ok(())
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Open and not waiting on an answer
    pub fn is_ready(&self) -> bool {
        self.state() == ChannelState::Open && !self.pending.load(Ordering::SeqCst)
    }

    /// Send a question and wait for its answer
    pub async fn ask(&self, prompt: &str, enable_ai_insights: Option<bool>) -> Result<String, ChatError> {
        if prompt.trim().is_empty() {
            return Err(ChatError::EmptyPrompt);
        }

        let state = self.state();
        if state != ChannelState::Open {
            return Err(ChatError::NotOpen(state));
        }

        if self.pending.swap(true, Ordering::SeqCst) {
            return Err(ChatError::Busy);
        }
        let _guard = PendingGuard(&self.pending);

        let text = serde_json::to_string(&ChatRequest {
            prompt,
            enable_ai_insights,
        })
        .map_err(|e| ChatError::Encode(e.to_string()))?;

        {
            let mut sink = self.sink.lock().await;
            let Some(sink) = sink.as_mut() else {
                return Err(ChatError::NotOpen(self.state()));
            };
            if let Err(e) = sink.send(Message::text(text)).await {
                self.transition(ChannelState::Errored);
                return Err(ChatError::Transport(e.to_string()));
            }
        }

        self.next_answer().await
    }

    async fn next_answer(&self) -> Result<String, ChatError> {
        let mut stream = self.stream.lock().await;
        let Some(stream) = stream.as_mut() else {
            return Err(ChatError::NotOpen(self.state()));
        };

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frame: ChatFrame = match serde_json::from_str(text.as_str()) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::debug!(error = %e, "Ignoring non-JSON chat frame");
                            continue;
                        }
                    };
                    if let Some(answer) = frame.answer {
                        return Ok(answer);
                    }
                    if let Some(error) = frame.error {
                        tracing::warn!(error = %error, "Chat service returned an error");
                        return Err(ChatError::Remote(error));
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    self.transition(ChannelState::Closed);
                    return Err(ChatError::Closed);
                }
                Some(Ok(_)) => {} // ping/pong/binary
                Some(Err(e)) => {
                    self.transition(ChannelState::Errored);
                    return Err(ChatError::Transport(e.to_string()));
                }
            }
        }
    }

    /// Close the socket; the channel cannot be reopened
    pub async fn close(&self) {
        if matches!(self.state(), ChannelState::Closed | ChannelState::Errored) {
            return;
        }
        if let Some(sink) = self.sink.lock().await.as_mut() {
            if let Err(e) = sink.close().await {
                tracing::debug!(error = %e, "Error while closing chat channel");
            }
        }
        self.transition(ChannelState::Closed);
    }

    fn transition(&self, next: ChannelState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!(from = ?previous, to = ?next, "Chat channel state changed");
        }
    }
}
