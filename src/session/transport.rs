use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::audio::pcm::EncodedChunk;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::session::wire::{
    self, Blob, FunctionResponse, RealtimeInput, RealtimeInputEnvelope, ServerMessage,
    SetupEnvelope, ToolResponse, ToolResponseEnvelope,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Connection lifecycle. `Open` is entered only after the remote handshake
/// acknowledges; `Closed` is terminal for one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivePhase {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Which party a transcript fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// Typed view of the remote event stream, delivered in receipt order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A partial or final piece of spoken text. Empty text with
    /// `is_final = true` is a flush signal, not content.
    Transcript {
        sender: Speaker,
        text: String,
        is_final: bool,
    },
    /// Inbound synthesized speech.
    Audio(EncodedChunk),
    /// The remote requires a matching acknowledgment referencing `id`
    /// before it continues generating.
    ToolCall {
        id: String,
        name: String,
        args: Value,
    },
    /// Remote speech was cut off by new input; playback must flush.
    Interrupted,
    /// Terminal. Emitted exactly once per connection.
    Closed { error: Option<String> },
}

#[derive(Debug)]
enum Outbound {
    Audio(EncodedChunk),
    Video(EncodedChunk),
    Text(String),
    ToolAck {
        id: String,
        name: String,
        response: Value,
    },
    Close,
}

/// Narrow send surface the rest of the system is allowed to touch.
/// The connection object's internals stay inside this module.
pub trait OutboundLink {
    fn send_audio(&self, chunk: EncodedChunk);
    fn send_video_frame(&self, chunk: EncodedChunk);
    fn send_text(&self, text: &str);
    fn send_tool_ack(&self, id: &str, name: &str, response: Value) -> Result<(), SessionError>;
    /// Request close. Idempotent; racing a remote close is fine.
    fn close(&self);
    fn is_open(&self) -> bool;
}

struct PhaseCell(AtomicU8);

impl PhaseCell {
    fn new(phase: LivePhase) -> Self {
        Self(AtomicU8::new(phase as u8))
    }

    fn set(&self, phase: LivePhase) {
        let prev = self.0.swap(phase as u8, Ordering::SeqCst);
        if prev != phase as u8 {
            debug!(?phase, "transport phase");
        }
    }

    fn get(&self) -> LivePhase {
        match self.0.load(Ordering::SeqCst) {
            0 => LivePhase::Idle,
            1 => LivePhase::Connecting,
            2 => LivePhase::Open,
            _ => LivePhase::Closed,
        }
    }
}

/// Cloneable send handle. Every send re-checks `Open` because a capture
/// callback may fire after teardown has begun; stale frames are dropped,
/// never queued.
#[derive(Clone)]
pub struct LiveLink {
    cmd_tx: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
}

impl OutboundLink for LiveLink {
    fn send_audio(&self, chunk: EncodedChunk) {
        if self.is_open() {
            let _ = self.cmd_tx.send(Outbound::Audio(chunk));
        }
    }

    fn send_video_frame(&self, chunk: EncodedChunk) {
        if self.is_open() {
            let _ = self.cmd_tx.send(Outbound::Video(chunk));
        }
    }

    fn send_text(&self, text: &str) {
        if self.is_open() {
            let _ = self.cmd_tx.send(Outbound::Text(text.to_string()));
        }
    }

    fn send_tool_ack(&self, id: &str, name: &str, response: Value) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::ToolAck(format!(
                "connection not open for ack of {}",
                id
            )));
        }
        self.cmd_tx
            .send(Outbound::ToolAck {
                id: id.to_string(),
                name: name.to_string(),
                response,
            })
            .map_err(|_| SessionError::ToolAck(format!("socket task gone for ack of {}", id)))
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.cmd_tx.send(Outbound::Close);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// One bidirectional streaming connection to the inference service.
pub struct LiveTransport {
    link: LiveLink,
    phase: Arc<PhaseCell>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl LiveTransport {
    /// Dial, perform the setup handshake, and spawn the socket task.
    /// Resolves only once the remote session is fully established.
    pub async fn connect(
        config: &SessionConfig,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), SessionError> {
        let phase = Arc::new(PhaseCell::new(LivePhase::Idle));
        phase.set(LivePhase::Connecting);

        let url = format!("{}?key={}", config.endpoint, config.api_key);
        let (mut ws, _resp) = connect_async(&url).await.map_err(|e| {
            phase.set(LivePhase::Closed);
            SessionError::Handshake(format!("connect: {}", e))
        })?;
        info!("live session socket connected");

        if let Err(e) = Self::handshake(&mut ws, config).await {
            // Partial teardown: the socket is the only resource we own here.
            let _ = ws.close(None).await;
            phase.set(LivePhase::Closed);
            return Err(e);
        }
        phase.set(LivePhase::Open);
        info!("live session open");

        let open = Arc::new(AtomicBool::new(true));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let link = LiveLink {
            cmd_tx,
            open: open.clone(),
        };
        let task_phase = phase.clone();
        let task = tokio::spawn(run_socket(ws, cmd_rx, event_tx, open, task_phase));

        Ok((
            Self {
                link,
                phase,
                task: Some(task),
            },
            event_rx,
        ))
    }

    async fn handshake(ws: &mut WsStream, config: &SessionConfig) -> Result<(), SessionError> {
        let setup = serde_json::to_string(&SetupEnvelope::from_config(config))
            .map_err(|e| SessionError::Handshake(format!("encode setup: {}", e)))?;
        ws.send(Message::Text(setup))
            .await
            .map_err(|e| SessionError::Handshake(format!("send setup: {}", e)))?;

        let wait = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(txt))) => {
                        if is_setup_complete(&txt) {
                            return Ok(());
                        }
                        debug!("pre-handshake message ignored");
                    }
                    Some(Ok(Message::Binary(bin))) => {
                        if let Ok(txt) = String::from_utf8(bin) {
                            if is_setup_complete(&txt) {
                                return Ok(());
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Err(SessionError::Handshake(format!(
                            "closed during handshake: {:?}",
                            frame
                        )));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(SessionError::Handshake(format!("socket error: {}", e)));
                    }
                    None => {
                        return Err(SessionError::Handshake(
                            "stream ended during handshake".into(),
                        ));
                    }
                }
            }
        })
        .await;

        match wait {
            Ok(result) => result,
            Err(_) => Err(SessionError::Handshake("handshake timed out".into())),
        }
    }

    /// Cloneable handle for the pipelines that feed the connection.
    pub fn link(&self) -> LiveLink {
        self.link.clone()
    }

    pub fn phase(&self) -> LivePhase {
        self.phase.get()
    }

    /// Graceful close. Always resolves; teardown failures are logged by the
    /// socket task, not surfaced.
    pub async fn disconnect(&mut self) {
        self.link.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("socket task join failed: {}", e);
            }
        }
        self.phase.set(LivePhase::Closed);
    }
}

async fn run_socket(
    mut ws: WsStream,
    mut cmd_rx: mpsc::UnboundedReceiver<Outbound>,
    event_tx: mpsc::Sender<TransportEvent>,
    open: Arc<AtomicBool>,
    phase: Arc<PhaseCell>,
) {
    let mut close_error: Option<String> = None;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Outbound::Close) | None => {
                        let _ = ws.close(None).await;
                        break;
                    }
                    Some(cmd) => {
                        let frame = encode_outbound(cmd);
                        match frame {
                            Ok(txt) => {
                                if let Err(e) = ws.send(Message::Text(txt)).await {
                                    close_error = Some(format!("send: {}", e));
                                    break;
                                }
                            }
                            Err(e) => warn!("dropping unencodable frame: {}", e),
                        }
                    }
                }
            }
            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Text(txt))) => {
                        deliver(&txt, &event_tx).await;
                    }
                    Some(Ok(Message::Binary(bin))) => {
                        match String::from_utf8(bin) {
                            Ok(txt) => deliver(&txt, &event_tx).await,
                            Err(_) => debug!("non-utf8 binary frame ignored"),
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "remote close");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        close_error = Some(e.to_string());
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    // Teardown, exactly once: this task is the only writer of Closed.
    open.store(false, Ordering::SeqCst);
    phase.set(LivePhase::Closed);
    if let Some(err) = &close_error {
        warn!("transport closed with error: {}", err);
    } else {
        info!("transport closed");
    }
    let _ = event_tx
        .send(TransportEvent::Closed { error: close_error })
        .await;
}

async fn deliver(txt: &str, event_tx: &mpsc::Sender<TransportEvent>) {
    for event in parse_events(txt) {
        if event_tx.send(event).await.is_err() {
            // Receiver dropped; the session is tearing down.
            return;
        }
    }
}

/// Translate one raw server frame into typed events, preserving the order
/// the sections appear in a turn: interruption first, then audio, then
/// transcripts, then completion flushes.
pub fn parse_events(txt: &str) -> Vec<TransportEvent> {
    let msg: ServerMessage = match serde_json::from_str(txt) {
        Ok(msg) => msg,
        Err(e) => {
            debug!("unparseable server frame skipped: {}", e);
            return Vec::new();
        }
    };

    let mut events = Vec::new();

    if let Some(content) = msg.server_content {
        if content.interrupted == Some(true) {
            events.push(TransportEvent::Interrupted);
        }
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(inline) = part.inline_data {
                    if inline.mime_type.starts_with("audio/pcm") {
                        events.push(TransportEvent::Audio(EncodedChunk {
                            mime_type: inline.mime_type,
                            data: inline.data,
                        }));
                    }
                }
            }
        }
        if let Some(t) = content.input_transcription {
            events.push(TransportEvent::Transcript {
                sender: Speaker::User,
                text: t.text,
                is_final: t.finished.unwrap_or(false),
            });
        }
        if let Some(t) = content.output_transcription {
            events.push(TransportEvent::Transcript {
                sender: Speaker::Assistant,
                text: t.text,
                is_final: t.finished.unwrap_or(false),
            });
        }
        if content.turn_complete == Some(true) {
            // Turn boundary finalizes both accumulation buffers.
            events.push(TransportEvent::Transcript {
                sender: Speaker::User,
                text: String::new(),
                is_final: true,
            });
            events.push(TransportEvent::Transcript {
                sender: Speaker::Assistant,
                text: String::new(),
                is_final: true,
            });
        }
    }

    if let Some(tool_call) = msg.tool_call {
        for call in tool_call.function_calls {
            events.push(TransportEvent::ToolCall {
                id: call.id,
                name: call.name,
                args: call.args,
            });
        }
    }

    if msg.go_away.is_some() {
        warn!("server signaled goAway; connection will close shortly");
    }

    events
}

fn is_setup_complete(txt: &str) -> bool {
    serde_json::from_str::<ServerMessage>(txt)
        .map(|m| m.setup_complete.is_some())
        .unwrap_or(false)
}

fn encode_outbound(cmd: Outbound) -> Result<String, serde_json::Error> {
    match cmd {
        Outbound::Audio(chunk) => serde_json::to_string(&RealtimeInputEnvelope {
            realtime_input: RealtimeInput {
                audio: Some(Blob::from(chunk)),
                ..Default::default()
            },
        }),
        Outbound::Video(chunk) => serde_json::to_string(&RealtimeInputEnvelope {
            realtime_input: RealtimeInput {
                video: Some(Blob::from(chunk)),
                ..Default::default()
            },
        }),
        Outbound::Text(text) => serde_json::to_string(&RealtimeInputEnvelope {
            realtime_input: RealtimeInput {
                text: Some(text),
                ..Default::default()
            },
        }),
        Outbound::ToolAck { id, name, response } => {
            serde_json::to_string(&ToolResponseEnvelope {
                tool_response: ToolResponse {
                    function_responses: vec![FunctionResponse { id, name, response }],
                },
            })
        }
        Outbound::Close => unreachable!("close handled by the socket loop"),
    }
}

pub use wire::SHOW_MAP_TOOL;
