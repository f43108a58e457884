//! Client side of the voice gateway and its media path.
//!
//! A [`Connection`] owns the voice websocket, the UDP media socket, and the
//! paired audio tasks. Handshake, heartbeat, reconnect, resume, and packet
//! encryption all live here; opus encoding and decoding stay outside, behind
//! [`AudioSource`] and [`AudioSink`].

mod error;
pub mod tasks;
pub mod udp;

pub use self::error::{VoiceError, VoiceErrorType};
pub use self::tasks::{AudioSink, AudioSource};

use flume::{Receiver, Sender};
use serde::Serialize;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};
use twilight_model::gateway::CloseFrame;
use twilight_model::id::{
    Id,
    marker::{GuildMarker, UserMarker},
};

use switchboard_types::payload::Speaking;
use switchboard_types::payload::voice::{Identify, Ready, Resume, SelectProtocol, SessionDescription};
use switchboard_types::{RTP_KEY_LEN, Token, VOICE_GATEWAY_VERSION, VoiceCloseCode, VoiceEvent, VoiceOpCode};

use self::tasks::{AudioTasks, SharedSink, SharedSource};
use self::udp::VoiceUdp;
use crate::crypto::{EncryptMode, PacketTransformer};
use crate::heartbeat::Heartbeat;
use crate::pipeline::Pipeline;
use crate::reconnect::{DisconnectBehavior, ReconnectContext, ReconnectOptions, resume_allowed};
use crate::shutdown::{self, Shutdown, ShutdownListener};
use crate::transport::{Message, Transport, TransportError, WebSocketConnector};

/// How many events the outward channel buffers.
const EVENTS_CAPACITY: usize = 64;

/// How long to wait for an ip discovery reply before giving up on the
/// attempt.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything needed to join one voice server.
///
/// The session id comes from the gateway's voice state update, the token
/// and endpoint from its voice server update.
#[derive(Clone, Debug)]
pub struct Config {
    guild_id: Id<GuildMarker>,
    user_id: Id<UserMarker>,
    session_id: String,
    token: Token,
    endpoint: String,
    reconnect: ReconnectOptions,
}

impl Config {
    #[must_use]
    pub fn new(
        guild_id: Id<GuildMarker>,
        user_id: Id<UserMarker>,
        session_id: impl Into<String>,
        token: Token,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            guild_id,
            user_id,
            session_id: session_id.into(),
            token,
            endpoint: endpoint.into(),
            reconnect: ReconnectOptions::default(),
        }
    }

    #[must_use]
    pub fn reconnect(mut self, options: ReconnectOptions) -> Self {
        self.reconnect = options;
        self
    }
}

/// Events a voice connection reports to its owner.
#[derive(Clone, Debug)]
pub enum Event {
    /// The media path is established and encrypted; audio is flowing.
    Connected { ssrc: u32, mode: EncryptMode },

    /// The previous voice session was resumed on the same media state.
    Resumed,

    /// Another user's speaking state changed.
    Speaking(Speaking),

    /// The connection wound down for good. Emitted exactly once, as the
    /// last event, so owners can release the guild's voice state.
    Disconnected {
        guild_id: Id<GuildMarker>,
        frame: Option<CloseFrame<'static>>,
    },
}

/// The consumer's view of a running voice connection.
#[derive(Clone, Debug)]
pub struct Handle {
    events: Receiver<Event>,
    shutdown: Shutdown,
}

impl Handle {
    /// Next voice event, `None` once the run loop is gone.
    pub async fn next_event(&self) -> Option<Event> {
        self.events.recv_async().await.ok()
    }

    #[must_use]
    pub fn events(&self) -> &Receiver<Event> {
        &self.events
    }

    /// Asks the run loop to stop and waits until it has. Idempotent.
    pub async fn stop(&self) {
        self.shutdown.stop().await;
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.shutdown.is_finished()
    }
}

/// Media parameters that survive a voice resume.
///
/// The key arrives one payload later than the rest, in the session
/// description.
#[derive(Clone, Debug)]
struct MediaSession {
    ssrc: u32,
    mode: EncryptMode,
    key: Option<[u8; RTP_KEY_LEN]>,
}

/// What one connection attempt decided about the connection's future.
enum Flow {
    Stopped,
    Reconnect { resumable: bool },
    Fatal(VoiceError),
}

/// A voice connection and everything it owns.
pub struct Connection<T: Transport = WebSocketConnector> {
    config: Config,
    connector: T,
    heartbeat: Heartbeat,
    reconnect: ReconnectContext,
    events: Sender<Event>,
    shutdown: ShutdownListener,
    source: SharedSource,
    sink: SharedSink,

    media: Option<MediaSession>,
    udp: Option<VoiceUdp>,
    tasks: Option<AudioTasks>,
    cause_resumable: bool,
    retrying: bool,
}

impl Connection<WebSocketConnector> {
    #[must_use]
    pub fn new(
        config: Config,
        source: Box<dyn AudioSource>,
        sink: Box<dyn AudioSink>,
    ) -> (Self, Handle) {
        Self::with_connector(config, WebSocketConnector, source, sink)
    }
}

impl<T: Transport> Connection<T> {
    /// Creates a voice connection on a custom transport.
    #[must_use]
    pub fn with_connector(
        config: Config,
        connector: T,
        source: Box<dyn AudioSource>,
        sink: Box<dyn AudioSink>,
    ) -> (Self, Handle) {
        let (events_tx, events_rx) = flume::bounded(EVENTS_CAPACITY);
        let (shutdown, listener) = shutdown::channel();

        let connection = Self {
            config,
            connector,
            heartbeat: Heartbeat::new(),
            reconnect: ReconnectContext::new(),
            events: events_tx,
            shutdown: listener,
            source: Arc::new(Mutex::new(source)),
            sink: Arc::new(Mutex::new(sink)),
            media: None,
            udp: None,
            tasks: None,
            cause_resumable: true,
            retrying: false,
        };
        let handle = Handle {
            events: events_rx,
            shutdown,
        };

        (connection, handle)
    }

    /// Heartbeat latency observed on the current connection.
    #[must_use]
    pub fn heartbeat_info(&self) -> crate::heartbeat::HeartbeatInfo<'_> {
        self.heartbeat.info()
    }

    /// Runs the connection until it is stopped or fails for good.
    ///
    /// Emits [`Event::Disconnected`] exactly once as its final act.
    pub async fn run(mut self) -> Result<(), VoiceError> {
        let result = self.run_inner().await;
        self.teardown_media();

        let frame = match &result {
            Ok(frame) => frame.clone(),
            Err(error) => match error.kind() {
                VoiceErrorType::FatallyClosed { frame } => frame.clone(),
                _ => None,
            },
        };
        let _ = self
            .events
            .send_async(Event::Disconnected {
                guild_id: self.config.guild_id,
                frame,
            })
            .await;
        self.shutdown.complete();

        match result {
            Ok(_) => {
                info!(guild_id = %self.config.guild_id, "voice connection stopped");
                Ok(())
            }
            Err(error) => {
                warn!(guild_id = %self.config.guild_id, %error, "voice connection failed");
                Err(error)
            }
        }
    }

    async fn run_inner(&mut self) -> Result<Option<CloseFrame<'static>>, VoiceError> {
        loop {
            if self.shutdown.is_triggered() {
                return Ok(None);
            }

            let attempt = self.reconnect.next_attempt();
            if self.reconnect.exhausted(&self.config.reconnect) {
                return Err(VoiceError::retries_exhausted());
            }

            if self.retrying {
                let delay = self.config.reconnect.delay(attempt);
                debug!(?delay, attempt, "waiting before reconnecting to voice");
                tokio::select! {
                    () = self.shutdown.triggered() => return Ok(None),
                    () = sleep(delay) => {}
                }
            }
            self.retrying = true;

            let url = format!("wss://{}/?v={VOICE_GATEWAY_VERSION}", self.config.endpoint);
            debug!(attempt, "connecting to the voice gateway");

            let connected = tokio::select! {
                () = self.shutdown.triggered() => return Ok(None),
                result = self.connector.connect(&url) => result,
            };
            let pipeline = match connected {
                Ok((tx, rx)) => Pipeline::new(tx, rx),
                Err(error) => {
                    warn!(%error, "failed to connect to the voice gateway");
                    continue;
                }
            };

            // A session is only worth resuming once its media state is
            // complete; losing the connection mid-handshake means starting
            // over.
            let media_ready = self.media.as_ref().is_some_and(|media| media.key.is_some());
            let resume = resume_allowed(attempt, media_ready, self.cause_resumable);
            if !resume {
                // A fresh identify gets a fresh media session.
                self.teardown_media();
            }

            let flow = self.connected(&pipeline, resume).await;
            self.heartbeat.stop();
            pipeline.shutdown().await;

            match flow {
                Flow::Stopped => return Ok(None),
                Flow::Fatal(error) => return Err(error),
                Flow::Reconnect { resumable } => {
                    // Media tasks cannot outlive their websocket; they are
                    // respawned after the next handshake.
                    if let Some(tasks) = self.tasks.take() {
                        tasks.abort();
                    }
                    self.cause_resumable = resumable;
                }
            }
        }
    }

    /// Drives one established voice websocket until something ends it.
    async fn connected(&mut self, pipeline: &Pipeline, resume: bool) -> Flow {
        loop {
            tokio::select! {
                () = self.shutdown.triggered() => {
                    return disconnect(pipeline, DisconnectBehavior::Stop);
                }
                () = self.heartbeat.tick() => {
                    if self.heartbeat.has_pending_ack() {
                        warn!("voice heartbeat was never acknowledged, reconnecting");
                        return disconnect(pipeline, DisconnectBehavior::RetryAbruptly);
                    }
                    if self.send_heartbeat(pipeline).is_err() {
                        return Flow::Reconnect { resumable: true };
                    }
                }
                () = wait_any(&mut self.tasks) => {
                    // One media task died under a healthy websocket. This
                    // half-broken state is not worth retrying.
                    return Flow::Fatal(VoiceError::partial_disconnect());
                }
                message = pipeline.recv() => match message {
                    Some(Ok(Message::Text(frame))) => {
                        if let Some(flow) = self.handle_frame(pipeline, &frame, resume).await {
                            return flow;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.as_ref().map(|f| f.code);
                        info!(?code, "voice gateway closed the connection");
                        return match code {
                            Some(code) if !VoiceCloseCode::is_retryable(code) => {
                                Flow::Fatal(VoiceError::fatally_closed(frame))
                            }
                            Some(code) => Flow::Reconnect {
                                resumable: VoiceCloseCode::is_resumable(code),
                            },
                            None => Flow::Reconnect { resumable: true },
                        };
                    }
                    Some(Err(error)) => {
                        warn!(%error, "voice transport failed");
                        return Flow::Reconnect { resumable: true };
                    }
                    None => {
                        debug!("voice connection ended without a close frame");
                        return Flow::Reconnect { resumable: true };
                    }
                }
            }
        }
    }

    async fn handle_frame(
        &mut self,
        pipeline: &Pipeline,
        frame: &str,
        resume: bool,
    ) -> Option<Flow> {
        let event = match VoiceEvent::from_json(frame) {
            Ok(Some(event)) => event,
            Ok(None) => {
                trace!("skipping frame with an unknown voice opcode");
                return None;
            }
            Err(error) => {
                // While the handshake is incomplete every frame is one it
                // depends on, so a parse failure cannot be skipped.
                let handshake_pending = !self.heartbeat.is_running()
                    || self.media.as_ref().is_none_or(|media| media.key.is_none());
                if handshake_pending {
                    warn!(%error, "malformed frame during the voice handshake");
                    return Some(Flow::Reconnect { resumable: true });
                }
                warn!(%error, "skipping malformed voice frame");
                return None;
            }
        };

        match event {
            VoiceEvent::Hello(hello) => {
                debug!(
                    interval_ms = hello.heartbeat_interval,
                    "received voice hello, starting the heartbeat",
                );
                self.heartbeat
                    .start(Duration::from_millis(hello.heartbeat_interval));

                let handshake = if resume {
                    debug!("resuming the previous voice session");
                    self.send_payload(pipeline, VoiceOpCode::Resume, &Resume {
                        server_id: self.config.guild_id,
                        session_id: self.config.session_id.clone(),
                        token: self.config.token.clone(),
                    })
                } else {
                    debug!("identifying a new voice session");
                    self.send_payload(pipeline, VoiceOpCode::Identify, &Identify {
                        server_id: self.config.guild_id,
                        user_id: self.config.user_id,
                        session_id: self.config.session_id.clone(),
                        token: self.config.token.clone(),
                    })
                };
                if handshake.is_err() {
                    return Some(Flow::Reconnect { resumable: true });
                }
            }
            VoiceEvent::Ready(ready) => return self.handle_ready(pipeline, &ready).await,
            VoiceEvent::SessionDescription(description) => {
                return self.handle_session_description(pipeline, &description).await;
            }
            VoiceEvent::Resumed => {
                info!("voice session was resumed");
                self.reconnect.reset();
                self.cause_resumable = true;
                if self.tasks.is_none() {
                    self.spawn_media(pipeline);
                }
                return self.emit(Event::Resumed).await;
            }
            VoiceEvent::Speaking(speaking) => {
                return self.emit(Event::Speaking(speaking)).await;
            }
            VoiceEvent::HeartbeatAck => {
                if let Some(latency) = self.heartbeat.acknowledged() {
                    trace!(?latency, "voice heartbeat acknowledged");
                }
            }
        }

        None
    }

    async fn handle_ready(&mut self, pipeline: &Pipeline, ready: &Ready) -> Option<Flow> {
        let Some(mode) = EncryptMode::negotiate(&ready.modes) else {
            return Some(Flow::Fatal(VoiceError {
                kind: VoiceErrorType::NoSupportedMode {
                    modes: ready.modes.clone(),
                },
                source: None,
            }));
        };
        debug!(%mode, ssrc = ready.ssrc, "voice handshake ready, negotiated a mode");

        let udp = match VoiceUdp::connect(ready.ip, ready.port).await {
            Ok(udp) => udp,
            Err(error) => {
                warn!(%error, "failed to reach the media server");
                return Some(Flow::Reconnect { resumable: true });
            }
        };
        // UDP is lossy and the reply may simply never come; the wait must
        // not wedge the run loop, so it stays bounded and cancellable.
        let discovery = tokio::select! {
            () = self.shutdown.triggered() => {
                return Some(disconnect(pipeline, DisconnectBehavior::Stop));
            }
            result = timeout(DISCOVERY_TIMEOUT, udp.discover(ready.ssrc)) => result,
        };
        let discovered = match discovery {
            Ok(Ok(discovered)) => discovered,
            Ok(Err(error)) => {
                warn!(%error, "ip discovery failed");
                return Some(Flow::Reconnect { resumable: true });
            }
            Err(_) => {
                warn!("ip discovery reply never arrived");
                return Some(Flow::Reconnect { resumable: true });
            }
        };
        debug!(address = %discovered.address, port = discovered.port, "discovered external address");

        self.udp = Some(udp);
        self.media = Some(MediaSession {
            ssrc: ready.ssrc,
            mode,
            key: None,
        });

        let select = SelectProtocol::udp(discovered.address, discovered.port, mode.as_str());
        if self
            .send_payload(pipeline, VoiceOpCode::SelectProtocol, &select)
            .is_err()
        {
            return Some(Flow::Reconnect { resumable: true });
        }
        None
    }

    async fn handle_session_description(
        &mut self,
        pipeline: &Pipeline,
        description: &SessionDescription,
    ) -> Option<Flow> {
        let Some(media) = self.media.as_mut() else {
            warn!("session description arrived before the handshake was ready");
            return None;
        };

        // The server answers with the mode it actually picked.
        let mode = match EncryptMode::from_str(&description.mode) {
            Ok(mode) => mode,
            Err(error) => {
                return Some(Flow::Fatal(VoiceError {
                    kind: VoiceErrorType::NoSupportedMode {
                        modes: vec![description.mode.clone()],
                    },
                    source: Some(Box::new(error)),
                }));
            }
        };
        media.mode = mode;
        media.key = Some(description.secret_key);
        let ssrc = media.ssrc;

        self.reconnect.reset();
        self.cause_resumable = true;
        self.spawn_media(pipeline);
        info!(%mode, "voice session is live");

        self.emit(Event::Connected { ssrc, mode }).await
    }

    /// Spawns the paired media tasks from the stored media session.
    fn spawn_media(&mut self, pipeline: &Pipeline) {
        let Some(media) = self.media.as_ref() else {
            return;
        };
        let Some(key) = media.key.as_ref() else {
            return;
        };
        let Some(udp) = self.udp.as_ref() else {
            return;
        };

        if let Some(previous) = self.tasks.take() {
            previous.abort();
        }
        self.tasks = Some(AudioTasks::spawn(
            udp,
            PacketTransformer::new(media.ssrc, media.mode, key),
            PacketTransformer::new(media.ssrc, media.mode, key),
            Arc::clone(&self.source),
            Arc::clone(&self.sink),
            pipeline.sender(),
        ));
    }

    /// Drops every piece of media state. Used when the session cannot be
    /// resumed anymore.
    fn teardown_media(&mut self) {
        if let Some(tasks) = self.tasks.take() {
            tasks.abort();
        }
        self.udp = None;
        self.media = None;
    }

    fn send_heartbeat(&mut self, pipeline: &Pipeline) -> Result<(), TransportError> {
        let nonce = fastrand::u64(..);
        trace!(nonce, "sending voice heartbeat");
        let payload = json!({"op": VoiceOpCode::Heartbeat, "d": nonce});
        pipeline.send(Message::Text(payload.to_string()))?;

        if !self.heartbeat.has_pending_ack() {
            self.heartbeat.record_sent();
        }
        Ok(())
    }

    fn send_payload<P: Serialize>(
        &self,
        pipeline: &Pipeline,
        op: VoiceOpCode,
        payload: &P,
    ) -> Result<(), TransportError> {
        let frame = json!({"op": op, "d": payload});
        pipeline.send(Message::Text(frame.to_string()))
    }

    /// Forwards an event to the consumer, waiting when they fall behind.
    async fn emit(&self, event: Event) -> Option<Flow> {
        if self.events.send_async(event).await.is_err() {
            debug!("voice event consumer hung up, stopping the connection");
            return Some(Flow::Stopped);
        }
        None
    }
}

/// Completes when any spawned media task stops; pends forever while none
/// are running.
async fn wait_any(tasks: &mut Option<AudioTasks>) {
    match tasks.as_mut() {
        Some(tasks) => tasks.wait_any().await,
        None => std::future::pending().await,
    }
}

/// Carries out a client-initiated disconnect and decides where the run
/// loop goes next.
fn disconnect(pipeline: &Pipeline, behavior: DisconnectBehavior) -> Flow {
    let frame = if behavior.is_abrupt() {
        CloseFrame::RESUME
    } else {
        CloseFrame::NORMAL
    };
    let _ = pipeline.send(Message::Close(Some(frame)));

    if behavior.retries() {
        Flow::Reconnect {
            resumable: behavior.is_abrupt(),
        }
    } else {
        Flow::Stopped
    }
}
