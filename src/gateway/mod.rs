//! Client side of the gateway control channel.
//!
//! [`Connection::run`] owns one logical connection across its entire
//! lifetime: handshakes, heartbeats, reconnects with backoff, and resumes.
//! The consumer watches it through the [`Handle`] it got at construction.

mod error;
mod event;

pub use self::error::{GatewayError, GatewayErrorType};
pub use self::event::Event;

use flume::{Receiver, Sender};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};
use twilight_model::gateway::CloseFrame;

use switchboard_types::payload::gateway::{Identify, Resume};
use switchboard_types::{CloseCode, GATEWAY_VERSION, GatewayEvent, OpCode, Token};

use crate::heartbeat::Heartbeat;
use crate::pipeline::Pipeline;
use crate::reconnect::{DisconnectBehavior, ReconnectContext, ReconnectOptions, resume_allowed};
use crate::session::Session;
use crate::shutdown::{self, Shutdown, ShutdownListener};
use crate::transport::{Message, Transport, TransportError, WebSocketConnector};

/// Url the gateway lives at when no override is configured.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";

/// How many events the outward channel buffers before the run loop waits
/// for the consumer.
const EVENTS_CAPACITY: usize = 256;

/// Settings for one gateway connection.
#[derive(Clone, Debug)]
pub struct Config {
    token: Token,
    intents: u64,
    url: String,
    reconnect: ReconnectOptions,
}

impl Config {
    #[must_use]
    pub fn new(token: Token, intents: u64) -> Self {
        Self {
            token,
            intents,
            url: DEFAULT_GATEWAY_URL.to_owned(),
            reconnect: ReconnectOptions::default(),
        }
    }

    /// Overrides the gateway url, mainly for proxies and tests.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    #[must_use]
    pub fn reconnect(mut self, options: ReconnectOptions) -> Self {
        self.reconnect = options;
        self
    }
}

/// The consumer's view of a running connection.
#[derive(Clone, Debug)]
pub struct Handle {
    events: Receiver<Event>,
    shutdown: Shutdown,
}

impl Handle {
    /// Next connection event, `None` once the run loop is gone.
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

/// What one connection attempt decided about the connection's future.
enum Flow {
    /// A graceful stop was requested.
    Stopped,
    /// The connection was lost; retry, resuming when still permitted.
    Reconnect { resumable: bool },
    /// The server closed with a code that forbids another attempt.
    Fatal(Option<CloseFrame<'static>>),
}

/// A gateway connection and everything it owns.
#[derive(Debug)]
pub struct Connection<T: Transport = WebSocketConnector> {
    config: Config,
    connector: T,
    session: Session,
    heartbeat: Heartbeat,
    reconnect: ReconnectContext,
    events: Sender<Event>,
    shutdown: ShutdownListener,
    /// Whether the most recent disconnect left the session resumable.
    cause_resumable: bool,
    /// False until READY or RESUMED lands on the current connection.
    handshake_complete: bool,
    /// False until the first connection attempt, to skip the backoff once.
    retrying: bool,
}

impl Connection<WebSocketConnector> {
    #[must_use]
    pub fn new(config: Config) -> (Self, Handle) {
        Self::with_connector(config, WebSocketConnector)
    }
}

impl<T: Transport> Connection<T> {
    /// Creates a connection on a custom transport.
    #[must_use]
    pub fn with_connector(config: Config, connector: T) -> (Self, Handle) {
        let (events_tx, events_rx) = flume::bounded(EVENTS_CAPACITY);
        let (shutdown, listener) = shutdown::channel();
        let session = Session::new(config.token.clone());

        let connection = Self {
            config,
            connector,
            session,
            heartbeat: Heartbeat::new(),
            reconnect: ReconnectContext::new(),
            events: events_tx,
            shutdown: listener,
            cause_resumable: true,
            handshake_complete: false,
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
    /// Emits [`Event::Closed`] as its final act either way.
    pub async fn run(mut self) -> Result<(), GatewayError> {
        let result = self.run_inner().await;

        let frame = match &result {
            Ok(frame) => frame.clone(),
            Err(error) => match error.kind() {
                GatewayErrorType::FatallyClosed { frame } => frame.clone(),
                GatewayErrorType::RetriesExhausted => None,
            },
        };
        let _ = self.events.send_async(Event::Closed(frame)).await;
        self.shutdown.complete();

        match result {
            Ok(_) => {
                info!("gateway connection stopped");
                Ok(())
            }
            Err(error) => {
                warn!(%error, "gateway connection failed");
                Err(error)
            }
        }
    }

    async fn run_inner(&mut self) -> Result<Option<CloseFrame<'static>>, GatewayError> {
        loop {
            if self.shutdown.is_triggered() {
                return Ok(None);
            }

            let attempt = self.reconnect.next_attempt();
            if self.reconnect.exhausted(&self.config.reconnect) {
                return Err(GatewayError::retries_exhausted());
            }

            if self.retrying {
                let delay = self.config.reconnect.delay(attempt);
                debug!(?delay, attempt, "waiting before reconnecting");
                tokio::select! {
                    () = self.shutdown.triggered() => return Ok(None),
                    () = sleep(delay) => {}
                }
            }
            self.retrying = true;

            let resume = resume_allowed(
                attempt,
                self.session.resume_state().is_some(),
                self.cause_resumable,
            );

            // Resumes go to the url the server handed out with READY.
            let base_url = if resume {
                self.session.resume_url().unwrap_or(&self.config.url)
            } else {
                &self.config.url
            };
            let url = format!("{base_url}/?v={GATEWAY_VERSION}&encoding=json");
            debug!(attempt, "connecting to the gateway");

            let connected = tokio::select! {
                () = self.shutdown.triggered() => return Ok(None),
                result = self.connector.connect(&url) => result,
            };
            let pipeline = match connected {
                Ok((tx, rx)) => Pipeline::new(tx, rx),
                Err(error) => {
                    warn!(%error, "failed to connect to the gateway");
                    continue;
                }
            };

            let flow = self.connected(&pipeline, resume).await;
            self.heartbeat.stop();
            pipeline.shutdown().await;

            match flow {
                Flow::Stopped => return Ok(None),
                Flow::Fatal(frame) => return Err(GatewayError::fatally_closed(frame)),
                Flow::Reconnect { resumable } => {
                    self.cause_resumable = resumable;
                }
            }
        }
    }

    /// Drives one established connection until something ends it.
    async fn connected(&mut self, pipeline: &Pipeline, resume: bool) -> Flow {
        self.handshake_complete = false;
        loop {
            tokio::select! {
                () = self.shutdown.triggered() => {
                    // A proper close ends the session on the server too.
                    return disconnect(pipeline, DisconnectBehavior::Stop);
                }
                () = self.heartbeat.tick() => {
                    if self.heartbeat.has_pending_ack() {
                        warn!("heartbeat was never acknowledged, assuming a zombied connection");
                        return disconnect(pipeline, DisconnectBehavior::RetryAbruptly);
                    }
                    if self.send_heartbeat(pipeline).is_err() {
                        return Flow::Reconnect { resumable: true };
                    }
                }
                message = pipeline.recv() => match message {
                    Some(Ok(Message::Text(frame))) => {
                        if let Some(flow) = self.handle_frame(pipeline, &frame, resume).await {
                            return flow;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.as_ref().map(|f| f.code);
                        info!(?code, "gateway closed the connection");
                        return match code {
                            Some(code) if !CloseCode::is_retryable(code) => Flow::Fatal(frame),
                            Some(code) => Flow::Reconnect {
                                resumable: CloseCode::is_resumable(code),
                            },
                            None => Flow::Reconnect { resumable: true },
                        };
                    }
                    Some(Err(error)) => {
                        warn!(%error, "gateway transport failed");
                        return Flow::Reconnect { resumable: true };
                    }
                    None => {
                        debug!("gateway connection ended without a close frame");
                        return Flow::Reconnect { resumable: true };
                    }
                }
            }
        }
    }

    /// Handles one inbound text frame. Frames are processed one at a time,
    /// in arrival order.
    async fn handle_frame(
        &mut self,
        pipeline: &Pipeline,
        frame: &str,
        resume: bool,
    ) -> Option<Flow> {
        let event = match GatewayEvent::from_json(frame) {
            Ok(Some(event)) => event,
            Ok(None) => {
                trace!("skipping frame with an unknown opcode");
                return None;
            }
            Err(error) => {
                // Until READY or RESUMED lands every frame is one the
                // handshake depends on, so a parse failure cannot be
                // skipped.
                if !self.handshake_complete {
                    warn!(%error, "malformed frame during the handshake");
                    return Some(Flow::Reconnect { resumable: true });
                }
                // One bad frame is not worth the session.
                warn!(%error, "skipping malformed gateway frame");
                return None;
            }
        };

        match event {
            GatewayEvent::Hello(hello) => {
                debug!(
                    interval_ms = hello.heartbeat_interval,
                    "received hello, starting the heartbeat",
                );
                self.heartbeat
                    .start(Duration::from_millis(hello.heartbeat_interval));

                let handshake = match self.session.resume_state() {
                    Some((session_id, seq)) if resume => {
                        debug!("resuming the previous session");
                        self.send_payload(pipeline, OpCode::Resume, &Resume {
                            token: self.config.token.clone(),
                            session_id: session_id.to_owned(),
                            seq,
                        })
                    }
                    _ => {
                        debug!("identifying as a new session");
                        self.send_payload(
                            pipeline,
                            OpCode::Identify,
                            &Identify::new(self.config.token.clone(), self.config.intents),
                        )
                    }
                };
                if handshake.is_err() {
                    return Some(Flow::Reconnect { resumable: true });
                }
            }
            GatewayEvent::Dispatch(dispatch) => {
                self.session.observe_sequence(dispatch.sequence);

                match dispatch.ready() {
                    Ok(Some(ready)) => {
                        info!("gateway session is ready");
                        self.session
                            .start(ready.session_id.clone(), ready.resume_gateway_url.clone());
                        self.handshake_complete = true;
                        self.reconnect.reset();
                        self.cause_resumable = true;
                        return self.emit(Event::Ready(ready)).await;
                    }
                    Ok(None) => {}
                    Err(error) => {
                        // Skipping a broken READY would leave the session
                        // unstarted with no way to notice.
                        warn!(%error, "malformed ready payload");
                        return Some(Flow::Reconnect { resumable: true });
                    }
                }
                if dispatch.is_resumed() {
                    info!("gateway session was resumed");
                    self.handshake_complete = true;
                    self.reconnect.reset();
                    return self.emit(Event::Resumed).await;
                }
                return self.emit(Event::Dispatch(dispatch)).await;
            }
            GatewayEvent::HeartbeatRequest => {
                trace!("server requested an immediate heartbeat");
                if self.send_heartbeat(pipeline).is_err() {
                    return Some(Flow::Reconnect { resumable: true });
                }
            }
            GatewayEvent::HeartbeatAck => {
                if let Some(latency) = self.heartbeat.acknowledged() {
                    trace!(?latency, "heartbeat acknowledged");
                }
            }
            GatewayEvent::InvalidSession { resumable } => {
                return self.handle_invalid_session(pipeline, resumable);
            }
            GatewayEvent::Reconnect => {
                debug!("server requested a reconnect");
                return Some(disconnect(pipeline, DisconnectBehavior::RetryAbruptly));
            }
        }

        None
    }

    fn handle_invalid_session(&mut self, pipeline: &Pipeline, resumable: bool) -> Option<Flow> {
        match self.session.resume_state() {
            // A resumable invalid session can be resumed in place, with no
            // reconnect round trip.
            Some((session_id, seq)) if resumable => {
                debug!("session invalidated but resumable, resuming in place");
                let payload = Resume {
                    token: self.config.token.clone(),
                    session_id: session_id.to_owned(),
                    seq,
                };
                if self
                    .send_payload(pipeline, OpCode::Resume, &payload)
                    .is_err()
                {
                    return Some(Flow::Reconnect { resumable: true });
                }
                None
            }
            _ => {
                debug!("session invalidated, reconnecting with a fresh identify");
                self.session.invalidate();
                Some(disconnect(pipeline, DisconnectBehavior::Retry))
            }
        }
    }

    fn send_heartbeat(&mut self, pipeline: &Pipeline) -> Result<(), TransportError> {
        trace!(sequence = ?self.session.sequence(), "sending heartbeat");
        let payload = json!({"op": OpCode::Heartbeat, "d": self.session.sequence()});
        pipeline.send(Message::Text(payload.to_string()))?;

        // A requested heartbeat may race an outstanding one; keep the
        // earlier send time so latency is not underreported.
        if !self.heartbeat.has_pending_ack() {
            self.heartbeat.record_sent();
        }
        Ok(())
    }

    fn send_payload<P: Serialize>(
        &self,
        pipeline: &Pipeline,
        op: OpCode,
        payload: &P,
    ) -> Result<(), TransportError> {
        let frame = json!({"op": op, "d": payload});
        pipeline.send(Message::Text(frame.to_string()))
    }

    /// Forwards an event to the consumer, waiting when they fall behind.
    async fn emit(&self, event: Event) -> Option<Flow> {
        if self.events.send_async(event).await.is_err() {
            debug!("event consumer hung up, stopping the connection");
            return Some(Flow::Stopped);
        }
        None
    }
}

/// Carries out a client-initiated disconnect and decides where the run
/// loop goes next.
///
/// A proper close handshake ends the session on the server; an abrupt
/// disconnect closes with a non-1000 code so the session stays resumable.
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
