use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::error::Error;
use std::fmt::{self, Debug, Display};
use std::future::Future;
use tokio::net::TcpStream;
use tokio_websockets::{
    ClientBuilder, CloseCode as WsCloseCode, Limits, MaybeTlsStream, Message as WsMessage,
    WebSocketStream,
};
use twilight_model::gateway::CloseFrame;

/// Frames exchanged with a gateway server.
///
/// The gateway speaks JSON text frames; everything else on the wire is
/// websocket plumbing the run loops never see.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Message {
    /// A close handshake frame, with the code and reason when one was given.
    Close(Option<CloseFrame<'static>>),
    /// A JSON payload.
    Text(String),
}

impl Message {
    /// Converts a raw websocket message, discarding control frames the
    /// library already answers on its own.
    fn from_websocket_message(message: &WsMessage) -> Option<Self> {
        if message.is_close() {
            let (code, reason) = message.as_close()?;
            let frame = (code != WsCloseCode::NO_STATUS_RECEIVED).then(|| CloseFrame {
                code: code.into(),
                reason: std::borrow::Cow::Owned(reason.to_string()),
            });
            Some(Self::Close(frame))
        } else if message.is_text() {
            message
                .as_text()
                .map(|text| Self::Text(text.to_owned()))
        } else {
            None
        }
    }

    fn into_websocket_message(self) -> WsMessage {
        match self {
            Self::Close(frame) => WsMessage::close(
                frame
                    .as_ref()
                    .and_then(|f| WsCloseCode::try_from(f.code).ok()),
                frame.map(|f| f.reason).as_deref().unwrap_or_default(),
            ),
            Self::Text(text) => WsMessage::text(text),
        }
    }
}

/// Opens transports for connection attempts.
///
/// Implemented by [`WebSocketConnector`] for production and by in-memory
/// fakes in tests, which is the seam that keeps the run loops testable
/// without a network.
pub trait Transport: Send + Sync {
    type Tx: TransportTx;
    type Rx: TransportRx;

    /// Connects to `url`, yielding independent write and read halves.
    fn connect(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<(Self::Tx, Self::Rx), TransportError>> + Send;
}

/// The write half of a connected transport.
pub trait TransportTx: Send + 'static {
    fn send(
        &mut self,
        message: Message,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// The read half of a connected transport.
pub trait TransportRx: Send + 'static {
    /// Next inbound frame. `None` once the peer is gone for good.
    fn next(
        &mut self,
    ) -> impl Future<Output = Option<Result<Message, TransportError>>> + Send;
}

/// Connects over websockets with TLS, the production transport.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketConnector;

pub struct WebSocketTx {
    inner: SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>,
}

pub struct WebSocketRx {
    inner: SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

impl Transport for WebSocketConnector {
    type Tx = WebSocketTx;
    type Rx = WebSocketRx;

    fn connect(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<(Self::Tx, Self::Rx), TransportError>> + Send {
        let builder = ClientBuilder::new().uri(url).map_err(|source| TransportError {
            kind: TransportErrorType::Connecting,
            source: Some(Box::new(source)),
        });

        async move {
            let (stream, _) = builder?
                .limits(Limits::unlimited())
                .connect()
                .await
                .map_err(|source| TransportError {
                    kind: TransportErrorType::Connecting,
                    source: Some(Box::new(source)),
                })?;

            let (sink, stream) = stream.split();
            Ok((WebSocketTx { inner: sink }, WebSocketRx { inner: stream }))
        }
    }
}

impl TransportTx for WebSocketTx {
    fn send(
        &mut self,
        message: Message,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        async move {
            self.inner
                .send(message.into_websocket_message())
                .await
                .map_err(|source| TransportError {
                    kind: TransportErrorType::Sending,
                    source: Some(Box::new(source)),
                })
        }
    }
}

impl TransportRx for WebSocketRx {
    fn next(
        &mut self,
    ) -> impl Future<Output = Option<Result<Message, TransportError>>> + Send {
        async move {
            loop {
                match self.inner.next().await? {
                    Ok(message) => {
                        if let Some(message) = Message::from_websocket_message(&message) {
                            return Some(Ok(message));
                        }
                    }
                    Err(source) => {
                        return Some(Err(TransportError {
                            kind: TransportErrorType::Receiving,
                            source: Some(Box::new(source)),
                        }));
                    }
                }
            }
        }
    }
}

/// Something went wrong at the websocket layer.
#[derive(Debug)]
pub struct TransportError {
    pub(crate) kind: TransportErrorType,
    pub(crate) source: Option<Box<dyn Error + Send + Sync>>,
}

impl TransportError {
    #[must_use]
    pub const fn kind(&self) -> &TransportErrorType {
        &self.kind
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TransportErrorType::Connecting => f.write_str("failed to connect to the gateway"),
            TransportErrorType::Sending => f.write_str("failed to send a frame"),
            TransportErrorType::Receiving => f.write_str("failed to receive a frame"),
        }
    }
}

impl Error for TransportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn Error + 'static))
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum TransportErrorType {
    Connecting,
    Sending,
    Receiving,
}
