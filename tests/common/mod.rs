#![allow(dead_code)]

use flume::{Receiver, Sender};
use serde_json::json;
use std::future::Future;

use switchboard::transport::{Message, Transport, TransportError, TransportRx, TransportTx};

/// Hands every connection attempt to the test as a [`ServerConn`].
#[derive(Clone)]
pub struct FakeConnector {
    conns: Sender<ServerConn>,
}

impl FakeConnector {
    pub fn new() -> (Self, Receiver<ServerConn>) {
        let (conns, accept) = flume::unbounded();
        (Self { conns }, accept)
    }
}

/// The server's end of one accepted connection.
pub struct ServerConn {
    pub url: String,
    to_client: Sender<Result<Message, TransportError>>,
    from_client: Receiver<Message>,
}

impl ServerConn {
    /// Sends one raw gateway frame to the client.
    pub fn send(&self, op: u8, data: serde_json::Value) {
        let frame = json!({"op": op, "d": data}).to_string();
        self.to_client
            .send(Ok(Message::Text(frame)))
            .expect("client hung up");
    }

    /// Sends one dispatch frame to the client.
    pub fn dispatch(&self, kind: &str, sequence: u64, data: serde_json::Value) {
        let frame = json!({"op": 0, "t": kind, "s": sequence, "d": data}).to_string();
        self.to_client
            .send(Ok(Message::Text(frame)))
            .expect("client hung up");
    }

    /// Closes the connection from the server side with a close code.
    pub fn close(self, code: u16) {
        let frame = twilight_model::gateway::CloseFrame::new(code, "");
        let _ = self.to_client.send(Ok(Message::Close(Some(frame))));
    }

    /// Next frame the client wrote, parsed when it is a text frame.
    pub async fn next_frame(&self) -> ClientFrame {
        match self.from_client.recv_async().await.expect("client hung up") {
            Message::Text(text) => {
                let value: serde_json::Value =
                    serde_json::from_str(&text).expect("client sent invalid json");
                ClientFrame::Payload(value)
            }
            Message::Close(frame) => ClientFrame::Close(frame.map(|f| f.code)),
        }
    }

    /// Next payload the client wrote, asserting on its opcode.
    pub async fn expect_payload(&self, op: u8) -> serde_json::Value {
        match self.next_frame().await {
            ClientFrame::Payload(value) => {
                assert_eq!(value["op"], op, "unexpected opcode in {value}");
                value["d"].clone()
            }
            ClientFrame::Close(code) => panic!("expected op {op}, client closed with {code:?}"),
        }
    }
}

#[derive(Debug)]
pub enum ClientFrame {
    Payload(serde_json::Value),
    Close(Option<u16>),
}

pub struct FakeTx(Sender<Message>);
pub struct FakeRx(Receiver<Result<Message, TransportError>>);

impl TransportTx for FakeTx {
    fn send(&mut self, message: Message) -> impl Future<Output = Result<(), TransportError>> + Send {
        async move {
            // A dropped server end swallows the frame, like a dead socket
            // whose failure surfaces on the read half.
            let _ = self.0.send_async(message).await;
            Ok(())
        }
    }
}

impl TransportRx for FakeRx {
    fn next(&mut self) -> impl Future<Output = Option<Result<Message, TransportError>>> + Send {
        async move { self.0.recv_async().await.ok() }
    }
}

impl Transport for FakeConnector {
    type Tx = FakeTx;
    type Rx = FakeRx;

    fn connect(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<(Self::Tx, Self::Rx), TransportError>> + Send {
        let url = url.to_owned();
        let conns = self.conns.clone();

        async move {
            let (to_client, client_rx) = flume::unbounded();
            let (client_tx, from_client) = flume::unbounded();
            conns
                .send_async(ServerConn {
                    url,
                    to_client,
                    from_client,
                })
                .await
                .expect("test dropped the accept channel");

            Ok((FakeTx(client_tx), FakeRx(client_rx)))
        }
    }
}

/// Reconnect options tuned so tests never sit in a real backoff.
pub fn fast_reconnect() -> switchboard::ReconnectOptions {
    switchboard::ReconnectOptions {
        first_backoff: std::time::Duration::from_millis(10),
        max_backoff: std::time::Duration::from_millis(50),
        max_retries: None,
        jitter: 0.0,
    }
}
