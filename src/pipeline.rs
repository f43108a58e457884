use flume::{Receiver, Sender, TrySendError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::transport::{Message, TransportError, TransportErrorType, TransportRx, TransportTx};

/// How many frames either direction buffers before applying backpressure.
const PIPELINE_CAPACITY: usize = 64;

/// How long a graceful shutdown waits for queued outbound frames.
const FLUSH_GRACE: Duration = Duration::from_secs(5);

/// Bridges one connected transport to a pair of bounded channels.
///
/// The read pump applies backpressure to the server when the run loop falls
/// behind; the write pump is fed with [`send`](Self::send), which fails fast
/// instead of queueing unboundedly. Both pumps belong to exactly one
/// connection attempt and die with it.
pub(crate) struct Pipeline {
    inbound: Receiver<Result<Message, TransportError>>,
    outbound: Sender<Message>,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
}

impl Pipeline {
    pub fn new<Tx, Rx>(mut tx: Tx, mut rx: Rx) -> Self
    where
        Tx: TransportTx,
        Rx: TransportRx,
    {
        let (inbound_tx, inbound) = flume::bounded(PIPELINE_CAPACITY);
        let (outbound, outbound_rx) = flume::bounded::<Message>(PIPELINE_CAPACITY);

        let read_task = tokio::spawn(async move {
            while let Some(result) = rx.next().await {
                let failed = result.is_err();
                if inbound_tx.send_async(result).await.is_err() {
                    // The run loop hung up.
                    break;
                }
                if failed {
                    break;
                }
            }
            trace!("transport read pump finished");
        });

        let write_task = tokio::spawn(async move {
            while let Ok(message) = outbound_rx.recv_async().await {
                if let Err(error) = tx.send(message).await {
                    debug!(?error, "failed to write frame to the transport");
                    break;
                }
            }
            trace!("transport write pump finished");
        });

        Self {
            inbound,
            outbound,
            read_task,
            write_task,
        }
    }

    /// Next inbound frame, in arrival order.
    pub async fn recv(&self) -> Option<Result<Message, TransportError>> {
        self.inbound.recv_async().await.ok()
    }

    /// A handle other tasks can queue outbound frames with.
    pub fn sender(&self) -> Sender<Message> {
        self.outbound.clone()
    }

    /// Queues an outbound frame without waiting.
    ///
    /// A full buffer means the writer stopped draining, which is treated
    /// the same as a dead connection.
    pub fn send(&self, message: Message) -> Result<(), TransportError> {
        self.outbound.try_send(message).map_err(|error| {
            let reason = match error {
                TrySendError::Full(_) => "outbound buffer is full",
                TrySendError::Disconnected(_) => "write pump is gone",
            };
            TransportError {
                kind: TransportErrorType::Sending,
                source: Some(reason.into()),
            }
        })
    }

    /// Tears both pumps down, writing out queued frames first.
    pub async fn shutdown(self) {
        let Self {
            inbound,
            outbound,
            read_task,
            write_task,
        } = self;

        // Closing the channel lets the write pump drain what is queued,
        // close frames included, before it exits.
        drop(outbound);
        let _ = tokio::time::timeout(FLUSH_GRACE, write_task).await;

        drop(inbound);
        read_task.abort();
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("inbound_queued", &self.inbound.len())
            .field("outbound_queued", &self.outbound.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::Pipeline;
    use crate::transport::{Message, TransportError, TransportRx, TransportTx};
    use std::future::Future;

    struct FakeTx(flume::Sender<Message>);
    struct FakeRx(flume::Receiver<Message>);

    impl TransportTx for FakeTx {
        fn send(
            &mut self,
            message: Message,
        ) -> impl Future<Output = Result<(), TransportError>> + Send {
            async move {
                self.0.send_async(message).await.map_err(|_| TransportError {
                    kind: crate::transport::TransportErrorType::Sending,
                    source: None,
                })
            }
        }
    }

    impl TransportRx for FakeRx {
        fn next(
            &mut self,
        ) -> impl Future<Output = Option<Result<Message, TransportError>>> + Send {
            async move { self.0.recv_async().await.ok().map(Ok) }
        }
    }

    #[tokio::test]
    async fn frames_flow_in_order() {
        let (server_tx, inbound_wire) = flume::unbounded();
        let (outbound_wire, server_rx) = flume::unbounded();

        let pipeline = Pipeline::new(FakeTx(outbound_wire), FakeRx(inbound_wire));

        for n in 0..10 {
            server_tx.send(Message::Text(format!("{n}"))).unwrap();
        }
        for n in 0..10 {
            let message = pipeline.recv().await.unwrap().unwrap();
            assert_eq!(message, Message::Text(format!("{n}")));
        }

        pipeline.send(Message::Text("out".to_owned())).unwrap();
        assert_eq!(
            server_rx.recv_async().await.unwrap(),
            Message::Text("out".to_owned())
        );
    }

    #[tokio::test]
    async fn shutdown_flushes_queued_outbound_frames() {
        let (server_tx, inbound_wire) = flume::unbounded();
        let (outbound_wire, server_rx) = flume::unbounded();
        drop(server_tx);

        let pipeline = Pipeline::new(FakeTx(outbound_wire), FakeRx(inbound_wire));
        pipeline.send(Message::Close(None)).unwrap();
        pipeline.shutdown().await;

        assert_eq!(server_rx.recv_async().await.unwrap(), Message::Close(None));
    }

    #[tokio::test]
    async fn recv_ends_when_the_peer_goes_away() {
        let (server_tx, inbound_wire) = flume::unbounded::<Message>();
        let (outbound_wire, _server_rx) = flume::unbounded();
        drop(server_tx);

        let pipeline = Pipeline::new(FakeTx(outbound_wire), FakeRx(inbound_wire));
        assert!(pipeline.recv().await.is_none());
    }
}
