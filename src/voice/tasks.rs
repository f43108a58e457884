use flume::Sender;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tracing::{trace, warn};

use switchboard_types::VoiceOpCode;
use switchboard_types::payload::SpeakingFlags;
use switchboard_types::payload::voice::SentSpeaking;

use super::udp::VoiceUdp;
use crate::crypto::{PacketTransformer, RtpFrame};
use crate::transport::Message;

/// Provides encoded audio frames to the send task.
///
/// Called once per frame interval; encoding and mixing live behind this
/// trait, outside this crate.
pub trait AudioSource: Send + 'static {
    /// The next opus frame, or `None` when there is nothing to say.
    fn next_frame(&mut self) -> Option<Vec<u8>>;
}

/// Receives decrypted audio frames from other users.
pub trait AudioSink: Send + 'static {
    fn receive(&mut self, frame: RtpFrame);
}

pub(crate) type SharedSource = Arc<Mutex<Box<dyn AudioSource>>>;
pub(crate) type SharedSink = Arc<Mutex<Box<dyn AudioSink>>>;

/// Samples per frame at the 48kHz RTP clock.
const TIMESTAMP_STEP: u32 = 960;

/// How often an audio frame goes out.
const FRAME_INTERVAL: Duration = Duration::from_millis(20);

/// How often the NAT mapping is kept warm.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Consecutive empty frames before announcing we stopped speaking.
const SILENCE_GRACE: u32 = 5;

/// Largest UDP datagram the receive task accepts.
const RECV_BUFFER_LEN: usize = 1460;

/// The paired media tasks of one established voice session.
///
/// Both halves live and die together: the run loop tears them down as a
/// unit, exactly once, by consuming [`abort`](Self::abort).
#[derive(Debug)]
pub(crate) struct AudioTasks {
    send: JoinHandle<()>,
    recv: JoinHandle<()>,
}

impl AudioTasks {
    pub fn spawn(
        udp: &VoiceUdp,
        transformer: PacketTransformer,
        receiver: PacketTransformer,
        source: SharedSource,
        sink: SharedSink,
        speaking: Sender<Message>,
    ) -> Self {
        let ssrc = transformer.ssrc();
        let send = tokio::spawn(send_loop(
            udp.clone(),
            transformer,
            source,
            speaking,
            ssrc,
        ));
        let recv = tokio::spawn(recv_loop(udp.clone(), receiver, sink));

        Self { send, recv }
    }

    /// Completes as soon as either task stops for any reason.
    pub async fn wait_any(&mut self) {
        tokio::select! {
            _ = &mut self.send => {}
            _ = &mut self.recv => {}
        }
    }

    /// Tears both tasks down together.
    pub fn abort(self) {
        self.send.abort();
        self.recv.abort();
    }
}

async fn send_loop(
    udp: VoiceUdp,
    mut transformer: PacketTransformer,
    source: SharedSource,
    ws: Sender<Message>,
    ssrc: u32,
) {
    let mut pacer = interval_at(Instant::now() + FRAME_INTERVAL, FRAME_INTERVAL);
    pacer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut keepalive = interval(KEEPALIVE_INTERVAL);

    let mut sequence: u16 = fastrand::u16(..);
    let mut timestamp: u32 = fastrand::u32(..);
    let mut speaking = false;
    let mut silent_frames = 0u32;

    loop {
        tokio::select! {
            _ = pacer.tick() => {
                let frame = source.lock().await.next_frame();
                match frame {
                    Some(frame) => {
                        silent_frames = 0;
                        if !speaking {
                            speaking = true;
                            if send_speaking(&ws, SpeakingFlags::MICROPHONE, ssrc).is_err() {
                                return;
                            }
                        }

                        let packet = match transformer.encrypt(sequence, timestamp, &frame) {
                            Ok(packet) => packet,
                            Err(error) => {
                                warn!(%error, "failed to seal a voice packet");
                                return;
                            }
                        };
                        if let Err(error) = udp.send(&packet).await {
                            warn!(%error, "failed to send a voice packet");
                            return;
                        }
                        sequence = sequence.wrapping_add(1);
                    }
                    None => {
                        // The RTP clock keeps running through silence.
                        if speaking {
                            silent_frames += 1;
                            if silent_frames >= SILENCE_GRACE {
                                speaking = false;
                                if send_speaking(&ws, SpeakingFlags::empty(), ssrc).is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
                timestamp = timestamp.wrapping_add(TIMESTAMP_STEP);
            }
            _ = keepalive.tick() => {
                if let Err(error) = udp.send_keepalive(ssrc).await {
                    warn!(%error, "failed to send a keepalive");
                    return;
                }
            }
        }
    }
}

fn send_speaking(ws: &Sender<Message>, flags: SpeakingFlags, ssrc: u32) -> Result<(), ()> {
    trace!(?flags, "updating speaking state");
    let payload = json!({
        "op": VoiceOpCode::Speaking,
        "d": SentSpeaking { speaking: flags, delay: 0, ssrc },
    });
    ws.try_send(Message::Text(payload.to_string()))
        .map_err(|_| ())
}

async fn recv_loop(udp: VoiceUdp, transformer: PacketTransformer, sink: SharedSink) {
    let mut buffer = [0u8; RECV_BUFFER_LEN];

    loop {
        let len = match udp.recv(&mut buffer).await {
            Ok(len) => len,
            Err(error) => {
                warn!(%error, "media socket stopped receiving");
                return;
            }
        };

        // Keepalive echoes and stray discovery responses share this
        // socket; anything that does not open cleanly is dropped.
        match transformer.decrypt(&buffer[..len]) {
            Ok(frame) => sink.lock().await.receive(frame),
            Err(error) => trace!(%error, "dropping an unreadable datagram"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EncryptMode;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::net::UdpSocket;

    struct Beep;

    impl AudioSource for Beep {
        fn next_frame(&mut self) -> Option<Vec<u8>> {
            Some(vec![1, 2, 3, 4])
        }
    }

    struct Collect(flume::Sender<RtpFrame>);

    impl AudioSink for Collect {
        fn receive(&mut self, frame: RtpFrame) {
            let _ = self.0.send(frame);
        }
    }

    const KEY: [u8; 32] = [3u8; 32];
    const SSRC: u32 = 0xdead_beef;

    fn transformer() -> PacketTransformer {
        PacketTransformer::new(SSRC, EncryptMode::Aes256Gcm, &KEY)
    }

    #[tokio::test]
    async fn paces_out_decryptable_packets_and_announces_speaking() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let udp = VoiceUdp::connect(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
            .await
            .unwrap();

        let (ws_tx, ws_rx) = flume::unbounded();
        let (sink_tx, _sink_rx) = flume::unbounded::<RtpFrame>();

        let source: SharedSource = Arc::new(Mutex::new(Box::new(Beep)));
        let sink: SharedSink = Arc::new(Mutex::new(Box::new(Collect(sink_tx))));
        let tasks = AudioTasks::spawn(&udp, transformer(), transformer(), source, sink, ws_tx);

        // First datagram is the keepalive, fired immediately.
        let mut buffer = [0u8; RECV_BUFFER_LEN];
        let (len, _) = server.recv_from(&mut buffer).await.unwrap();
        assert!(len < 12, "expected a keepalive, got {len} bytes");

        let (len, _) = server.recv_from(&mut buffer).await.unwrap();
        let frame = transformer().decrypt(&buffer[..len]).unwrap();
        assert_eq!(frame.ssrc, SSRC);
        assert_eq!(frame.payload, vec![1, 2, 3, 4]);

        let speaking = ws_rx.recv_async().await.unwrap();
        let Message::Text(payload) = speaking else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["op"], 5);
        assert_eq!(value["d"]["speaking"], 1);

        tasks.abort();
    }

    #[tokio::test]
    async fn receive_path_feeds_the_sink() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let udp = VoiceUdp::connect(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
            .await
            .unwrap();
        let client_addr = {
            // Learn the client's address from its first keepalive.
            udp.send_keepalive(SSRC).await.unwrap();
            let mut buffer = [0u8; 16];
            let (_, peer) = server.recv_from(&mut buffer).await.unwrap();
            peer
        };

        let (ws_tx, _ws_rx) = flume::unbounded();
        let (sink_tx, sink_rx) = flume::unbounded();

        struct Silent;
        impl AudioSource for Silent {
            fn next_frame(&mut self) -> Option<Vec<u8>> {
                None
            }
        }

        let source: SharedSource = Arc::new(Mutex::new(Box::new(Silent)));
        let sink: SharedSink = Arc::new(Mutex::new(Box::new(Collect(sink_tx))));
        let tasks = AudioTasks::spawn(&udp, transformer(), transformer(), source, sink, ws_tx);

        let mut sender = transformer();
        let packet = sender.encrypt(7, 1920, b"from afar").unwrap();
        server.send_to(&packet, client_addr).await.unwrap();

        let frame = sink_rx.recv_async().await.unwrap();
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.payload, b"from afar");

        tasks.abort();
    }
}
