use discortp::Packet;
use discortp::rtp::{MutableRtpPacket, RtpPacket, RtpType};
use std::fmt::Debug;
use switchboard_types::RTP_KEY_LEN;

use super::{Aead, AeadError, AeadErrorType, EncryptMode};

/// RTP protocol version carried by every voice packet.
const RTP_VERSION: u8 = 2;

/// Payload type Discord expects for opus audio.
const RTP_PROFILE_TYPE: RtpType = RtpType::Dynamic(120);

/// Fixed RTP header length; we never send contributing sources.
const RTP_HEADER_LEN: usize = 12;

/// Length of the nonce counter appended to the end of every packet.
const NONCE_SUFFIX_LEN: usize = 4;

/// Largest nonce any supported mode needs.
const NONCE_BUF_LEN: usize = 24;

/// Seals and opens voice packets for one synchronization source.
///
/// The nonce is a 32-bit counter appended in clear to the packet tail and
/// zero-padded to the mode's nonce size; the unencrypted RTP header is fed
/// to the AEAD as associated data. Each encrypting party needs its own
/// transformer so counters never collide.
pub struct PacketTransformer {
    ssrc: u32,
    aead: Box<dyn Aead>,
    nonce: u32,
}

impl Debug for PacketTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketTransformer")
            .field("ssrc", &self.ssrc)
            .field("mode", &self.aead.mode())
            .finish_non_exhaustive()
    }
}

impl PacketTransformer {
    #[must_use]
    pub fn new(ssrc: u32, mode: EncryptMode, key: &[u8; RTP_KEY_LEN]) -> Self {
        Self {
            ssrc,
            aead: mode.encryptor(key),
            nonce: 0,
        }
    }

    #[must_use]
    pub fn mode(&self) -> EncryptMode {
        self.aead.mode()
    }

    #[must_use]
    pub const fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Seals one audio frame into a complete voice packet.
    #[allow(clippy::missing_panics_doc)]
    pub fn encrypt(
        &mut self,
        sequence: u16,
        timestamp: u32,
        payload: &[u8],
    ) -> Result<Vec<u8>, AeadError> {
        let mut header = [0u8; RTP_HEADER_LEN];
        let mut view =
            MutableRtpPacket::new(&mut header[..]).expect("buffer fits a fixed RTP header");
        view.set_version(RTP_VERSION);
        view.set_payload_type(RTP_PROFILE_TYPE);
        view.set_sequence(sequence.into());
        view.set_timestamp(timestamp.into());
        view.set_ssrc(self.ssrc);

        let counter = self.nonce;
        self.nonce = self.nonce.wrapping_add(1);

        let mut nonce = [0u8; NONCE_BUF_LEN];
        let nonce = &mut nonce[..self.aead.mode().nonce_size()];
        nonce[..NONCE_SUFFIX_LEN].copy_from_slice(&counter.to_be_bytes());

        let ciphertext = self.aead.encrypt(nonce, &header, payload)?;

        let mut packet =
            Vec::with_capacity(RTP_HEADER_LEN + ciphertext.len() + NONCE_SUFFIX_LEN);
        packet.extend_from_slice(&header);
        packet.extend_from_slice(&ciphertext);
        packet.extend_from_slice(&counter.to_be_bytes());

        Ok(packet)
    }

    /// Opens a received voice packet back into an audio frame.
    pub fn decrypt(&self, packet: &[u8]) -> Result<RtpFrame, AeadError> {
        let view = RtpPacket::new(packet).ok_or(AeadError {
            kind: AeadErrorType::MalformedPacket,
        })?;

        let payload = view.payload();
        if payload.len() <= NONCE_SUFFIX_LEN {
            return Err(AeadError {
                kind: AeadErrorType::MalformedPacket,
            });
        }

        // With rtpsize modes only the RTP header stays in clear, so the
        // header length is whatever precedes the payload.
        let header_len = packet.len() - payload.len();
        let (ciphertext, counter) = payload.split_at(payload.len() - NONCE_SUFFIX_LEN);

        let mut nonce = [0u8; NONCE_BUF_LEN];
        let nonce = &mut nonce[..self.aead.mode().nonce_size()];
        nonce[..NONCE_SUFFIX_LEN].copy_from_slice(counter);

        let plaintext = self.aead.decrypt(nonce, &packet[..header_len], ciphertext)?;

        Ok(RtpFrame {
            ssrc: view.get_ssrc(),
            sequence: view.get_sequence().into(),
            timestamp: view.get_timestamp().into(),
            payload: plaintext,
        })
    }
}

/// A decrypted voice packet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RtpFrame {
    pub ssrc: u32,
    pub sequence: u16,
    pub timestamp: u32,
    pub payload: Vec<u8>,
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::{EncryptMode, PacketTransformer};

    const KEY: [u8; 32] = [7u8; 32];

    #[test]
    fn roundtrip_in_both_modes() {
        for mode in [EncryptMode::Aes256Gcm, EncryptMode::XChaCha20Poly1305] {
            let mut sender = PacketTransformer::new(0x1234_5678, mode, &KEY);
            let receiver = PacketTransformer::new(0x1234_5678, mode, &KEY);

            let packet = sender.encrypt(42, 960, b"opus frame").unwrap();
            let frame = receiver.decrypt(&packet).unwrap();

            assert_eq!(frame.ssrc, 0x1234_5678);
            assert_eq!(frame.sequence, 42);
            assert_eq!(frame.timestamp, 960);
            assert_eq!(frame.payload, b"opus frame");
        }
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let mut sender = PacketTransformer::new(1, EncryptMode::Aes256Gcm, &KEY);
        let receiver = PacketTransformer::new(1, EncryptMode::Aes256Gcm, &[9u8; 32]);

        let packet = sender.encrypt(0, 0, b"opus frame").unwrap();
        assert!(receiver.decrypt(&packet).is_err());
    }

    #[test]
    fn header_is_authenticated() {
        let mut sender = PacketTransformer::new(1, EncryptMode::XChaCha20Poly1305, &KEY);
        let receiver = PacketTransformer::new(1, EncryptMode::XChaCha20Poly1305, &KEY);

        let mut packet = sender.encrypt(0, 0, b"opus frame").unwrap();
        // Flip one bit in the ssrc field of the header.
        packet[8] ^= 0x01;
        assert!(receiver.decrypt(&packet).is_err());
    }

    #[test]
    fn nonce_counter_increments() {
        let mut sender = PacketTransformer::new(1, EncryptMode::Aes256Gcm, &KEY);

        let first = sender.encrypt(0, 0, b"a").unwrap();
        let second = sender.encrypt(1, 960, b"a").unwrap();

        assert_eq!(&first[first.len() - 4..], &[0, 0, 0, 0]);
        assert_eq!(&second[second.len() - 4..], &[0, 0, 0, 1]);
    }

    #[test]
    fn truncated_packet_is_rejected() {
        let receiver = PacketTransformer::new(1, EncryptMode::Aes256Gcm, &KEY);
        assert!(receiver.decrypt(&[0x80, 0x78, 0x00]).is_err());
    }
}
