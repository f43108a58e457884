use discortp::discord::{
    IpDiscoveryPacket, IpDiscoveryType, KeepalivePacket, MutableIpDiscoveryPacket,
    MutableKeepalivePacket,
};
use std::error::Error;
use std::fmt::{self, Debug, Display};
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::UdpSocket;

/// The media half of a voice connection.
///
/// Cheap to clone; the send and receive tasks each hold one.
#[derive(Clone, Debug)]
pub struct VoiceUdp {
    socket: Arc<UdpSocket>,
}

impl VoiceUdp {
    /// Binds an ephemeral local port and connects it to the media server.
    pub async fn connect(ip: IpAddr, port: u16) -> Result<Self, VoiceUdpError> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|source| VoiceUdpError {
                kind: VoiceUdpErrorType::Connect,
                source: Some(Box::new(source)),
            })?;

        socket
            .connect((ip, port))
            .await
            .map_err(|source| VoiceUdpError {
                kind: VoiceUdpErrorType::Connect,
                source: Some(Box::new(source)),
            })?;

        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    /// Finds the externally visible address of this socket.
    ///
    /// The client has to report its public address and port back to the
    /// server before any media flows, and the only party that knows them
    /// is the media server itself.
    #[allow(clippy::missing_panics_doc)]
    pub async fn discover(&self, ssrc: u32) -> Result<DiscoveredIp, VoiceUdpError> {
        let mut bytes = [0u8; IpDiscoveryPacket::const_packet_size()];
        let mut view =
            MutableIpDiscoveryPacket::new(&mut bytes[..]).expect("buffer fits a discovery packet");
        view.set_pkt_type(IpDiscoveryType::Request);
        view.set_length(70);
        view.set_ssrc(ssrc);

        self.socket
            .send(&bytes)
            .await
            .map_err(|source| VoiceUdpError {
                kind: VoiceUdpErrorType::DiscoveringIp,
                source: Some(Box::new(source)),
            })?;

        let len = self
            .socket
            .recv(&mut bytes)
            .await
            .map_err(|source| VoiceUdpError {
                kind: VoiceUdpErrorType::DiscoveringIp,
                source: Some(Box::new(source)),
            })?;

        let view = IpDiscoveryPacket::new(&bytes[..len]).ok_or_else(|| VoiceUdpError {
            kind: VoiceUdpErrorType::DiscoveringIp,
            source: Some("invalid ip discovery response".into()),
        })?;

        if view.get_pkt_type() != IpDiscoveryType::Response {
            return Err(VoiceUdpError {
                kind: VoiceUdpErrorType::DiscoveringIp,
                source: Some("invalid ip discovery response".into()),
            });
        }

        let nul_byte_index = view
            .get_address_raw()
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| VoiceUdpError {
                kind: VoiceUdpErrorType::DiscoveringIp,
                source: Some("invalid ip discovery response".into()),
            })?;

        let address_raw = &view.get_address_raw()[..nul_byte_index];
        let address_str = std::str::from_utf8(address_raw).map_err(|_| VoiceUdpError {
            kind: VoiceUdpErrorType::DiscoveringIp,
            source: Some("invalid ip discovery response".into()),
        })?;

        let address = IpAddr::from_str(address_str).map_err(|_| VoiceUdpError {
            kind: VoiceUdpErrorType::DiscoveringIp,
            source: Some("invalid ip discovery response".into()),
        })?;

        Ok(DiscoveredIp {
            address,
            port: view.get_port(),
        })
    }

    pub async fn send(&self, bytes: &[u8]) -> Result<(), VoiceUdpError> {
        self.socket
            .send(bytes)
            .await
            .map(|_| ())
            .map_err(|source| VoiceUdpError {
                kind: VoiceUdpErrorType::Io,
                source: Some(Box::new(source)),
            })
    }

    pub async fn recv(&self, buffer: &mut [u8]) -> Result<usize, VoiceUdpError> {
        self.socket
            .recv(buffer)
            .await
            .map_err(|source| VoiceUdpError {
                kind: VoiceUdpErrorType::Io,
                source: Some(Box::new(source)),
            })
    }

    /// Keeps NAT mappings warm. Must go out at least every five seconds.
    #[allow(clippy::missing_panics_doc)]
    pub async fn send_keepalive(&self, ssrc: u32) -> Result<(), VoiceUdpError> {
        let mut bytes = [0u8; KeepalivePacket::minimum_packet_size()];
        let mut view =
            MutableKeepalivePacket::new(&mut bytes[..]).expect("buffer fits a keepalive packet");
        view.set_ssrc(ssrc);

        self.send(&bytes).await
    }
}

/// The externally visible address found through ip discovery.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DiscoveredIp {
    pub address: IpAddr,
    pub port: u16,
}

/// Something went wrong on the media socket.
#[derive(Debug)]
pub struct VoiceUdpError {
    pub(crate) kind: VoiceUdpErrorType,
    pub(crate) source: Option<Box<dyn Error + Send + Sync>>,
}

impl VoiceUdpError {
    #[must_use]
    pub const fn kind(&self) -> &VoiceUdpErrorType {
        &self.kind
    }
}

impl Display for VoiceUdpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            VoiceUdpErrorType::Connect => f.write_str("failed to set up the media socket"),
            VoiceUdpErrorType::DiscoveringIp => f.write_str("ip discovery failed"),
            VoiceUdpErrorType::Io => f.write_str("media socket io failed"),
        }
    }
}

impl Error for VoiceUdpError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn Error + 'static))
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum VoiceUdpErrorType {
    Connect,
    DiscoveringIp,
    Io,
}

#[cfg(test)]
mod tests {
    use super::{DiscoveredIp, VoiceUdp};
    use discortp::discord::{IpDiscoveryPacket, IpDiscoveryType, KeepalivePacket};
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::net::UdpSocket;

    async fn fake_server() -> (UdpSocket, IpAddr, u16) {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        (server, addr.ip(), addr.port())
    }

    #[tokio::test]
    async fn discovery_roundtrip() {
        let (server, ip, port) = fake_server().await;
        let udp = VoiceUdp::connect(ip, port).await.unwrap();

        let server_task = tokio::spawn(async move {
            let mut bytes = [0u8; IpDiscoveryPacket::const_packet_size()];
            let (len, peer) = server.recv_from(&mut bytes).await.unwrap();
            let request = IpDiscoveryPacket::new(&bytes[..len]).unwrap();
            assert_eq!(request.get_pkt_type(), IpDiscoveryType::Request);
            assert_eq!(request.get_ssrc(), 99);

            // Reuse the request buffer: flip the type to Response and fill
            // in the address and port fields by offset.
            bytes[0] = 0x00;
            bytes[1] = 0x02;
            bytes[8..8 + 9].copy_from_slice(b"127.0.0.1");
            bytes[72..74].copy_from_slice(&50_000u16.to_be_bytes());
            server.send_to(&bytes, peer).await.unwrap();
        });

        let discovered = udp.discover(99).await.unwrap();
        assert_eq!(
            discovered,
            DiscoveredIp {
                address: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port: 50_000,
            }
        );
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn keepalive_carries_the_ssrc() {
        let (server, ip, port) = fake_server().await;
        let udp = VoiceUdp::connect(ip, port).await.unwrap();

        udp.send_keepalive(77).await.unwrap();

        let mut bytes = [0u8; KeepalivePacket::minimum_packet_size()];
        let (len, _) = server.recv_from(&mut bytes).await.unwrap();
        let view = KeepalivePacket::new(&bytes[..len]).unwrap();
        assert_eq!(view.get_ssrc(), 77);
    }
}
