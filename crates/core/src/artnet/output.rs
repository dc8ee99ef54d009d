use std::net::SocketAddr;

use tokio::net::UdpSocket;

use super::network_config::UniverseConfig;
use super::packet;

/// A UDP socket aimed at one Art-Net destination.
pub struct ArtNetOutput {
    socket: UdpSocket,
    destination: SocketAddr,
    universe: u16,
}

impl ArtNetOutput {
    /// Binds an ephemeral port. Broadcast is enabled on the socket when
    /// the destination ends in `.255`.
    pub async fn connect(config: &UniverseConfig, port: u16) -> std::io::Result<Self> {
        let destination = config
            .destination(port)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.set_broadcast(config.is_broadcast())?;

        log::debug!(
            "Art-Net output bound to {} sending to {}",
            socket.local_addr()?,
            destination
        );

        Ok(Self {
            socket,
            destination,
            universe: config.universe,
        })
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    pub fn universe(&self) -> u16 {
        self.universe
    }

    /// Encode and send one frame. The universe in the frame is the
    /// configured one, whatever the caller's state says.
    pub async fn send_frame(&self, data: &[u8]) -> std::io::Result<usize> {
        let frame = packet::encode(self.universe, data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        self.socket.send_to(&frame, self.destination).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_frame_loopback() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let output = ArtNetOutput::connect(&UniverseConfig::new(5, "127.0.0.1"), port)
            .await
            .unwrap();
        let sent = output.send_frame(&[1, 2, 3]).await.unwrap();
        assert_eq!(sent, packet::PACKET_LEN);

        let mut buf = [0u8; 1024];
        let (len, _) = listener.recv_from(&mut buf).await.unwrap();
        let decoded = packet::decode(&buf[..len]).unwrap();
        assert_eq!(decoded.universe, 5);
        assert_eq!(&decoded.data[..4], &[1, 2, 3, 0]);
    }

    #[tokio::test]
    async fn test_rejects_bad_address() {
        let result = ArtNetOutput::connect(&UniverseConfig::new(0, "nope"), 6454).await;
        assert!(result.is_err());
    }
}
