use std::{
    io::ErrorKind,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
};

use async_trait::async_trait;
use stratus_core::{Probe, ProbeError};
use stratus_model::Seconds;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, UdpSocket},
    time::timeout,
};
use tracing::trace;

use crate::{
    MessengerConfig, MessengerError,
    wire::{self, CONN_COUNT_LEN, ConnCount, TimeLoss, UPDATE_COUNT_LEN},
};

/// Largest datagram accepted as a reply; anything but 16 bytes is rejected after decoding.
const MAX_DATAGRAM: usize = 64;

/// Stateless coordinator client; no connection is kept between queries.
#[derive(Debug, Clone, Default)]
pub struct Messenger {
    config: MessengerConfig,
}

impl Messenger {
    pub fn new(config: MessengerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MessengerConfig {
        &self.config
    }

    /// Workers connected to the coordinator at `addr` (TCP).
    pub async fn connected_worker_count(&self, addr: SocketAddr) -> Result<u32, MessengerError> {
        let buf = self
            .tcp_query::<CONN_COUNT_LEN>(addr, self.config.conn_count_opcode)
            .await?;
        let count = ConnCount::decode(buf);
        trace!(%addr, raw = count.raw, "connection count");
        count.workers()
    }

    /// Latest `(elapsed, loss)` the coordinator reported (UDP).
    pub async fn last_reported(&self, addr: SocketAddr) -> Result<TimeLoss, MessengerError> {
        let fut = async {
            let socket = UdpSocket::bind(unspecified_for(addr))
                .await
                .map_err(|source| MessengerError::Io { addr, source })?;
            socket
                .connect(addr)
                .await
                .map_err(|source| MessengerError::Connect { addr, source })?;
            socket
                .send(&wire::encode_request(self.config.time_loss_opcode))
                .await
                .map_err(|source| MessengerError::Io { addr, source })?;

            let mut buf = [0u8; MAX_DATAGRAM];
            let n = socket
                .recv(&mut buf)
                .await
                .map_err(|source| MessengerError::Io { addr, source })?;
            TimeLoss::decode(&buf[..n])
        };
        let tl = timeout(self.config.timeout, fut)
            .await
            .map_err(|_| MessengerError::Timeout(addr))??;
        trace!(%addr, time = tl.time, loss = tl.loss, "time and loss");
        Ok(tl)
    }

    /// Total parameter updates the coordinator has applied (TCP).
    pub async fn updates_applied(&self, addr: SocketAddr) -> Result<u64, MessengerError> {
        let buf = self
            .tcp_query::<UPDATE_COUNT_LEN>(addr, self.config.update_count_opcode)
            .await?;
        Ok(wire::decode_update_count(buf))
    }

    async fn tcp_query<const N: usize>(
        &self,
        addr: SocketAddr,
        opcode: u32,
    ) -> Result<[u8; N], MessengerError> {
        let fut = async {
            let mut stream = TcpStream::connect(addr)
                .await
                .map_err(|source| MessengerError::Connect { addr, source })?;
            stream
                .write_all(&wire::encode_request(opcode))
                .await
                .map_err(|source| MessengerError::Io { addr, source })?;

            let mut buf = [0u8; N];
            stream.read_exact(&mut buf).await.map_err(|source| {
                if source.kind() == ErrorKind::UnexpectedEof {
                    MessengerError::Malformed(format!("connection closed before {N}-byte reply"))
                } else {
                    MessengerError::Io { addr, source }
                }
            })?;
            Ok::<_, MessengerError>(buf)
        };
        timeout(self.config.timeout, fut)
            .await
            .map_err(|_| MessengerError::Timeout(addr))?
    }
}

fn unspecified_for(addr: SocketAddr) -> SocketAddr {
    if addr.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    }
}

#[async_trait]
impl Probe for Messenger {
    async fn connected_workers(&self, addr: SocketAddr) -> Result<u32, ProbeError> {
        Ok(self.connected_worker_count(addr).await?)
    }

    async fn last_time_and_loss(&self, addr: SocketAddr) -> Result<(Seconds, f64), ProbeError> {
        let tl = self.last_reported(addr).await?;
        Ok((tl.time, tl.loss))
    }

    async fn update_count(&self, addr: SocketAddr) -> Result<u64, ProbeError> {
        Ok(self.updates_applied(addr).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{
        net::{TcpListener, UdpSocket},
        task::JoinHandle,
    };

    use super::*;

    async fn serve_tcp(reply: Vec<u8>) -> (SocketAddr, JoinHandle<u32>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut req = [0u8; 4];
            sock.read_exact(&mut req).await.unwrap();
            sock.write_all(&reply).await.unwrap();
            u32::from_le_bytes(req)
        });
        (addr, handle)
    }

    async fn serve_udp(reply: Vec<u8>) -> (SocketAddr, JoinHandle<u32>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut req = [0u8; 4];
            let (_, from) = socket.recv_from(&mut req).await.unwrap();
            socket.send_to(&reply, from).await.unwrap();
            u32::from_le_bytes(req)
        });
        (addr, handle)
    }

    fn messenger() -> Messenger {
        Messenger::new(MessengerConfig::default().with_timeout(Duration::from_millis(500)))
    }

    fn time_loss_frame(time: f64, loss: f64) -> Vec<u8> {
        let mut buf = time.to_le_bytes().to_vec();
        buf.extend_from_slice(&loss.to_le_bytes());
        buf
    }

    #[tokio::test]
    async fn worker_count_subtracts_own_connection() {
        let (addr, server) = serve_tcp(7u32.to_le_bytes().to_vec()).await;
        assert_eq!(messenger().connected_workers(addr).await.unwrap(), 6);
        assert_eq!(server.await.unwrap(), 4);
    }

    #[tokio::test]
    async fn zero_connections_is_malformed() {
        let (addr, _server) = serve_tcp(0u32.to_le_bytes().to_vec()).await;
        let err = messenger().connected_workers(addr).await.unwrap_err();
        assert!(matches!(err, ProbeError::Malformed(_)), "{err:?}");
    }

    #[tokio::test]
    async fn short_tcp_reply_is_malformed() {
        let (addr, _server) = serve_tcp(vec![1, 0]).await;
        let err = messenger().connected_workers(addr).await.unwrap_err();
        assert!(matches!(err, ProbeError::Malformed(_)), "{err:?}");
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = messenger().connected_workers(addr).await.unwrap_err();
        assert!(matches!(err, ProbeError::Unreachable(_)), "{err:?}");
    }

    #[tokio::test]
    async fn time_and_loss_over_udp() {
        let (addr, server) = serve_udp(time_loss_frame(42.0, 0.125)).await;
        let got = messenger().last_time_and_loss(addr).await.unwrap();
        assert_eq!(got, (42.0, 0.125));
        assert_eq!(server.await.unwrap(), 9);
    }

    #[tokio::test]
    async fn wrong_datagram_size_is_malformed() {
        let (addr, _server) = serve_udp(vec![0u8; 8]).await;
        let err = messenger().last_time_and_loss(addr).await.unwrap_err();
        assert!(matches!(err, ProbeError::Malformed(_)), "{err:?}");
    }

    #[tokio::test]
    async fn silent_udp_peer_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();

        let m = Messenger::new(MessengerConfig::default().with_timeout(Duration::from_millis(50)));
        let err = m.last_time_and_loss(addr).await.unwrap_err();
        assert!(matches!(err, ProbeError::Timeout), "{err:?}");
        drop(silent);
    }

    #[tokio::test]
    async fn update_count_uses_its_own_opcode() {
        let (addr, server) = serve_tcp(1_234_567u64.to_le_bytes().to_vec()).await;
        let m = Messenger::new(
            MessengerConfig::default()
                .with_timeout(Duration::from_millis(500))
                .with_update_count_opcode(11),
        );
        assert_eq!(m.update_count(addr).await.unwrap(), 1_234_567);
        assert_eq!(server.await.unwrap(), 11);
    }
}
