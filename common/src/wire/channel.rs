use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::{
    config::{MAX_DATAGRAM_SIZE, MULTICAST_GROUP, MULTICAST_PORT, SHARD_TTL_SECS},
    message::BusEnvelope,
};

use super::{make_shards, Reassembler, WireCipher, WireError};

#[derive(Clone, Copy, Debug)]
pub struct ChannelConfig {
    pub bind: SocketAddr,
    pub group: Option<Ipv4Addr>,
    pub target: SocketAddr,
}

impl ChannelConfig {
    /// Full bus membership: receive on the shared port and send to the
    /// group. Controllers and supervisors use this.
    pub fn bus() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, MULTICAST_PORT)),
            group: Some(MULTICAST_GROUP),
            target: SocketAddr::from((MULTICAST_GROUP, MULTICAST_PORT)),
        }
    }

    /// Emit-only endpoint on an ephemeral port. Workers use this for their
    /// solution/hashrate dispatch.
    pub fn sender_only() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            group: None,
            target: SocketAddr::from((MULTICAST_GROUP, MULTICAST_PORT)),
        }
    }
}

/// An authenticated endpoint on the work bus: one UDP socket plus the
/// shared-secret cipher and a shard reassembler.
pub struct Channel {
    socket: UdpSocket,
    cipher: WireCipher,
    target: SocketAddr,
    reassembler: Mutex<Reassembler>,
}

impl Channel {
    pub fn open(passphrase: &str, config: ChannelConfig) -> Result<Arc<Self>, WireError> {
        let socket = bind_socket(&config)?;
        Ok(Arc::new(Self {
            socket,
            cipher: WireCipher::new(passphrase)?,
            target: config.target,
            reassembler: Mutex::new(Reassembler::new(Duration::from_secs(SHARD_TTL_SECS))),
        }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, WireError> {
        Ok(self.socket.local_addr()?)
    }

    /// Encrypt and shard a message without sending it. Controllers cache
    /// the result for pause and rebroadcast paths.
    pub fn shards(&self, envelope: &BusEnvelope) -> Result<Vec<Vec<u8>>, WireError> {
        let encrypted = self.cipher.encrypt(&envelope.encode())?;
        make_shards(&encrypted)
    }

    pub async fn send_shards(&self, shards: &[Vec<u8>]) -> Result<(), WireError> {
        for shard in shards {
            self.socket.send_to(shard, self.target).await?;
        }
        Ok(())
    }

    pub async fn send(&self, envelope: &BusEnvelope) -> Result<(), WireError> {
        let shards = self.shards(envelope)?;
        self.send_shards(&shards).await
    }

    /// Next complete, authenticated message from the bus. Datagrams that
    /// fail reassembly or authentication are dropped: traffic under a
    /// different passphrase shares this group.
    pub async fn recv(&self) -> Result<(SocketAddr, BusEnvelope), WireError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (len, src) = self.socket.recv_from(&mut buf).await?;
            trace!("received {} bytes from {}", len, src);

            let blob = {
                let mut reassembler = self.reassembler.lock().await;
                reassembler.insert(src, &buf[..len])
            };
            let Some(blob) = blob else { continue };

            let plaintext = match self.cipher.decrypt(&blob) {
                Ok(plaintext) => plaintext,
                Err(_) => {
                    debug!("dropping unauthenticated message from {}", src);
                    continue;
                }
            };

            match BusEnvelope::decode(&plaintext) {
                Ok(envelope) => return Ok((src, envelope)),
                Err(e) => {
                    debug!("dropping undecodable message from {}: {}", src, e);
                    continue;
                }
            }
        }
    }
}

fn bind_socket(config: &ChannelConfig) -> Result<UdpSocket, WireError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    // Several processes on one host share the bus port.
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&config.bind.into())?;
    if let Some(group) = config.group {
        socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_loop_v4(true)?;
    }
    Ok(UdpSocket::from_std(socket.into())?)
}
