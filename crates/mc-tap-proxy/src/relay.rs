//! TCP relay between game clients and the upstream server.
//!
//! The client side of every connection runs through an injected
//! [`Channel`], so listeners see everything the client and server say to
//! each other. The upstream side is plain framing done here.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use mc_tap_injector::{InjectorError, ProtocolManager};
use mc_tap_proto::catalog::names::LOGIN_COMPRESSION;
use mc_tap_proto::codec::{ProtoDecode, ProtoEncode};
use mc_tap_proto::compression::{compress_packet, decompress_packet};
use mc_tap_proto::{Direction, Phase, ProtoError, VarInt};
use mc_tap_transport::{Channel, ChannelInitializer, FrameReader, Packet, TransportError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

const READ_BUF_SIZE: usize = 16 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),

    #[error("injector error: {0}")]
    Injector(#[from] InjectorError),
}

// ─── Upstream framing ────────────────────────────────────────────────────────

/// Framing state of the proxy's own connection to the upstream server.
#[derive(Debug)]
struct UpstreamLink {
    /// Negative while compression is off.
    threshold: AtomicI64,
}

impl Default for UpstreamLink {
    fn default() -> Self {
        Self {
            threshold: AtomicI64::new(-1),
        }
    }
}

impl UpstreamLink {
    fn threshold(&self) -> Option<usize> {
        usize::try_from(self.threshold.load(Ordering::Acquire)).ok()
    }

    fn set_threshold(&self, threshold: usize) {
        self.threshold.store(threshold as i64, Ordering::Release);
    }

    fn frame(&self, packet: &Packet) -> Result<Bytes, ProtoError> {
        let raw = packet.encode();
        let body = match self.threshold() {
            Some(threshold) => compress_packet(&raw, threshold)?,
            None => raw,
        };
        let mut out = BytesMut::with_capacity(body.len() + VarInt::MAX_BYTES);
        VarInt(body.len() as i32).proto_encode(&mut out);
        out.put_slice(&body);
        Ok(out.freeze())
    }

    fn unframe(&self, frame: Bytes) -> Result<Packet, ProtoError> {
        let raw = match self.threshold() {
            Some(threshold) => decompress_packet(frame, threshold)?,
            None => frame,
        };
        Packet::decode(raw)
    }
}

/// Threshold announced by a clientbound compression packet, if `packet` is
/// one. A negative threshold switches compression off and yields `None`.
fn announced_threshold(
    manager: &ProtocolManager,
    channel: &Channel,
    packet: &Packet,
) -> Option<usize> {
    let phase = manager.phase(channel, Direction::ToClient).ok()?;
    if phase != Phase::Login {
        return None;
    }
    let ty = manager
        .registry()
        .resolve_wire(phase, Direction::ToClient, packet.id)?;
    if ty.name() != LOGIN_COMPRESSION {
        return None;
    }
    let VarInt(threshold) = VarInt::proto_decode(&mut packet.body.clone()).ok()?;
    usize::try_from(threshold).ok()
}

// ─── Accept loop ─────────────────────────────────────────────────────────────

/// Accept clients until `shutdown` flips to true.
pub async fn serve(
    listener: TcpListener,
    upstream: String,
    manager: Arc<ProtocolManager>,
    initializer: ChannelInitializer,
    mut shutdown: watch::Receiver<bool>,
) {
    let upstream: Arc<str> = upstream.into();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (client, remote) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("Accept failed: {e}");
                        continue;
                    }
                };
                let manager = Arc::clone(&manager);
                let upstream = Arc::clone(&upstream);
                let initializer = initializer.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle(client, remote, &upstream, &manager, &initializer).await {
                        warn!("[{remote}] relay ended: {e}");
                    }
                });
            }
            _ = shutdown.changed() => {
                info!("Relay stopped accepting connections");
                return;
            }
        }
    }
}

// ─── Per-connection relay ────────────────────────────────────────────────────

async fn handle(
    client: TcpStream,
    remote: SocketAddr,
    upstream: &str,
    manager: &Arc<ProtocolManager>,
    initializer: &ChannelInitializer,
) -> Result<(), RelayError> {
    let server = TcpStream::connect(upstream).await?;
    client.set_nodelay(true)?;
    server.set_nodelay(true)?;

    let (channel, io) = initializer.init(remote)?;
    if let Err(e) = manager.inject(&channel) {
        channel.close();
        return Err(e.into());
    }
    info!("[{}] {remote} connected, relaying to {upstream}", channel.id());

    let (client_read, client_write) = client.into_split();
    let (server_read, server_write) = server.into_split();
    let link = UpstreamLink::default();

    let result = tokio::select! {
        r = client_to_channel(&channel, client_read) => r,
        r = channel_to_server(io.inbound, server_write, &link) => r,
        r = server_to_channel(&channel, server_read, &link, manager) => r,
        r = channel_to_client(io.outbound, client_write) => r,
    };

    manager.uninject(&channel);
    channel.close();
    info!("[{}] {remote} disconnected", channel.id());
    result
}

async fn client_to_channel(channel: &Arc<Channel>, mut read: OwnedReadHalf) -> Result<(), RelayError> {
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = read.read(&mut buf).await?;
        if n == 0 {
            debug!("[{}] client closed the connection", channel.id());
            return Ok(());
        }
        channel.fire_inbound(Bytes::copy_from_slice(&buf[..n]))?;
    }
}

async fn channel_to_server(
    mut inbound: mpsc::UnboundedReceiver<Packet>,
    mut write: OwnedWriteHalf,
    link: &UpstreamLink,
) -> Result<(), RelayError> {
    while let Some(packet) = inbound.recv().await {
        write.write_all(&link.frame(&packet)?).await?;
    }
    Ok(())
}

async fn server_to_channel(
    channel: &Arc<Channel>,
    mut read: OwnedReadHalf,
    link: &UpstreamLink,
    manager: &ProtocolManager,
) -> Result<(), RelayError> {
    let mut reader = FrameReader::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = read.read(&mut buf).await?;
        if n == 0 {
            debug!("[{}] upstream closed the connection", channel.id());
            return Ok(());
        }
        reader.extend(&buf[..n]);
        while let Some(frame) = reader.next_frame()? {
            let packet = link.unframe(frame)?;
            let threshold = announced_threshold(manager, channel, &packet);
            // The announcement itself still travels uncompressed.
            channel.write(packet)?;
            if let Some(threshold) = threshold {
                link.set_threshold(threshold);
                channel.enable_compression(threshold)?;
                info!("[{}] compression enabled (threshold {threshold})", channel.id());
            }
        }
    }
}

async fn channel_to_client(
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    mut write: OwnedWriteHalf,
) -> Result<(), RelayError> {
    while let Some(bytes) = outbound.recv().await {
        write.write_all(&bytes).await?;
    }
    Ok(())
}
