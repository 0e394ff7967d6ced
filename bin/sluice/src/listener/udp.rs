use bytes::BytesMut;
use sluice_codec::framing::extract_lines;
use snafu::ResultExt as _;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{Dispatcher, FailedToBind, ListenerError};
use crate::config::UdpListenerConfig;

/// Binds the UDP socket.
pub async fn bind(config: &UdpListenerConfig) -> Result<UdpSocket, ListenerError> {
    UdpSocket::bind(config.bind).await.context(FailedToBind {
        listener_type: "UDP",
        addr: config.bind,
    })
}

/// Runs the UDP receive loop until shutdown.
///
/// Each datagram stands alone: the lines it carries form one batch, and nothing is reassembled across datagrams.
/// Datagrams larger than the receive buffer are truncated by the socket, which surfaces downstream as at most one
/// malformed trailing line.
pub async fn run(socket: UdpSocket, config: UdpListenerConfig, dispatcher: Dispatcher, shutdown: CancellationToken) {
    let listen_addr = config.bind;
    info!(%listen_addr, "UDP listener started.");

    let mut scratch = vec![0u8; config.recv_buffer_size];

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            result = socket.recv_from(&mut scratch) => match result {
                Ok((received, _peer_addr)) => {
                    let mut buf = BytesMut::from(&scratch[..received]);
                    dispatcher.dispatch(extract_lines(&mut buf, true));
                }
                Err(e) => {
                    error!(%listen_addr, error = %e, "Failed to receive datagram.");
                }
            }
        }
    }

    info!(%listen_addr, "UDP listener stopped.");
}
