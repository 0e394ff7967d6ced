use bytes::BytesMut;
use sluice_codec::framing::extract_lines;
use snafu::ResultExt as _;
use tokio::io::AsyncReadExt as _;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{Dispatcher, FailedToBind, ListenerError};
use crate::config::TcpListenerConfig;

// Cap on bytes buffered while waiting for a line delimiter. A connection that exceeds it is closed.
const MAX_BUFFERED_BYTES: usize = 1024 * 1024;

/// Binds the TCP listener socket.
pub async fn bind(config: &TcpListenerConfig) -> Result<TcpListener, ListenerError> {
    TcpListener::bind(config.bind).await.context(FailedToBind {
        listener_type: "TCP",
        addr: config.bind,
    })
}

/// Runs the TCP accept loop until shutdown.
///
/// Each accepted connection gets a dedicated task; the lines completed by one read form one batch.
pub async fn run(listener: TcpListener, config: TcpListenerConfig, dispatcher: Dispatcher, shutdown: CancellationToken) {
    let listen_addr = config.bind;
    info!(%listen_addr, "TCP listener started.");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            result = listener.accept() => match result {
                Ok((stream, peer_addr)) => {
                    debug!(%listen_addr, %peer_addr, "Accepted connection.");
                    tokio::spawn(drive_connection(
                        stream,
                        config.read_buffer_size,
                        dispatcher.clone(),
                        shutdown.child_token(),
                    ));
                }
                Err(e) => {
                    error!(%listen_addr, error = %e, "Failed to accept connection.");
                }
            }
        }
    }

    info!(%listen_addr, "TCP listener stopped.");
}

async fn drive_connection(
    mut stream: TcpStream, read_buffer_size: usize, dispatcher: Dispatcher, shutdown: CancellationToken,
) {
    let mut buf = BytesMut::with_capacity(read_buffer_size);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            result = stream.read_buf(&mut buf) => match result {
                Ok(0) => {
                    // EOF releases any final unterminated frame.
                    dispatcher.dispatch(extract_lines(&mut buf, true));
                    break;
                }
                Ok(_) => {
                    dispatcher.dispatch(extract_lines(&mut buf, false));

                    if buf.len() > MAX_BUFFERED_BYTES {
                        error!("Partial line exceeded {} bytes. Closing connection.", MAX_BUFFERED_BYTES);
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "I/O error while reading from connection. Closing.");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_util::sync::CancellationToken;

    use crate::config::TcpListenerConfig;
    use crate::forward::testutil::wait_for_events;
    use crate::listener::tests::test_dispatcher;

    async fn start() -> (std::net::SocketAddr, std::sync::Arc<crate::forward::testutil::CollectingSender>, CancellationToken)
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = listener.local_addr().unwrap();
        let config = TcpListenerConfig {
            bind: local_addr,
            read_buffer_size: 8192,
        };

        let (dispatcher, sender) = test_dispatcher();
        let shutdown = CancellationToken::new();
        tokio::spawn(super::run(listener, config, dispatcher, shutdown.clone()));

        (local_addr, sender, shutdown)
    }

    #[tokio::test]
    async fn lines_spanning_reads_are_reassembled() {
        let (addr, sender, _shutdown) = start().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"foo:1|c\nbar:").await.unwrap();
        client.flush().await.unwrap();
        client.write_all(b"2|g\n").await.unwrap();
        client.shutdown().await.unwrap();

        wait_for_events(&sender, 2).await;

        // Batches from separate reads are sent by separate tasks, so only compare contents, not arrival order.
        let mut names = sender.events().iter().map(|event| event.name().to_string()).collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, vec!["bar", "foo"]);
    }

    #[tokio::test]
    async fn eof_releases_final_unterminated_line() {
        let (addr, sender, _shutdown) = start().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"baz:3|ms").await.unwrap();
        client.shutdown().await.unwrap();

        wait_for_events(&sender, 1).await;
        assert_eq!(sender.events()[0].name(), "baz");
    }
}
