//! Connection listener and message fan-out
//!
//! Binds the configured address (Unix domain socket or TCP), accepts
//! connections, and gives every connection its own independent
//! [`Session`] and [`FrameBuffer`]. Completed messages fan out to
//! subscribers over a broadcast channel, so a slow or panicking
//! consumer can never affect another consumer or the accept loop.

use crate::config::MilterConfig;
use crate::error::Result;
use crate::framing::{FrameBuffer, Framing};
use crate::message::EmailMessage;
use crate::session::{Outcome, Session};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Capacity of the fan-out channel. Subscribers that fall further
/// behind than this observe a `Lagged` error instead of blocking the
/// server.
const CHANNEL_CAPACITY: usize = 256;

const READ_CHUNK: usize = 4096;

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// Milter protocol server.
///
/// Bound with [`MilterServer::bind`], torn down with
/// [`MilterServer::shutdown`]. Each accepted connection runs in its
/// own task with wholly connection-scoped state; there is no shared
/// mutable state between connections.
pub struct MilterServer {
    emitter: broadcast::Sender<EmailMessage>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    accept_handle: tokio::task::JoinHandle<()>,
    tcp_addr: Option<SocketAddr>,
    socket_path: Option<PathBuf>,
}

impl MilterServer {
    /// Bind the configured address and start accepting connections.
    ///
    /// An address beginning with `/` is bound as a Unix domain socket
    /// with owner+group permissions; anything else is bound as
    /// `host:port` TCP. A bind failure (stale socket path, port in
    /// use) is returned to the caller and never retried internally.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound or its
    /// permissions cannot be set.
    pub async fn bind(config: MilterConfig) -> Result<Self> {
        let (listener, tcp_addr, socket_path) = if config.socket.starts_with('/') {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;

                let path = PathBuf::from(&config.socket);
                let unix = UnixListener::bind(&path)?;
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o660))?;
                (Listener::Unix(unix), None, Some(path))
            }
            #[cfg(not(unix))]
            {
                return Err(crate::error::Error::Config(format!(
                    "Unix socket paths are not supported on this platform: {}",
                    config.socket
                )));
            }
        } else {
            let tcp = TcpListener::bind(&config.socket).await?;
            let addr = tcp.local_addr()?;
            (Listener::Tcp(tcp), Some(addr), None)
        };

        info!("milter server listening on {}", config.socket);
        debug!(
            "max frame {} bytes, idle timeout {} ms (advisory), {} allowed domain(s)",
            config.max_frame,
            config.idle_timeout_ms,
            config.allowed_domains.len()
        );

        let (emitter, _) = broadcast::channel(CHANNEL_CAPACITY);
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();

        let accept_handle = tokio::spawn(accept_loop(
            listener,
            emitter.clone(),
            tracker.clone(),
            cancel.clone(),
            config.max_frame,
        ));

        Ok(Self {
            emitter,
            tracker,
            cancel,
            accept_handle,
            tcp_addr,
            socket_path,
        })
    }

    /// Subscribe to completed messages.
    ///
    /// Every subscriber receives its own clone of each assembled
    /// [`EmailMessage`], in completion order per connection.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EmailMessage> {
        self.emitter.subscribe()
    }

    /// The bound TCP address, if this server listens on TCP. Useful
    /// when binding port 0.
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.tcp_addr
    }

    /// The bound Unix socket path, if this server listens on one.
    #[must_use]
    pub fn socket_path(&self) -> Option<&Path> {
        self.socket_path.as_deref()
    }

    /// Stop accepting, force-close every live connection, and release
    /// the listening socket.
    ///
    /// In-flight transactions are discarded without emitting a partial
    /// message. A Unix socket path is removed afterwards on a
    /// best-effort basis.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.accept_handle.await.ok();
        self.tracker.close();
        self.tracker.wait().await;

        if let Some(path) = &self.socket_path {
            std::fs::remove_file(path).ok();
        }
        info!("milter server stopped");
    }
}

async fn accept_loop(
    listener: Listener,
    emitter: broadcast::Sender<EmailMessage>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    max_frame: usize,
) {
    let mut next_id: u64 = 0;
    loop {
        next_id += 1;
        match &listener {
            Listener::Tcp(tcp) => {
                let accepted = tokio::select! {
                    () = cancel.cancelled() => break,
                    accepted = tcp.accept() => accepted,
                };
                match accepted {
                    Ok((stream, peer)) => {
                        spawn_connection(
                            &tracker,
                            stream,
                            format!("{peer}#{next_id}"),
                            emitter.clone(),
                            &cancel,
                            max_frame,
                        );
                    }
                    Err(e) => warn!("accept failed: {e}"),
                }
            }
            #[cfg(unix)]
            Listener::Unix(unix) => {
                let accepted = tokio::select! {
                    () = cancel.cancelled() => break,
                    accepted = unix.accept() => accepted,
                };
                match accepted {
                    Ok((stream, _addr)) => {
                        spawn_connection(
                            &tracker,
                            stream,
                            format!("unix#{next_id}"),
                            emitter.clone(),
                            &cancel,
                            max_frame,
                        );
                    }
                    Err(e) => warn!("accept failed: {e}"),
                }
            }
        }
    }
}

fn spawn_connection<S>(
    tracker: &TaskTracker,
    stream: S,
    peer: String,
    emitter: broadcast::Sender<EmailMessage>,
    cancel: &CancellationToken,
    max_frame: usize,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let session = Session::new(emitter);
    let token = cancel.child_token();
    tracker.spawn(async move {
        serve_connection(stream, session, &token, max_frame, &peer).await;
    });
}

/// Drive one connection: read chunks, reassemble frames, dispatch,
/// write responses.
///
/// All state lives in this task. Any transport error or framing
/// violation drops only this connection; the listener and every other
/// connection are untouched.
async fn serve_connection<S>(
    mut stream: S,
    mut session: Session,
    cancel: &CancellationToken,
    max_frame: usize,
    peer: &str,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!("connection accepted from {peer}");
    let mut frames = FrameBuffer::new(Framing::LengthPrefixed { max_frame });
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let read = tokio::select! {
            () = cancel.cancelled() => {
                debug!("closing {peer}: server shutting down");
                return;
            }
            read = stream.read(&mut chunk) => read,
        };

        let n = match read {
            Ok(0) => {
                debug!("{peer} disconnected");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("read error from {peer}: {e}");
                return;
            }
        };

        frames.extend(&chunk[..n]);
        loop {
            match frames.next_frame() {
                Ok(Some(payload)) => match session.on_frame(&payload) {
                    Outcome::Reply(response) => {
                        // One write per response keeps the length
                        // prefix and payload atomic on the wire.
                        if let Err(e) = stream.write_all(&response.encode()).await {
                            warn!("write error to {peer}: {e}");
                            return;
                        }
                    }
                    Outcome::Close => {
                        debug!("{peer} ended the session");
                        return;
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("dropping {peer}: {e}");
                    return;
                }
            }
        }
    }
}
