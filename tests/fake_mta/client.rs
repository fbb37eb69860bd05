//! The wire-level fake MTA client.

#[cfg(unix)]
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

/// A minimal MTA-side milter client over any stream transport.
pub struct MtaClient<S> {
    stream: S,
}

impl MtaClient<TcpStream> {
    /// Connect to a milter server on localhost TCP.
    pub async fn connect_tcp(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .expect("connect to milter server");
        Self { stream }
    }
}

#[cfg(unix)]
impl MtaClient<UnixStream> {
    /// Connect to a milter server on a Unix domain socket.
    pub async fn connect_unix(path: &Path) -> Self {
        let stream = UnixStream::connect(path)
            .await
            .expect("connect to milter socket");
        Self { stream }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> MtaClient<S> {
    /// Send one framed command: length prefix, command byte, data.
    pub async fn send(&mut self, command: u8, data: &[u8]) {
        let mut payload = vec![command];
        payload.extend_from_slice(data);
        let framed = milterd::encode_frame(&payload).expect("frame command");
        self.stream.write_all(&framed).await.expect("write command");
    }

    /// Write raw bytes without framing, for exercising partial and
    /// pathological input.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write raw bytes");
        self.stream.flush().await.expect("flush");
    }

    /// Read one framed response and return its payload.
    pub async fn read_reply(&mut self) -> std::io::Result<Vec<u8>> {
        let mut prefix = [0u8; 4];
        self.stream.read_exact(&mut prefix).await?;
        let len = usize::try_from(u32::from_be_bytes(prefix)).expect("reply length fits");
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await?;
        Ok(payload)
    }

    /// Read one reply and assert it is the single-byte `continue`.
    pub async fn expect_continue(&mut self) {
        let reply = self.read_reply().await.expect("read reply");
        assert_eq!(reply, vec![b'c'], "expected continue response");
    }

    /// Run the capability negotiation and return the reply payload.
    pub async fn negotiate(&mut self) -> Vec<u8> {
        // The MTA's own version and masks; the server ignores them.
        let mut data = Vec::new();
        data.extend_from_slice(&6u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        self.send(b'O', &data).await;
        self.read_reply().await.expect("read negotiation reply")
    }

    /// Drive one complete transaction through the filter, asserting
    /// the per-command response contract along the way.
    pub async fn run_transaction(&mut self, from: &str, to: &str, subject: &str, body: &str) {
        self.send(b'C', b"client.example.com\0").await;
        self.expect_continue().await;
        self.send(b'H', b"client.example.com\0").await;
        self.expect_continue().await;
        self.send(b'M', format!("<{from}>\0").as_bytes()).await;
        self.expect_continue().await;
        self.send(b'R', format!("<{to}>\0").as_bytes()).await;
        self.expect_continue().await;
        self.send(b'L', format!("Subject\0{subject}\0").as_bytes())
            .await;
        self.expect_continue().await;
        self.send(b'N', b"").await;
        self.expect_continue().await;
        self.send(b'B', body.as_bytes()).await;
        self.expect_continue().await;
        self.send(b'E', b"").await;
        let reply = self.read_reply().await.expect("read end-of-body reply");
        assert_eq!(reply, vec![b'a'], "expected accept at end-of-body");
    }
}
