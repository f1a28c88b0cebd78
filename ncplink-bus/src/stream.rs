//! Link stream abstraction over TCP, device files and in-memory pipes.

use pin_project_lite::pin_project;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::TcpStream;

pin_project! {
    /// A byte stream carrying the serial link.
    #[project = LinkStreamProj]
    pub enum LinkStream {
        Tcp { #[pin] stream: TcpStream },
        Device { #[pin] file: File },
        Memory { #[pin] stream: DuplexStream },
    }
}

impl LinkStream {
    /// Connects to a co-processor exposed over TCP.
    pub async fn connect_tcp(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(LinkStream::Tcp { stream })
    }

    /// Opens a character device or pty for reading and writing.
    pub async fn open_device(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .await?;
        Ok(LinkStream::Device { file })
    }

    /// Creates a connected in-memory pair.
    pub fn pair(max_buf_size: usize) -> (Self, Self) {
        let (a, b) = tokio::io::duplex(max_buf_size);
        (
            LinkStream::Memory { stream: a },
            LinkStream::Memory { stream: b },
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LinkStream::Tcp { .. } => "tcp",
            LinkStream::Device { .. } => "device",
            LinkStream::Memory { .. } => "memory",
        }
    }
}

impl From<TcpStream> for LinkStream {
    fn from(stream: TcpStream) -> Self {
        LinkStream::Tcp { stream }
    }
}

impl From<DuplexStream> for LinkStream {
    fn from(stream: DuplexStream) -> Self {
        LinkStream::Memory { stream }
    }
}

impl AsyncRead for LinkStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            LinkStreamProj::Tcp { stream } => stream.poll_read(cx, buf),
            LinkStreamProj::Device { file } => file.poll_read(cx, buf),
            LinkStreamProj::Memory { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for LinkStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            LinkStreamProj::Tcp { stream } => stream.poll_write(cx, buf),
            LinkStreamProj::Device { file } => file.poll_write(cx, buf),
            LinkStreamProj::Memory { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            LinkStreamProj::Tcp { stream } => stream.poll_flush(cx),
            LinkStreamProj::Device { file } => file.poll_flush(cx),
            LinkStreamProj::Memory { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            LinkStreamProj::Tcp { stream } => stream.poll_shutdown(cx),
            LinkStreamProj::Device { file } => file.poll_shutdown(cx),
            LinkStreamProj::Memory { stream } => stream.poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_memory_pair_roundtrip() {
        let (mut a, mut b) = LinkStream::pair(64);
        assert_eq!(a.kind(), "memory");

        a.write_all(&[0xC0, 0x01, 0xC0]).await.unwrap();
        let mut buf = [0u8; 3];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0xC0, 0x01, 0xC0]);
    }

    #[tokio::test]
    async fn test_tcp_stream() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut link = LinkStream::from(socket);
            let mut buf = [0u8; 2];
            link.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut link = LinkStream::connect_tcp(addr).await.unwrap();
        assert_eq!(link.kind(), "tcp");
        link.write_all(&[7, 8]).await.unwrap();

        assert_eq!(accept.await.unwrap(), [7, 8]);
    }
}
