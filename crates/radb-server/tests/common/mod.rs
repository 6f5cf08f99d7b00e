//! Shared smart-socket test client and server harness.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use radb_server::{AdbServer, FileSystem, MemoryFileSystem, Router, ServerConfig, Shutdown};

pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub task: tokio::task::JoinHandle<()>,
}

pub async fn start_server_with(fs: Arc<dyn FileSystem>) -> TestServer {
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        ..ServerConfig::default()
    };
    let server = AdbServer::bind_with(config, Router::new(), fs)
        .await
        .unwrap();
    let addr = server.local_addr();
    let shutdown = server.shutdown_handle();
    let task = tokio::spawn(async move {
        server.serve().await.unwrap();
    });
    TestServer {
        addr,
        shutdown,
        task,
    }
}

pub async fn start_server() -> TestServer {
    start_server_with(Arc::new(MemoryFileSystem::new())).await
}

pub struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
        }
    }

    /// Write a smart-socket request: 4 hex digits of length, then payload.
    pub async fn request(&mut self, service: &str) {
        let framed = format!("{:04x}{service}", service.len());
        self.stream.write_all(framed.as_bytes()).await.unwrap();
    }

    /// Write bytes verbatim, bypassing the request framing.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Read the 4-byte OKAY/FAIL atom.
    pub async fn read_status(&mut self) -> String {
        let mut atom = [0u8; 4];
        self.stream.read_exact(&mut atom).await.unwrap();
        String::from_utf8_lossy(&atom).into_owned()
    }

    /// Read a 4-hex-digit length prefix followed by that many bytes.
    pub async fn read_hex_block(&mut self) -> Vec<u8> {
        let mut prefix = [0u8; 4];
        self.stream.read_exact(&mut prefix).await.unwrap();
        let len = usize::from_str_radix(std::str::from_utf8(&prefix).unwrap(), 16).unwrap();
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).await.unwrap();
        body
    }

    pub async fn read_exact_bytes(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        self.stream.read_exact(&mut buf).await.unwrap();
        buf
    }

    /// Drain the connection until the server closes it.
    pub async fn read_to_end(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        self.stream.read_to_end(&mut out).await.unwrap();
        out
    }

    pub async fn half_close(&mut self) {
        self.stream.shutdown().await.unwrap();
    }

    // -------------------------------------------------------------------
    // Shell Protocol v2
    // -------------------------------------------------------------------

    /// Write one shell v2 packet.
    pub async fn write_packet(&mut self, id: u8, payload: &[u8]) {
        let mut frame = Vec::with_capacity(5 + payload.len());
        frame.push(id);
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(payload);
        self.stream.write_all(&frame).await.unwrap();
    }

    /// Read one shell v2 packet; `None` when the server closed.
    pub async fn read_packet(&mut self) -> Option<(u8, Vec<u8>)> {
        let mut header = [0u8; 5];
        let mut filled = 0;
        while filled < header.len() {
            let n = self.stream.read(&mut header[filled..]).await.unwrap();
            if n == 0 {
                assert_eq!(filled, 0, "connection closed mid-packet");
                return None;
            }
            filled += n;
        }
        let id = header[0];
        let len = u32::from_le_bytes(header[1..].try_into().unwrap()) as usize;
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await.unwrap();
        Some((id, payload))
    }

    /// Collect packets until EXIT, returning (stdout, stderr, exit_code,
    /// packet ids in order).
    pub async fn collect_v2_output(&mut self) -> (Vec<u8>, Vec<u8>, u8, Vec<u8>) {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut order = Vec::new();
        loop {
            let (id, payload) = self
                .read_packet()
                .await
                .expect("EXIT packet must arrive before close");
            order.push(id);
            match id {
                1 => stdout.extend_from_slice(&payload),
                2 => stderr.extend_from_slice(&payload),
                3 => {
                    assert_eq!(payload.len(), 1, "EXIT carries one byte");
                    return (stdout, stderr, payload[0], order);
                }
                other => panic!("unexpected packet id {other}"),
            }
        }
    }

    // -------------------------------------------------------------------
    // Sync sub-protocol
    // -------------------------------------------------------------------

    /// Write one sync frame header plus payload.
    pub async fn write_sync(&mut self, id: &[u8; 4], length: u32, payload: &[u8]) {
        let mut frame = Vec::with_capacity(8 + payload.len());
        frame.extend_from_slice(id);
        frame.extend_from_slice(&length.to_le_bytes());
        frame.extend_from_slice(payload);
        self.stream.write_all(&frame).await.unwrap();
    }

    /// Read one sync frame header.
    pub async fn read_sync_header(&mut self) -> ([u8; 4], u32) {
        let mut header = [0u8; 8];
        self.stream.read_exact(&mut header).await.unwrap();
        let id: [u8; 4] = header[..4].try_into().unwrap();
        let len = u32::from_le_bytes(header[4..].try_into().unwrap());
        (id, len)
    }
}
