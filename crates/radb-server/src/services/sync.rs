//! Sync file-transfer service.
//!
//! Entered via `sync:`. After the OKAY the connection speaks the binary
//! sync sub-protocol until QUIT, an unknown id, or a framing failure.
//! Filesystem errors fail the current operation but leave the session
//! running.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use radb_core::constants::{SYNC_MAX_CHUNK, SYNC_MAX_PATH};
use radb_core::error::{Error, Result};
use radb_core::protocol::sync;

use crate::fs::FileSystem;
use crate::router::{current_session, Response, Router};
use crate::session::Session;

pub struct SyncService {
    fs: Arc<dyn FileSystem>,
}

/// Whether the sync loop keeps serving requests after an operation.
/// Protocol violations mid-stream leave unread payload bytes on the
/// socket, so they must close rather than resume on a desynced stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

impl SyncService {
    pub fn new(fs: Arc<dyn FileSystem>) -> Arc<Self> {
        Arc::new(Self { fs })
    }

    pub fn register(self: &Arc<Self>, router: &mut Router) {
        let svc = Arc::clone(self);
        router.route("sync:", move |_p| {
            let svc = Arc::clone(&svc);
            async move { svc.serve().await }
        });
    }

    async fn serve(&self) -> Response {
        let session = current_session();
        if session.send_okay().await.is_err() {
            return Response::detached();
        }
        if let Err(e) = self.run_loop(&session).await {
            if !e.is_disconnect() {
                warn!(session = session.id(), error = %e, "Sync session failed");
            }
        }
        Response::detached()
    }

    async fn run_loop(&self, session: &Session) -> Result<()> {
        loop {
            let Some((id, len)) = self.read_frame(session).await? else {
                return Ok(());
            };

            match id {
                sync::QUIT => return Ok(()),
                sync::LIST | sync::STAT | sync::RECV | sync::SEND => {
                    if len as usize > SYNC_MAX_CHUNK {
                        self.fail(session, "oversize").await?;
                        return Ok(());
                    }
                    let path_bytes = self.read_payload(session, len as usize).await?;
                    if path_bytes.len() > SYNC_MAX_PATH {
                        self.fail(session, "path too long").await?;
                        continue;
                    }
                    let payload = String::from_utf8_lossy(&path_bytes).into_owned();

                    match id {
                        sync::LIST => self.handle_list(session, &payload).await?,
                        sync::STAT => self.handle_stat(session, &payload).await?,
                        sync::RECV => self.handle_recv(session, &payload).await?,
                        sync::SEND => {
                            if self.handle_send(session, &payload).await? == Flow::Close {
                                return Ok(());
                            }
                        }
                        _ => unreachable!(),
                    }
                }
                other => {
                    debug!(id = %String::from_utf8_lossy(&other), "Unknown sync id");
                    self.fail(session, "unknown sync id").await?;
                    return Ok(());
                }
            }
        }
    }

    /// Read one frame header, honoring shutdown. `None` means the peer
    /// closed between frames or the server is shutting down.
    async fn read_frame(&self, session: &Session) -> Result<Option<([u8; 4], u32)>> {
        let mut reader = session.reader().await;
        tokio::select! {
            biased;
            _ = session.shutdown().cancelled() => Ok(None),
            header = sync::read_header(&mut *reader) => header,
        }
    }

    async fn read_payload(&self, session: &Session, len: usize) -> Result<Vec<u8>> {
        let mut payload = vec![0u8; len];
        if len > 0 {
            let mut reader = session.reader().await;
            reader.read_exact(&mut payload).await?;
        }
        Ok(payload)
    }

    async fn fail(&self, session: &Session, message: &str) -> Result<()> {
        let mut writer = session.writer().await;
        sync::write_fail(&mut **writer, message).await
    }

    async fn handle_list(&self, session: &Session, path: &str) -> Result<()> {
        let entries = match self.fs.read_dir(path).await {
            Ok(entries) => entries,
            Err(e) => return self.fail(session, &e.to_string()).await,
        };

        let mut writer = session.writer().await;
        for dent in &entries {
            if dent.name == "." || dent.name == ".." {
                continue;
            }
            sync::write_dent(&mut **writer, dent).await?;
        }
        sync::write_header(&mut **writer, sync::DONE, 0).await
    }

    async fn handle_stat(&self, session: &Session, path: &str) -> Result<()> {
        // A missing path stats as zeros; only real filesystem errors fail.
        let stat = match self.fs.stat(path).await {
            Ok(stat) => stat.unwrap_or_default(),
            Err(e) => return self.fail(session, &e.to_string()).await,
        };
        let mut writer = session.writer().await;
        sync::write_stat(&mut **writer, &stat).await
    }

    async fn handle_recv(&self, session: &Session, path: &str) -> Result<()> {
        let mut file = match self.fs.open_for_read(path).await {
            Ok(file) => file,
            Err(e) => return self.fail(session, &e.to_string()).await,
        };

        let mut writer = session.writer().await;
        let mut buf = vec![0u8; SYNC_MAX_CHUNK];
        loop {
            let n = match file.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => return sync::write_fail(&mut **writer, &e.to_string()).await,
            };
            if n == 0 {
                break;
            }
            sync::write_data(&mut **writer, &buf[..n]).await?;
        }
        sync::write_header(&mut **writer, sync::DONE, 0).await
    }

    async fn handle_send(&self, session: &Session, spec: &str) -> Result<Flow> {
        // spec: "<path>,<decimal mode>"
        let Some((path, mode_text)) = spec.rsplit_once(',') else {
            return self.abort_send(session, "invalid SEND spec").await;
        };
        let Ok(mode) = mode_text.parse::<u32>() else {
            return self.abort_send(session, "invalid file mode").await;
        };

        let mut file = match self.fs.open_for_write(path, mode).await {
            Ok(file) => file,
            Err(e) => return self.abort_send(session, &e.to_string()).await,
        };

        let mut write_error: Option<String> = None;
        let mtime = loop {
            let Some((id, len)) = self.read_frame(session).await? else {
                return Err(Error::ConnectionClosed);
            };

            match id {
                sync::DATA => {
                    // The declared payload is never read on this path, so
                    // the stream cannot be resumed.
                    if len as usize > SYNC_MAX_CHUNK {
                        self.fail(session, "oversize").await?;
                        return Ok(Flow::Close);
                    }
                    let chunk = self.read_payload(session, len as usize).await?;
                    if write_error.is_none() {
                        if let Err(e) = file.write_all(&chunk).await {
                            write_error = Some(e.to_string());
                        }
                    }
                }
                sync::DONE => break len,
                _ => {
                    self.fail(session, "protocol error").await?;
                    return Ok(Flow::Close);
                }
            }
        };

        if let Some(message) = write_error {
            self.fail(session, &message).await?;
            return Ok(Flow::Continue);
        }
        if let Err(e) = file.shutdown().await {
            self.fail(session, &e.to_string()).await?;
            return Ok(Flow::Continue);
        }
        drop(file);

        if let Err(e) = self.fs.set_mtime(path, mtime).await {
            debug!(path, error = %e, "set_mtime failed");
        }

        let mut writer = session.writer().await;
        sync::write_header(&mut **writer, sync::OKAY, 0).await?;
        Ok(Flow::Continue)
    }

    /// Fail a SEND whose data stream is still incoming: drain the pending
    /// DATA frames so the stream stays positioned at the next request,
    /// then report `message`. A protocol violation while draining closes
    /// the session instead.
    async fn abort_send(&self, session: &Session, message: &str) -> Result<Flow> {
        match self.drain_send(session).await? {
            Flow::Continue => {
                self.fail(session, message).await?;
                Ok(Flow::Continue)
            }
            Flow::Close => Ok(Flow::Close),
        }
    }

    /// Consume DATA frames up to DONE.
    async fn drain_send(&self, session: &Session) -> Result<Flow> {
        loop {
            let Some((id, len)) = self.read_frame(session).await? else {
                return Err(Error::ConnectionClosed);
            };
            match id {
                sync::DATA if (len as usize) <= SYNC_MAX_CHUNK => {
                    self.read_payload(session, len as usize).await?;
                }
                sync::DATA => {
                    self.fail(session, "oversize").await?;
                    return Ok(Flow::Close);
                }
                sync::DONE => return Ok(Flow::Continue),
                _ => {
                    self.fail(session, "protocol error").await?;
                    return Ok(Flow::Close);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SingleDeviceManager;
    use crate::fs::MemoryFileSystem;
    use crate::session::{run, Session, SessionHandle};
    use crate::shutdown::Shutdown;
    use tokio::io::{duplex, DuplexStream};

    async fn start_sync(
        fs: Arc<dyn FileSystem>,
    ) -> (DuplexStream, DuplexStream, tokio::task::JoinHandle<()>) {
        let mut router = Router::new();
        SyncService::new(fs).register(&mut router);

        let (client_tx, server_rx) = duplex(256 * 1024);
        let (server_tx, client_rx) = duplex(256 * 1024);
        let session: SessionHandle = Session::new(
            1,
            server_rx,
            server_tx,
            Shutdown::new(),
            Arc::new(SingleDeviceManager::default()),
        );

        let task = tokio::spawn(async move {
            run(&session, &router).await.unwrap();
        });
        (client_tx, client_rx, task)
    }

    async fn send_frame(stream: &mut DuplexStream, id: [u8; 4], len: u32, payload: &[u8]) {
        stream.write_all(&sync::encode_header(id, len)).await.unwrap();
        stream.write_all(payload).await.unwrap();
    }

    async fn read_frame(stream: &mut DuplexStream) -> ([u8; 4], u32, Vec<u8>) {
        let mut header = [0u8; 8];
        stream.read_exact(&mut header).await.unwrap();
        let (id, len) = sync::parse_header(&header);
        let mut payload = Vec::new();
        if matches!(id, sync::DATA | sync::FAIL) {
            payload = vec![0u8; len as usize];
            stream.read_exact(&mut payload).await.unwrap();
        }
        (id, len, payload)
    }

    async fn expect_okay_atom(stream: &mut DuplexStream) {
        let mut atom = [0u8; 4];
        stream.read_exact(&mut atom).await.unwrap();
        assert_eq!(&atom, b"OKAY");
    }

    #[tokio::test]
    async fn send_then_recv_roundtrip() {
        let fs = Arc::new(MemoryFileSystem::new());
        let (mut tx, mut rx, task) = start_sync(fs).await;

        tx.write_all(b"0005sync:").await.unwrap();
        expect_okay_atom(&mut rx).await;

        let spec = b"/tmp/x,33188";
        send_frame(&mut tx, sync::SEND, spec.len() as u32, spec).await;
        send_frame(&mut tx, sync::DATA, 3, b"abc").await;
        send_frame(&mut tx, sync::DONE, 1_700_000_000, b"").await;

        let (id, len, _) = read_frame(&mut rx).await;
        assert_eq!(id, sync::OKAY);
        assert_eq!(len, 0);

        send_frame(&mut tx, sync::RECV, 6, b"/tmp/x").await;
        let (id, _, payload) = read_frame(&mut rx).await;
        assert_eq!(id, sync::DATA);
        assert_eq!(payload, b"abc");
        let (id, len, _) = read_frame(&mut rx).await;
        assert_eq!(id, sync::DONE);
        assert_eq!(len, 0);

        send_frame(&mut tx, sync::QUIT, 0, b"").await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn stat_missing_path_is_zeros() {
        let fs = Arc::new(MemoryFileSystem::new());
        let (mut tx, mut rx, task) = start_sync(fs).await;

        tx.write_all(b"0005sync:").await.unwrap();
        expect_okay_atom(&mut rx).await;

        send_frame(&mut tx, sync::STAT, 7, b"missing").await;
        let mut frame = [0u8; 16];
        rx.read_exact(&mut frame).await.unwrap();
        assert_eq!(&frame[..4], b"STAT");
        assert!(frame[4..].iter().all(|&b| b == 0));

        send_frame(&mut tx, sync::QUIT, 0, b"").await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn list_empty_directory_is_just_done() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.makedirs("empty").await.unwrap();
        let (mut tx, mut rx, task) = start_sync(fs).await;

        tx.write_all(b"0005sync:").await.unwrap();
        expect_okay_atom(&mut rx).await;

        send_frame(&mut tx, sync::LIST, 5, b"empty").await;
        let (id, len, _) = read_frame(&mut rx).await;
        assert_eq!(id, sync::DONE);
        assert_eq!(len, 0);

        // The session survives a LIST; STAT still answers.
        send_frame(&mut tx, sync::STAT, 5, b"empty").await;
        let mut frame = [0u8; 16];
        rx.read_exact(&mut frame).await.unwrap();
        assert_eq!(&frame[..4], b"STAT");

        send_frame(&mut tx, sync::QUIT, 0, b"").await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn recv_missing_file_fails_but_session_continues() {
        let fs = Arc::new(MemoryFileSystem::new());
        let (mut tx, mut rx, task) = start_sync(fs).await;

        tx.write_all(b"0005sync:").await.unwrap();
        expect_okay_atom(&mut rx).await;

        send_frame(&mut tx, sync::RECV, 4, b"nope").await;
        let (id, _, payload) = read_frame(&mut rx).await;
        assert_eq!(id, sync::FAIL);
        assert!(!payload.is_empty());

        send_frame(&mut tx, sync::QUIT, 0, b"").await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_id_fails_and_closes() {
        let fs = Arc::new(MemoryFileSystem::new());
        let (mut tx, mut rx, task) = start_sync(fs).await;

        tx.write_all(b"0005sync:").await.unwrap();
        expect_okay_atom(&mut rx).await;

        send_frame(&mut tx, *b"NOPE", 0, b"").await;
        let (id, _, payload) = read_frame(&mut rx).await;
        assert_eq!(id, sync::FAIL);
        assert_eq!(payload, b"unknown sync id");

        task.await.unwrap();
    }

    #[tokio::test]
    async fn oversize_path_length_fails() {
        let fs = Arc::new(MemoryFileSystem::new());
        let (mut tx, mut rx, task) = start_sync(fs).await;

        tx.write_all(b"0005sync:").await.unwrap();
        expect_okay_atom(&mut rx).await;

        let long = vec![b'a'; SYNC_MAX_PATH + 1];
        send_frame(&mut tx, sync::STAT, long.len() as u32, &long).await;
        let (id, _, payload) = read_frame(&mut rx).await;
        assert_eq!(id, sync::FAIL);
        assert_eq!(payload, b"path too long");

        send_frame(&mut tx, sync::QUIT, 0, b"").await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn oversize_frame_is_fatal() {
        let fs = Arc::new(MemoryFileSystem::new());
        let (mut tx, mut rx, task) = start_sync(fs).await;

        tx.write_all(b"0005sync:").await.unwrap();
        expect_okay_atom(&mut rx).await;

        send_frame(&mut tx, sync::LIST, (SYNC_MAX_CHUNK + 1) as u32, b"").await;
        let (id, _, payload) = read_frame(&mut rx).await;
        assert_eq!(id, sync::FAIL);
        assert_eq!(payload, b"oversize");

        task.await.unwrap();
    }

    #[tokio::test]
    async fn oversize_data_mid_send_closes_the_session() {
        let fs = Arc::new(MemoryFileSystem::new());
        let (mut tx, mut rx, task) = start_sync(fs).await;

        tx.write_all(b"0005sync:").await.unwrap();
        expect_okay_atom(&mut rx).await;

        let spec = b"x,33188";
        send_frame(&mut tx, sync::SEND, spec.len() as u32, spec).await;
        send_frame(&mut tx, sync::DATA, (SYNC_MAX_CHUNK + 1) as u32, b"").await;

        let (id, _, payload) = read_frame(&mut rx).await;
        assert_eq!(id, sync::FAIL);
        assert_eq!(payload, b"oversize");

        // The session must end; nothing after the FAIL.
        task.await.unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(rx.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unexpected_frame_mid_send_closes_the_session() {
        let fs = Arc::new(MemoryFileSystem::new());
        let (mut tx, mut rx, task) = start_sync(fs).await;

        tx.write_all(b"0005sync:").await.unwrap();
        expect_okay_atom(&mut rx).await;

        let spec = b"x,33188";
        send_frame(&mut tx, sync::SEND, spec.len() as u32, spec).await;
        send_frame(&mut tx, sync::LIST, 0, b"").await;

        let (id, _, payload) = read_frame(&mut rx).await;
        assert_eq!(id, sync::FAIL);
        assert_eq!(payload, b"protocol error");

        task.await.unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(rx.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_open_drains_data_and_session_continues() {
        let fs = Arc::new(MemoryFileSystem::new());
        fs.makedirs("adir").await.unwrap();
        let (mut tx, mut rx, task) = start_sync(fs).await;

        tx.write_all(b"0005sync:").await.unwrap();
        expect_okay_atom(&mut rx).await;

        // Writing over a directory fails to open; the DATA stream must
        // still be consumed before the FAIL.
        let spec = b"adir,33188";
        send_frame(&mut tx, sync::SEND, spec.len() as u32, spec).await;
        send_frame(&mut tx, sync::DATA, 3, b"abc").await;
        send_frame(&mut tx, sync::DONE, 7, b"").await;

        let (id, _, payload) = read_frame(&mut rx).await;
        assert_eq!(id, sync::FAIL);
        assert!(!payload.is_empty());

        // Stream is positioned at the next request.
        send_frame(&mut tx, sync::STAT, 4, b"adir").await;
        let mut frame = [0u8; 16];
        rx.read_exact(&mut frame).await.unwrap();
        assert_eq!(&frame[..4], b"STAT");

        send_frame(&mut tx, sync::QUIT, 0, b"").await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn send_with_max_chunk_succeeds() {
        let fs = Arc::new(MemoryFileSystem::new());
        let (mut tx, mut rx, task) = start_sync(Arc::clone(&fs) as Arc<dyn FileSystem>).await;

        tx.write_all(b"0005sync:").await.unwrap();
        expect_okay_atom(&mut rx).await;

        let spec = b"big,33188";
        let chunk = vec![0x5A; SYNC_MAX_CHUNK];
        send_frame(&mut tx, sync::SEND, spec.len() as u32, spec).await;
        send_frame(&mut tx, sync::DATA, chunk.len() as u32, &chunk).await;
        send_frame(&mut tx, sync::DONE, 1, b"").await;

        let (id, _, _) = read_frame(&mut rx).await;
        assert_eq!(id, sync::OKAY);

        let stat = fs.stat("big").await.unwrap().unwrap();
        assert_eq!(stat.size, SYNC_MAX_CHUNK as u32);
        assert_eq!(stat.mtime, 1);

        send_frame(&mut tx, sync::QUIT, 0, b"").await;
        task.await.unwrap();
    }
}
