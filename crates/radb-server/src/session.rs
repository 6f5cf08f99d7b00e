//! Per-connection session and the dispatch engine.
//!
//! One `Session` exists for the lifetime of one TCP connection. The engine
//! loop reads a smart-socket request, dispatches it through the router, and
//! honors the returned disposition: CLOSE ends the connection, KEEP-ALIVE
//! loops for another request, and BIDIRECTIONAL means the handler already
//! consumed the stream.

use std::sync::Mutex as StdMutex;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use radb_core::error::{Error, Result};
use radb_core::protocol::smart;

use crate::device::{Device, DeviceManagerHandle};
use crate::router::{Disposition, Router};
use crate::shutdown::Shutdown;

/// Boxed read half of a session's connection, buffered for header reads.
pub type SessionReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;

/// Boxed write half of a session's connection.
pub type SessionWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One client connection handling smart-socket framed requests.
pub struct Session {
    id: u64,
    reader: Mutex<SessionReader>,
    writer: Mutex<SessionWriter>,
    shutdown: Shutdown,
    devices: DeviceManagerHandle,
    /// Device snapshot taken when a handler first selects or asks.
    selected: StdMutex<Option<Device>>,
}

pub type SessionHandle = std::sync::Arc<Session>;

impl Session {
    pub fn new(
        id: u64,
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        shutdown: Shutdown,
        devices: DeviceManagerHandle,
    ) -> SessionHandle {
        std::sync::Arc::new(Self {
            id,
            reader: Mutex::new(BufReader::new(Box::new(reader) as _)),
            writer: Mutex::new(Box::new(writer) as _),
            shutdown,
            devices,
            selected: StdMutex::new(None),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Exclusive access to the read half. BIDIRECTIONAL handlers hold this
    /// for the lifetime of their client-to-server pump.
    pub async fn reader(&self) -> MutexGuard<'_, SessionReader> {
        self.reader.lock().await
    }

    /// Exclusive access to the write half.
    pub async fn writer(&self) -> MutexGuard<'_, SessionWriter> {
        self.writer.lock().await
    }

    // -------------------------------------------------------------------
    // Response atoms
    // -------------------------------------------------------------------

    pub async fn send_okay(&self) -> Result<()> {
        let mut writer = self.writer().await;
        smart::write_okay(&mut **writer).await
    }

    pub async fn send_okay_with(&self, body: &[u8]) -> Result<()> {
        let mut writer = self.writer().await;
        smart::write_okay_with(&mut **writer, body).await
    }

    pub async fn send_okay_raw(&self, body: &[u8]) -> Result<()> {
        let mut writer = self.writer().await;
        smart::write_okay_raw(&mut **writer, body).await
    }

    pub async fn send_fail(&self, message: &str) -> Result<()> {
        let mut writer = self.writer().await;
        smart::write_fail(&mut **writer, message.as_bytes()).await
    }

    // -------------------------------------------------------------------
    // Device selection
    // -------------------------------------------------------------------

    /// The device this session operates on, selecting the default device
    /// on first use.
    pub fn selected_device(&self) -> Option<Device> {
        let mut selected = self.selected.lock().unwrap();
        if selected.is_none() {
            *selected = self.devices.select(None);
        }
        selected.clone()
    }

    /// Pin this session to a specific device.
    pub fn select_device(&self, serial: Option<&str>) -> Option<Device> {
        let device = self.devices.select(serial)?;
        *self.selected.lock().unwrap() = Some(device.clone());
        Some(device)
    }

    /// Read one smart-socket request. `None` means the peer closed the
    /// connection or the server is shutting down.
    pub async fn read_request(&self) -> Result<Option<Bytes>> {
        let mut reader = self.reader().await;
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Ok(None),
            request = smart::read_request(&mut *reader) => request,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}

/// Drive one session to completion.
pub async fn run(session: &SessionHandle, router: &Router) -> Result<()> {
    loop {
        let payload = match session.read_request().await {
            Ok(Some(payload)) => payload,
            Ok(None) => return Ok(()),
            Err(Error::Codec { message }) => {
                session.send_fail(&message).await?;
                return Ok(());
            }
            Err(e) if e.is_disconnect() => return Ok(()),
            Err(e) => return Err(e),
        };

        let request = String::from_utf8_lossy(&payload).into_owned();
        debug!(session = session.id(), request = %request, "Request");

        match router.dispatch(&request, session).await {
            Ok(Disposition::KeepAlive) => continue,
            Ok(Disposition::Close) | Ok(Disposition::Bidirectional) => return Ok(()),
            Err(e) if e.is_disconnect() => return Ok(()),
            Err(e) => {
                warn!(session = session.id(), error = %e, "Dispatch failed");
                return Err(e);
            }
        }
    }
}
