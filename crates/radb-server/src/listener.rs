//! TCP listener and the server's accept loop.
//!
//! Accepts connections, hands each to a spawned session task, and stops
//! accepting when the process-wide shutdown signal fires. Session errors
//! stay local to their connection; the server keeps running.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, error, info};

use radb_core::error::Result;

use crate::config::ServerConfig;
use crate::device::SingleDeviceManager;
use crate::fs::{FileSystem, LocalFileSystem};
use crate::router::Router;
use crate::services::{HostService, ShellService, SyncService};
use crate::session::{self, Session};
use crate::shutdown::Shutdown;

/// The smart-socket server.
pub struct AdbServer {
    listener: TcpListener,
    local_addr: std::net::SocketAddr,
    router: Arc<Router>,
    shutdown: Shutdown,
    devices: Arc<SingleDeviceManager>,
}

impl AdbServer {
    /// Bind with the default local-disk sync filesystem and no user routes.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let fs: Arc<dyn FileSystem> = match &config.sync_root {
            Some(root) => Arc::new(LocalFileSystem::new(root.clone())),
            None => Arc::new(LocalFileSystem::current_dir()),
        };
        Self::bind_with(config, Router::new(), fs).await
    }

    /// Bind with user routes and a custom sync filesystem. Built-in
    /// services land in the router's fallback tier, so any user route
    /// with the same pattern wins.
    pub async fn bind_with(
        config: ServerConfig,
        mut router: Router,
        fs: Arc<dyn FileSystem>,
    ) -> Result<Self> {
        let shutdown = Shutdown::new();
        let devices = Arc::new(SingleDeviceManager::new(config.device.clone()));

        let host = HostService::new(config.version, shutdown.clone(), Arc::clone(&devices));
        let shell = ShellService::new();
        let sync = SyncService::new(fs);
        router.with_builtin_scope(|r| {
            host.register(r);
            shell.register(r);
            sync.register(r);
        });

        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            router: Arc::new(router),
            shutdown,
            devices,
        })
    }

    /// The bound address; useful with port 0.
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Handle for raising the process-wide shutdown signal.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Run the accept loop until shutdown. The listener socket is released
    /// on return, so new connections are refused immediately.
    pub async fn serve(self) -> Result<()> {
        info!(addr = %self.local_addr, "Server listening");

        let mut next_session_id: u64 = 0;
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    next_session_id += 1;
                    let session_id = next_session_id;
                    debug!(session = session_id, addr = %peer, "Connected");

                    let _ = stream.set_nodelay(true);
                    let (read_half, write_half) = stream.into_split();
                    let session = Session::new(
                        session_id,
                        read_half,
                        write_half,
                        self.shutdown.clone(),
                        Arc::clone(&self.devices),
                    );

                    let router = Arc::clone(&self.router);
                    tokio::spawn(async move {
                        match session::run(&session, &router).await {
                            Ok(()) => {}
                            Err(e) if e.is_disconnect() => {}
                            Err(e) => {
                                error!(session = session_id, error = %e, "Session failed")
                            }
                        }
                        debug!(session = session_id, addr = %peer, "Disconnected");
                    });
                }
                Err(e) => {
                    debug!(error = %e, "Accept error");
                }
            }
        }

        info!("Server shutting down");
        Ok(())
    }
}
