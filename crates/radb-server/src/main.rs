//! radb server binary entry point.

use clap::Parser;
use tracing::{error, info};

use radb_server::{AdbServer, Cli};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let log_format = cli.log_format.into();
    if let Err(e) = radb_core::init_logging(cli.verbosity(), cli.log_file.as_deref(), log_format) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    info!(version = env!("CARGO_PKG_VERSION"), "radb-server starting");

    let server = match AdbServer::bind(cli.server_config()).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };

    info!(addr = %server.local_addr(), "radb-server listening");

    // Termination signals behave like host:kill.
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            shutdown.trigger();
        }
    });

    if let Err(e) = server.serve().await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
