//! Host services: server-level requests that never touch a device stream.
//!
//! `host:version` and `host:kill` are the protocol's required pair; the
//! device listing and transport-selection routes let standard ADB clients
//! talk to the single preselected device.

use std::sync::Arc;

use tracing::{info, warn};

use crate::device::DeviceManagerHandle;
use crate::router::{current_session, Response, Router};
use crate::shutdown::Shutdown;

/// Features advertised to clients.
const HOST_FEATURES: &str = "shell_v2";

pub struct HostService {
    version: u32,
    shutdown: Shutdown,
    devices: DeviceManagerHandle,
}

impl HostService {
    pub fn new(version: u32, shutdown: Shutdown, devices: DeviceManagerHandle) -> Arc<Self> {
        Arc::new(Self {
            version,
            shutdown,
            devices,
        })
    }

    pub fn register(self: &Arc<Self>, router: &mut Router) {
        let svc = Arc::clone(self);
        router.route("host:version", move |_p| {
            let svc = Arc::clone(&svc);
            async move { svc.version().await }
        });

        let svc = Arc::clone(self);
        router.route("host:kill", move |_p| {
            let svc = Arc::clone(&svc);
            async move { svc.kill().await }
        });

        let svc = Arc::clone(self);
        router.route("host:features", move |_p| {
            let svc = Arc::clone(&svc);
            async move { svc.features().await }
        });

        let svc = Arc::clone(self);
        router.route("host:devices", move |_p| {
            let svc = Arc::clone(&svc);
            async move { svc.devices().await }
        });

        let svc = Arc::clone(self);
        router.route("host:devices-l", move |_p| {
            let svc = Arc::clone(&svc);
            async move { svc.devices_long().await }
        });

        let svc = Arc::clone(self);
        router.route("host:transport:<serial>", move |p| {
            let svc = Arc::clone(&svc);
            async move { svc.transport_serial(p.required("serial")).await }
        });

        for pattern in [
            "host:transport-any",
            "host:transport-usb",
            "host:transport-local",
        ] {
            let svc = Arc::clone(self);
            router.route(pattern, move |_p| {
                let svc = Arc::clone(&svc);
                async move { svc.transport_any().await }
            });
        }

        let svc = Arc::clone(self);
        router.route("host:tport:serial:<serial>", move |p| {
            let svc = Arc::clone(&svc);
            async move { svc.tport(Some(p.required("serial").to_owned())).await }
        });

        let svc = Arc::clone(self);
        router.route("host:tport:any", move |_p| {
            let svc = Arc::clone(&svc);
            async move { svc.tport(None).await }
        });
    }

    /// `host:version` is pure; the body is the version as 4 hex digits.
    async fn version(&self) -> Response {
        Response::ok_with(format!("{:04x}", self.version).into_bytes())
    }

    /// Acknowledge, flush, then raise the process-wide shutdown signal.
    async fn kill(&self) -> Response {
        let session = current_session();
        if let Err(e) = session.send_okay().await {
            warn!(error = %e, "Failed to acknowledge host:kill");
        }
        info!("Shutdown requested by host:kill");
        self.shutdown.trigger();
        Response::silent()
    }

    async fn features(&self) -> Response {
        Response::ok_with(HOST_FEATURES.as_bytes())
    }

    async fn devices(&self) -> Response {
        let mut body = String::new();
        for device in self.devices.list() {
            body.push_str(&format!("{}\t{}\n", device.serial, device.state));
        }
        Response::ok_with(body.into_bytes())
    }

    async fn devices_long(&self) -> Response {
        let mut body = String::new();
        for device in self.devices.list() {
            let props = device
                .properties
                .iter()
                .map(|(k, v)| format!("{k}:{v}"))
                .collect::<Vec<_>>()
                .join(" ");
            body.push_str(&format!(
                "{:<22} {:<10} {}\n",
                device.serial, device.state, props
            ));
        }
        Response::ok_with(body.into_bytes())
    }

    /// `host:transport:<serial>`: pin the session to a device and keep the
    /// connection open for the follow-up service request.
    async fn transport_serial(&self, serial: &str) -> Response {
        let session = current_session();
        match session.select_device(Some(serial)) {
            Some(_) => Response::ok().keep_alive(),
            None => Response::fail(format!("device '{serial}' not found")),
        }
    }

    async fn transport_any(&self) -> Response {
        let devices = self.devices.list();
        if devices.is_empty() {
            return Response::fail("no devices/emulators found");
        }
        if devices.len() > 1 {
            return Response::fail("more than one device/emulator");
        }
        let session = current_session();
        match session.select_device(None) {
            Some(_) => Response::ok().keep_alive(),
            None => Response::fail("no devices/emulators found"),
        }
    }

    /// `host:tport:*`: like `transport`, but the body is the raw 8-byte
    /// little-endian transport id.
    async fn tport(&self, serial: Option<String>) -> Response {
        let session = current_session();
        match session.select_device(serial.as_deref()) {
            Some(device) => Response::ok_with(device.transport_id.to_le_bytes().to_vec())
                .raw()
                .keep_alive(),
            None => match serial {
                Some(serial) => Response::fail(format!("device '{serial}' not found")),
                None => Response::fail("no devices/emulators found"),
            },
        }
    }
}
