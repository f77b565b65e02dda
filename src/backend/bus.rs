//! Idle detection via a session bus idle monitor.
//!
//! Looks for a bus name following the `*IdleMonitor*` convention (Mutter
//! publishes `org.gnome.Mutter.IdleMonitor`) and calls `GetIdletime` on its
//! `Core` object.

use anyhow::Context;
use async_trait::async_trait;
use tracing::debug;
use tracing::info;
use tracing::trace;
use zbus::Connection;

use super::BackendError;
use super::IdleBackend;
use super::QueryError;
use super::degraded;
use super::millis_to_secs;

/// `DBus` daemon service and path.
const DBUS_SERVICE: &str = "org.freedesktop.DBus";
const DBUS_PATH: &str = "/org/freedesktop/DBus";
const DBUS_INTERFACE: &str = "org.freedesktop.DBus";

/// Substring identifying idle monitor services.
const IDLE_MONITOR_MARKER: &str = "IdleMonitor";

/// Backend calling `GetIdletime` on a session bus idle monitor.
pub struct BusBackend {
    conn: Connection,

    /// Bus name, also used as the interface name.
    service: String,

    /// Object path of the core idle monitor.
    path: String,
}

impl BusBackend {
    /// Registry name.
    pub const NAME: &'static str = "dbus";

    /// Connect to the session bus and resolve the idle monitor service.
    pub async fn connect() -> Result<Self, BackendError> {
        let conn = Connection::session()
            .await
            .map_err(|e| BackendError::unavailable(Self::NAME, e))?;

        Self::discover(conn).await
    }

    /// Resolve the idle monitor service on an existing connection.
    pub async fn discover(conn: Connection) -> Result<Self, BackendError> {
        let names = list_names(&conn)
            .await
            .map_err(|e| BackendError::unavailable(Self::NAME, format!("{e:#}")))?;

        let service = find_idle_monitor(&names).ok_or_else(|| {
            BackendError::unavailable(Self::NAME, "no IdleMonitor service on the session bus")
        })?;

        let backend = Self::with_service(conn, service);
        info!(
            "Resolved idle monitor: {} at {}",
            backend.service, backend.path
        );
        Ok(backend)
    }

    /// Use a known idle monitor service without enumerating the bus.
    pub fn with_service(conn: Connection, service: &str) -> Self {
        Self {
            conn,
            service: service.to_string(),
            path: service_path(service),
        }
    }

    async fn idletime_ms(&self) -> Result<u64, QueryError> {
        let reply = self
            .conn
            .call_method(
                Some(self.service.as_str()),
                self.path.as_str(),
                Some(self.service.as_str()),
                "GetIdletime",
                &(),
            )
            .await
            .map_err(|e| QueryError::Bus(e.to_string()))?;

        let ms: u64 = reply
            .body()
            .deserialize()
            .map_err(|e| QueryError::Bus(e.to_string()))?;

        trace!("GetIdletime: {} ms", ms);
        Ok(ms)
    }
}

#[async_trait]
impl IdleBackend for BusBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn idle_seconds(&mut self) -> f64 {
        match self.idletime_ms().await {
            Ok(ms) => millis_to_secs(ms),
            Err(e) => degraded(Self::NAME, &e),
        }
    }
}

/// List every name currently on the bus.
async fn list_names(conn: &Connection) -> anyhow::Result<Vec<String>> {
    let proxy = zbus::Proxy::new(conn, DBUS_SERVICE, DBUS_PATH, DBUS_INTERFACE)
        .await
        .context("Failed to create DBus proxy")?;

    let names: Vec<String> = proxy
        .call("ListNames", &())
        .await
        .context("ListNames call failed")?;

    debug!("Session bus has {} names", names.len());
    Ok(names)
}

/// First bus name following the idle monitor naming convention.
fn find_idle_monitor(names: &[String]) -> Option<&str> {
    names
        .iter()
        .map(String::as_str)
        .find(|name| name.contains(IDLE_MONITOR_MARKER))
}

/// Object path of the core monitor for a service name.
///
/// `org.gnome.Mutter.IdleMonitor` maps to `/org/gnome/Mutter/IdleMonitor/Core`.
fn service_path(service: &str) -> String {
    format!("/{}/Core", service.replace('.', "/"))
}
