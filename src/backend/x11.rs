//! X11 screensaver extension backend.
//!
//! Asks the X server for `ms_since_user_input` via `MIT-SCREEN-SAVER`.

use async_trait::async_trait;
use tracing::debug;
use tracing::info;
use x11rb::connection::Connection;
use x11rb::connection::RequestConnection;
use x11rb::protocol::screensaver;
use x11rb::protocol::xproto::Window;
use x11rb::rust_connection::RustConnection;

use super::BackendError;
use super::IdleBackend;
use super::QueryError;
use super::degraded;
use super::millis_to_secs;

/// Backend querying the X11 screensaver extension.
pub struct X11Backend {
    conn: RustConnection,
    root: Window,
}

impl X11Backend {
    /// Registry name.
    pub const NAME: &'static str = "x11";

    /// Open the display named by `DISPLAY` and check for the extension.
    pub fn connect() -> Result<Self, BackendError> {
        let (conn, screen_num) =
            x11rb::connect(None).map_err(|e| BackendError::unavailable(Self::NAME, e))?;

        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .map(|screen| screen.root)
            .ok_or_else(|| BackendError::unavailable(Self::NAME, "no root window"))?;

        let extension = conn
            .extension_information(screensaver::X11_EXTENSION_NAME)
            .map_err(|e| BackendError::unavailable(Self::NAME, e))?;
        if extension.is_none() {
            return Err(BackendError::unavailable(
                Self::NAME,
                "MIT-SCREEN-SAVER extension missing",
            ));
        }

        let backend = Self { conn, root };

        // Check the extension actually answers
        let ms = backend
            .ms_since_user_input()
            .map_err(|e| BackendError::unavailable(Self::NAME, e))?;
        info!("Connected to X11 screen {} (idle {} ms)", screen_num, ms);

        Ok(backend)
    }

    fn ms_since_user_input(&self) -> Result<u32, QueryError> {
        let reply = screensaver::query_info(&self.conn, self.root)
            .map_err(|e| QueryError::X11(e.to_string()))?
            .reply()
            .map_err(|e| QueryError::X11(e.to_string()))?;

        debug!("Screensaver state: {:?}", reply.state);
        Ok(reply.ms_since_user_input)
    }
}

#[async_trait]
impl IdleBackend for X11Backend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn idle_seconds(&mut self) -> f64 {
        match self.ms_since_user_input() {
            Ok(ms) => millis_to_secs(u64::from(ms)),
            Err(e) => degraded(Self::NAME, &e),
        }
    }
}
