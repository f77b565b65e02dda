//! dbus-idle - report how long the user session has been idle.
//!
//! Idle time comes from one of several platform backends (Wayland
//! `ext-idle-notify-v1`, the session bus idle monitor, the X11 screensaver
//! extension, `xprintidle`, or the Windows input tick). The [`backend::Registry`]
//! picks the first one that works on the current host and [`idle::IdleMonitor`]
//! turns its answer into an idle/active decision.

pub mod backend;
pub mod config;
pub mod idle;

pub use backend::BackendError;
pub use backend::IdleBackend;
pub use backend::Registry;
pub use backend::SelectError;
pub use config::BackendChoice;
pub use config::IdleThreshold;
pub use idle::IdleMonitor;
