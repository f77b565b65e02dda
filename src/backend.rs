//! Idle detection backends.
//!
//! This module provides a generic abstraction for asking the host how long the
//! user has been idle, plus the registry that picks a working backend.

mod helper;
mod tick;

#[cfg(unix)]
mod bus;
#[cfg(unix)]
mod wayland;
#[cfg(unix)]
mod x11;

use std::future::Future;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use thiserror::Error;
use tracing::Instrument;
use tracing::debug;
use tracing::debug_span;
use tracing::error;
use tracing::info;
use tracing::warn;

#[cfg(unix)]
pub use bus::BusBackend;
pub use helper::HelperBackend;
pub use helper::OutputUnit;
#[cfg(windows)]
pub use tick::TickBackend;
#[cfg(unix)]
pub use wayland::IdleEvent;
#[cfg(unix)]
pub use wayland::IdleState;
#[cfg(unix)]
pub use wayland::WaylandBackend;
#[cfg(unix)]
pub use x11::X11Backend;

use crate::config::BackendChoice;
use crate::config::IdleThreshold;

/// Trait for idle time sources.
#[async_trait]
pub trait IdleBackend: Send {
    /// Registry name of this backend.
    fn name(&self) -> &'static str;

    /// Seconds since the last user input.
    ///
    /// Failures are logged and reported as `0.0`, so callers should read a
    /// zero from a flaky backend as "no data" rather than "definitely active".
    async fn idle_seconds(&mut self) -> f64;
}

/// Errors that can occur while bringing a backend up.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{backend} is not available: {reason}")]
    Unavailable {
        backend: &'static str,
        reason: String,
    },

    #[error("compositor does not announce {0}")]
    CapabilityUnavailable(&'static str),

    #[error("not supported on this platform")]
    Unsupported,
}

impl BackendError {
    /// Shorthand for [`BackendError::Unavailable`].
    pub fn unavailable(backend: &'static str, reason: impl ToString) -> Self {
        Self::Unavailable {
            backend,
            reason: reason.to_string(),
        }
    }
}

/// Errors surfaced by [`Registry::select`].
#[derive(Error, Debug)]
pub enum SelectError {
    #[error("could not find a working idle backend")]
    NoBackendAvailable,

    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    #[error("backend {name} failed to initialize: {source}")]
    Backend {
        name: &'static str,
        #[source]
        source: BackendError,
    },
}

/// Errors from a single idle query. Never leaves the backend.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    ExitStatus {
        program: String,
        status: std::process::ExitStatus,
    },

    #[error("malformed output from {program}: {output:?}")]
    Malformed { program: String, output: String },

    #[error("D-Bus call failed: {0}")]
    Bus(String),

    #[error("X11 request failed: {0}")]
    X11(String),

    #[error("Wayland connection failed: {0}")]
    Wayland(String),

    #[error("{0} failed")]
    Platform(&'static str),
}

/// Log a failed query and fall back to zero idle seconds.
pub(crate) fn degraded(backend: &str, err: &QueryError) -> f64 {
    error!("Failed to get idle time from {}: {}", backend, err);
    0.0
}

/// Wall clock in milliseconds since the Unix epoch.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Convert milliseconds to fractional seconds.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn millis_to_secs(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

/// Future returned by a backend constructor.
pub type BackendFuture = BoxFuture<'static, Result<Box<dyn IdleBackend>, BackendError>>;

/// Backend constructor: probes the host and builds the backend.
pub type Constructor = fn(IdleThreshold) -> BackendFuture;

/// Box a typed constructor future into a [`BackendFuture`].
pub fn boxed<B, F>(fut: F) -> BackendFuture
where
    B: IdleBackend + 'static,
    F: Future<Output = Result<B, BackendError>> + Send + 'static,
{
    Box::pin(async move {
        let backend = fut.await?;
        Ok(Box::new(backend) as Box<dyn IdleBackend>)
    })
}

/// A named, constructible backend.
#[derive(Clone, Copy)]
struct Descriptor {
    name: &'static str,
    constructor: Constructor,
}

/// Ordered list of known backends. Registration order is priority order.
#[derive(Clone, Default)]
pub struct Registry {
    descriptors: Vec<Descriptor>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in backend.
    ///
    /// Backends that can answer from history come first. A fresh Wayland idle
    /// notification only starts counting when it is created, so a one-shot
    /// query through it reports roughly zero; it is the last resort.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        #[cfg(unix)]
        {
            registry.register(BusBackend::NAME, |_| boxed(BusBackend::connect()));
            registry.register(X11Backend::NAME, |_| boxed(async { X11Backend::connect() }));
        }
        registry.register(HelperBackend::XPRINTIDLE, |_| {
            boxed(async { HelperBackend::xprintidle() })
        });
        #[cfg(windows)]
        registry.register(TickBackend::NAME, |_| boxed(async { TickBackend::connect() }));
        #[cfg(unix)]
        registry.register(WaylandBackend::NAME, |threshold| {
            boxed(async move { WaylandBackend::connect(threshold) })
        });

        registry
    }

    /// Append a backend. Names are matched case-insensitively by
    /// [`Registry::select`].
    pub fn register(&mut self, name: &'static str, constructor: Constructor) {
        debug!("Registering idle backend {}", name);
        self.descriptors.push(Descriptor { name, constructor });
    }

    /// Names of the registered backends, highest priority first.
    pub fn names(&self) -> Vec<&'static str> {
        self.descriptors.iter().map(|d| d.name).collect()
    }

    /// Build a backend according to `choice`.
    ///
    /// `Best` tries every backend in order and only fails when none works.
    /// `Named` builds exactly that backend and never falls back.
    pub async fn select(
        &self,
        threshold: IdleThreshold,
        choice: &BackendChoice,
    ) -> Result<Box<dyn IdleBackend>, SelectError> {
        match choice {
            BackendChoice::Best => self.select_best(threshold).await,
            BackendChoice::Named(name) => self.select_named(threshold, name).await,
        }
    }

    async fn select_best(
        &self,
        threshold: IdleThreshold,
    ) -> Result<Box<dyn IdleBackend>, SelectError> {
        for descriptor in &self.descriptors {
            let span = debug_span!("probe", backend = descriptor.name);
            match (descriptor.constructor)(threshold).instrument(span).await {
                Ok(backend) => {
                    info!("Using {} idle backend", descriptor.name);
                    return Ok(backend);
                }
                Err(e) => warn!("Could not load {} backend: {}", descriptor.name, e),
            }
        }

        Err(SelectError::NoBackendAvailable)
    }

    async fn select_named(
        &self,
        threshold: IdleThreshold,
        name: &str,
    ) -> Result<Box<dyn IdleBackend>, SelectError> {
        let descriptor = self
            .descriptors
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| SelectError::UnknownBackend(name.to_string()))?;

        let span = debug_span!("probe", backend = descriptor.name);
        let backend = (descriptor.constructor)(threshold)
            .instrument(span)
            .await
            .map_err(|source| SelectError::Backend {
                name: descriptor.name,
                source,
            })?;

        info!("Using {} idle backend", descriptor.name);
        Ok(backend)
    }
}
