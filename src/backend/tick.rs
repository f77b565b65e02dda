//! Windows input tick backend.
//!
//! Idle time is the distance between the system tick counter and the tick of
//! the last input event reported by `GetLastInputInfo`. The backend is only
//! compiled and registered on Windows.

#[cfg(windows)]
use async_trait::async_trait;

#[cfg(windows)]
use super::BackendError;
#[cfg(windows)]
use super::IdleBackend;
#[cfg(windows)]
use super::QueryError;
#[cfg(windows)]
use super::degraded;
#[cfg(any(windows, test))]
use super::millis_to_secs;

/// Backend reading `GetLastInputInfo` / `GetTickCount`.
#[cfg(windows)]
#[derive(Debug)]
pub struct TickBackend {
    _private: (),
}

#[cfg(windows)]
impl TickBackend {
    /// Registry name.
    pub const NAME: &'static str = "windows";

    /// Probe the input tick API.
    pub fn connect() -> Result<Self, BackendError> {
        last_input_ticks().map_err(|e| BackendError::unavailable(Self::NAME, e))?;
        Ok(Self { _private: () })
    }
}

#[cfg(windows)]
#[async_trait]
impl IdleBackend for TickBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn idle_seconds(&mut self) -> f64 {
        match last_input_ticks() {
            Ok((now, last_input)) => tick_idle_seconds(now, last_input),
            Err(e) => degraded(Self::NAME, &e),
        }
    }
}

/// Seconds between two millisecond ticks of a 32-bit counter.
///
/// The counter wraps after about 49.7 days, hence the wrapping subtraction.
#[cfg(any(windows, test))]
fn tick_idle_seconds(now: u32, last_input: u32) -> f64 {
    millis_to_secs(u64::from(now.wrapping_sub(last_input)))
}

/// Current tick and tick of the last input event.
#[cfg(windows)]
fn last_input_ticks() -> Result<(u32, u32), QueryError> {
    use windows::Win32::System::SystemInformation::GetTickCount;
    use windows::Win32::UI::Input::KeyboardAndMouse::GetLastInputInfo;
    use windows::Win32::UI::Input::KeyboardAndMouse::LASTINPUTINFO;

    let mut info = LASTINPUTINFO {
        cbSize: u32::try_from(std::mem::size_of::<LASTINPUTINFO>()).unwrap_or(8),
        dwTime: 0,
    };

    // SAFETY: `info` is a properly sized LASTINPUTINFO owned by this frame.
    let ok = unsafe { GetLastInputInfo(&mut info) }.as_bool();
    if !ok {
        return Err(QueryError::Platform("GetLastInputInfo"));
    }

    // SAFETY: GetTickCount has no preconditions.
    let now = unsafe { GetTickCount() };
    Ok((now, info.dwTime))
}
