//! Cross-process "data ready" signal (spec §4.3).
//!
//! The reference implementation's POSIX fallback is an in-process-only
//! stub (an `eventfd` that a second process can't actually attach to). That
//! doesn't satisfy a cross-process contract, so this uses a POSIX named
//! semaphore instead: `sem_open` with the same translated name as the
//! shared-memory region gives every attached process a real kernel object to
//! post and wait on.

use std::ffi::CString;
use std::io;
use std::time::Duration;

use crate::shared_memory::to_posix_name;

#[derive(Debug, thiserror::Error)]
pub enum NamedEventError {
    #[error("sem_open failed for {name}: {source}")]
    Open { name: String, source: io::Error },
    #[error("sem_post failed: {0}")]
    Post(io::Error),
    #[error("sem_timedwait failed: {0}")]
    Wait(io::Error),
    #[error("invalid event name: {0}")]
    InvalidName(String),
}

/// Outcome of waiting on a [`NamedEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// The event was signaled before the timeout elapsed.
    Signaled,
    /// The timeout elapsed with no signal.
    TimedOut,
}

/// A named, cross-process binary signal built on a POSIX named semaphore.
///
/// Every post increments the semaphore; `wait` decrements it (blocking up to
/// a timeout). Unlike a Windows auto-reset event, posts are not coalesced,
/// so callers that only care about "has new data arrived since I last
/// checked" should drain with a non-blocking `try_wait` loop after a
/// successful wait, matching how the ring buffer's consumer treats a signal
/// as "there is at least one more block available" rather than "exactly one
/// block is available."
pub struct NamedEvent {
    sem: *mut libc::sem_t,
    posix_name: String,
    owns_unlink: bool,
}

// SAFETY: `sem_t*` returned by `sem_open` is safe to use from any thread;
// the semaphore itself provides the synchronization.
unsafe impl Send for NamedEvent {}
unsafe impl Sync for NamedEvent {}

impl NamedEvent {
    /// Creates (or re-opens) the named semaphore, initialized unsignaled.
    pub fn create(name: &str) -> Result<Self, NamedEventError> {
        Self::open_with_flags(name, libc::O_CREAT, true)
    }

    /// Attaches to an existing named semaphore without creating one.
    pub fn open(name: &str) -> Result<Self, NamedEventError> {
        Self::open_with_flags(name, 0, false)
    }

    fn open_with_flags(
        name: &str,
        extra_flags: libc::c_int,
        owns_unlink: bool,
    ) -> Result<Self, NamedEventError> {
        let posix_name = to_posix_name(name);
        let c_name = CString::new(posix_name.clone())
            .map_err(|_| NamedEventError::InvalidName(posix_name.clone()))?;

        // SAFETY: `c_name` is a valid NUL-terminated string; the varargs
        // form is only invoked when `O_CREAT` is present in `extra_flags`.
        let sem = unsafe {
            if extra_flags & libc::O_CREAT != 0 {
                libc::sem_open(c_name.as_ptr(), extra_flags, 0o600, 0)
            } else {
                libc::sem_open(c_name.as_ptr(), extra_flags)
            }
        };
        if sem == libc::SEM_FAILED {
            return Err(NamedEventError::Open {
                name: posix_name,
                source: io::Error::last_os_error(),
            });
        }

        Ok(Self {
            sem: sem.cast::<libc::sem_t>(),
            posix_name,
            owns_unlink,
        })
    }

    /// Signals the event. Never blocks.
    pub fn signal(&self) -> Result<(), NamedEventError> {
        // SAFETY: `self.sem` is a valid semaphore for the lifetime of `self`.
        let rc = unsafe { libc::sem_post(self.sem) };
        if rc != 0 {
            return Err(NamedEventError::Post(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Blocks until signaled or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Result<WaitResult, NamedEventError> {
        let deadline = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: populating a local `timespec` via a valid clock id.
        let mut now = deadline;
        unsafe {
            libc::clock_gettime(libc::CLOCK_REALTIME, &raw mut now);
        }
        let total_nanos = i64::from(now.tv_nsec) + timeout.subsec_nanos() as i64;
        let spec = libc::timespec {
            tv_sec: now.tv_sec + timeout.as_secs() as libc::time_t + total_nanos / 1_000_000_000,
            tv_nsec: total_nanos % 1_000_000_000,
        };

        // SAFETY: `self.sem` is valid; `spec` is a well-formed absolute
        // deadline derived from `CLOCK_REALTIME`.
        let rc = unsafe { libc::sem_timedwait(self.sem, &raw const spec) };
        if rc == 0 {
            return Ok(WaitResult::Signaled);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ETIMEDOUT) {
            return Ok(WaitResult::TimedOut);
        }
        Err(NamedEventError::Wait(err))
    }

    /// Non-blocking poll: returns `Signaled` and consumes one post if the
    /// semaphore is currently nonzero, otherwise `TimedOut` immediately.
    pub fn try_wait(&self) -> Result<WaitResult, NamedEventError> {
        // SAFETY: `self.sem` is valid.
        let rc = unsafe { libc::sem_trywait(self.sem) };
        if rc == 0 {
            return Ok(WaitResult::Signaled);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EAGAIN) {
            return Ok(WaitResult::TimedOut);
        }
        Err(NamedEventError::Wait(err))
    }
}

impl Drop for NamedEvent {
    fn drop(&mut self) {
        // SAFETY: `self.sem` was returned by `sem_open` and is not used
        // again after this point.
        unsafe {
            libc::sem_close(self.sem);
        }
        if self.owns_unlink {
            if let Ok(c_name) = CString::new(self.posix_name.clone()) {
                // SAFETY: valid C string; unlinking a name nobody holds is
                // a harmless no-op.
                unsafe {
                    libc::sem_unlink(c_name.as_ptr());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_then_wait_returns_immediately() {
        let name = format!("Local\\auroute_evt_test_{}_a", std::process::id());
        let event = NamedEvent::create(&name).unwrap();
        event.signal().unwrap();
        assert_eq!(event.wait(Duration::from_millis(500)).unwrap(), WaitResult::Signaled);
    }

    #[test]
    fn wait_without_signal_times_out() {
        let name = format!("Local\\auroute_evt_test_{}_b", std::process::id());
        let event = NamedEvent::create(&name).unwrap();
        let start = std::time::Instant::now();
        let result = event.wait(Duration::from_millis(50)).unwrap();
        assert_eq!(result, WaitResult::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn cross_handle_signal_is_observed_by_a_second_open() {
        let name = format!("Local\\auroute_evt_test_{}_c", std::process::id());
        let creator = NamedEvent::create(&name).unwrap();
        let attached = NamedEvent::open(&name).unwrap();

        creator.signal().unwrap();
        assert_eq!(
            attached.wait(Duration::from_millis(500)).unwrap(),
            WaitResult::Signaled
        );
    }

    #[test]
    fn try_wait_is_non_blocking() {
        let name = format!("Local\\auroute_evt_test_{}_d", std::process::id());
        let event = NamedEvent::create(&name).unwrap();
        assert_eq!(event.try_wait().unwrap(), WaitResult::TimedOut);
        event.signal().unwrap();
        assert_eq!(event.try_wait().unwrap(), WaitResult::Signaled);
    }
}
