//! POSIX shared-memory region (spec §4.2): `shm_open`/`ftruncate`/`mmap` on
//! creation, `shm_open`/`mmap` on attach, `munmap`/`shm_unlink` on teardown.

use std::ffi::CString;
use std::io;

/// Translates a portable name like `Local\DirectPipeAudio` into a POSIX
/// shared-memory object name (`/DirectPipeAudio`): the `Local\` prefix is
/// stripped, remaining backslashes become underscores, and the result is
/// prefixed with `/` as `shm_open` requires.
#[must_use]
pub fn to_posix_name(name: &str) -> String {
    let stripped = name.strip_prefix("Local\\").unwrap_or(name);
    let translated = stripped.replace('\\', "_");
    format!("/{translated}")
}

/// Errors from opening, creating, or mapping a shared-memory region.
#[derive(Debug, thiserror::Error)]
pub enum SharedMemoryError {
    #[error("shm_open failed for {name}: {source}")]
    Open { name: String, source: io::Error },
    #[error("ftruncate failed for {name}: {source}")]
    Truncate { name: String, source: io::Error },
    #[error("mmap failed for {name}: {source}")]
    Map { name: String, source: io::Error },
    #[error("invalid shared memory name: {0}")]
    InvalidName(String),
}

/// An owned mapping of a POSIX shared-memory object.
///
/// The producer (`create`) unlinks the name from the filesystem namespace on
/// drop; the consumer (`open`) only unmaps, leaving the name intact so a
/// late-joining consumer (or a producer restart) can still find it. This
/// matches spec §4.2's "only the creator unlinks" lifecycle rule.
pub struct SharedMemoryRegion {
    ptr: *mut u8,
    len: usize,
    fd: libc::c_int,
    posix_name: String,
    owns_unlink: bool,
}

// SAFETY: the mapping is valid for the process lifetime of the region; the
// region is handed to exactly one of a producer or consumer thread.
unsafe impl Send for SharedMemoryRegion {}

impl SharedMemoryRegion {
    /// Creates (or truncates) the shared-memory object and maps `len` bytes.
    pub fn create(name: &str, len: usize) -> Result<Self, SharedMemoryError> {
        let posix_name = to_posix_name(name);
        let c_name = CString::new(posix_name.clone())
            .map_err(|_| SharedMemoryError::InvalidName(posix_name.clone()))?;

        // SAFETY: `c_name` is a valid NUL-terminated C string for the call's
        // duration; flags/mode match the documented `shm_open` contract.
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR,
                0o600,
            )
        };
        if fd < 0 {
            return Err(SharedMemoryError::Open {
                name: posix_name,
                source: io::Error::last_os_error(),
            });
        }

        // SAFETY: `fd` was just returned by `shm_open` above.
        let rc = unsafe { libc::ftruncate(fd, len as libc::off_t) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            // SAFETY: `fd` is a valid, owned descriptor.
            unsafe {
                libc::close(fd);
            }
            return Err(SharedMemoryError::Truncate {
                name: posix_name,
                source: err,
            });
        }

        Self::map(fd, len, posix_name, true)
    }

    /// Opens an existing shared-memory object and maps `len` bytes.
    pub fn open(name: &str, len: usize) -> Result<Self, SharedMemoryError> {
        let posix_name = to_posix_name(name);
        let c_name = CString::new(posix_name.clone())
            .map_err(|_| SharedMemoryError::InvalidName(posix_name.clone()))?;

        // SAFETY: see `create`.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0o600) };
        if fd < 0 {
            return Err(SharedMemoryError::Open {
                name: posix_name,
                source: io::Error::last_os_error(),
            });
        }

        Self::map(fd, len, posix_name, false)
    }

    fn map(
        fd: libc::c_int,
        len: usize,
        posix_name: String,
        owns_unlink: bool,
    ) -> Result<Self, SharedMemoryError> {
        // SAFETY: `fd` refers to a shared-memory object sized to at least
        // `len` bytes by the caller (`create` truncates it; `open` relies on
        // the producer having done so already).
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            // SAFETY: `fd` is owned and valid here.
            unsafe {
                libc::close(fd);
            }
            return Err(SharedMemoryError::Map {
                name: posix_name,
                source: err,
            });
        }

        Ok(Self {
            ptr: ptr.cast::<u8>(),
            len,
            fd,
            posix_name,
            owns_unlink,
        })
    }

    #[must_use]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr
    }

    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for SharedMemoryRegion {
    fn drop(&mut self) {
        // SAFETY: `self.ptr`/`self.len` describe the mapping created above
        // and are not used again after this point.
        unsafe {
            libc::munmap(self.ptr.cast(), self.len);
            libc::close(self.fd);
        }
        if self.owns_unlink {
            if let Ok(c_name) = CString::new(self.posix_name.clone()) {
                // SAFETY: `c_name` is a valid C string; unlinking a
                // nonexistent name is a harmless no-op on error.
                unsafe {
                    libc::shm_unlink(c_name.as_ptr());
                }
            }
        }
    }
}
