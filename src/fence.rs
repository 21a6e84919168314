//! Acquire fences
//!
//! A producer hands each buffer over together with a fence that signals once
//! it has finished writing. The programming phase waits on the fence before
//! touching the buffer and then closes it; ownership makes "exactly once"
//! structural: the fence is taken out of the layer, waited on, and closed
//! when dropped.

use std::fmt;
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Something that can be waited on until signalled
pub trait Fence: Send {
    /// Block until signalled, or until `timeout` elapses (`None` waits forever)
    fn wait(&self, timeout: Option<Duration>) -> io::Result<()>;
}

/// A sync-file descriptor; readable once signalled
#[derive(Debug)]
pub struct SyncFileFence {
    fd: OwnedFd,
}

impl SyncFileFence {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }
}

impl Fence for SyncFileFence {
    fn wait(&self, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms = timeout
            .map(|t| t.as_millis().min(i32::MAX as u128) as libc::c_int)
            .unwrap_or(-1);
        let mut pfd = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        loop {
            // SAFETY: `pfd` is a single valid pollfd for the duration of the call.
            let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            match ret {
                n if n > 0 => {
                    if pfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
                        return Err(io::Error::from_raw_os_error(libc::EINVAL));
                    }
                    return Ok(());
                }
                0 => return Err(io::Error::from_raw_os_error(libc::ETIME)),
                _ => {
                    let err = io::Error::last_os_error();
                    if err.kind() != io::ErrorKind::Interrupted {
                        return Err(err);
                    }
                }
            }
        }
    }
}

/// The acquire fence attached to a layer
pub struct AcquireFence {
    inner: Box<dyn Fence>,
}

impl AcquireFence {
    pub fn new(fence: impl Fence + 'static) -> Self {
        Self {
            inner: Box::new(fence),
        }
    }

    /// Adopt a raw sync-file descriptor. `fd <= 0` means the buffer is
    /// already ready and yields no fence.
    ///
    /// # Safety
    ///
    /// A positive `fd` must be an open descriptor owned by the caller; it is
    /// closed when the fence is dropped.
    pub unsafe fn from_raw_fd(fd: RawFd) -> Option<Self> {
        (fd > 0).then(|| Self::new(SyncFileFence::new(OwnedFd::from_raw_fd(fd))))
    }

    /// Wait without a timeout
    pub fn wait(&self) -> io::Result<()> {
        self.inner.wait(None)
    }

    /// Release the fence
    pub fn close(self) {
        drop(self);
    }
}

impl fmt::Debug for AcquireFence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AcquireFence")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn pipe() -> (OwnedFd, OwnedFd) {
        let mut fds = [0; 2];
        // SAFETY: `fds` has room for the two descriptors pipe(2) writes.
        let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(ret, 0);
        // SAFETY: both descriptors were just created and are owned here.
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    #[test]
    fn test_signalled_fence_returns_immediately() {
        let (read, write) = pipe();
        File::from(write).write_all(b"x").unwrap();

        let fence = AcquireFence::new(SyncFileFence::new(read));
        assert!(fence.wait().is_ok());
        fence.close();
    }

    #[test]
    fn test_unsignalled_fence_times_out() {
        let (read, _write) = pipe();
        let fence = SyncFileFence::new(read);
        let err = fence.wait(Some(Duration::from_millis(10))).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ETIME));
    }

    #[test]
    fn test_non_positive_descriptors_mean_ready() {
        // SAFETY: non-positive descriptors are never adopted.
        unsafe {
            assert!(AcquireFence::from_raw_fd(0).is_none());
            assert!(AcquireFence::from_raw_fd(-1).is_none());
        }
    }
}
