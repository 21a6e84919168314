//! Vsync Timing Source
//!
//! A single dedicated thread produces vsync timestamps and hands them to the
//! client's callback table while delivery is enabled. The composition path
//! never produces ticks; it only flips the enable flag.
//!
//! # Tick sources
//!
//! - [`TimestampFile`]: the kernel exposes the last vsync time as ASCII text
//!   in a sysfs file and signals a new value with `POLLPRI`
//! - [`SyntheticClock`]: sleeps one refresh interval and stamps the monotonic
//!   clock; used when forced by configuration or when the timestamp file
//!   cannot be opened
//!
//! # Shutdown
//!
//! The thread waits on a [`CancelToken`] alongside its tick source, so
//! [`VsyncThread::shutdown`] returns as soon as the current wait is woken.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use parking_lot::RwLock;

use crate::config::VsyncConfig;
use crate::display::DisplayId;

/// Name given to the timing thread
pub const VSYNC_THREAD_NAME: &str = "hwcVsyncThread";

/// Scheduling priority of the urgent display class
const URGENT_DISPLAY_PRIORITY: libc::c_int = -8;

/// Largest timestamp text read from the kernel
const MAX_TIMESTAMP_LEN: usize = 64;

/// Callback table registered by the display-stack client
pub trait HwcProcs: Send + Sync {
    /// A vsync happened on `display` at `timestamp` (monotonic ns)
    fn vsync(&self, display: DisplayId, timestamp: i64);
}

/// State shared between the composition path and the timing thread
#[derive(Default)]
pub struct VsyncState {
    enable: AtomicBool,
    fake: AtomicBool,
    delivered: AtomicU64,
    procs: RwLock<Option<Arc<dyn HwcProcs>>>,
}

impl VsyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the client asked for vsync delivery
    pub fn enabled(&self) -> bool {
        self.enable.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enable.store(enabled, Ordering::Release);
    }

    /// Whether ticks are synthesized instead of read from the kernel
    pub fn fake(&self) -> bool {
        self.fake.load(Ordering::Acquire)
    }

    pub fn set_fake(&self, fake: bool) {
        self.fake.store(fake, Ordering::Release);
    }

    /// Ticks handed to the callback table so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Install the callback table, replacing any previous one.
    /// Returns whether a table was already registered.
    pub fn register(&self, procs: Arc<dyn HwcProcs>) -> bool {
        self.procs.write().replace(procs).is_some()
    }

    pub fn is_registered(&self) -> bool {
        self.procs.read().is_some()
    }

    pub fn procs(&self) -> Option<Arc<dyn HwcProcs>> {
        self.procs.read().clone()
    }

    /// Hand one tick to the callback table, if any
    fn deliver(&self, display: DisplayId, timestamp: i64) -> bool {
        let Some(procs) = self.procs() else {
            return false;
        };
        procs.vsync(display, timestamp);
        self.delivered.fetch_add(1, Ordering::Relaxed);
        true
    }
}

/// Cancellation signal for the timing thread.
///
/// A flag plus a self-pipe: waits include the pipe's read end so a cancel
/// wakes them immediately.
#[derive(Debug)]
pub struct CancelToken {
    cancelled: AtomicBool,
    wake_read: OwnedFd,
    wake_write: OwnedFd,
}

impl CancelToken {
    pub fn new() -> io::Result<Self> {
        let mut fds = [0; 2];
        // SAFETY: `fds` has room for the two descriptors pipe2(2) writes.
        let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: both descriptors were just created and nothing else owns them.
        let (wake_read, wake_write) =
            unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

        Ok(Self {
            cancelled: AtomicBool::new(false),
            wake_read,
            wake_write,
        })
    }

    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let byte = 1u8;
        // SAFETY: writes one byte from a live stack variable.
        let ret = unsafe {
            libc::write(
                self.wake_write.as_raw_fd(),
                &byte as *const u8 as *const libc::c_void,
                1,
            )
        };
        if ret == -1 {
            warn!("vsync wake-up failed: {}", io::Error::last_os_error());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// pollfd entry that becomes readable on cancel
    fn pollfd(&self) -> libc::pollfd {
        libc::pollfd {
            fd: self.wake_read.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        }
    }

    /// Sleep for `duration`; returns `true` if cancelled meanwhile.
    ///
    /// Signals do not cut the sleep short: an interrupted wait resumes with
    /// the time left until the deadline.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;

        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let remaining = deadline - now;

            let mut pfd = self.pollfd();
            // SAFETY: all-zero is a valid timespec.
            let mut timeout: libc::timespec = unsafe { std::mem::zeroed() };
            timeout.tv_sec = remaining.as_secs() as libc::time_t;
            timeout.tv_nsec = remaining.subsec_nanos() as _;
            // SAFETY: `pfd` and `timeout` outlive the call; a null mask keeps
            // the thread's signal mask.
            let ret = unsafe { libc::ppoll(&mut pfd, 1, &timeout, std::ptr::null()) };
            match ret {
                -1 => {
                    let err = io::Error::last_os_error();
                    if err.kind() != io::ErrorKind::Interrupted {
                        warn!("vsync sleep failed: {}", err);
                        return self.is_cancelled();
                    }
                }
                _ => return self.is_cancelled(),
            }
        }
    }
}

/// Outcome of one wait on a tick source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// A vsync at this monotonic time (ns)
    Timestamp(i64),
    /// Nothing to deliver this round; keep going
    Skip,
    /// Stop the thread
    Stop,
}

/// Produces vsync ticks
pub trait TickSource: Send {
    fn next_tick(&mut self, cancel: &CancelToken) -> Tick;
}

/// Monotonic clock in nanoseconds
pub fn monotonic_ns() -> i64 {
    // SAFETY: all-zero is a valid timespec.
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    // SAFETY: `ts` is a valid timespec to write into.
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as i64 * 1_000_000_000 + ts.tv_nsec as i64
}

/// Ticks at a fixed interval stamped with the monotonic clock
#[derive(Debug, Clone, Copy)]
pub struct SyntheticClock {
    interval: Duration,
}

impl SyntheticClock {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Approximately 60Hz
    pub fn sixty_hz() -> Self {
        Self::new(Duration::from_micros(16_666))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl TickSource for SyntheticClock {
    fn next_tick(&mut self, cancel: &CancelToken) -> Tick {
        if cancel.sleep(self.interval) {
            return Tick::Stop;
        }
        Tick::Timestamp(monotonic_ns())
    }
}

/// Parse the kernel's timestamp text the way `strtoull(text, NULL, 0)` does,
/// also accepting a `VSYNC=` prefix. Text without digits parses as 0.
pub fn parse_timestamp(text: &str) -> u64 {
    let text = text.trim_start();
    let text = text.strip_prefix("VSYNC=").unwrap_or(text);

    let (digits, radix) = if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        (hex, 16)
    } else if text.len() > 1 && text.starts_with('0') {
        (&text[1..], 8)
    } else {
        (text, 10)
    };

    let end = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    u64::from_str_radix(&digits[..end], radix).unwrap_or(0)
}

/// The kernel's vsync timestamp file
#[derive(Debug)]
pub struct TimestampFile {
    file: File,
    path: PathBuf,
}

impl TimestampFile {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            file: File::open(path)?,
            path: path.to_path_buf(),
        })
    }

    fn read_timestamp(&self) -> Tick {
        let mut buf = [0u8; MAX_TIMESTAMP_LEN];
        match self.file.read_at(&mut buf, 0) {
            Ok(len) => {
                let text = String::from_utf8_lossy(&buf[..len]);
                Tick::Timestamp(parse_timestamp(&text) as i64)
            }
            Err(e) => {
                let transient = matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) || e.raw_os_error() == Some(libc::EBUSY);
                if !transient {
                    error!("cannot read {}: {}", self.path.display(), e);
                }
                Tick::Skip
            }
        }
    }
}

impl TickSource for TimestampFile {
    fn next_tick(&mut self, cancel: &CancelToken) -> Tick {
        let mut fds = [
            libc::pollfd {
                fd: self.file.as_raw_fd(),
                events: libc::POLLPRI,
                revents: 0,
            },
            cancel.pollfd(),
        ];

        // SAFETY: `fds` holds two valid pollfds for the duration of the call.
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
        if ret == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted && cancel.is_cancelled() {
                return Tick::Stop;
            }
            error!("error in vsync thread: {}", err);
            return Tick::Skip;
        }

        if fds[1].revents != 0 || cancel.is_cancelled() {
            return Tick::Stop;
        }
        if fds[0].revents & libc::POLLPRI != 0 {
            return self.read_timestamp();
        }
        Tick::Skip
    }
}

/// Handle to the running timing thread
#[derive(Debug)]
pub struct VsyncThread {
    cancel: Arc<CancelToken>,
    handle: Option<JoinHandle<()>>,
}

impl VsyncThread {
    /// Probe the configuration and timestamp file, then start the thread.
    ///
    /// Falls back to synthetic ticks, and records that in `state`, when the
    /// timestamp file cannot be opened.
    pub fn start(state: Arc<VsyncState>, config: &VsyncConfig, path: &Path) -> io::Result<Self> {
        if config.fake {
            state.set_fake(true);
        }

        let file = match TimestampFile::open(path) {
            Ok(file) => Some(file),
            Err(e) => {
                error!(
                    "cannot open vsync timestamp file {}: {}; using synthetic vsync",
                    path.display(),
                    e
                );
                state.set_fake(true);
                None
            }
        };

        let source: Box<dyn TickSource> = match file {
            Some(file) if !state.fake() => Box::new(file),
            _ => Box::new(SyntheticClock::new(Duration::from_nanos(
                config.period_ns() as u64,
            ))),
        };

        info!(
            "Initializing vsync thread ({} timing)",
            if state.fake() { "synthetic" } else { "kernel" }
        );
        Self::spawn(state, source, config.log_ticks)
    }

    /// Start the thread on an explicit tick source
    pub fn spawn(
        state: Arc<VsyncState>,
        mut source: Box<dyn TickSource>,
        log_ticks: bool,
    ) -> io::Result<Self> {
        let cancel = Arc::new(CancelToken::new()?);
        let thread_cancel = cancel.clone();

        let handle = thread::Builder::new()
            .name(VSYNC_THREAD_NAME.to_string())
            .spawn(move || {
                raise_priority();
                run(&state, source.as_mut(), &thread_cancel, log_ticks);
                debug!("vsync thread exiting");
            })?;

        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Cancel the thread and wait for it to exit
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("vsync thread panicked");
            }
        }
    }
}

impl Drop for VsyncThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn raise_priority() {
    // SAFETY: adjusts the calling thread's nice value only.
    let ret = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, URGENT_DISPLAY_PRIORITY) };
    if ret == -1 {
        debug!(
            "cannot raise vsync thread priority: {}",
            io::Error::last_os_error()
        );
    }
}

/// The tick loop: wait, then deliver while enabled
fn run(state: &VsyncState, source: &mut dyn TickSource, cancel: &CancelToken, log_ticks: bool) {
    loop {
        match source.next_tick(cancel) {
            Tick::Stop => break,
            Tick::Skip => {}
            Tick::Timestamp(timestamp) => {
                if state.enabled() && state.deliver(DisplayId::Primary, timestamp) && log_ticks {
                    debug!("timestamp {} sent for {}", timestamp, DisplayId::Primary);
                }
            }
        }
        if cancel.is_cancelled() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Collector {
        ticks: Mutex<Vec<i64>>,
    }

    impl HwcProcs for Collector {
        fn vsync(&self, display: DisplayId, timestamp: i64) {
            assert_eq!(display, DisplayId::Primary);
            self.ticks.lock().push(timestamp);
        }
    }

    struct Scripted(VecDeque<Tick>);

    impl TickSource for Scripted {
        fn next_tick(&mut self, _cancel: &CancelToken) -> Tick {
            self.0.pop_front().unwrap_or(Tick::Stop)
        }
    }

    fn registered_state() -> (Arc<VsyncState>, Arc<Collector>) {
        let state = Arc::new(VsyncState::new());
        let collector = Arc::new(Collector::default());
        state.register(collector.clone());
        (state, collector)
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("41800875994\n"), 41_800_875_994);
        assert_eq!(parse_timestamp("  123abc"), 123);
        assert_eq!(parse_timestamp("VSYNC=41800875994"), 41_800_875_994);
        assert_eq!(parse_timestamp("0x1f"), 31);
        assert_eq!(parse_timestamp("017"), 15);
        assert_eq!(parse_timestamp("0"), 0);
        assert_eq!(parse_timestamp("garbage"), 0);
        assert_eq!(parse_timestamp(""), 0);
    }

    fn timestamp_file(contents: &str) -> (tempfile::NamedTempFile, TimestampFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, contents.as_bytes()).unwrap();
        let source = TimestampFile::open(file.path()).unwrap();
        (file, source)
    }

    #[test]
    fn test_timestamp_file_read() {
        let (_file, source) = timestamp_file("VSYNC=41800875994\n");
        assert_eq!(source.read_timestamp(), Tick::Timestamp(41_800_875_994));
        // Re-read from the start every time
        assert_eq!(source.read_timestamp(), Tick::Timestamp(41_800_875_994));
    }

    #[test]
    fn test_timestamp_read_error_skips_tick() {
        let dir = tempfile::tempdir().unwrap();
        let source = TimestampFile::open(dir.path()).unwrap();
        assert_eq!(source.read_timestamp(), Tick::Skip);
    }

    #[test]
    fn test_timestamp_file_stops_when_cancelled() {
        let (_file, mut source) = timestamp_file("123");
        let cancel = CancelToken::new().unwrap();
        cancel.cancel();
        assert_eq!(source.next_tick(&cancel), Tick::Stop);
    }

    #[test]
    fn test_cancel_wakes_blocked_timestamp_wait() {
        let (_file, mut source) = timestamp_file("123");
        let cancel = Arc::new(CancelToken::new().unwrap());

        let canceller = {
            let cancel = cancel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                cancel.cancel();
            })
        };

        let start = Instant::now();
        assert_eq!(source.next_tick(&cancel), Tick::Stop);
        assert!(start.elapsed() < Duration::from_secs(1));
        canceller.join().unwrap();
    }

    #[test]
    fn test_sleep_lasts_full_interval() {
        let cancel = CancelToken::new().unwrap();
        let start = Instant::now();
        assert!(!cancel.sleep(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    extern "C" fn ignore_signal(_: libc::c_int) {}

    #[test]
    fn test_sleep_resumes_after_signal() {
        // SAFETY: installs a handler that does nothing.
        unsafe { libc::signal(libc::SIGUSR1, ignore_signal as libc::sighandler_t) };

        let cancel = Arc::new(CancelToken::new().unwrap());
        let (tx, rx) = std::sync::mpsc::channel();
        let sleeper = {
            let cancel = cancel.clone();
            thread::spawn(move || {
                // SAFETY: pthread_self has no preconditions.
                tx.send(unsafe { libc::pthread_self() }).unwrap();
                let start = Instant::now();
                let cancelled = cancel.sleep(Duration::from_millis(200));
                (cancelled, start.elapsed())
            })
        };

        let tid = rx.recv().unwrap();
        thread::sleep(Duration::from_millis(50));
        // SAFETY: the sleeper thread is still alive; it sleeps 200ms.
        unsafe { libc::pthread_kill(tid, libc::SIGUSR1) };

        let (cancelled, elapsed) = sleeper.join().unwrap();
        assert!(!cancelled);
        assert!(elapsed >= Duration::from_millis(200), "woke after {:?}", elapsed);
    }

    #[test]
    fn test_delivery_only_while_enabled() {
        let (state, collector) = registered_state();
        let cancel = CancelToken::new().unwrap();

        let mut source = Scripted(VecDeque::from([Tick::Timestamp(1), Tick::Timestamp(2)]));
        run(&state, &mut source, &cancel, false);
        assert!(collector.ticks.lock().is_empty());

        state.set_enabled(true);
        let mut source = Scripted(VecDeque::from([
            Tick::Timestamp(3),
            Tick::Skip,
            Tick::Timestamp(4),
        ]));
        run(&state, &mut source, &cancel, true);
        assert_eq!(*collector.ticks.lock(), vec![3, 4]);
        assert_eq!(state.delivered(), 2);
    }

    #[test]
    fn test_ticks_without_callbacks_are_dropped() {
        let state = VsyncState::new();
        state.set_enabled(true);
        let cancel = CancelToken::new().unwrap();
        let mut source = Scripted(VecDeque::from([Tick::Timestamp(1)]));
        run(&state, &mut source, &cancel, false);
        assert_eq!(state.delivered(), 0);
    }

    #[test]
    fn test_missing_timestamp_file_falls_back_to_synthetic() {
        let (state, collector) = registered_state();
        state.set_enabled(true);

        let config = VsyncConfig::default();
        let mut vsync =
            VsyncThread::start(state.clone(), &config, Path::new("/nonexistent/fb0/vsync"))
                .unwrap();
        assert!(state.fake());
        assert!(vsync.is_running());

        thread::sleep(Duration::from_millis(200));
        vsync.shutdown();

        let ticks = collector.ticks.lock().clone();
        assert!(ticks.len() >= 3, "only {} ticks", ticks.len());
        for pair in ticks.windows(2) {
            let interval = pair[1] - pair[0];
            assert!(interval >= 16_000_000, "interval {}ns", interval);
        }
    }

    #[test]
    fn test_forced_synthetic_timing() {
        let state = Arc::new(VsyncState::new());
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = VsyncConfig {
            fake: true,
            ..Default::default()
        };

        let vsync = VsyncThread::start(state.clone(), &config, file.path()).unwrap();
        assert!(state.fake());
        drop(vsync);
    }

    #[test]
    fn test_shutdown_is_prompt() {
        let state = Arc::new(VsyncState::new());
        let mut vsync = VsyncThread::spawn(
            state,
            Box::new(SyntheticClock::new(Duration::from_secs(10))),
            false,
        )
        .unwrap();

        let start = Instant::now();
        vsync.shutdown();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(!vsync.is_running());
    }

    #[test]
    fn test_cancelled_token_stops_sleep_immediately() {
        let cancel = CancelToken::new().unwrap();
        cancel.cancel();
        cancel.cancel();
        assert!(cancel.sleep(Duration::from_secs(10)));
        assert_eq!(SyntheticClock::sixty_hz().next_tick(&cancel), Tick::Stop);
    }

    #[test]
    fn test_reregistration_replaces_callbacks() {
        let (state, first) = registered_state();
        let second = Arc::new(Collector::default());
        assert!(state.register(second.clone()));
        state.set_enabled(true);

        let cancel = CancelToken::new().unwrap();
        let mut source = Scripted(VecDeque::from([Tick::Timestamp(9)]));
        run(&state, &mut source, &cancel, false);

        assert!(first.ticks.lock().is_empty());
        assert_eq!(*second.ticks.lock(), vec![9]);
    }
}
