//! Headless framebuffer
//!
//! An in-memory [`FramebufferDevice`] that keeps a mode info per device node
//! and appends every control call to a shared [`Journal`]. It backs the
//! `--headless` mode of the daemon and lets tests assert the exact sequence
//! of hardware calls a frame produced. Failures can be injected per call
//! kind and per device node.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use super::{DeviceOpener, FixScreenInfo, FramebufferDevice, VarScreenInfo};

/// A recorded control call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FbCall {
    Open,
    GetVar,
    PutVar(VarScreenInfo),
    GetFix,
    SetYuvAddr([u32; 2]),
    SetPlaneEnabled(bool),
    SetOverlayState(bool),
    SetVsyncEnabled(bool),
    Close,
}

/// Call kinds that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FbOp {
    Open,
    GetVar,
    PutVar,
    GetFix,
    SetYuvAddr,
    SetPlaneEnabled,
    SetOverlayState,
    SetVsyncEnabled,
}

#[derive(Debug, Default)]
struct JournalInner {
    calls: Vec<(PathBuf, FbCall)>,
    failures: HashSet<(PathBuf, FbOp)>,
}

/// Shared call log and failure table for a family of headless devices
#[derive(Debug, Clone, Default)]
pub struct Journal {
    inner: Arc<Mutex<JournalInner>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, path: &Path, call: FbCall) {
        trace!("{}: {:?}", path.display(), call);
        self.inner.lock().calls.push((path.to_path_buf(), call));
    }

    /// Record `call` unless a failure is armed for it
    fn attempt(&self, path: &Path, op: FbOp, call: FbCall) -> io::Result<()> {
        let mut inner = self.inner.lock();
        inner.calls.push((path.to_path_buf(), call));
        if inner.failures.contains(&(path.to_path_buf(), op)) {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        Ok(())
    }

    /// Make every `op` on `path` fail with `EIO` until cleared
    pub fn fail(&self, path: impl AsRef<Path>, op: FbOp) {
        self.inner
            .lock()
            .failures
            .insert((path.as_ref().to_path_buf(), op));
    }

    pub fn clear_failures(&self) {
        self.inner.lock().failures.clear();
    }

    /// All calls so far, in order
    pub fn calls(&self) -> Vec<(PathBuf, FbCall)> {
        self.inner.lock().calls.clone()
    }

    /// Calls issued on one device node, in order
    pub fn calls_for(&self, path: impl AsRef<Path>) -> Vec<FbCall> {
        let path = path.as_ref();
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, call)| call.clone())
            .collect()
    }

    /// Forget recorded calls, keeping armed failures
    pub fn clear(&self) {
        self.inner.lock().calls.clear();
    }
}

/// Mode geometry a headless device starts with
#[derive(Debug, Clone, Copy)]
pub struct HeadlessMode {
    pub xres: u32,
    pub yres: u32,
    /// Physical size in mm, zero when unknown
    pub width_mm: u32,
    pub height_mm: u32,
    pub bytes_per_pixel: u32,
    /// Number of full screens backing the framebuffer
    pub buffers: u32,
}

impl Default for HeadlessMode {
    fn default() -> Self {
        Self {
            xres: 1280,
            yres: 720,
            width_mm: 0,
            height_mm: 0,
            bytes_per_pixel: 4,
            buffers: 2,
        }
    }
}

/// In-memory framebuffer device
#[derive(Debug)]
pub struct HeadlessFramebuffer {
    path: PathBuf,
    journal: Journal,
    var: Mutex<VarScreenInfo>,
    fix: FixScreenInfo,
}

impl HeadlessFramebuffer {
    pub fn new(path: impl Into<PathBuf>, mode: HeadlessMode, journal: Journal) -> Self {
        let line_length = mode.xres * mode.bytes_per_pixel;
        let var = VarScreenInfo {
            xres: mode.xres,
            yres: mode.yres,
            xres_virtual: mode.xres,
            yres_virtual: mode.yres * mode.buffers,
            bits_per_pixel: mode.bytes_per_pixel * 8,
            width: mode.width_mm,
            height: mode.height_mm,
            ..Default::default()
        };
        let fix = FixScreenInfo {
            smem_len: line_length * mode.yres * mode.buffers,
            line_length,
            ..Default::default()
        };

        Self {
            path: path.into(),
            journal,
            var: Mutex::new(var),
            fix,
        }
    }
}

impl FramebufferDevice for HeadlessFramebuffer {
    fn var_screeninfo(&self) -> io::Result<VarScreenInfo> {
        self.journal.attempt(&self.path, FbOp::GetVar, FbCall::GetVar)?;
        Ok(*self.var.lock())
    }

    fn put_var_screeninfo(&self, info: &VarScreenInfo) -> io::Result<()> {
        self.journal
            .attempt(&self.path, FbOp::PutVar, FbCall::PutVar(*info))?;
        *self.var.lock() = *info;
        Ok(())
    }

    fn fix_screeninfo(&self) -> io::Result<FixScreenInfo> {
        self.journal.attempt(&self.path, FbOp::GetFix, FbCall::GetFix)?;
        Ok(self.fix)
    }

    fn set_yuv_addr(&self, addr: [u32; 2]) -> io::Result<()> {
        self.journal
            .attempt(&self.path, FbOp::SetYuvAddr, FbCall::SetYuvAddr(addr))
    }

    fn set_plane_enabled(&self, enabled: bool) -> io::Result<()> {
        self.journal.attempt(
            &self.path,
            FbOp::SetPlaneEnabled,
            FbCall::SetPlaneEnabled(enabled),
        )
    }

    fn set_overlay_state(&self, enabled: bool) -> io::Result<()> {
        self.journal.attempt(
            &self.path,
            FbOp::SetOverlayState,
            FbCall::SetOverlayState(enabled),
        )
    }

    fn set_vsync_enabled(&self, enabled: bool) -> io::Result<()> {
        self.journal.attempt(
            &self.path,
            FbOp::SetVsyncEnabled,
            FbCall::SetVsyncEnabled(enabled),
        )
    }
}

impl Drop for HeadlessFramebuffer {
    fn drop(&mut self) {
        self.journal.record(&self.path, FbCall::Close);
    }
}

/// Opens [`HeadlessFramebuffer`]s sharing one journal
#[derive(Debug, Clone, Default)]
pub struct HeadlessOpener {
    journal: Journal,
    mode: HeadlessMode,
}

impl HeadlessOpener {
    pub fn new(mode: HeadlessMode) -> Self {
        Self {
            journal: Journal::new(),
            mode,
        }
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }
}

impl DeviceOpener for HeadlessOpener {
    fn open(&self, path: &Path) -> io::Result<Box<dyn FramebufferDevice>> {
        self.journal.attempt(path, FbOp::Open, FbCall::Open)?;
        Ok(Box::new(HeadlessFramebuffer::new(
            path,
            self.mode,
            self.journal.clone(),
        )))
    }
}
