//! Framebuffer kernel boundary
//!
//! Everything that talks to a framebuffer device node goes through the
//! [`FramebufferDevice`] trait: the standard mode-info get/put calls plus the
//! vendor extensions used by the composer (YUV buffer address, plane enable,
//! overlay subsystem state, vsync interrupt enable).
//!
//! Two implementations are provided:
//!
//! - [`FbDevice`]: the real thing, `ioctl(2)` on an opened device node
//! - [`headless::HeadlessFramebuffer`]: an in-memory device that journals
//!   every call, used by `--headless` runs and by the test suites
//!
//! Devices are opened through a [`DeviceOpener`] so the video plane can be
//! opened lazily on first use without the composer knowing which kind of
//! device it is talking to.

pub mod headless;
mod ioctl;

use std::io;
use std::path::Path;

pub use ioctl::{FbDevice, FbDeviceOpener};

/// Apply the mode change immediately
pub const FB_ACTIVATE_NOW: u32 = 0;
/// Apply the mode change even if nothing seems to have changed
pub const FB_ACTIVATE_FORCE: u32 = 128;

/// One colour channel layout inside a pixel (`struct fb_bitfield`)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FbBitfield {
    pub offset: u32,
    pub length: u32,
    pub msb_right: u32,
}

/// Variable mode info (`struct fb_var_screeninfo`)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VarScreenInfo {
    pub xres: u32,
    pub yres: u32,
    pub xres_virtual: u32,
    pub yres_virtual: u32,
    pub xoffset: u32,
    pub yoffset: u32,
    pub bits_per_pixel: u32,
    pub grayscale: u32,
    pub red: FbBitfield,
    pub green: FbBitfield,
    pub blue: FbBitfield,
    pub transp: FbBitfield,
    pub nonstd: u32,
    pub activate: u32,
    /// Physical height in mm
    pub height: u32,
    /// Physical width in mm
    pub width: u32,
    pub accel_flags: u32,
    pub pixclock: u32,
    pub left_margin: u32,
    pub right_margin: u32,
    pub upper_margin: u32,
    pub lower_margin: u32,
    pub hsync_len: u32,
    pub vsync_len: u32,
    pub sync: u32,
    pub vmode: u32,
    pub rotate: u32,
    pub colorspace: u32,
    pub reserved: [u32; 4],
}

/// Fixed mode info (`struct fb_fix_screeninfo`)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixScreenInfo {
    pub id: [u8; 16],
    pub smem_start: libc::c_ulong,
    pub smem_len: u32,
    pub type_: u32,
    pub type_aux: u32,
    pub visual: u32,
    pub xpanstep: u16,
    pub ypanstep: u16,
    pub ywrapstep: u16,
    /// Bytes per scan line
    pub line_length: u32,
    pub mmio_start: libc::c_ulong,
    pub mmio_len: u32,
    pub accel: u32,
    pub capabilities: u16,
    pub reserved: [u16; 2],
}

/// Control surface of a framebuffer plane
pub trait FramebufferDevice: Send {
    /// Read the current mode info
    fn var_screeninfo(&self) -> io::Result<VarScreenInfo>;

    /// Commit a mode info
    fn put_var_screeninfo(&self, info: &VarScreenInfo) -> io::Result<()>;

    fn fix_screeninfo(&self) -> io::Result<FixScreenInfo>;

    /// Program the physical (luma, chroma) addresses of a YUV buffer
    fn set_yuv_addr(&self, addr: [u32; 2]) -> io::Result<()>;

    /// Enable or disable this plane's contribution to the blended output
    fn set_plane_enabled(&self, enabled: bool) -> io::Result<()>;

    /// Switch the overlay subsystem on or off
    fn set_overlay_state(&self, enabled: bool) -> io::Result<()>;

    /// Enable or disable vsync interrupt reporting
    fn set_vsync_enabled(&self, enabled: bool) -> io::Result<()>;
}

/// Opens framebuffer device nodes
pub trait DeviceOpener: Send + Sync {
    fn open(&self, path: &Path) -> io::Result<Box<dyn FramebufferDevice>>;
}
