use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use log::debug;

use super::{DeviceOpener, FixScreenInfo, FramebufferDevice, VarScreenInfo};

const FBIOGET_VSCREENINFO: u32 = 0x4600;
const FBIOPUT_VSCREENINFO: u32 = 0x4601;
const FBIOGET_FSCREENINFO: u32 = 0x4602;

// Vendor extensions of the display controller driver
const RK_FBIOSET_YUV_ADDR: u32 = 0x5002;
const RK_FBIOSET_OVERLAY_STATE: u32 = 0x5018;
const RK_FBIOSET_ENABLE: u32 = 0x5019;
const RK_FBIOSET_VSYNC_ENABLE: u32 = 0x4629;

/// A framebuffer device node driven through `ioctl(2)`
#[derive(Debug)]
pub struct FbDevice {
    file: File,
    path: PathBuf,
}

impl FbDevice {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        debug!("opened {} as fd {}", path.display(), file.as_raw_fd());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Issue one control call with `arg` as the in/out argument
    fn ioctl<T>(&self, request: u32, arg: *mut T) -> io::Result<()> {
        // SAFETY: `arg` points at a live, correctly sized argument for
        // `request` for the duration of the call.
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), request as _, arg) };
        if ret == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn ioctl_flag(&self, request: u32, enabled: bool) -> io::Result<()> {
        let mut value: libc::c_int = enabled.into();
        self.ioctl(request, &mut value)
    }
}

impl FramebufferDevice for FbDevice {
    fn var_screeninfo(&self) -> io::Result<VarScreenInfo> {
        let mut info = VarScreenInfo::default();
        self.ioctl(FBIOGET_VSCREENINFO, &mut info)?;
        Ok(info)
    }

    fn put_var_screeninfo(&self, info: &VarScreenInfo) -> io::Result<()> {
        let mut info = *info;
        self.ioctl(FBIOPUT_VSCREENINFO, &mut info)
    }

    fn fix_screeninfo(&self) -> io::Result<FixScreenInfo> {
        let mut info = FixScreenInfo::default();
        self.ioctl(FBIOGET_FSCREENINFO, &mut info)?;
        Ok(info)
    }

    fn set_yuv_addr(&self, addr: [u32; 2]) -> io::Result<()> {
        let mut addr = addr;
        self.ioctl(RK_FBIOSET_YUV_ADDR, addr.as_mut_ptr())
    }

    fn set_plane_enabled(&self, enabled: bool) -> io::Result<()> {
        self.ioctl_flag(RK_FBIOSET_ENABLE, enabled)
    }

    fn set_overlay_state(&self, enabled: bool) -> io::Result<()> {
        self.ioctl_flag(RK_FBIOSET_OVERLAY_STATE, enabled)
    }

    fn set_vsync_enabled(&self, enabled: bool) -> io::Result<()> {
        self.ioctl_flag(RK_FBIOSET_VSYNC_ENABLE, enabled)
    }
}

/// Opens real device nodes
#[derive(Debug, Default, Clone, Copy)]
pub struct FbDeviceOpener;

impl DeviceOpener for FbDeviceOpener {
    fn open(&self, path: &Path) -> io::Result<Box<dyn FramebufferDevice>> {
        Ok(Box::new(FbDevice::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn test_mode_info_layout_matches_kernel() {
        // struct fb_var_screeninfo is 40 u32 words
        assert_eq!(size_of::<VarScreenInfo>(), 160);
        #[cfg(target_pointer_width = "64")]
        assert_eq!(size_of::<FixScreenInfo>(), 80);
        #[cfg(target_pointer_width = "32")]
        assert_eq!(size_of::<FixScreenInfo>(), 68);
    }

    #[test]
    fn test_open_missing_node_fails() {
        match FbDeviceOpener.open(Path::new("/nonexistent/graphics/fb9")) {
            Ok(_) => panic!("opened a missing device node"),
            Err(err) => assert_eq!(err.kind(), io::ErrorKind::NotFound),
        }
    }

    #[test]
    fn test_control_call_on_regular_file_fails() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let dev = FbDevice::open(file.path()).unwrap();
        assert_eq!(dev.path(), file.path());
        let err = dev.var_screeninfo().unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOTTY));
    }
}
