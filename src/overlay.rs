//! Video plane programming
//!
//! Presents a decoder frame on the video plane. The plane device is opened
//! lazily on the first overlay layer and closed again by the composer once
//! video disappears from the layer list.
//!
//! The display controller driver takes the destination rectangle through
//! otherwise unused mode-info fields: the origin is packed into `nonstd`
//! and the extent into `grayscale`, both above the low byte. That encoding
//! stays inside [`encode_plane_geometry`].

use std::path::Path;

use log::debug;

use crate::display::Display;
use crate::error::{HwcError, HwcResult};
use crate::fb::{DeviceOpener, VarScreenInfo, FB_ACTIVATE_FORCE, FB_ACTIVATE_NOW};
use crate::layer::{Layer, PixelFormat, Rect, VideoFrame};

/// Write `frame`'s geometry and the destination rectangle into `info`
pub fn encode_plane_geometry(info: &mut VarScreenInfo, frame: &VideoFrame, dst: &Rect) {
    info.activate = FB_ACTIVATE_NOW | FB_ACTIVATE_FORCE;
    info.xoffset = 0;
    info.yoffset = 0;
    info.xres = frame.display_width;
    info.yres = frame.display_height;
    info.xres_virtual = frame.frame_width;
    info.yres_virtual = frame.frame_height;

    // Low byte of nonstd selects the plane format, low byte of grayscale is preserved
    let origin = ((dst.left as u32) << 8).wrapping_add((dst.top as u32) << 20);
    let extent = ((dst.width() as u32) << 8).wrapping_add((dst.height() as u32) << 20);
    info.nonstd = (PixelFormat::YCrCbNv12.code() & 0xff) | origin;
    info.grayscale = (info.grayscale & 0xff) | extent;
}

/// Programs the video plane, remembering the last buffer address it set
#[derive(Debug, Default)]
pub struct VideoPlane {
    last_addr: Option<[u32; 2]>,
}

impl VideoPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer address most recently programmed
    pub fn last_addr(&self) -> Option<[u32; 2]> {
        self.last_addr
    }

    /// Forget the cached address so the next frame programs it again
    pub fn reset(&mut self) {
        self.last_addr = None;
    }

    /// Present `layer` on `display`'s video plane, opening it through
    /// `opener` at `path` if needed.
    ///
    /// Layers that are not decoder output are ignored.
    pub fn program(
        &mut self,
        display: &mut Display,
        opener: &dyn DeviceOpener,
        path: &Path,
        layer: &Layer,
    ) -> HwcResult<()> {
        let Some(frame) = layer
            .handle
            .as_ref()
            .filter(|handle| handle.format.is_video())
            .and_then(|handle| handle.video_frame.as_ref())
        else {
            debug!("overlay layer without decoder frame, skipping");
            return Ok(());
        };

        let device = match display.video.take() {
            Some(device) => device,
            None => {
                let device = opener.open(path).map_err(|source| HwcError::DeviceOpen {
                    path: path.to_path_buf(),
                    source,
                })?;
                debug!("video plane {} opened", path.display());
                device
            }
        };
        let device = display.video.insert(device);

        let dst = &layer.display_frame;
        debug!(
            "video frame {:#x} {}x{} (visible {}x{}) -> {:?}",
            frame.bus_addr[0],
            frame.frame_width,
            frame.frame_height,
            frame.display_width,
            frame.display_height,
            dst
        );

        let mut info = device
            .var_screeninfo()
            .map_err(|e| HwcError::ioctl("FBIOGET_VSCREENINFO", e))?;
        encode_plane_geometry(&mut info, frame, dst);

        if self.last_addr.map(|addr| addr[0]) != Some(frame.bus_addr[0]) {
            device
                .set_yuv_addr(frame.bus_addr)
                .map_err(|e| HwcError::ioctl("RK_FBIOSET_YUV_ADDR", e))?;
            self.last_addr = Some(frame.bus_addr);
        }

        device
            .put_var_screeninfo(&info)
            .map_err(|e| HwcError::ioctl("FBIOPUT_VSCREENINFO", e))
    }
}
