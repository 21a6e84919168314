//! Color conversion contract
//!
//! When overlay presentation of decoder output is disabled, the classifier
//! asks a 2D blit engine to rewrite the decoder's buffer in place as an
//! RGBA surface the GPU path can composite. The engine itself is an external
//! collaborator behind [`ColorConverter`]; this module owns the request it
//! receives.

use log::{debug, warn};

use crate::error::{HwcError, HwcResult};
use crate::layer::{BufferHandle, Rect, VideoFrame};

/// Largest decoded frame the blit engine accepts
pub const MAX_FRAME_WIDTH: u32 = 3840;
pub const MAX_FRAME_HEIGHT: u32 = 2160;

/// Bus address the decoder reports for a frame with no backing memory
pub const INVALID_BUS_ADDR: u32 = 0xFFFF_FFFF;

/// Offset between decoder bus addresses and the blit engine's view of memory
const BLIT_ADDR_OFFSET: u32 = 0x6000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlitFormat {
    /// YCbCr 4:2:0 semi-planar
    YCbCr420Sp,
    Rgba8888,
}

/// One side of a blit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlitImage {
    pub format: BlitFormat,
    /// Luma (or packed RGB) plane address
    pub yrgb_addr: u32,
    pub uv_addr: u32,
    pub v_addr: u32,
    /// Allocated extent
    pub vir_w: u32,
    pub vir_h: u32,
    /// Region taking part in the blit
    pub rect: Rect,
}

/// A decoder-output to RGBA blit, BT.601 limited range through the IOMMU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlitRequest {
    pub src: BlitImage,
    pub dst: BlitImage,
}

fn align16(v: u32) -> u32 {
    (v + 15) & !15
}

impl BlitRequest {
    /// Build the in-place conversion request for a decoder buffer shown at
    /// `display_frame`.
    pub fn for_video(
        handle: &BufferHandle,
        frame: &VideoFrame,
        display_frame: &Rect,
    ) -> HwcResult<Self> {
        if frame.frame_width > MAX_FRAME_WIDTH
            || frame.frame_height > MAX_FRAME_HEIGHT
            || frame.bus_addr[0] == INVALID_BUS_ADDR
        {
            return Err(HwcError::Convert(format!(
                "frame {}x{} at {:#x} cannot be converted",
                frame.frame_width, frame.frame_height, frame.bus_addr[0]
            )));
        }

        let vir_w = align16(frame.frame_width);
        let vir_h = align16(frame.frame_height);
        let yrgb_addr = frame.bus_addr[0].wrapping_add(BLIT_ADDR_OFFSET);
        let uv_addr = yrgb_addr.wrapping_add(vir_w * vir_h);

        let src = BlitImage {
            format: BlitFormat::YCbCr420Sp,
            yrgb_addr,
            uv_addr,
            v_addr: uv_addr,
            vir_w,
            vir_h,
            rect: Rect::from_size(frame.display_width, frame.display_height),
        };

        let dst_w = (display_frame.width().max(0) as u32).min(handle.width);
        let dst_h = (display_frame.height().max(0) as u32).min(handle.height);
        let dst = BlitImage {
            format: BlitFormat::Rgba8888,
            yrgb_addr: handle.base,
            uv_addr: 0,
            v_addr: 0,
            vir_w: (handle.width.wrapping_mul(2).wrapping_add(7) & !7) / 2,
            vir_h: handle.height,
            rect: Rect::from_size(dst_w, dst_h),
        };

        Ok(Self { src, dst })
    }
}

/// A 2D blit engine
pub trait ColorConverter: Send {
    fn blit(&mut self, request: &BlitRequest) -> HwcResult<()>;
}

/// Converter for setups without a blit engine: accepts and logs every request
#[derive(Debug, Default)]
pub struct LoggingConverter {
    blits: u64,
}

impl LoggingConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blits(&self) -> u64 {
        self.blits
    }
}

impl ColorConverter for LoggingConverter {
    fn blit(&mut self, request: &BlitRequest) -> HwcResult<()> {
        self.blits += 1;
        if self.blits == 1 {
            warn!("no blit engine configured; decoder frames are not converted");
        }
        debug!(
            "blit {:#x} {}x{} -> {:#x} {}x{}",
            request.src.yrgb_addr,
            request.src.rect.width(),
            request.src.rect.height(),
            request.dst.yrgb_addr,
            request.dst.rect.width(),
            request.dst.rect.height()
        );
        Ok(())
    }
}
