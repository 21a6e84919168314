//! Layers and frame lists
//!
//! A [`Layer`] is one surface submitted for a frame. The client owns it for a
//! single prepare/set cycle; the composer only borrows the list during each
//! call and never keeps a buffer handle past `set`.

use bitflags::bitflags;

use crate::fence::AcquireFence;

/// Buffer pixel formats understood by the composer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba8888,
    Rgbx8888,
    Rgb888,
    Rgb565,
    Bgra8888,
    /// YCrCb 4:2:0 semi-planar
    YCrCbNv12,
    /// Decoder output: the buffer carries a [`VideoFrame`] descriptor
    /// instead of pixels
    YCrCbNv12Video,
    Other(u32),
}

impl PixelFormat {
    /// Gralloc format code
    pub fn code(self) -> u32 {
        match self {
            PixelFormat::Rgba8888 => 1,
            PixelFormat::Rgbx8888 => 2,
            PixelFormat::Rgb888 => 3,
            PixelFormat::Rgb565 => 4,
            PixelFormat::Bgra8888 => 5,
            PixelFormat::YCrCbNv12 => 0x20,
            PixelFormat::YCrCbNv12Video => 0x21,
            PixelFormat::Other(code) => code,
        }
    }

    /// Whether buffers of this format come straight from the video decoder
    pub fn is_video(self) -> bool {
        self == PixelFormat::YCrCbNv12Video
    }
}

impl From<u32> for PixelFormat {
    fn from(code: u32) -> Self {
        match code {
            1 => PixelFormat::Rgba8888,
            2 => PixelFormat::Rgbx8888,
            3 => PixelFormat::Rgb888,
            4 => PixelFormat::Rgb565,
            5 => PixelFormat::Bgra8888,
            0x20 => PixelFormat::YCrCbNv12,
            0x21 => PixelFormat::YCrCbNv12Video,
            other => PixelFormat::Other(other),
        }
    }
}

/// Decoded video frame descriptor written by the decoder into its output buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoFrame {
    /// Physical (luma, chroma) plane addresses
    pub bus_addr: [u32; 2],
    /// Decoded extent, including alignment padding
    pub frame_width: u32,
    pub frame_height: u32,
    /// Visible extent
    pub display_width: u32,
    pub display_height: u32,
}

/// A buffer handle as seen by the composer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferHandle {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Base address of the mapping
    pub base: u32,
    /// Byte offset into display memory (framebuffer targets)
    pub offset: u32,
    /// Present on decoder output buffers
    pub video_frame: Option<VideoFrame>,
}

impl BufferHandle {
    /// A plain pixel buffer
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            base: 0,
            offset: 0,
            video_frame: None,
        }
    }

    /// A decoder output buffer carrying `frame`
    pub fn video(frame: VideoFrame, width: u32, height: u32) -> Self {
        Self {
            video_frame: Some(frame),
            ..Self::new(PixelFormat::YCrCbNv12Video, width, height)
        }
    }

    /// A slice of the framebuffer starting `offset` bytes into display memory
    pub fn framebuffer(width: u32, height: u32, offset: u32) -> Self {
        Self {
            offset,
            ..Self::new(PixelFormat::Rgba8888, width, height)
        }
    }

    pub fn with_base(mut self, base: u32) -> Self {
        self.base = base;
        self
    }
}

/// Integer rectangle, right/bottom exclusive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Rectangle at the origin with the given extent
    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    /// Horizontal extent; wraps on out-of-range client rectangles
    pub fn width(&self) -> i32 {
        self.right.wrapping_sub(self.left)
    }

    pub fn height(&self) -> i32 {
        self.bottom.wrapping_sub(self.top)
    }
}

/// Which path presents a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositionType {
    /// Composited by the GPU/CPU into the framebuffer target
    #[default]
    Framebuffer,
    /// Scanned out directly from the video plane
    Overlay,
    /// The composited result of all framebuffer layers
    FramebufferTarget,
}

bitflags! {
    /// Hints from the composer to the client
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LayerHints: u32 {
        /// Clear the framebuffer under this layer so the overlay shows through
        const CLEAR_FB = 0x0000_0002;
    }
}

/// One surface for one frame
#[derive(Debug, Default)]
pub struct Layer {
    pub composition_type: CompositionType,
    pub hints: LayerHints,
    pub handle: Option<BufferHandle>,
    pub source_crop: Rect,
    pub display_frame: Rect,
    /// Signalled when the producer finished writing; `None` means ready
    pub acquire_fence: Option<AcquireFence>,
}

impl Layer {
    pub fn new(composition_type: CompositionType, handle: Option<BufferHandle>) -> Self {
        Self {
            composition_type,
            handle,
            ..Default::default()
        }
    }

    pub fn with_display_frame(mut self, frame: Rect) -> Self {
        self.display_frame = frame;
        self
    }

    pub fn with_acquire_fence(mut self, fence: AcquireFence) -> Self {
        self.acquire_fence = Some(fence);
        self
    }
}

/// The ordered layer list of one display for one frame
#[derive(Debug, Default)]
pub struct DisplayContents {
    pub layers: Vec<Layer>,
}

impl DisplayContents {
    pub fn new(layers: Vec<Layer>) -> Self {
        Self { layers }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_codes_roundtrip_known_formats() {
        for format in [
            PixelFormat::Rgba8888,
            PixelFormat::Bgra8888,
            PixelFormat::YCrCbNv12,
            PixelFormat::YCrCbNv12Video,
        ] {
            assert_eq!(PixelFormat::from(format.code()), format);
        }
        assert_eq!(PixelFormat::from(0x7f), PixelFormat::Other(0x7f));
    }

    #[test]
    fn test_only_decoder_output_is_video() {
        assert!(PixelFormat::YCrCbNv12Video.is_video());
        assert!(!PixelFormat::YCrCbNv12.is_video());
        assert!(!PixelFormat::Rgba8888.is_video());
    }

    #[test]
    fn test_rect_extent() {
        let rect = Rect::new(100, 50, 740, 530);
        assert_eq!(rect.width(), 640);
        assert_eq!(rect.height(), 480);
        assert_eq!(Rect::from_size(1280, 720), Rect::new(0, 0, 1280, 720));
    }

    #[test]
    fn test_rect_extent_wraps_instead_of_overflowing() {
        let rect = Rect::new(-10, i32::MIN, i32::MAX, i32::MAX);
        assert_eq!(rect.width(), i32::MAX.wrapping_add(10));
        assert_eq!(rect.height(), -1);
    }

    #[test]
    fn test_layer_defaults_to_framebuffer_without_hints() {
        let layer = Layer::new(CompositionType::Framebuffer, None);
        assert_eq!(layer.composition_type, CompositionType::Framebuffer);
        assert!(layer.hints.is_empty());
        assert!(layer.acquire_fence.is_none());
    }
}
