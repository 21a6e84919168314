//! Layer Classifier (prepare phase)
//!
//! Only decoder output is reclassified. Every other layer keeps the
//! composition type the client assigned. For a decoder buffer, exactly one
//! of two things happens, chosen by the overlay policy at call time:
//!
//! - overlay enabled: the layer becomes [`CompositionType::Overlay`] and asks
//!   the client to clear the framebuffer beneath it
//! - overlay disabled: the buffer is converted to RGBA in place and the
//!   layer stays on the GPU/CPU composition path

use log::{debug, warn};

use crate::convert::{BlitRequest, ColorConverter};
use crate::layer::{CompositionType, DisplayContents, Layer, LayerHints};

/// What a classify pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Classification {
    /// Layers moved to the video plane
    pub overlays: usize,
    /// Layers handed to the color converter
    pub conversions: usize,
}

/// Classify every layer of one frame
pub fn classify_layers(
    contents: &mut DisplayContents,
    use_overlay: bool,
    converter: &mut dyn ColorConverter,
) -> Classification {
    let mut result = Classification::default();

    for (index, layer) in contents.layers.iter_mut().enumerate() {
        let Some(handle) = layer.handle.as_ref() else {
            continue;
        };
        debug!("layer {} format {:?}", index, handle.format);

        if !handle.format.is_video() {
            continue;
        }

        if use_overlay {
            layer.composition_type = CompositionType::Overlay;
            layer.hints |= LayerHints::CLEAR_FB;
            result.overlays += 1;
        } else {
            if convert_in_place(index, layer, converter) {
                result.conversions += 1;
            }
        }
    }

    result
}

/// Hand the layer's buffer to the converter; returns whether a blit was issued
fn convert_in_place(index: usize, layer: &Layer, converter: &mut dyn ColorConverter) -> bool {
    let Some(handle) = layer.handle.as_ref() else {
        return false;
    };
    let Some(frame) = handle.video_frame.as_ref() else {
        warn!("layer {}: decoder buffer without frame descriptor", index);
        return false;
    };

    let request = match BlitRequest::for_video(handle, frame, &layer.display_frame) {
        Ok(request) => request,
        Err(e) => {
            warn!("layer {}: {}", index, e);
            return false;
        }
    };
    if let Err(e) = converter.blit(&request) {
        warn!("layer {}: {}", index, e);
    }
    true
}
