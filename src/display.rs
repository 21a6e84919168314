//! Display Attribute Store
//!
//! One slot per physical display, indexed by [`DisplayId`]. The primary slot
//! is populated once at open time from the primary framebuffer's mode info;
//! the activation flag and the video-plane handle are mutated every frame by
//! the composition path only. Nothing here is touched by the vsync thread.

use std::fmt;

use log::debug;
use serde::Serialize;

use crate::error::{HwcError, HwcResult};
use crate::fb::{FixScreenInfo, FramebufferDevice, VarScreenInfo};

/// Number of display slots (primary, external, virtual)
pub const MAX_DISPLAYS: usize = 3;

/// Display slot index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(usize)]
pub enum DisplayId {
    Primary = 0,
    External = 1,
    Virtual = 2,
}

impl DisplayId {
    pub const ALL: [DisplayId; MAX_DISPLAYS] =
        [DisplayId::Primary, DisplayId::External, DisplayId::Virtual];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Resolve a raw slot index
    pub fn from_index(index: usize) -> HwcResult<Self> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or(HwcError::InvalidDisplay(index))
    }
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DisplayId::Primary => "primary",
            DisplayId::External => "external",
            DisplayId::Virtual => "virtual",
        };
        f.write_str(name)
    }
}

/// Queryable display attributes, numbered as in the composer protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DisplayAttribute {
    VsyncPeriod = 1,
    Width = 2,
    Height = 3,
    DpiX = 4,
    DpiY = 5,
}

impl TryFrom<u32> for DisplayAttribute {
    type Error = HwcError;

    fn try_from(raw: u32) -> HwcResult<Self> {
        match raw {
            1 => Ok(DisplayAttribute::VsyncPeriod),
            2 => Ok(DisplayAttribute::Width),
            3 => Ok(DisplayAttribute::Height),
            4 => Ok(DisplayAttribute::DpiX),
            5 => Ok(DisplayAttribute::DpiY),
            other => Err(HwcError::UnsupportedAttribute(other)),
        }
    }
}

/// Static and dynamic facts about one display
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DisplayAttributes {
    /// Vsync period in nanoseconds
    pub vsync_period: u32,
    pub xres: u32,
    pub yres: u32,
    /// Scan-line length in bytes
    pub stride: u32,
    pub xdpi: f32,
    pub ydpi: f32,
    /// Hot-pluggable displays only
    pub connected: bool,
    /// Whether the base plane is enabled and blended with the overlay
    pub is_active: bool,
    /// Composition bypassed (wireless displays only)
    pub is_pause: bool,
}

impl DisplayAttributes {
    /// Derive the primary display's attributes from its mode info.
    ///
    /// Drivers that report no physical size get `default_dpi`.
    pub fn from_mode_info(
        var: &VarScreenInfo,
        fix: &FixScreenInfo,
        vsync_period: u32,
        default_dpi: f32,
    ) -> Self {
        let mm_for = |res: u32| ((res as f32 * 25.4) / default_dpi + 0.5) as u32;
        let width_mm = if (var.width as i32) <= 0 { mm_for(var.xres) } else { var.width };
        let height_mm = if (var.height as i32) <= 0 { mm_for(var.yres) } else { var.height };

        let dpi = |res: u32, mm: u32| {
            if mm == 0 {
                default_dpi
            } else {
                (res as f32 * 25.4) / mm as f32
            }
        };

        Self {
            vsync_period,
            xres: var.xres,
            yres: var.yres,
            stride: fix.line_length,
            xdpi: dpi(var.xres, width_mm),
            ydpi: dpi(var.yres, height_mm),
            connected: true,
            is_active: true,
            is_pause: false,
        }
    }

    /// Value of one attribute as reported to the client (DPI scaled by 1000)
    pub fn value(&self, attribute: DisplayAttribute) -> i32 {
        match attribute {
            DisplayAttribute::VsyncPeriod => self.vsync_period as i32,
            DisplayAttribute::Width => self.xres as i32,
            DisplayAttribute::Height => self.yres as i32,
            DisplayAttribute::DpiX => (self.xdpi * 1000.0) as i32,
            DisplayAttribute::DpiY => (self.ydpi * 1000.0) as i32,
        }
    }
}

/// A display slot: attributes plus the plane devices it owns
#[derive(Default)]
pub struct Display {
    pub attrs: DisplayAttributes,
    /// Primary framebuffer, present once the display is opened
    pub primary: Option<Box<dyn FramebufferDevice>>,
    /// Video plane; `None` while closed
    pub video: Option<Box<dyn FramebufferDevice>>,
}

impl fmt::Debug for Display {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Display")
            .field("attrs", &self.attrs)
            .field("primary_open", &self.primary.is_some())
            .field("video_open", &self.video.is_some())
            .finish()
    }
}

/// Fixed-size store of display slots
#[derive(Debug, Default)]
pub struct DisplayStore {
    slots: [Display; MAX_DISPLAYS],
}

impl DisplayStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: DisplayId) -> &Display {
        &self.slots[id.index()]
    }

    pub fn get_mut(&mut self, id: DisplayId) -> &mut Display {
        &mut self.slots[id.index()]
    }

    pub fn attributes(&self, id: DisplayId) -> &DisplayAttributes {
        &self.get(id).attrs
    }

    /// Config ids available on a display.
    ///
    /// Only config 0 exists; external displays report none while
    /// disconnected. Virtual displays are not composed.
    pub fn display_configs(&self, id: DisplayId) -> HwcResult<Vec<u32>> {
        match id {
            DisplayId::Primary => Ok(vec![0]),
            DisplayId::External if self.attributes(id).connected => Ok(vec![0]),
            DisplayId::External => Err(HwcError::NotConnected(id)),
            DisplayId::Virtual => Err(HwcError::InvalidDisplay(id.index())),
        }
    }

    /// Look up a list of attributes for `config` on a display
    pub fn display_attributes(
        &self,
        id: DisplayId,
        config: u32,
        attributes: &[u32],
    ) -> HwcResult<Vec<i32>> {
        if id == DisplayId::External && !self.attributes(id).connected {
            return Err(HwcError::NotConnected(id));
        }

        let attrs = self.attributes(id);
        attributes
            .iter()
            .map(|&raw| {
                let attribute = DisplayAttribute::try_from(raw)?;
                let value = attrs.value(attribute);
                debug!("{} config {}: {:?} = {}", id, config, attribute, value);
                Ok(value)
            })
            .collect()
    }
}
