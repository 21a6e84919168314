//! # fbhwc - Framebuffer Hardware Composer
//!
//! Per-frame composition decisions and vsync delivery for display
//! controllers driven through the Linux framebuffer interface with a
//! separate video plane.
//!
//! ## Architecture
//!
//! - `composer`: the client-facing device (prepare/set, event control,
//!   callback registration, attribute queries) and the base plane
//!   activation state machine
//! - `classify`: decides, per layer, between the video plane and color
//!   conversion
//! - `overlay`: video plane programming and its address cache
//! - `vsync`: the timing thread and its tick sources
//! - `display`: per-display attribute store
//! - `fb`: the framebuffer kernel boundary (ioctl and headless devices)
//! - `config`: configuration parsing and the runtime policy flags
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fbhwc::{DisplayContents, DisplayId, HwComposer, HwcConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut composer = HwComposer::open(HwcConfig::default())?;
//!     let mut frames = [Some(DisplayContents::default()), None, None];
//!     composer.prepare(&mut frames)?;
//!     composer.set(&mut frames)?;
//!     composer.set_vsync_enabled(DisplayId::Primary, true)?;
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod composer;
pub mod config;
pub mod convert;
pub mod display;
pub mod error;
pub mod fb;
pub mod fence;
pub mod fps;
pub mod layer;
pub mod overlay;
pub mod vsync;

// Re-export main types for easy access
pub use composer::{HwComposer, HwcEvent, Query};
pub use config::{HwcConfig, Policy};
pub use display::{DisplayAttribute, DisplayAttributes, DisplayId};
pub use error::{HwcError, HwcResult};
pub use layer::{BufferHandle, CompositionType, DisplayContents, Layer, LayerHints, Rect};
pub use vsync::HwcProcs;

/// Version information for fbhwc
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
