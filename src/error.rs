//! Error taxonomy for the composer core
//!
//! Every fallible operation in the library returns [`HwcResult`]. Errors are
//! never fatal to the display pipeline: the per-frame and per-tick loops log
//! them and move on to the next layer or tick. Callers speaking the classic
//! status-code protocol can map any error back to a negated system error code
//! with [`HwcError::status`].

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::display::DisplayId;

/// Result alias used across the library
pub type HwcResult<T> = std::result::Result<T, HwcError>;

/// Errors surfaced by the composer
#[derive(Debug, Error)]
pub enum HwcError {
    /// Display index outside the attribute store, or a display the
    /// operation does not support (secondary displays are not composed)
    #[error("invalid display {0}")]
    InvalidDisplay(usize),

    /// Hot-pluggable display queried while disconnected
    #[error("display {0} is not connected")]
    NotConnected(DisplayId),

    /// Attribute query for an attribute the store does not track
    #[error("unsupported display attribute {0}")]
    UnsupportedAttribute(u32),

    /// Event-control request for an event other than vsync
    #[error("unsupported event {0}")]
    UnsupportedEvent(u32),

    /// Malformed request (zero stride, missing handle, ...)
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A plane device could not be opened
    #[error("cannot open {}: {source}", path.display())]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A device control call failed
    #[error("{op} failed: {source}")]
    Ioctl {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// The color converter refused or failed the blit
    #[error("color conversion failed: {0}")]
    Convert(String),
}

impl HwcError {
    /// Wrap an I/O failure from a control call
    pub fn ioctl(op: &'static str, source: io::Error) -> Self {
        HwcError::Ioctl { op, source }
    }

    /// Negated system error code for this error.
    ///
    /// Configuration errors map to `-EINVAL`, hardware errors to the negated
    /// errno of the failed call. Failures without an errno (a refused
    /// conversion, a disconnected display) report `-1`.
    pub fn status(&self) -> i32 {
        match self {
            HwcError::InvalidDisplay(_)
            | HwcError::UnsupportedAttribute(_)
            | HwcError::UnsupportedEvent(_)
            | HwcError::InvalidArgument(_) => -libc::EINVAL,
            HwcError::DeviceOpen { source, .. } | HwcError::Ioctl { source, .. } => {
                -source.raw_os_error().unwrap_or(1)
            }
            HwcError::NotConnected(_) | HwcError::Convert(_) => -1,
        }
    }
}
