//! Display Activation State Machine
//!
//! The base plane is switched off while the video plane is the only visible
//! content and switched back on as soon as anything needs blending. Each
//! transition costs one control call; staying in a state costs none.

/// Whether the base plane contributes to the blended output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Active,
    Inactive,
}

impl Activation {
    pub fn from_flag(active: bool) -> Self {
        if active {
            Activation::Active
        } else {
            Activation::Inactive
        }
    }

    pub fn is_active(self) -> bool {
        self == Activation::Active
    }

    /// The state to switch to after a frame, or `None` to stay put
    pub fn transition(self, overlay_used: bool, layer_count: usize) -> Option<Activation> {
        match self {
            Activation::Active if overlay_used && layer_count == 1 => Some(Activation::Inactive),
            Activation::Inactive if !overlay_used || layer_count > 1 => Some(Activation::Active),
            _ => None,
        }
    }
}
