//! Message flag bits.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Per-message flags carried in the header.
    ///
    /// Unknown bits are preserved on decode so a newer peer's flags survive a
    /// round trip through this implementation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MessageFlags: u8 {
        /// Ordered record may be applied out of strict successor order: the
        /// joiner's state already advanced past it through another path.
        const PRELOAD = 0b0000_0001;
    }
}

impl MessageFlags {
    /// Whether the preload bit is set.
    pub fn is_preload(self) -> bool {
        self.contains(Self::PRELOAD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_bits_are_retained() {
        let flags = MessageFlags::from_bits_retain(0x83);
        assert!(flags.is_preload());
        assert_eq!(flags.bits(), 0x83);
    }

    #[test]
    fn default_is_empty() {
        assert!(!MessageFlags::default().is_preload());
    }
}
