//! Wave pattern detectors
//!
//! - **Threshold**: entry-threshold crossing confirmed within a bounded lookahead.
//! - **Formation**: five-point peak/trough formation over the recent window.
//!
//! Both come in a bullish and a bearish flavour. The bearish detector runs the
//! bullish logic on the negated wave.

pub mod helpers;

/// Generate `bull()` / `bear()` constructors with default parameters.
macro_rules! impl_directional {
  ($($detector:ty),* $(,)?) => {
    $(impl $detector {
      pub fn bull() -> Self { Self::new(crate::Direction::Bullish, Default::default()) }
      pub fn bear() -> Self { Self::new(crate::Direction::Bearish, Default::default()) }
    })*
  };
}

pub mod formation;
pub mod threshold;

// Re-export all detectors for convenience
pub use formation::*;
pub use helpers::*;
pub use threshold::*;
