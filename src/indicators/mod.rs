// Technical indicators computed over daily close series.
//
// All functions return vectors aligned with the input: index `i` holds the
// indicator value for bar `i`, or `None` while the warm-up window is
// incomplete.

pub mod rolling;
pub mod rsi;

pub use rolling::{trailing_mean, trailing_stddev};
pub use rsi::trailing_rsi;
