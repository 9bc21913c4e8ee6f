//! lpx-core: Shared types, configuration and errors for lpx
//!
//! This crate provides the foundational types used across the lpx crates.

mod config;
mod error;
mod sample;
mod spec;

pub use config::*;
pub use error::*;
pub use sample::*;
pub use spec::*;

/// Smallest power of two that is >= `value` (0 and 1 both map to 1)
#[inline]
pub fn next_power_of_two(value: usize) -> usize {
    value.max(1).next_power_of_two()
}

/// Check whether `value` is a power of two (0 is not)
#[inline]
pub fn is_power_of_two(value: usize) -> bool {
    value != 0 && value.is_power_of_two()
}
