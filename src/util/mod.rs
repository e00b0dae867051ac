//! Utilities.

#[macro_use]
mod id;
#[macro_use]
mod singleton;
pub mod sync;
