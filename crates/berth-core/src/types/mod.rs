//! Core types for Berth

mod identity;
mod member;
mod outcome;

pub use identity::*;
pub use member::*;
pub use outcome::*;
