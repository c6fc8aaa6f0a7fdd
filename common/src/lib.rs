//! RateWatch Common Types
//!
//! This crate contains shared types used across RateWatch, including
//! identifiers, quote and rate types, the reconciled snapshot document and
//! time utilities.

pub mod identifiers;
pub mod rates;
pub mod snapshot;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use rates::*;
pub use snapshot::*;
pub use error::*;
pub use time::*;
