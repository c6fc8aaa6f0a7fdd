//! RateWatch Quote Screening
//!
//! Everything between a source adapter and the reconciler: the adapter seam
//! itself, cross-institution baselines and the outlier filter.
//!
//! # Example
//!
//! ```rust,ignore
//! use ratewatch_fx::{BaselineEstimator, OutlierPolicy};
//!
//! let baseline = BaselineEstimator::new().estimate(&snapshot, &currency);
//! let screened = OutlierPolicy::default().screen_quote(&currency, &quote, &baseline);
//! ```

pub mod adapter;
pub mod baseline;
pub mod filter;
pub mod error;

pub use adapter::{InstitutionDescriptor, QuoteMap, SourceAdapter};
#[cfg(any(test, feature = "test-utils"))]
pub use adapter::{MockResponse, MockSourceAdapter};
pub use baseline::{Baseline, BaselineEstimator, BaselineSide};
pub use filter::{yardstick, OutlierPolicy, RejectedField, ScreenedQuote, Screening};
pub use error::{FxError, FxResult};
