//! Shared primitives for the MetaReview meta-analysis engine.
//!
//! `metareview-core` provides the foundation the statistics crate builds on:
//!
//! - **Error types** — [`MetaError`] and [`Result`] for structured error handling
//! - **Traits** — [`Scored`] and [`Summarizable`], implemented by result records

pub mod error;
pub mod traits;

pub use error::{MetaError, Result};
pub use traits::*;
