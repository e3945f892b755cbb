//! # cutkit common library
//!
//! Shared code for the cutkit crates:
//! - Sample-accurate time arithmetic and span predicates
//! - Configuration loading
//! - Identifier generation
//! - Common error type

pub mod config;
pub mod error;
pub mod timing;
pub mod uuid_utils;

pub use error::{Error, Result};
pub use timing::{Seconds, Span, TimeSpan};
