//! # Spillway Core
//!
//! Core types shared by the spillway crates: the error type, events and
//! the pointers that locate them, and on-disk format constants.
//!
//! ## ⚠️ Internal Implementation Detail
//!
//! Users should depend on the main `spillway` crate instead, which provides
//! the stable public API.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod event;
pub mod format_version;

pub use error::{Error, Result};
pub use event::{Event, Pointer};
