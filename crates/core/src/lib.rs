//! Core batching primitives for the sprite batch pipeline.
//!
//! Everything here is pure or limited to in-memory image codecs:
//! the item model, content fingerprints, size classification, grid
//! packing, sprite-sheet composition and unpacking, and the validated
//! batch settings shared by every mode.

pub mod classify;
pub mod error;
pub mod grid;
pub mod hashing;
pub mod item;
pub mod settings;
pub mod sheet;
pub mod types;
pub mod unit;
