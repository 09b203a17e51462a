//! Command-line worker: reads configuration from the environment and
//! runs one mode of the sprite batch pipeline.

pub mod config;
pub mod run;
