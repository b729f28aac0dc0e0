//! Chime player: configuration and the rodio output backend.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod rodio_backend;
