//! # vesta-core
//! Foundation types, fixed-point arithmetic and executor traits for the
//! Vesta vote-escrow engine.

pub mod constants;
pub mod error;
pub mod fixed;
pub mod store;
pub mod traits;
pub mod types;

pub use fixed::Amount;
