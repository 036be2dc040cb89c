//! Core domain types for the sigrelay signal pipeline.
//!
//! This crate provides the types shared by every other crate:
//! - `RawMessage`: an unprocessed text event from the message source
//! - `Signal`, `SetupType`: a structured trading signal
//! - `MarketNote`: free-form commentary that is not a signal
//! - `ClassifiedMessage`: the result of classification, also the broadcast event

pub mod decimal;
pub mod error;
pub mod message;
pub mod note;
pub mod signal;

pub use decimal::{to_price_scale, try_price_scale, PRICE_INTEGER_DIGITS, PRICE_SCALE};
pub use error::{CoreError, Result};
pub use message::{ClassifiedMessage, MessageKind, RawMessage};
pub use note::{MarketNote, UNKNOWN_SENDER};
pub use signal::{SetupType, Signal, UNKNOWN_PAIR};
