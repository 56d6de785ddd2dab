//! Errors reported by `WeakKeyMap`.

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum Error {
    /// The load factor was zero, negative or NaN.
    #[error("illegal load factor: {0}")]
    IllegalLoadFactor(f32),
    /// The map deliberately does not offer this operation.
    #[error("unsupported operation: {operation}")]
    Unsupported { operation: &'static str },
}
