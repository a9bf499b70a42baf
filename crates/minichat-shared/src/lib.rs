//! # minichat-shared
//!
//! Types shared by the store and the server: identifiers, the JSON wire
//! protocol spoken over `/ws`, the error taxonomy, the system bot catalog
//! and password hashing.

pub mod bots;
pub mod constants;
pub mod error;
pub mod password;
pub mod protocol;
pub mod types;

pub use error::{MinichatError, Result};
