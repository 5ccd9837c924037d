//! # agora-shared
//!
//! Types shared by the store and the server: identifiers, the discussion
//! domain model, the JSON wire protocol and the error taxonomy.

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod types;

pub use error::{ChatError, ErrorKind};
