//! # agora-store
//!
//! SQLite storage for discussions, participants and messages.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection`, runs schema migrations on open and provides typed
//! CRUD helpers for every domain model.

pub mod database;
pub mod discussions;
pub mod messages;
pub mod migrations;
pub mod participants;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
