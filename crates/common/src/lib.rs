//! Common utilities and shared types for tempforms.
//!
//! This crate provides foundational components used across all tempforms crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **Clock**: Injectable time source via [`Clock`]
//! - **ID Generation**: ULID-based unique identifiers via [`IdGenerator`]
//!
//! # Example
//!
//! ```no_run
//! use tempforms_common::{AppResult, Clock, Config, IdGenerator, SystemClock};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id = IdGenerator::new().generate();
//!     println!("{} on port {} at {}", id, config.server.port, SystemClock.now());
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, StorageBackend};
pub use error::{AppError, AppResult, PasswordDenial};
pub use id::IdGenerator;
