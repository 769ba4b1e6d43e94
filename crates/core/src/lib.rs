//! Core business logic for tempforms.
//!
//! Expiry computation, link minting, response access control and the
//! form/response services built on top of a
//! [`LifecycleStore`](tempforms_db::LifecycleStore).

pub mod services;

pub use services::*;
