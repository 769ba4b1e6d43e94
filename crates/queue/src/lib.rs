//! Background work for tempforms.
//!
//! - **Reclamation**: periodic removal of expired forms and responses for
//!   stores that have no native expiry ([`ReclamationScheduler`])

pub mod scheduler;

pub use scheduler::{ReclamationScheduler, SchedulerConfig, SchedulerState};
