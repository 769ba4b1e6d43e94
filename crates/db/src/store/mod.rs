//! Lifecycle stores.
//!
//! A [`LifecycleStore`] persists forms and responses and reclaims them once
//! their `expires_at` has passed. Two strategies sit behind the same trait:
//!
//! - stores without native expiry ([`DatabaseStore`], [`JsonFileStore`]) filter
//!   every read and rely on `reclaim_expired` being driven periodically;
//! - stores with native per-record expiry ([`RedisStore`]) hand physical
//!   deletion to the engine, still filtering reads since engine expiry is
//!   never exact.
//!
//! Every read takes `now` explicitly and never returns a logically expired
//! record as live.

mod database;
mod json_file;
mod redis;

pub use database::DatabaseStore;
pub use json_file::JsonFileStore;
pub use redis::RedisStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempforms_common::{AppError, AppResult};

use crate::entities::{form, response};

/// Result of locating a form by one of its links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormLookup {
    /// The form exists and `now < expires_at`.
    Live(Box<form::Model>),
    /// The form still exists physically but is past its expiry.
    Expired {
        /// When the form expired.
        expires_at: DateTime<Utc>,
    },
    /// No trace of the form remains.
    Missing,
}

impl FormLookup {
    /// Classify an optional record against `now`.
    #[must_use]
    pub fn classify(found: Option<form::Model>, now: DateTime<Utc>) -> Self {
        match found {
            Some(form) if form.is_live(now) => Self::Live(Box::new(form)),
            Some(form) => Self::Expired {
                expires_at: form.expires_at,
            },
            None => Self::Missing,
        }
    }

    /// The live form, if any.
    #[must_use]
    pub fn live(self) -> Option<form::Model> {
        match self {
            Self::Live(form) => Some(*form),
            _ => None,
        }
    }

    /// The live form, or `Expired` (410) / `NotFound` (404).
    pub fn into_live(self) -> AppResult<form::Model> {
        match self {
            Self::Live(form) => Ok(*form),
            Self::Expired { expires_at } => Err(AppError::Expired(expires_at)),
            Self::Missing => Err(AppError::NotFound("Form".to_string())),
        }
    }
}

/// Persistence contract for the expiry lifecycle.
#[async_trait]
pub trait LifecycleStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend_name(&self) -> &'static str;

    /// Whether the engine deletes expired records on its own.
    ///
    /// When true, no reclamation sweep needs to be scheduled.
    fn has_native_expiry(&self) -> bool;

    /// Prepare the store (create directories, load files, run migrations).
    async fn init(&self) -> AppResult<()>;

    /// Release resources held by the store.
    async fn shutdown(&self) -> AppResult<()>;

    /// Persist a new form.
    ///
    /// Fails with `AppError::DuplicateLink` when either link is taken.
    async fn create_form(&self, form: form::Model) -> AppResult<form::Model>;

    /// Locate a form by its fill link.
    async fn get_form_by_fill_link(&self, link: &str, now: DateTime<Utc>)
    -> AppResult<FormLookup>;

    /// Locate a form by its response link.
    async fn get_form_by_response_link(
        &self,
        link: &str,
        now: DateTime<Utc>,
    ) -> AppResult<FormLookup>;

    /// Add one to the form's response counter. A missing form is a no-op.
    async fn increment_response_count(&self, form_id: &str) -> AppResult<()>;

    /// Persist a response.
    ///
    /// Fails with `AppError::NotFound` if the parent form is gone.
    async fn create_response(&self, response: response::Model) -> AppResult<response::Model>;

    /// Count live responses of a form.
    async fn count_responses(&self, form_id: &str, now: DateTime<Utc>) -> AppResult<u64>;

    /// Live responses of a form, newest first.
    async fn list_responses(
        &self,
        form_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<response::Model>>;

    /// A live response to the form from the given submitter address.
    async fn find_response_by_submitter(
        &self,
        form_id: &str,
        submitter_ip: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<response::Model>>;

    /// Delete a form together with its responses. Returns whether it existed.
    async fn delete_form(&self, form_id: &str) -> AppResult<bool>;

    /// Delete the listed responses of one form. Ids belonging to other forms
    /// are ignored. Returns how many were removed. The form's
    /// `response_count` is left as is.
    async fn delete_responses(&self, form_id: &str, response_ids: &[String]) -> AppResult<u64>;

    /// Delete every form and response with `expires_at <= now`.
    ///
    /// Returns the number of records removed. Idempotent: a second call with
    /// no intervening writes returns 0.
    async fn reclaim_expired(&self, now: DateTime<Utc>) -> AppResult<u64>;
}
