//! Response access guard.
//!
//! Liveness is checked first and wins over any secret. The password check is
//! only layered on for viewing, exporting and deleting responses.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tempforms_common::{AppError, AppResult, PasswordDenial};
use tempforms_db::entities::form;

use super::secret::SecretHasher;

/// Why access to responses was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The form is past `expires_at`.
    Expired(DateTime<Utc>),
    /// A password is set and none was supplied.
    PasswordRequired,
    /// The supplied password did not verify.
    InvalidPassword,
}

impl From<DenyReason> for AppError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::Expired(at) => Self::Expired(at),
            DenyReason::PasswordRequired => Self::Unauthorized(PasswordDenial::Required),
            DenyReason::InvalidPassword => Self::Unauthorized(PasswordDenial::Invalid),
        }
    }
}

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    Denied(DenyReason),
}

impl AccessDecision {
    /// Turn a denial into the matching `AppError`.
    pub fn into_result(self) -> AppResult<()> {
        match self {
            Self::Allowed => Ok(()),
            Self::Denied(reason) => Err(reason.into()),
        }
    }
}

/// Stateless gate in front of response data. Never mutates the form.
#[derive(Clone)]
pub struct ResponseAccessGuard {
    hasher: Arc<dyn SecretHasher>,
}

impl ResponseAccessGuard {
    /// Create a guard using `hasher` to verify secrets.
    #[must_use]
    pub fn new(hasher: Arc<dyn SecretHasher>) -> Self {
        Self { hasher }
    }

    /// Liveness alone. Shared by filling, submitting and viewing.
    pub fn ensure_live(form: &form::Model, now: DateTime<Utc>) -> AppResult<()> {
        if form.is_live(now) {
            Ok(())
        } else {
            Err(AppError::Expired(form.expires_at))
        }
    }

    /// Decide whether responses of `form` may be read at `now`.
    pub fn can_view_responses(
        &self,
        form: &form::Model,
        now: DateTime<Utc>,
        supplied: Option<&str>,
    ) -> AppResult<AccessDecision> {
        if !form.is_live(now) {
            return Ok(AccessDecision::Denied(DenyReason::Expired(form.expires_at)));
        }

        let Some(hash) = form.response_secret.as_deref() else {
            return Ok(AccessDecision::Allowed);
        };

        match supplied.filter(|s| !s.is_empty()) {
            None => Ok(AccessDecision::Denied(DenyReason::PasswordRequired)),
            Some(secret) if self.hasher.verify(secret, hash)? => Ok(AccessDecision::Allowed),
            Some(_) => Ok(AccessDecision::Denied(DenyReason::InvalidPassword)),
        }
    }
}
