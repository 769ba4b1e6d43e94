//! Business logic services.

#![allow(missing_docs)]

pub mod access;
pub mod answers;
pub mod expiry;
pub mod export;
pub mod form;
pub mod links;
pub mod response;
pub mod sanitize;
pub mod secret;

pub use access::{AccessDecision, DenyReason, ResponseAccessGuard};
pub use answers::validate_answers;
pub use expiry::{
    ExpirationChoice, MAX_CUSTOM_MINUTES, compute_expiry, is_about_to_expire, time_remaining,
};
pub use export::{ExportFile, ExportFormat};
pub use form::{
    CreateFormInput, CreatedForm, DeleteFormInput, FieldInput, FormInfo, FormService, FormView,
    MAX_LINK_ATTEMPTS, OptionInput, SettingsInput,
};
pub use links::{LinkKind, LinkPair, ensure_format, generate_link_pair, validate_format};
pub use response::{
    ResponseService, ResponsesView, ResponseStatistics, SubmissionReceipt, SubmitterInfo,
};
pub use secret::{Argon2Hasher, SecretHasher};
