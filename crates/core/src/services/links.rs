//! Link identity.
//!
//! A form is reachable through two unrelated links: the shareable fill link
//! and the private response link. Both come from the OS CSPRNG and live in
//! disjoint formats, so neither can be confused with or derived from the other.

use std::sync::LazyLock;

use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use regex::Regex;
use tempforms_common::{AppError, AppResult};

/// Length of a fill link.
pub const FILL_LINK_LEN: usize = 12;

/// Random bytes behind a response link (hex-encoded to 24 chars).
const RESPONSE_LINK_BYTES: usize = 12;

static FILL_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{12}$").expect("valid fill link pattern"));

static RESPONSE_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-f0-9]{24}$").expect("valid response link pattern"));

static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]").expect("valid filename pattern"));

/// Which of the two links is meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Public link used to fill the form.
    Fill,
    /// Private link used to view responses.
    Response,
}

/// A freshly minted pair of links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPair {
    pub fill_link: String,
    pub response_link: String,
}

fn random_alphanumeric(len: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Mint a new link pair. Uniqueness is enforced by the store on insert.
#[must_use]
pub fn generate_link_pair() -> LinkPair {
    let mut bytes = [0u8; RESPONSE_LINK_BYTES];
    OsRng.fill(&mut bytes);

    LinkPair {
        fill_link: random_alphanumeric(FILL_LINK_LEN),
        response_link: hex::encode(bytes),
    }
}

/// Cheap format check done before any storage lookup.
#[must_use]
pub fn validate_format(link: &str, kind: LinkKind) -> bool {
    match kind {
        LinkKind::Fill => FILL_LINK_RE.is_match(link),
        LinkKind::Response => RESPONSE_LINK_RE.is_match(link),
    }
}

/// Reject a malformed link with `BadRequest` before it reaches storage.
pub fn ensure_format(link: &str, kind: LinkKind) -> AppResult<()> {
    if validate_format(link, kind) {
        return Ok(());
    }
    let what = match kind {
        LinkKind::Fill => "form",
        LinkKind::Response => "response",
    };
    Err(AppError::BadRequest(format!("Invalid {what} link format")))
}

/// Identifier for a field that arrived without one.
#[must_use]
pub fn generate_field_id() -> String {
    format!("field_{}", random_alphanumeric(8))
}

/// Title reduced to `[A-Za-z0-9_]` for use in download file names.
#[must_use]
pub fn safe_filename(title: &str) -> String {
    UNSAFE_FILENAME_CHARS.replace_all(title, "_").into_owned()
}
