//! Expiry policy.
//!
//! `expires_at` is computed once at creation from the chosen duration and is
//! never recomputed. Everything here is pure: callers pass the current time.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tempforms_common::{AppError, AppResult};
use tracing::debug;

/// Upper bound for custom durations: 24 hours.
pub const MAX_CUSTOM_MINUTES: i64 = 1440;

/// Remaining time at or below which a form is flagged as about to expire.
const ABOUT_TO_EXPIRE: Duration = Duration::minutes(2);

/// Duration tier chosen by the form creator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExpirationChoice {
    #[serde(rename = "15min")]
    FifteenMinutes,
    #[serde(rename = "30min")]
    ThirtyMinutes,
    #[default]
    #[serde(rename = "1hour")]
    OneHour,
    #[serde(rename = "24hours")]
    TwentyFourHours,
    #[serde(rename = "custom")]
    Custom,
}

impl ExpirationChoice {
    /// Wire label of the choice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FifteenMinutes => "15min",
            Self::ThirtyMinutes => "30min",
            Self::OneHour => "1hour",
            Self::TwentyFourHours => "24hours",
            Self::Custom => "custom",
        }
    }

    /// Parse a label, falling back to one hour for anything unrecognized.
    #[must_use]
    pub fn parse_lenient(label: &str) -> Self {
        label.parse().unwrap_or_else(|()| {
            debug!(label = %label, "Unknown expiration choice, using 1hour");
            Self::OneHour
        })
    }

    /// Fixed length of a non-custom tier.
    #[must_use]
    pub const fn fixed_duration(self) -> Option<Duration> {
        match self {
            Self::FifteenMinutes => Some(Duration::minutes(15)),
            Self::ThirtyMinutes => Some(Duration::minutes(30)),
            Self::OneHour => Some(Duration::hours(1)),
            Self::TwentyFourHours => Some(Duration::hours(24)),
            Self::Custom => None,
        }
    }
}

impl FromStr for ExpirationChoice {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "15min" => Ok(Self::FifteenMinutes),
            "30min" => Ok(Self::ThirtyMinutes),
            "1hour" => Ok(Self::OneHour),
            "24hours" => Ok(Self::TwentyFourHours),
            "custom" => Ok(Self::Custom),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ExpirationChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute the expiry instant for a new form.
///
/// `custom_minutes` is only consulted for [`ExpirationChoice::Custom`], where
/// it must lie in `1..=MAX_CUSTOM_MINUTES`.
pub fn compute_expiry(
    choice: ExpirationChoice,
    created_at: DateTime<Utc>,
    custom_minutes: Option<i64>,
) -> AppResult<DateTime<Utc>> {
    let duration = match choice.fixed_duration() {
        Some(duration) => duration,
        None => {
            let minutes = custom_minutes.ok_or_else(|| {
                AppError::InvalidDuration("custom expiration requires a minute count".to_string())
            })?;
            if !(1..=MAX_CUSTOM_MINUTES).contains(&minutes) {
                return Err(AppError::InvalidDuration(format!(
                    "custom expiration must be between 1 and {MAX_CUSTOM_MINUTES} minutes, got {minutes}"
                )));
            }
            Duration::minutes(minutes)
        }
    };

    Ok(created_at + duration)
}

/// Human readable time left: `"Xh Ym"`, `"Ym"` or `"Expired"`.
#[must_use]
pub fn time_remaining(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let left = expires_at - now;
    if left <= Duration::zero() {
        return "Expired".to_string();
    }

    let hours = left.num_hours();
    let minutes = left.num_minutes() % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

/// True when the form is still live but has two minutes or less left.
#[must_use]
pub fn is_about_to_expire(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let left = expires_at - now;
    left > Duration::zero() && left <= ABOUT_TO_EXPIRE
}
