//! Form entity.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Kind of input a field collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldType {
    /// Single-line text (up to 1000 chars).
    Text,
    /// Multi-line text (up to 5000 chars).
    Textarea,
    /// One or more values picked from `options`.
    MultipleChoice,
    /// Yes or no.
    YesNo,
    /// Number between `min_rating` and `max_rating`.
    Rating,
}

/// Selectable option of a multiple-choice field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldOption {
    pub id: String,
    pub label: String,
    /// Value recorded in answers when this option is picked.
    pub value: String,
}

/// A single field of a form, in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormField {
    pub id: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<FieldOption>,
    #[serde(default = "default_min_rating")]
    pub min_rating: i32,
    #[serde(default = "default_max_rating")]
    pub max_rating: i32,
    pub order: i32,
}

/// Default lower bound of a rating field.
pub const fn default_min_rating() -> i32 {
    1
}

/// Default upper bound of a rating field.
pub const fn default_max_rating() -> i32 {
    5
}

/// Behavioral flags of a form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSettings {
    pub allow_multiple_responses: bool,
    pub show_response_count: bool,
    pub require_all_fields: bool,
}

impl Default for FormSettings {
    fn default() -> Self {
        Self {
            allow_multiple_responses: true,
            show_response_count: true,
            require_all_fields: false,
        }
    }
}

/// A short-lived form.
///
/// `expires_at` is fixed at creation and is the only input to liveness.
/// A row past `expires_at` is dead even while it still exists physically.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "form")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub title: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    /// Ordered field definitions (`Vec<FormField>`).
    #[sea_orm(column_type = "JsonBinary")]
    pub fields: Json,

    /// Public link used to fill the form.
    #[sea_orm(unique)]
    pub fill_link: String,

    /// Private link used to view responses.
    #[sea_orm(unique)]
    pub response_link: String,

    /// Salted hash of the response password.
    #[sea_orm(nullable)]
    pub response_secret: Option<String>,

    /// Duration label chosen at creation (`15min`, `1hour`, ...).
    pub expiration_choice: String,

    #[sea_orm(nullable)]
    pub custom_expiration_minutes: Option<i32>,

    pub allow_multiple_responses: bool,
    pub show_response_count: bool,
    pub require_all_fields: bool,

    #[sea_orm(default_value = 0)]
    pub response_count: i64,

    pub created_at: DateTimeUtc,

    #[sea_orm(indexed)]
    pub expires_at: DateTimeUtc,
}

impl Model {
    /// Whether the form accepts reads and writes at `now`.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Field definitions in display order.
    #[must_use]
    pub fn form_fields(&self) -> Vec<FormField> {
        let mut fields: Vec<FormField> =
            serde_json::from_value(self.fields.clone()).unwrap_or_default();
        fields.sort_by_key(|f| f.order);
        fields
    }

    /// Settings flags as one value.
    #[must_use]
    pub const fn settings(&self) -> FormSettings {
        FormSettings {
            allow_multiple_responses: self.allow_multiple_responses,
            show_response_count: self.show_response_count,
            require_all_fields: self.require_all_fields,
        }
    }

    /// Whether viewing responses requires a password.
    #[must_use]
    pub const fn has_response_secret(&self) -> bool {
        self.response_secret.is_some()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::response::Entity")]
    Response,
}

impl Related<super::response::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Response.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
