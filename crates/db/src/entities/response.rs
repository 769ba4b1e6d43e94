//! Response entity.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A single answer value.
///
/// The accepted shape depends on the declared field type; see the answer
/// validator in `tempforms-core`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    Choices(Vec<String>),
}

impl AnswerValue {
    /// Render the answer as a single display string.
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
            Self::Choices(values) => values.join("; "),
        }
    }
}

/// Answers keyed by field id.
pub type Answers = BTreeMap<String, AnswerValue>;

/// An anonymous submission to a form.
///
/// `expires_at` is copied from the parent form when the response is stored,
/// so reclamation never needs to join against the form table.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "response")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub form_id: String,

    /// Answers keyed by field id (`Answers`).
    #[sea_orm(column_type = "JsonBinary")]
    pub answers: Json,

    /// Best-effort submitter identity for the single-response check.
    #[sea_orm(nullable)]
    pub submitter_ip: Option<String>,

    #[sea_orm(nullable)]
    pub user_agent: Option<String>,

    pub submitted_at: DateTimeUtc,

    #[sea_orm(indexed)]
    pub expires_at: DateTimeUtc,
}

impl Model {
    /// Whether the response may still be read at `now`.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Typed answers.
    #[must_use]
    pub fn answer_map(&self) -> Answers {
        serde_json::from_value(self.answers.clone()).unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::form::Entity",
        from = "Column::FormId",
        to = "super::form::Column::Id",
        on_delete = "Cascade"
    )]
    Form,
}

impl Related<super::form::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Form.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_answer_value_shapes() {
        let answers: Answers = serde_json::from_value(json!({
            "name": "Ada",
            "likes": ["tea", "cake"],
            "ok": true,
            "score": 4
        }))
        .unwrap_or_default();

        assert_eq!(answers["name"], AnswerValue::Text("Ada".to_string()));
        assert_eq!(
            answers["likes"],
            AnswerValue::Choices(vec!["tea".to_string(), "cake".to_string()])
        );
        assert_eq!(answers["ok"], AnswerValue::Bool(true));
        assert_eq!(answers["score"].display(), "4");
        assert_eq!(answers["likes"].display(), "tea; cake");
    }

    #[test]
    fn test_numbers_keep_their_representation() {
        let original = json!({"score": 4});
        let answers: Answers = serde_json::from_value(original.clone()).unwrap_or_default();
        assert_eq!(serde_json::to_value(&answers).unwrap_or_default(), original);
    }
}
