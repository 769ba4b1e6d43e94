//! Response export formatting.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};
use tempforms_db::entities::form::{self, FormField};
use tempforms_db::entities::response;

use super::links::safe_filename;

/// Body returned when a form has no responses yet.
pub const EMPTY_CSV: &str = "No responses available";

/// Export output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    /// `csv` (any case) selects CSV; anything else is JSON.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("csv") => Self::Csv,
            _ => Self::Json,
        }
    }

    /// File extension.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }

    /// MIME type.
    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv; charset=utf-8",
        }
    }
}

/// A rendered export ready to be served as an attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub format: ExportFormat,
    pub filename: String,
    pub body: String,
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn quote(cell: &str) -> String {
    format!("\"{}\"", cell.replace('"', "\"\""))
}

/// CSV with a `Submitted At` column followed by one column per field label.
#[must_use]
pub fn responses_to_csv(fields: &[FormField], responses: &[response::Model]) -> String {
    if responses.is_empty() {
        return EMPTY_CSV.to_string();
    }

    let mut csv = std::iter::once("Submitted At")
        .chain(fields.iter().map(|f| f.label.as_str()))
        .map(quote)
        .collect::<Vec<_>>()
        .join(",");
    csv.push('\n');

    for response in responses {
        let answers = response.answer_map();
        let mut row = vec![quote(&iso(response.submitted_at))];
        row.extend(fields.iter().map(|field| {
            let cell = answers.get(&field.id).map(|a| a.display()).unwrap_or_default();
            quote(&cell)
        }));
        csv.push_str(&row.join(","));
        csv.push('\n');
    }

    csv
}

/// JSON document with form metadata and every response.
#[must_use]
pub fn responses_to_json(
    form: &form::Model,
    responses: &[response::Model],
    exported_at: DateTime<Utc>,
) -> Value {
    json!({
        "form": {
            "title": form.title,
            "description": form.description,
            "createdAt": form.created_at,
            "expiresAt": form.expires_at,
        },
        "responses": responses
            .iter()
            .map(|r| json!({
                "submittedAt": r.submitted_at,
                "answers": r.answers,
            }))
            .collect::<Vec<_>>(),
        "exportedAt": exported_at,
        "totalResponses": responses.len(),
    })
}

/// Render an export of `responses` in the requested format.
#[must_use]
pub fn render(
    format: ExportFormat,
    form: &form::Model,
    responses: &[response::Model],
    exported_at: DateTime<Utc>,
) -> ExportFile {
    let body = match format {
        ExportFormat::Csv => responses_to_csv(&form.form_fields(), responses),
        ExportFormat::Json => responses_to_json(form, responses, exported_at).to_string(),
    };

    ExportFile {
        format,
        filename: format!(
            "{}_responses.{}",
            safe_filename(&form.title),
            format.extension()
        ),
        body,
    }
}
