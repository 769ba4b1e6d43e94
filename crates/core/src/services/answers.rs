//! Answer validation against a form's field definitions.

use serde_json::{Map, Value};
use tempforms_common::{AppError, AppResult};
use tempforms_db::entities::form::{FieldType, FormField, FormSettings};
use tempforms_db::entities::response::{AnswerValue, Answers};

const TEXT_MAX_CHARS: usize = 1000;
const TEXTAREA_MAX_CHARS: usize = 5000;
const YES_NO_STRINGS: [&str; 4] = ["yes", "no", "true", "false"];

/// `null`, `""` and `[]` all count as "not answered".
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn check_text(field: &FormField, value: &Value, max: usize) -> Result<AnswerValue, String> {
    let Value::String(s) = value else {
        return Err(format!("Field \"{}\" must be text", field.label));
    };
    if s.chars().count() > max {
        return Err(format!(
            "Field \"{}\" is too long (max {max} characters)",
            field.label
        ));
    }
    Ok(AnswerValue::Text(s.clone()))
}

fn check_choice(field: &FormField, value: &Value) -> Result<AnswerValue, String> {
    let is_option = |v: &str| field.options.iter().any(|o| o.value == v);

    match value {
        Value::String(s) if is_option(s) => Ok(AnswerValue::Text(s.clone())),
        Value::String(s) => Err(format!("Invalid option for \"{}\": {s}", field.label)),
        Value::Array(items) => {
            let mut picked = Vec::with_capacity(items.len());
            let mut invalid = Vec::new();
            for item in items {
                match item {
                    Value::String(s) if is_option(s) => picked.push(s.clone()),
                    other => invalid.push(match other {
                        Value::String(s) => s.clone(),
                        v => v.to_string(),
                    }),
                }
            }
            if invalid.is_empty() {
                Ok(AnswerValue::Choices(picked))
            } else {
                Err(format!(
                    "Invalid options for \"{}\": {}",
                    field.label,
                    invalid.join(", ")
                ))
            }
        }
        other => Err(format!("Invalid option for \"{}\": {other}", field.label)),
    }
}

fn check_yes_no(field: &FormField, value: &Value) -> Result<AnswerValue, String> {
    match value {
        Value::Bool(b) => Ok(AnswerValue::Bool(*b)),
        Value::String(s) if YES_NO_STRINGS.contains(&s.as_str()) => {
            Ok(AnswerValue::Text(s.clone()))
        }
        _ => Err(format!("Field \"{}\" must be yes or no", field.label)),
    }
}

fn check_rating(field: &FormField, value: &Value) -> Result<AnswerValue, String> {
    let out_of_range = || {
        format!(
            "Field \"{}\" must be between {} and {}",
            field.label, field.min_rating, field.max_rating
        )
    };
    let in_range = |n: f64| n >= f64::from(field.min_rating) && n <= f64::from(field.max_rating);

    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if in_range(f) => Ok(AnswerValue::Number(n.clone())),
            _ => Err(out_of_range()),
        },
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(f) if in_range(f) => Ok(AnswerValue::Text(s.clone())),
            _ => Err(out_of_range()),
        },
        _ => Err(out_of_range()),
    }
}

fn check_field(field: &FormField, value: &Value) -> Result<AnswerValue, String> {
    match field.field_type {
        FieldType::Text => check_text(field, value, TEXT_MAX_CHARS),
        FieldType::Textarea => check_text(field, value, TEXTAREA_MAX_CHARS),
        FieldType::MultipleChoice => check_choice(field, value),
        FieldType::YesNo => check_yes_no(field, value),
        FieldType::Rating => check_rating(field, value),
    }
}

/// Validate submitted answers and keep the accepted ones.
///
/// Every problem is collected; the error lists them all, separated by `; `.
pub fn validate_answers(
    fields: &[FormField],
    settings: FormSettings,
    submitted: &Map<String, Value>,
) -> AppResult<Answers> {
    let mut errors = Vec::new();
    let mut accepted = Answers::new();

    for field in fields {
        let answer = submitted.get(&field.id).filter(|v| !is_blank(v));
        let required = field.required || settings.require_all_fields;

        match answer {
            None if required => errors.push(format!("Field \"{}\" is required", field.label)),
            None => {}
            Some(value) => match check_field(field, value) {
                Ok(v) => {
                    accepted.insert(field.id.clone(), v);
                }
                Err(e) => errors.push(e),
            },
        }
    }

    for key in submitted.keys() {
        if !fields.iter().any(|f| &f.id == key) {
            errors.push(format!("Unknown field: {key}"));
        }
    }

    if errors.is_empty() {
        Ok(accepted)
    } else {
        Err(AppError::Validation(errors.join("; ")))
    }
}
