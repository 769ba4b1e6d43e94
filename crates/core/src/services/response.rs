//! Response service: submission, viewing and export.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tempforms_common::{AppError, AppResult, Clock, IdGenerator};
use tempforms_db::LifecycleStore;
use tempforms_db::entities::form::{self, FieldType, FormField};
use tempforms_db::entities::response;
use tracing::{debug, info, warn};

use super::access::ResponseAccessGuard;
use super::answers::validate_answers;
use super::expiry::time_remaining;
use super::export::{ExportFile, ExportFormat, render};
use super::links::{LinkKind, ensure_format};
use super::sanitize::sanitize_value;

/// Longest stored User-Agent, in characters. Matches the database column.
pub const MAX_USER_AGENT_CHARS: usize = 512;

/// Who submitted a response. Stored, never returned.
#[derive(Debug, Clone, Default)]
pub struct SubmitterInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedResponse {
    pub id: String,
    pub submitted_at: DateTime<Utc>,
    pub answers: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedFormSummary {
    pub title: String,
    pub has_response_password: bool,
}

/// Result of a successful submission.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub response: SubmittedResponse,
    pub form: SubmittedFormSummary,
}

/// An answer next to the field it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabeledAnswer {
    pub value: Value,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub field_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEntry {
    pub id: String,
    pub submitted_at: DateTime<Utc>,
    pub answers: Value,
    /// Answers keyed by field label.
    pub formatted_answers: BTreeMap<String, LabeledAnswer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseStatistics {
    pub total_responses: usize,
    pub first_response: Option<DateTime<Utc>>,
    pub last_response: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseFormSummary {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub fill_link: String,
    pub time_remaining: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub fields: Vec<FormField>,
}

/// Everything the creator sees through the response link.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsesView {
    pub form: ResponseFormSummary,
    /// Newest first.
    pub responses: Vec<ResponseEntry>,
    pub statistics: ResponseStatistics,
}

fn truncate_chars(value: String, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((cut, _)) => value[..cut].to_string(),
        None => value,
    }
}

fn label_answers(fields: &[FormField], answers: &Value) -> BTreeMap<String, LabeledAnswer> {
    fields
        .iter()
        .filter_map(|field| {
            let value = answers.get(&field.id)?;
            Some((
                field.label.clone(),
                LabeledAnswer {
                    value: value.clone(),
                    field_type: field.field_type,
                    field_id: field.id.clone(),
                },
            ))
        })
        .collect()
}

/// Responses must arrive newest first.
fn statistics(responses: &[response::Model]) -> ResponseStatistics {
    ResponseStatistics {
        total_responses: responses.len(),
        first_response: responses.last().map(|r| r.submitted_at),
        last_response: responses.first().map(|r| r.submitted_at),
    }
}

/// Service for the response side of a form.
#[derive(Clone)]
pub struct ResponseService {
    store: Arc<dyn LifecycleStore>,
    clock: Arc<dyn Clock>,
    guard: ResponseAccessGuard,
    id_gen: IdGenerator,
}

impl ResponseService {
    /// Create a new response service.
    #[must_use]
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        clock: Arc<dyn Clock>,
        guard: ResponseAccessGuard,
    ) -> Self {
        Self {
            store,
            clock,
            guard,
            id_gen: IdGenerator::new(),
        }
    }

    /// Record an answer set for a live form.
    ///
    /// When the form allows a single response, a second submission from the
    /// same address is refused with `Conflict`. Addresses are easy to share
    /// and spoof, so this only discourages repeats.
    pub async fn submit(
        &self,
        fill_link: &str,
        mut answers: Map<String, Value>,
        submitter: SubmitterInfo,
    ) -> AppResult<SubmissionReceipt> {
        ensure_format(fill_link, LinkKind::Fill)?;
        let now = self.clock.now();
        let form = self
            .store
            .get_form_by_fill_link(fill_link, now)
            .await?
            .into_live()?;

        if !form.allow_multiple_responses
            && let Some(ip) = submitter.ip.as_deref()
            && let Some(previous) = self
                .store
                .find_response_by_submitter(&form.id, ip, now)
                .await?
        {
            debug!(form_id = %form.id, "Repeat submission refused");
            return Err(AppError::Conflict(format!(
                "You have already submitted a response to this form at {}",
                previous.submitted_at.to_rfc3339()
            )));
        }

        answers.values_mut().for_each(sanitize_value);
        let accepted = validate_answers(&form.form_fields(), form.settings(), &answers)?;
        let answers = serde_json::to_value(&accepted)
            .map_err(|e| AppError::Internal(format!("Failed to encode answers: {e}")))?;

        let saved = self
            .store
            .create_response(response::Model {
                id: self.id_gen.generate(),
                form_id: form.id.clone(),
                answers,
                submitter_ip: submitter.ip,
                user_agent: submitter
                    .user_agent
                    .map(|ua| truncate_chars(ua, MAX_USER_AGENT_CHARS)),
                submitted_at: now,
                expires_at: form.expires_at,
            })
            .await?;

        if let Err(e) = self.store.increment_response_count(&form.id).await {
            warn!(form_id = %form.id, error = %e, "Failed to increment response count");
        }

        info!(form_id = %form.id, response_id = %saved.id, "Response submitted");

        Ok(SubmissionReceipt {
            response: SubmittedResponse {
                id: saved.id,
                submitted_at: saved.submitted_at,
                answers: saved.answers,
            },
            form: SubmittedFormSummary {
                title: form.title,
                has_response_password: form.response_secret.is_some(),
            },
        })
    }

    async fn authorized_form(
        &self,
        response_link: &str,
        password: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<form::Model> {
        ensure_format(response_link, LinkKind::Response)?;
        let form = self
            .store
            .get_form_by_response_link(response_link, now)
            .await?
            .into_live()?;
        self.guard
            .can_view_responses(&form, now, password)?
            .into_result()?;
        Ok(form)
    }

    /// Responses and statistics, behind the access guard.
    pub async fn view(
        &self,
        response_link: &str,
        password: Option<&str>,
    ) -> AppResult<ResponsesView> {
        let now = self.clock.now();
        let form = self.authorized_form(response_link, password, now).await?;
        let responses = self.store.list_responses(&form.id, now).await?;
        let fields = form.form_fields();

        let statistics = statistics(&responses);
        let responses = responses
            .into_iter()
            .map(|r| ResponseEntry {
                formatted_answers: label_answers(&fields, &r.answers),
                id: r.id,
                submitted_at: r.submitted_at,
                answers: r.answers,
            })
            .collect();

        Ok(ResponsesView {
            form: ResponseFormSummary {
                time_remaining: time_remaining(form.expires_at, now),
                id: form.id,
                title: form.title,
                description: form.description,
                fill_link: form.fill_link,
                expires_at: form.expires_at,
                created_at: form.created_at,
                fields,
            },
            responses,
            statistics,
        })
    }

    /// Check a password without revealing any response data.
    ///
    /// Fails with `BadRequest` when the form has no password.
    pub async fn verify_password(&self, response_link: &str, password: &str) -> AppResult<bool> {
        ensure_format(response_link, LinkKind::Response)?;
        let now = self.clock.now();
        let form = self
            .store
            .get_form_by_response_link(response_link, now)
            .await?
            .into_live()?;

        if !form.has_response_secret() {
            return Err(AppError::BadRequest(
                "This form does not require a password".to_string(),
            ));
        }

        let decision = self.guard.can_view_responses(&form, now, Some(password))?;
        Ok(decision.into_result().is_ok())
    }

    /// Full dump of responses as CSV or JSON.
    /// Delete selected responses of a live form, behind the same gate as
    /// viewing. Unknown ids are skipped. The stored `response_count` keeps
    /// counting accepted submissions and does not drop.
    pub async fn delete_selected(
        &self,
        response_link: &str,
        response_ids: &[String],
        password: Option<&str>,
    ) -> AppResult<u64> {
        let now = self.clock.now();
        let form = self.authorized_form(response_link, password, now).await?;
        if response_ids.is_empty() {
            return Err(AppError::Validation(
                "Response IDs array is required".to_string(),
            ));
        }

        let deleted = self.store.delete_responses(&form.id, response_ids).await?;
        info!(form_id = %form.id, requested = response_ids.len(), deleted, "Responses deleted");
        Ok(deleted)
    }

    pub async fn export(
        &self,
        response_link: &str,
        password: Option<&str>,
        format: ExportFormat,
    ) -> AppResult<ExportFile> {
        let now = self.clock.now();
        let form = self.authorized_form(response_link, password, now).await?;
        let responses = self.store.list_responses(&form.id, now).await?;

        debug!(form_id = %form.id, count = responses.len(), format = format.extension(), "Exporting responses");
        Ok(render(format, &form, &responses, now))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::form::{CreateFormInput, CreatedForm, FormService};
    use crate::services::secret::Argon2Hasher;
    use chrono::Duration;
    use serde_json::json;
    use tempforms_common::ManualClock;
    use tempforms_db::JsonFileStore;

    struct Harness {
        forms: FormService,
        responses: ResponseService,
        store: Arc<dyn LifecycleStore>,
        clock: ManualClock,
        _dir: tempfile::TempDir,
    }

    async fn setup() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.init().await.unwrap();
        let store: Arc<dyn LifecycleStore> = Arc::new(store);
        let clock = ManualClock::starting_now();
        let hasher = Arc::new(Argon2Hasher);

        Harness {
            forms: FormService::new(Arc::clone(&store), Arc::new(clock.clone()), hasher.clone()),
            responses: ResponseService::new(
                Arc::clone(&store),
                Arc::new(clock.clone()),
                ResponseAccessGuard::new(hasher),
            ),
            store,
            clock,
            _dir: dir,
        }
    }

    async fn create(h: &Harness, extra: Value) -> CreatedForm {
        let mut body = json!({
            "title": "Retro",
            "expirationTime": "30min",
            "fields": [
                {"id": "went_well", "type": "textarea", "label": "What went well", "required": true},
                {"id": "score", "type": "rating", "label": "Score", "maxRating": 10}
            ]
        });
        if let (Some(base), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        let input: CreateFormInput = serde_json::from_value(body).unwrap();
        h.forms.create(input).await.unwrap()
    }

    fn answers(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn from_ip(ip: &str) -> SubmitterInfo {
        SubmitterInfo {
            ip: Some(ip.to_string()),
            user_agent: Some("test-agent".to_string()),
        }
    }

    #[tokio::test]
    async fn test_submit_then_view_round_trip() {
        let h = setup().await;
        let form = create(&h, json!({})).await;

        let receipt = h
            .responses
            .submit(
                &form.fill_link,
                answers(json!({"went_well": "<i>shipping</i>", "score": 8})),
                from_ip("10.0.0.1"),
            )
            .await
            .unwrap();
        assert_eq!(receipt.response.answers, json!({"went_well": "shipping", "score": 8}));
        assert!(!receipt.form.has_response_password);

        let view = h.responses.view(&form.response_link, None).await.unwrap();
        assert_eq!(view.responses.len(), 1);
        assert_eq!(view.responses[0].answers, receipt.response.answers);
        assert_eq!(
            view.responses[0].formatted_answers["Score"],
            LabeledAnswer {
                value: json!(8),
                field_type: FieldType::Rating,
                field_id: "score".to_string(),
            }
        );
        assert_eq!(view.statistics.total_responses, 1);
        assert_eq!(view.form.fill_link, form.fill_link);

        let info = h.forms.info(&form.fill_link).await.unwrap();
        assert_eq!(info.response_count, Some(1));
    }

    #[tokio::test]
    async fn test_view_is_newest_first_with_statistics() {
        let h = setup().await;
        let form = create(&h, json!({})).await;

        for text in ["first", "second"] {
            h.responses
                .submit(
                    &form.fill_link,
                    answers(json!({"went_well": text})),
                    SubmitterInfo::default(),
                )
                .await
                .unwrap();
            h.clock.advance(Duration::minutes(1));
        }

        let view = h.responses.view(&form.response_link, None).await.unwrap();
        assert_eq!(view.responses[0].answers["went_well"], "second");
        assert_eq!(
            view.statistics.last_response,
            Some(view.responses[0].submitted_at)
        );
        assert_eq!(
            view.statistics.first_response,
            Some(view.responses[1].submitted_at)
        );
    }

    #[tokio::test]
    async fn test_invalid_answers_are_rejected() {
        let h = setup().await;
        let form = create(&h, json!({})).await;

        let err = h
            .responses
            .submit(
                &form.fill_link,
                answers(json!({"score": 11})),
                SubmitterInfo::default(),
            )
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("\"What went well\" is required"));
        assert!(message.contains("between 1 and 10"));
    }

    #[tokio::test]
    async fn test_single_response_per_address() {
        let h = setup().await;
        let form = create(&h, json!({"settings": {"allowMultipleResponses": false}})).await;
        let body = json!({"went_well": "ok"});

        h.responses
            .submit(&form.fill_link, answers(body.clone()), from_ip("10.0.0.2"))
            .await
            .unwrap();
        assert!(matches!(
            h.responses
                .submit(&form.fill_link, answers(body.clone()), from_ip("10.0.0.2"))
                .await,
            Err(AppError::Conflict(_))
        ));
        h.responses
            .submit(&form.fill_link, answers(body), from_ip("10.0.0.3"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_password_gate_and_verify() {
        let h = setup().await;
        let form = create(&h, json!({"responsePassword": "secret1"})).await;
        h.responses
            .submit(
                &form.fill_link,
                answers(json!({"went_well": "x"})),
                SubmitterInfo::default(),
            )
            .await
            .unwrap();

        assert!(matches!(
            h.responses.view(&form.response_link, None).await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            h.responses.view(&form.response_link, Some("wrong")).await,
            Err(AppError::Unauthorized(_))
        ));
        let view = h
            .responses
            .view(&form.response_link, Some("secret1"))
            .await
            .unwrap();
        assert_eq!(view.responses.len(), 1);

        assert!(h.responses.verify_password(&form.response_link, "secret1").await.unwrap());
        assert!(!h.responses.verify_password(&form.response_link, "nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_password_without_password_is_bad_request() {
        let h = setup().await;
        let form = create(&h, json!({})).await;
        assert!(matches!(
            h.responses.verify_password(&form.response_link, "x").await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_form_refuses_everything() {
        let h = setup().await;
        let form = create(&h, json!({})).await;
        h.clock.advance(Duration::minutes(30));

        assert!(matches!(
            h.responses
                .submit(
                    &form.fill_link,
                    answers(json!({"went_well": "late"})),
                    SubmitterInfo::default(),
                )
                .await,
            Err(AppError::Expired(_))
        ));
        assert!(matches!(
            h.responses.view(&form.response_link, None).await,
            Err(AppError::Expired(_))
        ));
        assert!(matches!(
            h.responses
                .export(&form.response_link, None, ExportFormat::Csv)
                .await,
            Err(AppError::Expired(_))
        ));
    }

    #[tokio::test]
    async fn test_export_csv() {
        let h = setup().await;
        let form = create(&h, json!({"title": "Sprint 7 retro"})).await;
        h.responses
            .submit(
                &form.fill_link,
                answers(json!({"went_well": "demo", "score": "9"})),
                SubmitterInfo::default(),
            )
            .await
            .unwrap();

        let file = h
            .responses
            .export(&form.response_link, None, ExportFormat::Csv)
            .await
            .unwrap();
        assert_eq!(file.filename, "Sprint_7_retro_responses.csv");
        let mut lines = file.body.lines();
        assert_eq!(
            lines.next().unwrap(),
            "\"Submitted At\",\"What went well\",\"Score\""
        );
        assert!(lines.next().unwrap().ends_with(",\"demo\",\"9\""));
    }

    #[tokio::test]
    async fn test_long_user_agent_is_truncated() {
        let h = setup().await;
        let form = create(&h, json!({})).await;
        let agent = "Mozilla/5.0 ".repeat(50);
        assert_eq!(agent.chars().count(), 600);

        h.responses
            .submit(
                &form.fill_link,
                answers(json!({"went_well": "ok"})),
                SubmitterInfo {
                    ip: None,
                    user_agent: Some(agent.clone()),
                },
            )
            .await
            .unwrap();

        let form_id = h
            .store
            .get_form_by_fill_link(&form.fill_link, h.clock.now())
            .await
            .unwrap()
            .live()
            .unwrap()
            .id;
        let stored = h.store.list_responses(&form_id, h.clock.now()).await.unwrap();
        let stored_agent = stored[0].user_agent.clone().unwrap();
        assert_eq!(stored_agent.chars().count(), MAX_USER_AGENT_CHARS);
        assert!(agent.starts_with(&stored_agent));
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        let agent = "é".repeat(600);
        let cut = truncate_chars(agent, MAX_USER_AGENT_CHARS);
        assert_eq!(cut.chars().count(), MAX_USER_AGENT_CHARS);
        assert_eq!(cut.len(), MAX_USER_AGENT_CHARS * 2);
        assert_eq!(truncate_chars("short".to_string(), 10), "short");
    }

    #[tokio::test]
    async fn test_delete_selected_keeps_response_count() {
        let h = setup().await;
        let form = create(&h, json!({"responsePassword": "secret1"})).await;
        for text in ["a", "b", "c"] {
            h.responses
                .submit(
                    &form.fill_link,
                    answers(json!({"went_well": text})),
                    SubmitterInfo::default(),
                )
                .await
                .unwrap();
        }
        let view = h
            .responses
            .view(&form.response_link, Some("secret1"))
            .await
            .unwrap();
        let doomed = vec![view.responses[0].id.clone(), "unknown".to_string()];

        assert!(matches!(
            h.responses
                .delete_selected(&form.response_link, &doomed, Some("wrong"))
                .await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            h.responses
                .delete_selected(&form.response_link, &[], Some("secret1"))
                .await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(
            h.responses
                .delete_selected(&form.response_link, &doomed, Some("secret1"))
                .await
                .unwrap(),
            1
        );

        let view = h
            .responses
            .view(&form.response_link, Some("secret1"))
            .await
            .unwrap();
        assert_eq!(view.responses.len(), 2);
        assert!(view.responses.iter().all(|r| r.id != doomed[0]));
        let info = h.forms.info(&form.fill_link).await.unwrap();
        assert_eq!(info.response_count, Some(2));
        let stored = h
            .store
            .get_form_by_fill_link(&form.fill_link, h.clock.now())
            .await
            .unwrap()
            .live()
            .unwrap();
        assert_eq!(stored.response_count, 3);
    }

    #[tokio::test]
    async fn test_delete_selected_refuses_expired_and_unknown() {
        let h = setup().await;
        let form = create(&h, json!({})).await;
        let ids = vec!["r1".to_string()];

        assert!(matches!(
            h.responses
                .delete_selected("0123456789abcdef01234567", &ids, None)
                .await,
            Err(AppError::NotFound(_))
        ));

        h.clock.advance(Duration::minutes(30));
        assert!(matches!(
            h.responses
                .delete_selected(&form.response_link, &ids, None)
                .await,
            Err(AppError::Expired(_))
        ));
    }

    #[tokio::test]
    async fn test_response_link_format_checked_first() {
        let h = setup().await;
        assert!(matches!(
            h.responses.view("AbCdEfGhIjKl", None).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            h.responses.view("0123456789abcdef01234567", None).await,
            Err(AppError::NotFound(_))
        ));
    }
}
