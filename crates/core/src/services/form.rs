//! Form service.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempforms_common::{AppError, AppResult, Clock, IdGenerator};
use tempforms_db::LifecycleStore;
use tempforms_db::entities::form::{
    self, FieldOption, FieldType, FormField, FormSettings, default_max_rating, default_min_rating,
};
use tracing::{info, warn};
use validator::Validate;

use super::access::ResponseAccessGuard;
use super::expiry::{ExpirationChoice, compute_expiry, is_about_to_expire, time_remaining};
use super::links::{LinkKind, ensure_format, generate_field_id, generate_link_pair};
use super::sanitize::{sanitize_opt, sanitize_text};
use super::secret::SecretHasher;

/// Insert attempts before link generation is declared exhausted.
pub const MAX_LINK_ATTEMPTS: u32 = 5;

const MIN_CHOICE_OPTIONS: usize = 2;
const MAX_CHOICE_OPTIONS: usize = 20;

/// Input for one option of a multiple-choice field.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OptionInput {
    pub id: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub label: String,
    /// Defaults to the label.
    pub value: Option<String>,
}

/// Input for one field.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FieldInput {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[validate(length(min = 1, max = 200))]
    pub label: String,
    #[validate(length(max = 100))]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    #[validate(nested)]
    pub options: Vec<OptionInput>,
    #[validate(range(min = 1, max = 10))]
    pub min_rating: Option<i32>,
    #[validate(range(min = 1, max = 10))]
    pub max_rating: Option<i32>,
}

/// Settings as supplied; absent flags take their defaults.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsInput {
    pub allow_multiple_responses: Option<bool>,
    pub show_response_count: Option<bool>,
    pub require_all_fields: Option<bool>,
}

impl SettingsInput {
    fn resolve(self) -> FormSettings {
        let defaults = FormSettings::default();
        FormSettings {
            allow_multiple_responses: self
                .allow_multiple_responses
                .unwrap_or(defaults.allow_multiple_responses),
            show_response_count: self
                .show_response_count
                .unwrap_or(defaults.show_response_count),
            require_all_fields: self
                .require_all_fields
                .unwrap_or(defaults.require_all_fields),
        }
    }
}

/// Input for creating a form.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateFormInput {
    #[validate(length(min = 1, max = 100))]
    pub title: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 50), nested)]
    pub fields: Vec<FieldInput>,
    /// Duration label; unknown or missing labels mean one hour.
    pub expiration_time: Option<String>,
    pub custom_expiration_minutes: Option<i64>,
    #[validate(length(min = 4, max = 50))]
    pub response_password: Option<String>,
    #[serde(default)]
    pub settings: SettingsInput,
}

impl CreateFormInput {
    /// Strip markup from every creator-supplied string.
    ///
    /// The password is left as typed; an empty one means "no password".
    #[must_use]
    pub fn sanitize(mut self) -> Self {
        self.title = sanitize_text(&self.title);
        self.description = sanitize_opt(self.description.as_deref());
        self.response_password = self.response_password.filter(|p| !p.is_empty());
        for field in &mut self.fields {
            field.label = sanitize_text(&field.label);
            field.placeholder = sanitize_opt(field.placeholder.as_deref());
            for option in &mut field.options {
                option.label = sanitize_text(&option.label);
                option.value = sanitize_opt(option.value.as_deref());
            }
        }
        self
    }
}

/// Input for deleting a form.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFormInput {
    pub response_link: Option<String>,
    pub password: Option<String>,
}

/// Returned to the creator once. The only place `response_link` is shown.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedForm {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub fill_link: String,
    pub response_link: String,
    pub has_response_password: bool,
    pub expiration_time: String,
    pub expires_at: DateTime<Utc>,
    pub time_remaining: String,
    pub fields: Vec<FormField>,
    pub settings: FormSettings,
    pub created_at: DateTime<Utc>,
}

/// Public view used to fill a form. Carries no secret and no response data.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormView {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub fields: Vec<FormField>,
    pub settings: FormSettings,
    /// `None` unless the creator chose to show it.
    pub response_count: Option<u64>,
    pub time_remaining: String,
    pub is_about_to_expire: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Summary of a form without its fields.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormInfo {
    pub title: String,
    pub description: Option<String>,
    pub time_remaining: String,
    pub is_about_to_expire: bool,
    pub response_count: Option<u64>,
    pub allows_multiple_responses: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Checks the derive cannot express: per-type constraints and unique ids.
fn check_field_constraints(fields: &[FieldInput]) -> AppResult<()> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for field in fields {
        if let Some(id) = field.id.as_deref().filter(|id| !id.is_empty())
            && !seen.insert(id)
        {
            errors.push(format!("Duplicate field id: {id}"));
        }

        match field.field_type {
            FieldType::MultipleChoice => {
                let n = field.options.len();
                if !(MIN_CHOICE_OPTIONS..=MAX_CHOICE_OPTIONS).contains(&n) {
                    errors.push(format!(
                        "Multiple choice field \"{}\" must have between {MIN_CHOICE_OPTIONS} and {MAX_CHOICE_OPTIONS} options",
                        field.label
                    ));
                }
            }
            FieldType::Rating => {
                let min = field.min_rating.unwrap_or_else(default_min_rating);
                let max = field.max_rating.unwrap_or_else(default_max_rating);
                if min >= max {
                    errors.push(format!(
                        "Rating field \"{}\" needs a minimum below its maximum",
                        field.label
                    ));
                }
            }
            FieldType::Text | FieldType::Textarea | FieldType::YesNo => {}
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(errors.join("; ")))
    }
}

/// Assign missing ids and display order.
fn build_fields(inputs: Vec<FieldInput>) -> Vec<FormField> {
    inputs
        .into_iter()
        .zip(0..)
        .map(|(input, order)| {
            let options = if input.field_type == FieldType::MultipleChoice {
                input
                    .options
                    .into_iter()
                    .enumerate()
                    .map(|(i, o)| FieldOption {
                        id: o.id.unwrap_or_else(|| format!("option_{i}")),
                        value: o.value.unwrap_or_else(|| o.label.clone()),
                        label: o.label,
                    })
                    .collect()
            } else {
                Vec::new()
            };

            FormField {
                id: input
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(generate_field_id),
                field_type: input.field_type,
                label: input.label,
                placeholder: input.placeholder,
                required: input.required,
                options,
                min_rating: input.min_rating.unwrap_or_else(default_min_rating),
                max_rating: input.max_rating.unwrap_or_else(default_max_rating),
                order,
            }
        })
        .collect()
}

/// Service for creating, reading and deleting forms.
#[derive(Clone)]
pub struct FormService {
    store: Arc<dyn LifecycleStore>,
    clock: Arc<dyn Clock>,
    hasher: Arc<dyn SecretHasher>,
    guard: ResponseAccessGuard,
    id_gen: IdGenerator,
}

impl FormService {
    /// Create a new form service.
    #[must_use]
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        clock: Arc<dyn Clock>,
        hasher: Arc<dyn SecretHasher>,
    ) -> Self {
        Self {
            store,
            clock,
            guard: ResponseAccessGuard::new(Arc::clone(&hasher)),
            hasher,
            id_gen: IdGenerator::new(),
        }
    }

    /// Create a form with freshly minted links.
    ///
    /// A link collision is retried with a new pair up to
    /// [`MAX_LINK_ATTEMPTS`] times.
    pub async fn create(&self, input: CreateFormInput) -> AppResult<CreatedForm> {
        let input = input.sanitize();
        input.validate()?;
        check_field_constraints(&input.fields)?;

        let now = self.clock.now();
        let choice = input
            .expiration_time
            .as_deref()
            .map_or_else(ExpirationChoice::default, ExpirationChoice::parse_lenient);
        let expires_at = compute_expiry(choice, now, input.custom_expiration_minutes)?;
        let custom_minutes = match choice {
            ExpirationChoice::Custom => input
                .custom_expiration_minutes
                .and_then(|m| i32::try_from(m).ok()),
            _ => None,
        };

        let response_secret = input
            .response_password
            .as_deref()
            .map(|p| self.hasher.hash(p))
            .transpose()?;
        let settings = input.settings.resolve();
        let fields = build_fields(input.fields);
        let fields_json = serde_json::to_value(&fields)
            .map_err(|e| AppError::Internal(format!("Failed to encode fields: {e}")))?;
        let id = self.id_gen.generate();

        for attempt in 1..=MAX_LINK_ATTEMPTS {
            let links = generate_link_pair();
            let model = form::Model {
                id: id.clone(),
                title: input.title.clone(),
                description: input.description.clone(),
                fields: fields_json.clone(),
                fill_link: links.fill_link,
                response_link: links.response_link,
                response_secret: response_secret.clone(),
                expiration_choice: choice.as_str().to_string(),
                custom_expiration_minutes: custom_minutes,
                allow_multiple_responses: settings.allow_multiple_responses,
                show_response_count: settings.show_response_count,
                require_all_fields: settings.require_all_fields,
                response_count: 0,
                created_at: now,
                expires_at,
            };

            match self.store.create_form(model).await {
                Ok(form) => {
                    info!(
                        form_id = %form.id,
                        fill_link = %form.fill_link,
                        expires_at = %form.expires_at,
                        "Form created"
                    );
                    return Ok(CreatedForm {
                        id: form.id,
                        title: form.title,
                        description: form.description,
                        fill_link: form.fill_link,
                        response_link: form.response_link,
                        has_response_password: form.response_secret.is_some(),
                        expiration_time: form.expiration_choice,
                        expires_at: form.expires_at,
                        time_remaining: time_remaining(form.expires_at, now),
                        fields,
                        settings,
                        created_at: form.created_at,
                    });
                }
                Err(AppError::DuplicateLink(link)) => {
                    warn!(attempt, link = %link, "Link collision, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::LinkGenerationExhausted(MAX_LINK_ATTEMPTS))
    }

    async fn live_by_fill_link(
        &self,
        fill_link: &str,
        now: DateTime<Utc>,
    ) -> AppResult<form::Model> {
        ensure_format(fill_link, LinkKind::Fill)?;
        self.store
            .get_form_by_fill_link(fill_link, now)
            .await?
            .into_live()
    }

    async fn visible_count(&self, form: &form::Model, now: DateTime<Utc>) -> AppResult<Option<u64>> {
        if form.show_response_count {
            Ok(Some(self.store.count_responses(&form.id, now).await?))
        } else {
            Ok(None)
        }
    }

    /// Public view for filling. 404 when unknown, 410 when expired.
    pub async fn get_for_filling(&self, fill_link: &str) -> AppResult<FormView> {
        let now = self.clock.now();
        let form = self.live_by_fill_link(fill_link, now).await?;
        let response_count = self.visible_count(&form, now).await?;

        Ok(FormView {
            fields: form.form_fields(),
            settings: form.settings(),
            response_count,
            time_remaining: time_remaining(form.expires_at, now),
            is_about_to_expire: is_about_to_expire(form.expires_at, now),
            id: form.id,
            title: form.title,
            description: form.description,
            expires_at: form.expires_at,
            created_at: form.created_at,
        })
    }

    /// Summary without field definitions. Same liveness rules as filling.
    pub async fn info(&self, fill_link: &str) -> AppResult<FormInfo> {
        let now = self.clock.now();
        let form = self.live_by_fill_link(fill_link, now).await?;
        let response_count = self.visible_count(&form, now).await?;

        Ok(FormInfo {
            time_remaining: time_remaining(form.expires_at, now),
            is_about_to_expire: is_about_to_expire(form.expires_at, now),
            response_count,
            allows_multiple_responses: form.allow_multiple_responses,
            title: form.title,
            description: form.description,
            created_at: form.created_at,
            expires_at: form.expires_at,
        })
    }

    /// Delete a form and its responses.
    ///
    /// The caller proves ownership with the response link, plus the response
    /// password when one is set.
    pub async fn delete(&self, fill_link: &str, input: DeleteFormInput) -> AppResult<()> {
        let response_link = input
            .response_link
            .filter(|l| !l.is_empty())
            .ok_or_else(|| {
                AppError::BadRequest("Response link is required to delete this form".to_string())
            })?;

        let now = self.clock.now();
        let form = self.live_by_fill_link(fill_link, now).await?;
        if form.response_link != response_link {
            return Err(AppError::NotFound("Form".to_string()));
        }

        self.guard
            .can_view_responses(&form, now, input.password.as_deref())?
            .into_result()?;

        if !self.store.delete_form(&form.id).await? {
            return Err(AppError::NotFound("Form".to_string()));
        }

        info!(form_id = %form.id, fill_link = %fill_link, "Form deleted");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::secret::Argon2Hasher;
    use async_trait::async_trait;
    use chrono::Duration;
    use serde_json::json;
    use tempforms_common::ManualClock;
    use tempforms_db::entities::response;
    use tempforms_db::{FormLookup, JsonFileStore};

    async fn setup() -> (FormService, ManualClock, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.init().await.unwrap();
        let clock = ManualClock::starting_now();
        let service = FormService::new(
            Arc::new(store),
            Arc::new(clock.clone()),
            Arc::new(Argon2Hasher),
        );
        (service, clock, dir)
    }

    fn input(value: serde_json::Value) -> CreateFormInput {
        serde_json::from_value(value).unwrap()
    }

    fn simple_input() -> CreateFormInput {
        input(json!({
            "title": "Lunch <b>poll</b>",
            "expirationTime": "15min",
            "fields": [
                {"type": "text", "label": "Name", "required": true},
                {"type": "multiple-choice", "label": "Dish",
                 "options": [{"label": "Soup"}, {"label": "Salad", "value": "salad"}]}
            ]
        }))
    }

    #[tokio::test]
    async fn test_create_assigns_links_ids_and_expiry() {
        let (service, clock, _dir) = setup().await;
        let created = service.create(simple_input()).await.unwrap();

        assert_eq!(created.title, "Lunch poll");
        assert_eq!(created.fill_link.len(), 12);
        assert_eq!(created.response_link.len(), 24);
        assert_eq!(created.expires_at - clock.now(), Duration::minutes(15));
        assert!(!created.has_response_password);
        assert!(created.fields[0].id.starts_with("field_"));
        assert_eq!(created.fields[1].order, 1);
        assert_eq!(created.fields[1].options[0].value, "Soup");
        assert_eq!(created.fields[1].options[1].value, "salad");
        assert!(created.settings.allow_multiple_responses);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let (service, _clock, _dir) = setup().await;

        let no_fields = input(json!({"title": "Empty", "fields": []}));
        assert!(matches!(
            service.create(no_fields).await,
            Err(AppError::Validation(_))
        ));

        let one_option = input(json!({
            "title": "Choice",
            "fields": [{"type": "multiple-choice", "label": "Pick", "options": [{"label": "A"}]}]
        }));
        assert!(matches!(
            service.create(one_option).await,
            Err(AppError::Validation(msg)) if msg.contains("between 2 and 20 options")
        ));

        let duplicate_ids = input(json!({
            "title": "Dupes",
            "fields": [
                {"id": "x", "type": "text", "label": "One"},
                {"id": "x", "type": "text", "label": "Two"}
            ]
        }));
        assert!(matches!(
            service.create(duplicate_ids).await,
            Err(AppError::Validation(msg)) if msg.contains("Duplicate field id: x")
        ));

        let bad_custom = input(json!({
            "title": "Custom",
            "expirationTime": "custom",
            "customExpirationMinutes": 0,
            "fields": [{"type": "yes-no", "label": "Ok?"}]
        }));
        assert!(matches!(
            service.create(bad_custom).await,
            Err(AppError::InvalidDuration(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_expiration_label_means_one_hour() {
        let (service, clock, _dir) = setup().await;
        let mut form = simple_input();
        form.expiration_time = Some("fortnight".to_string());

        let created = service.create(form).await.unwrap();
        assert_eq!(created.expiration_time, "1hour");
        assert_eq!(created.expires_at - clock.now(), Duration::hours(1));
    }

    #[tokio::test]
    async fn test_fill_view_goes_gone_after_expiry() {
        let (service, clock, _dir) = setup().await;
        let created = service.create(simple_input()).await.unwrap();

        let view = service.get_for_filling(&created.fill_link).await.unwrap();
        assert_eq!(view.response_count, Some(0));
        assert_eq!(view.time_remaining, "15m");

        clock.advance(Duration::minutes(16));
        assert!(matches!(
            service.get_for_filling(&created.fill_link).await,
            Err(AppError::Expired(at)) if at == created.expires_at
        ));
        assert!(matches!(
            service.info(&created.fill_link).await,
            Err(AppError::Expired(_))
        ));
    }

    #[tokio::test]
    async fn test_lookup_rejects_malformed_and_unknown_links() {
        let (service, _clock, _dir) = setup().await;
        assert!(matches!(
            service.get_for_filling("short").await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            service.get_for_filling("AbCdEfGhIjKl").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_hidden_response_count() {
        let (service, _clock, _dir) = setup().await;
        let mut form = simple_input();
        form.settings.show_response_count = Some(false);
        let created = service.create(form).await.unwrap();

        let info = service.info(&created.fill_link).await.unwrap();
        assert_eq!(info.response_count, None);
        assert!(info.allows_multiple_responses);
    }

    #[tokio::test]
    async fn test_delete_requires_matching_response_link_and_password() {
        let (service, _clock, _dir) = setup().await;
        let mut form = simple_input();
        form.response_password = Some("secret1".to_string());
        let created = service.create(form).await.unwrap();

        assert!(matches!(
            service
                .delete(&created.fill_link, DeleteFormInput::default())
                .await,
            Err(AppError::BadRequest(_))
        ));

        let wrong_link = DeleteFormInput {
            response_link: Some("ffffffffffffffffffffffff".to_string()),
            password: Some("secret1".to_string()),
        };
        assert!(matches!(
            service.delete(&created.fill_link, wrong_link).await,
            Err(AppError::NotFound(_))
        ));

        let no_password = DeleteFormInput {
            response_link: Some(created.response_link.clone()),
            password: None,
        };
        assert!(matches!(
            service.delete(&created.fill_link, no_password).await,
            Err(AppError::Unauthorized(_))
        ));

        let ok = DeleteFormInput {
            response_link: Some(created.response_link.clone()),
            password: Some("secret1".to_string()),
        };
        service.delete(&created.fill_link, ok).await.unwrap();
        assert!(matches!(
            service.get_for_filling(&created.fill_link).await,
            Err(AppError::NotFound(_))
        ));
    }

    /// Store whose every insert collides.
    struct CollidingStore;

    #[async_trait]
    impl LifecycleStore for CollidingStore {
        fn backend_name(&self) -> &'static str {
            "colliding"
        }
        fn has_native_expiry(&self) -> bool {
            false
        }
        async fn init(&self) -> AppResult<()> {
            Ok(())
        }
        async fn shutdown(&self) -> AppResult<()> {
            Ok(())
        }
        async fn create_form(&self, form: form::Model) -> AppResult<form::Model> {
            Err(AppError::DuplicateLink(form.fill_link))
        }
        async fn get_form_by_fill_link(&self, _: &str, _: DateTime<Utc>) -> AppResult<FormLookup> {
            Ok(FormLookup::Missing)
        }
        async fn get_form_by_response_link(
            &self,
            _: &str,
            _: DateTime<Utc>,
        ) -> AppResult<FormLookup> {
            Ok(FormLookup::Missing)
        }
        async fn increment_response_count(&self, _: &str) -> AppResult<()> {
            Ok(())
        }
        async fn create_response(&self, _: response::Model) -> AppResult<response::Model> {
            Err(AppError::NotFound("Form".to_string()))
        }
        async fn count_responses(&self, _: &str, _: DateTime<Utc>) -> AppResult<u64> {
            Ok(0)
        }
        async fn list_responses(
            &self,
            _: &str,
            _: DateTime<Utc>,
        ) -> AppResult<Vec<response::Model>> {
            Ok(Vec::new())
        }
        async fn find_response_by_submitter(
            &self,
            _: &str,
            _: &str,
            _: DateTime<Utc>,
        ) -> AppResult<Option<response::Model>> {
            Ok(None)
        }
        async fn delete_form(&self, _: &str) -> AppResult<bool> {
            Ok(false)
        }
        async fn delete_responses(&self, _: &str, _: &[String]) -> AppResult<u64> {
            Ok(0)
        }
        async fn reclaim_expired(&self, _: DateTime<Utc>) -> AppResult<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_link_generation_exhausted() {
        let service = FormService::new(
            Arc::new(CollidingStore),
            Arc::new(ManualClock::starting_now()),
            Arc::new(Argon2Hasher),
        );

        assert!(matches!(
            service.create(simple_input()).await,
            Err(AppError::LinkGenerationExhausted(n)) if n == MAX_LINK_ATTEMPTS
        ));
    }
}
