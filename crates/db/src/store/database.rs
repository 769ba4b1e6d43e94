//! `PostgreSQL` store (sea-orm). Expired rows are removed by the sweep.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use tempforms_common::AppResult;
use tracing::{debug, info};

use super::{FormLookup, LifecycleStore};
use crate::entities::{form, response};
use crate::repositories::{FormRepository, ResponseRepository};

/// Relational store without native expiry.
#[derive(Clone)]
pub struct DatabaseStore {
    db: Arc<DatabaseConnection>,
    forms: FormRepository,
    responses: ResponseRepository,
}

impl DatabaseStore {
    /// Create a store over an open connection.
    #[must_use]
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            forms: FormRepository::new(Arc::clone(&db)),
            responses: ResponseRepository::new(Arc::clone(&db)),
            db,
        }
    }
}

#[async_trait]
impl LifecycleStore for DatabaseStore {
    fn backend_name(&self) -> &'static str {
        "database"
    }

    fn has_native_expiry(&self) -> bool {
        false
    }

    async fn init(&self) -> AppResult<()> {
        crate::migrate(self.db.as_ref()).await?;
        info!("Database store ready");
        Ok(())
    }

    async fn shutdown(&self) -> AppResult<()> {
        // The pool closes when the last handle is dropped.
        debug!("Database store shut down");
        Ok(())
    }

    async fn create_form(&self, form: form::Model) -> AppResult<form::Model> {
        self.forms.create(form).await
    }

    async fn get_form_by_fill_link(
        &self,
        link: &str,
        now: DateTime<Utc>,
    ) -> AppResult<FormLookup> {
        let found = self.forms.find_by_fill_link(link).await?;
        Ok(FormLookup::classify(found, now))
    }

    async fn get_form_by_response_link(
        &self,
        link: &str,
        now: DateTime<Utc>,
    ) -> AppResult<FormLookup> {
        let found = self.forms.find_by_response_link(link).await?;
        Ok(FormLookup::classify(found, now))
    }

    async fn increment_response_count(&self, form_id: &str) -> AppResult<()> {
        let touched = self.forms.increment_response_count(form_id).await?;
        if touched == 0 {
            debug!(form_id = %form_id, "Form vanished before counter increment");
        }
        Ok(())
    }

    async fn create_response(&self, response: response::Model) -> AppResult<response::Model> {
        self.responses.create(response).await
    }

    async fn count_responses(&self, form_id: &str, now: DateTime<Utc>) -> AppResult<u64> {
        self.responses.count_by_form(form_id, now).await
    }

    async fn list_responses(
        &self,
        form_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<response::Model>> {
        self.responses.find_by_form(form_id, now).await
    }

    async fn find_response_by_submitter(
        &self,
        form_id: &str,
        submitter_ip: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<response::Model>> {
        self.responses
            .find_by_submitter(form_id, submitter_ip, now)
            .await
    }

    async fn delete_form(&self, form_id: &str) -> AppResult<bool> {
        self.forms.delete_with_responses(form_id).await
    }

    async fn delete_responses(&self, form_id: &str, response_ids: &[String]) -> AppResult<u64> {
        self.responses.delete_by_ids(form_id, response_ids).await
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        self.forms.delete_expired(now).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use serde_json::json;

    fn create_test_form(expires_at: DateTime<Utc>) -> form::Model {
        form::Model {
            id: "f1".to_string(),
            title: "Standup".to_string(),
            description: Some("Daily check-in".to_string()),
            fields: json!([]),
            fill_link: "AbCdEfGhIjKl".to_string(),
            response_link: "0123456789abcdef01234567".to_string(),
            response_secret: None,
            expiration_choice: "30min".to_string(),
            custom_expiration_minutes: None,
            allow_multiple_responses: true,
            show_response_count: true,
            require_all_fields: false,
            response_count: 2,
            created_at: expires_at - Duration::minutes(30),
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_lookup_of_physically_present_expired_form() {
        let now = Utc::now();
        let form = create_test_form(now - Duration::seconds(1));

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[form.clone()]])
                .into_connection(),
        );

        let store = DatabaseStore::new(db);
        let lookup = store
            .get_form_by_fill_link("AbCdEfGhIjKl", now)
            .await
            .unwrap();

        assert_eq!(
            lookup,
            FormLookup::Expired {
                expires_at: form.expires_at
            }
        );
    }

    #[tokio::test]
    async fn test_lookup_of_live_form() {
        let now = Utc::now();
        let form = create_test_form(now + Duration::minutes(10));

        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[form.clone()]])
                .into_connection(),
        );

        let store = DatabaseStore::new(db);
        let lookup = store
            .get_form_by_response_link("0123456789abcdef01234567", now)
            .await
            .unwrap();

        assert_eq!(lookup.live(), Some(form));
    }

    #[tokio::test]
    async fn test_reclaim_then_nothing_left() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 2,
                    },
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 1,
                    },
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 0,
                    },
                    MockExecResult {
                        last_insert_id: 0,
                        rows_affected: 0,
                    },
                ])
                .into_connection(),
        );

        let store = DatabaseStore::new(db);
        let now = Utc::now();

        assert_eq!(store.reclaim_expired(now).await.unwrap(), 3);
        assert_eq!(store.reclaim_expired(now).await.unwrap(), 0);
        assert!(!store.has_native_expiry());
    }

    #[tokio::test]
    async fn test_increment_on_missing_form_is_noop() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .into_connection(),
        );

        let store = DatabaseStore::new(db);
        assert!(store.increment_response_count("gone").await.is_ok());
    }
}
