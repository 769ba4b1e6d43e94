//! Response repository.

use std::sync::Arc;

use crate::entities::{Response, response};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, SqlErr,
};
use tempforms_common::{AppError, AppResult};

/// Response repository for database operations.
#[derive(Clone)]
pub struct ResponseRepository {
    db: Arc<DatabaseConnection>,
}

impl ResponseRepository {
    /// Create a new response repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Insert a response.
    ///
    /// A foreign-key violation means the parent form was reclaimed between
    /// the liveness check and the insert, and maps to `AppError::NotFound`.
    pub async fn create(&self, model: response::Model) -> AppResult<response::Model> {
        let form_id = model.form_id.clone();
        let active = response::ActiveModel {
            id: Set(model.id),
            form_id: Set(model.form_id),
            answers: Set(model.answers),
            submitter_ip: Set(model.submitter_ip),
            user_agent: Set(model.user_agent),
            submitted_at: Set(model.submitted_at),
            expires_at: Set(model.expires_at),
        };

        active
            .insert(self.db.as_ref())
            .await
            .map_err(|e| match e.sql_err() {
                Some(SqlErr::ForeignKeyConstraintViolation(_)) => {
                    AppError::NotFound(format!("Form {form_id}"))
                }
                _ => AppError::Database(e.to_string()),
            })
    }

    /// List live responses of a form, newest first.
    pub async fn find_by_form(
        &self,
        form_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<response::Model>> {
        Response::find()
            .filter(response::Column::FormId.eq(form_id))
            .filter(response::Column::ExpiresAt.gt(now))
            .order_by_desc(response::Column::SubmittedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Count live responses of a form.
    pub async fn count_by_form(&self, form_id: &str, now: DateTime<Utc>) -> AppResult<u64> {
        Response::find()
            .filter(response::Column::FormId.eq(form_id))
            .filter(response::Column::ExpiresAt.gt(now))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find an earlier live response to a form from the same submitter address.
    pub async fn find_by_submitter(
        &self,
        form_id: &str,
        submitter_ip: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<response::Model>> {
        Response::find()
            .filter(response::Column::FormId.eq(form_id))
            .filter(response::Column::SubmitterIp.eq(submitter_ip))
            .filter(response::Column::ExpiresAt.gt(now))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete the listed responses of a form. Returns rows removed.
    pub async fn delete_by_ids(&self, form_id: &str, ids: &[String]) -> AppResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = Response::delete_many()
            .filter(response::Column::FormId.eq(form_id))
            .filter(response::Column::Id.is_in(ids.iter().cloned()))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected)
    }
}
