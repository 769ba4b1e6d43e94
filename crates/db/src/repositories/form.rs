//! Form repository.

use std::sync::Arc;

use crate::entities::{Form, Response, form, response};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
    SqlErr, TransactionTrait, sea_query::Expr,
};
use tempforms_common::{AppError, AppResult};

/// Form repository for database operations.
#[derive(Clone)]
pub struct FormRepository {
    db: Arc<DatabaseConnection>,
}

impl FormRepository {
    /// Create a new form repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a form by its fill link, regardless of liveness.
    pub async fn find_by_fill_link(&self, link: &str) -> AppResult<Option<form::Model>> {
        Form::find()
            .filter(form::Column::FillLink.eq(link))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a form by its response link, regardless of liveness.
    pub async fn find_by_response_link(&self, link: &str) -> AppResult<Option<form::Model>> {
        Form::find()
            .filter(form::Column::ResponseLink.eq(link))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Insert a form.
    ///
    /// A unique violation on either link surfaces as `AppError::DuplicateLink`
    /// so the caller can mint a fresh pair and retry.
    pub async fn create(&self, model: form::Model) -> AppResult<form::Model> {
        let fill_link = model.fill_link.clone();
        let active = form::ActiveModel {
            id: Set(model.id),
            title: Set(model.title),
            description: Set(model.description),
            fields: Set(model.fields),
            fill_link: Set(model.fill_link),
            response_link: Set(model.response_link),
            response_secret: Set(model.response_secret),
            expiration_choice: Set(model.expiration_choice),
            custom_expiration_minutes: Set(model.custom_expiration_minutes),
            allow_multiple_responses: Set(model.allow_multiple_responses),
            show_response_count: Set(model.show_response_count),
            require_all_fields: Set(model.require_all_fields),
            response_count: Set(model.response_count),
            created_at: Set(model.created_at),
            expires_at: Set(model.expires_at),
        };

        active
            .insert(self.db.as_ref())
            .await
            .map_err(|e| match e.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => AppError::DuplicateLink(fill_link),
                _ => AppError::Database(e.to_string()),
            })
    }

    /// Atomically add one to the response counter.
    ///
    /// Returns the number of rows touched (0 when the form is gone).
    pub async fn increment_response_count(&self, form_id: &str) -> AppResult<u64> {
        let result = Form::update_many()
            .col_expr(
                form::Column::ResponseCount,
                Expr::col(form::Column::ResponseCount).add(1),
            )
            .filter(form::Column::Id.eq(form_id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected)
    }

    /// Delete a form and its responses in one transaction.
    ///
    /// Returns whether the form existed.
    pub async fn delete_with_responses(&self, form_id: &str) -> AppResult<bool> {
        let form_id = form_id.to_string();
        self.db
            .transaction::<_, bool, DbErr>(|txn| {
                Box::pin(async move {
                    Response::delete_many()
                        .filter(response::Column::FormId.eq(form_id.as_str()))
                        .exec(txn)
                        .await?;
                    let result = Form::delete_by_id(form_id).exec(txn).await?;
                    Ok(result.rows_affected > 0)
                })
            })
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete every expired form and response.
    ///
    /// Responses go first so that a response whose own `expires_at` passed
    /// is removed even when its form outlives it. Returns the total number
    /// of rows removed.
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        self.db
            .transaction::<_, u64, DbErr>(|txn| {
                Box::pin(async move {
                    let responses = Response::delete_many()
                        .filter(response::Column::ExpiresAt.lte(now))
                        .exec(txn)
                        .await?;
                    let forms = Form::delete_many()
                        .filter(form::Column::ExpiresAt.lte(now))
                        .exec(txn)
                        .await?;
                    Ok(responses.rows_affected + forms.rows_affected)
                })
            })
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
