//! Redis store with native per-key expiry.
//!
//! Key layout (all under the configured prefix):
//!
//! - `form:{id}`: the form as JSON
//! - `fill:{link}` / `resplink:{link}`: link index, value is the form id
//! - `responses:{form_id}`: list of response JSON documents
//! - `count:{form_id}`: response counter
//!
//! Every key is written with the form's absolute expiry, so Redis removes the
//! whole family on its own. A write and the expiry that covers it go out in
//! one `MULTI`/`EXEC`, so no key is ever left without a TTL. Reads still
//! compare against `now` because key eviction lags the expiry instant.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fred::clients::Client as RedisClient;
use fred::interfaces::{ClientLike, KeysInterface, ListInterface, TransactionInterface};
use fred::types::{Expiration, SetOptions, Value};
use tempforms_common::{AppError, AppResult};
use tracing::{debug, info};

use super::{FormLookup, LifecycleStore};
use crate::entities::{form, response};

/// Store backed by Redis key expiry.
#[derive(Clone)]
pub struct RedisStore {
    client: Arc<RedisClient>,
    prefix: String,
}

impl RedisStore {
    /// Create a store over a client. The client connects in [`LifecycleStore::init`].
    #[must_use]
    pub fn new(client: Arc<RedisClient>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    /// Build an unconnected client for `url`.
    pub fn from_url(url: &str, prefix: impl Into<String>) -> AppResult<Self> {
        let config = fred::types::config::Config::from_url(url)
            .map_err(|e| AppError::Config(format!("invalid Redis URL: {e}")))?;
        let client = RedisClient::new(config, None, None, None);
        Ok(Self::new(Arc::new(client), prefix))
    }

    fn form_key(&self, form_id: &str) -> String {
        format!("{}:form:{form_id}", self.prefix)
    }

    fn fill_key(&self, link: &str) -> String {
        format!("{}:fill:{link}", self.prefix)
    }

    fn response_link_key(&self, link: &str) -> String {
        format!("{}:resplink:{link}", self.prefix)
    }

    fn responses_key(&self, form_id: &str) -> String {
        format!("{}:responses:{form_id}", self.prefix)
    }

    fn count_key(&self, form_id: &str) -> String {
        format!("{}:count:{form_id}", self.prefix)
    }

    /// Claim a link index key. Returns false when the link is already taken.
    async fn claim(&self, key: String, form_id: &str, expires_at: DateTime<Utc>) -> AppResult<bool> {
        let result: Option<String> = self
            .client
            .set(
                key,
                form_id,
                Some(Expiration::PXAT(expires_at.timestamp_millis())),
                Some(SetOptions::NX),
                false,
            )
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        Ok(result.is_some())
    }

    async fn load_form(&self, form_id: &str) -> AppResult<Option<form::Model>> {
        let raw: Option<String> = self
            .client
            .get(self.form_key(form_id))
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let mut form: form::Model = serde_json::from_str(&raw)
            .map_err(|e| AppError::Storage(format!("corrupt form {form_id}: {e}")))?;

        let count: Option<i64> = self
            .client
            .get(self.count_key(form_id))
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        form.response_count = count.unwrap_or(0);

        Ok(Some(form))
    }

    async fn lookup_via(&self, index_key: String, now: DateTime<Utc>) -> AppResult<FormLookup> {
        let form_id: Option<String> = self
            .client
            .get(index_key)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        let found = match form_id {
            Some(id) => self.load_form(&id).await?,
            None => None,
        };
        Ok(FormLookup::classify(found, now))
    }

    async fn load_responses(&self, form_id: &str) -> AppResult<Vec<response::Model>> {
        let raw: Vec<String> = self
            .client
            .lrange(self.responses_key(form_id), 0, -1)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        raw.iter()
            .map(|item| {
                serde_json::from_str(item)
                    .map_err(|e| AppError::Storage(format!("corrupt response of {form_id}: {e}")))
            })
            .collect()
    }

    async fn live_responses(
        &self,
        form_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<response::Model>> {
        let mut responses: Vec<response::Model> = self
            .load_responses(form_id)
            .await?
            .into_iter()
            .filter(|r| r.is_live(now))
            .collect();
        responses.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(responses)
    }
}

#[async_trait]
impl LifecycleStore for RedisStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    fn has_native_expiry(&self) -> bool {
        true
    }

    async fn init(&self) -> AppResult<()> {
        self.client.connect();
        self.client
            .wait_for_connect()
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        info!(prefix = %self.prefix, "Redis store connected");
        Ok(())
    }

    async fn shutdown(&self) -> AppResult<()> {
        self.client
            .quit()
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        debug!("Redis store disconnected");
        Ok(())
    }

    async fn create_form(&self, form: form::Model) -> AppResult<form::Model> {
        let fill_key = self.fill_key(&form.fill_link);
        if !self.claim(fill_key.clone(), &form.id, form.expires_at).await? {
            return Err(AppError::DuplicateLink(form.fill_link));
        }
        if !self
            .claim(
                self.response_link_key(&form.response_link),
                &form.id,
                form.expires_at,
            )
            .await?
        {
            self.client
                .del::<(), _>(fill_key)
                .await
                .map_err(|e| AppError::Redis(e.to_string()))?;
            return Err(AppError::DuplicateLink(form.response_link));
        }

        let json = serde_json::to_string(&form)
            .map_err(|e| AppError::Storage(format!("serialize form: {e}")))?;
        let written = self
            .client
            .set::<(), _, _>(
                self.form_key(&form.id),
                json,
                Some(Expiration::PXAT(form.expires_at.timestamp_millis())),
                None,
                false,
            )
            .await;
        if let Err(e) = written {
            // Link keys carry their own expiry; release them early anyway.
            let claimed = vec![fill_key, self.response_link_key(&form.response_link)];
            if let Err(release) = self.client.del::<(), _>(claimed).await {
                debug!(form_id = %form.id, error = %release, "Failed to release link keys");
            }
            return Err(AppError::Redis(e.to_string()));
        }

        Ok(form)
    }

    async fn get_form_by_fill_link(
        &self,
        link: &str,
        now: DateTime<Utc>,
    ) -> AppResult<FormLookup> {
        self.lookup_via(self.fill_key(link), now).await
    }

    async fn get_form_by_response_link(
        &self,
        link: &str,
        now: DateTime<Utc>,
    ) -> AppResult<FormLookup> {
        self.lookup_via(self.response_link_key(link), now).await
    }

    async fn increment_response_count(&self, form_id: &str) -> AppResult<()> {
        let Some(form) = self.load_form(form_id).await? else {
            debug!(form_id = %form_id, "Form vanished before counter increment");
            return Ok(());
        };

        let key = self.count_key(form_id);
        let trx = self.client.multi();
        trx.incr::<(), _>(key.clone())
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        trx.pexpire_at::<(), _>(key, form.expires_at.timestamp_millis(), None)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        trx.exec::<Value>(true)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        Ok(())
    }

    async fn create_response(&self, response: response::Model) -> AppResult<response::Model> {
        let exists: i64 = self
            .client
            .exists(self.form_key(&response.form_id))
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        if exists == 0 {
            return Err(AppError::NotFound(format!("Form {}", response.form_id)));
        }

        let key = self.responses_key(&response.form_id);
        let json = serde_json::to_string(&response)
            .map_err(|e| AppError::Storage(format!("serialize response: {e}")))?;
        let trx = self.client.multi();
        trx.rpush::<(), _, _>(key.clone(), json)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        trx.pexpire_at::<(), _>(key, response.expires_at.timestamp_millis(), None)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        trx.exec::<Value>(true)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        Ok(response)
    }

    async fn count_responses(&self, form_id: &str, now: DateTime<Utc>) -> AppResult<u64> {
        Ok(self.live_responses(form_id, now).await?.len() as u64)
    }

    async fn list_responses(
        &self,
        form_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<response::Model>> {
        self.live_responses(form_id, now).await
    }

    async fn find_response_by_submitter(
        &self,
        form_id: &str,
        submitter_ip: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<response::Model>> {
        Ok(self
            .live_responses(form_id, now)
            .await?
            .into_iter()
            .find(|r| r.submitter_ip.as_deref() == Some(submitter_ip)))
    }

    async fn delete_form(&self, form_id: &str) -> AppResult<bool> {
        let Some(form) = self.load_form(form_id).await? else {
            return Ok(false);
        };

        let keys = vec![
            self.form_key(form_id),
            self.fill_key(&form.fill_link),
            self.response_link_key(&form.response_link),
            self.responses_key(form_id),
            self.count_key(form_id),
        ];
        self.client
            .del::<(), _>(keys)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        Ok(true)
    }

    async fn delete_responses(&self, form_id: &str, response_ids: &[String]) -> AppResult<u64> {
        let key = self.responses_key(form_id);
        let raw: Vec<String> = self
            .client
            .lrange(key.clone(), 0, -1)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        let doomed: Vec<String> = raw
            .into_iter()
            .filter(|item| {
                serde_json::from_str::<response::Model>(item)
                    .is_ok_and(|r| response_ids.contains(&r.id))
            })
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }

        // LREM by exact document, so concurrent appends are never lost.
        let trx = self.client.multi();
        for item in doomed {
            trx.lrem::<(), _, _>(key.clone(), 1, item)
                .await
                .map_err(|e| AppError::Redis(e.to_string()))?;
        }
        let removed: Vec<i64> = trx
            .exec(true)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        Ok(u64::try_from(removed.into_iter().sum::<i64>()).unwrap_or(0))
    }

    async fn reclaim_expired(&self, _now: DateTime<Utc>) -> AppResult<u64> {
        // Redis evicts expired keys itself.
        Ok(0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::TestRedisConfig;
    use chrono::Duration;
    use serde_json::json;

    fn make_form(id: &str, fill: &str, resp: &str, expires_at: DateTime<Utc>) -> form::Model {
        form::Model {
            id: id.to_string(),
            title: "Redis form".to_string(),
            description: None,
            fields: json!([]),
            fill_link: fill.to_string(),
            response_link: resp.to_string(),
            response_secret: None,
            expiration_choice: "15min".to_string(),
            custom_expiration_minutes: None,
            allow_multiple_responses: true,
            show_response_count: true,
            require_all_fields: false,
            response_count: 0,
            created_at: expires_at - Duration::minutes(15),
            expires_at,
        }
    }

    #[test]
    fn test_key_layout() {
        let store = RedisStore::from_url("redis://localhost:6379", "tf").unwrap();
        assert_eq!(store.form_key("f1"), "tf:form:f1");
        assert_eq!(store.fill_key("AbCdEfGhIjKl"), "tf:fill:AbCdEfGhIjKl");
        assert_eq!(store.response_link_key("ab"), "tf:resplink:ab");
        assert_eq!(store.responses_key("f1"), "tf:responses:f1");
        assert_eq!(store.count_key("f1"), "tf:count:f1");
        assert!(store.has_native_expiry());
    }

    #[tokio::test]
    async fn test_reclaim_is_noop() {
        let store = RedisStore::from_url("redis://localhost:6379", "tf").unwrap();
        assert_eq!(store.reclaim_expired(Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore = "requires running Redis instance"]
    async fn test_roundtrip_against_redis() {
        let prefix = format!("tftest{}", Utc::now().timestamp_millis());
        let store = RedisStore::from_url(&TestRedisConfig::default().url, prefix).unwrap();
        store.init().await.unwrap();

        let now = Utc::now();
        let form = make_form("f1", "AbCdEfGhIjKl", "0123456789abcdef01234567", now + Duration::minutes(5));
        store.create_form(form.clone()).await.unwrap();

        let dup = make_form("f2", "AbCdEfGhIjKl", "ffffffffffffffffffffffff", now + Duration::minutes(5));
        assert!(matches!(
            store.create_form(dup).await,
            Err(AppError::DuplicateLink(_))
        ));

        store
            .create_response(response::Model {
                id: "r1".to_string(),
                form_id: "f1".to_string(),
                answers: json!({}),
                submitter_ip: Some("192.0.2.1".to_string()),
                user_agent: None,
                submitted_at: now,
                expires_at: form.expires_at,
            })
            .await
            .unwrap();
        store.increment_response_count("f1").await.unwrap();

        // Both the list and the counter carry the form's expiry.
        let list_ttl: i64 = store.client.pttl(store.responses_key("f1")).await.unwrap();
        let count_ttl: i64 = store.client.pttl(store.count_key("f1")).await.unwrap();
        assert!(list_ttl > 0);
        assert!(count_ttl > 0);

        let live = store
            .get_form_by_fill_link("AbCdEfGhIjKl", now)
            .await
            .unwrap()
            .live()
            .unwrap();
        assert_eq!(live.response_count, 1);
        assert_eq!(store.count_responses("f1", now).await.unwrap(), 1);

        let after = form.expires_at;
        assert!(matches!(
            store.get_form_by_response_link("0123456789abcdef01234567", after).await.unwrap(),
            FormLookup::Expired { .. }
        ));

        assert_eq!(
            store
                .delete_responses("f1", &["nope".to_string()])
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            store.delete_responses("f1", &["r1".to_string()]).await.unwrap(),
            1
        );
        assert_eq!(store.count_responses("f1", now).await.unwrap(), 0);

        assert!(store.delete_form("f1").await.unwrap());
        assert_eq!(
            store.get_form_by_fill_link("AbCdEfGhIjKl", now).await.unwrap(),
            FormLookup::Missing
        );
        store.shutdown().await.unwrap();
    }
}
