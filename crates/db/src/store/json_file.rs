//! File-backed store.
//!
//! Forms and responses live in two JSON arrays, `forms.json` and
//! `responses.json`, under the configured data directory. The collections are
//! held in memory behind a single lock; every mutation works on a copy,
//! writes it to a temporary file, renames it into place and only then commits
//! the copy. A failed write leaves both the file and the in-memory state
//! untouched.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempforms_common::{AppError, AppResult};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{FormLookup, LifecycleStore};
use crate::entities::{form, response};

const FORMS_FILE: &str = "forms.json";
const RESPONSES_FILE: &str = "responses.json";

#[derive(Debug, Default)]
struct Collections {
    forms: Vec<form::Model>,
    responses: Vec<response::Model>,
}

/// JSON file store without native expiry.
pub struct JsonFileStore {
    dir: PathBuf,
    state: Mutex<Collections>,
}

impl JsonFileStore {
    /// Create a store rooted at `dir`. Nothing is read until [`LifecycleStore::init`].
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            state: Mutex::new(Collections::default()),
        }
    }

    fn forms_path(&self) -> PathBuf {
        self.dir.join(FORMS_FILE)
    }

    fn responses_path(&self) -> PathBuf {
        self.dir.join(RESPONSES_FILE)
    }
}

async fn load_collection<T: DeserializeOwned>(path: &Path) -> AppResult<Vec<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| AppError::Storage(format!("{}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(AppError::Storage(format!("{}: {e}", path.display()))),
    }
}

async fn write_collection<T: Serialize>(path: &Path, items: &[T]) -> AppResult<()> {
    let bytes = serde_json::to_vec_pretty(items)
        .map_err(|e| AppError::Storage(format!("serialize {}: {e}", path.display())))?;
    let tmp = path.with_extension("json.tmp");

    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| AppError::Storage(format!("{}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| AppError::Storage(format!("{}: {e}", path.display())))
}

#[async_trait]
impl LifecycleStore for JsonFileStore {
    fn backend_name(&self) -> &'static str {
        "json"
    }

    fn has_native_expiry(&self) -> bool {
        false
    }

    async fn init(&self) -> AppResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AppError::Storage(format!("{}: {e}", self.dir.display())))?;

        let forms = load_collection(&self.forms_path()).await?;
        let responses = load_collection(&self.responses_path()).await?;

        let mut state = self.state.lock().await;
        info!(
            dir = %self.dir.display(),
            forms = forms.len(),
            responses = responses.len(),
            "JSON file store loaded"
        );
        *state = Collections { forms, responses };
        Ok(())
    }

    async fn shutdown(&self) -> AppResult<()> {
        // Every mutation is already on disk.
        let _guard = self.state.lock().await;
        debug!("JSON file store shut down");
        Ok(())
    }

    async fn create_form(&self, form: form::Model) -> AppResult<form::Model> {
        let mut state = self.state.lock().await;

        let taken = state.forms.iter().any(|f| {
            f.fill_link == form.fill_link
                || f.response_link == form.response_link
                || f.fill_link == form.response_link
                || f.response_link == form.fill_link
        });
        if taken {
            return Err(AppError::DuplicateLink(form.fill_link));
        }

        let mut forms = state.forms.clone();
        forms.push(form.clone());
        write_collection(&self.forms_path(), &forms).await?;
        state.forms = forms;

        Ok(form)
    }

    async fn get_form_by_fill_link(
        &self,
        link: &str,
        now: DateTime<Utc>,
    ) -> AppResult<FormLookup> {
        let state = self.state.lock().await;
        let found = state.forms.iter().find(|f| f.fill_link == link).cloned();
        Ok(FormLookup::classify(found, now))
    }

    async fn get_form_by_response_link(
        &self,
        link: &str,
        now: DateTime<Utc>,
    ) -> AppResult<FormLookup> {
        let state = self.state.lock().await;
        let found = state
            .forms
            .iter()
            .find(|f| f.response_link == link)
            .cloned();
        Ok(FormLookup::classify(found, now))
    }

    async fn increment_response_count(&self, form_id: &str) -> AppResult<()> {
        let mut state = self.state.lock().await;

        let mut forms = state.forms.clone();
        let Some(target) = forms.iter_mut().find(|f| f.id == form_id) else {
            debug!(form_id = %form_id, "Form vanished before counter increment");
            return Ok(());
        };
        target.response_count += 1;

        write_collection(&self.forms_path(), &forms).await?;
        state.forms = forms;
        Ok(())
    }

    async fn create_response(&self, response: response::Model) -> AppResult<response::Model> {
        let mut state = self.state.lock().await;

        if !state.forms.iter().any(|f| f.id == response.form_id) {
            return Err(AppError::NotFound(format!("Form {}", response.form_id)));
        }

        let mut responses = state.responses.clone();
        responses.push(response.clone());
        write_collection(&self.responses_path(), &responses).await?;
        state.responses = responses;

        Ok(response)
    }

    async fn count_responses(&self, form_id: &str, now: DateTime<Utc>) -> AppResult<u64> {
        let state = self.state.lock().await;
        let count = state
            .responses
            .iter()
            .filter(|r| r.form_id == form_id && r.is_live(now))
            .count();
        Ok(count as u64)
    }

    async fn list_responses(
        &self,
        form_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<response::Model>> {
        let state = self.state.lock().await;
        let mut responses: Vec<response::Model> = state
            .responses
            .iter()
            .filter(|r| r.form_id == form_id && r.is_live(now))
            .cloned()
            .collect();
        responses.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(responses)
    }

    async fn find_response_by_submitter(
        &self,
        form_id: &str,
        submitter_ip: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<response::Model>> {
        let state = self.state.lock().await;
        Ok(state
            .responses
            .iter()
            .find(|r| {
                r.form_id == form_id
                    && r.submitter_ip.as_deref() == Some(submitter_ip)
                    && r.is_live(now)
            })
            .cloned())
    }

    async fn delete_form(&self, form_id: &str) -> AppResult<bool> {
        let mut state = self.state.lock().await;

        if !state.forms.iter().any(|f| f.id == form_id) {
            return Ok(false);
        }

        let forms: Vec<form::Model> = state
            .forms
            .iter()
            .filter(|f| f.id != form_id)
            .cloned()
            .collect();
        let responses: Vec<response::Model> = state
            .responses
            .iter()
            .filter(|r| r.form_id != form_id)
            .cloned()
            .collect();

        write_collection(&self.forms_path(), &forms).await?;
        state.forms = forms;
        write_collection(&self.responses_path(), &responses).await?;
        state.responses = responses;

        Ok(true)
    }

    async fn delete_responses(&self, form_id: &str, response_ids: &[String]) -> AppResult<u64> {
        let mut state = self.state.lock().await;

        let responses: Vec<response::Model> = state
            .responses
            .iter()
            .filter(|r| r.form_id != form_id || !response_ids.contains(&r.id))
            .cloned()
            .collect();
        let removed = (state.responses.len() - responses.len()) as u64;
        if removed == 0 {
            return Ok(0);
        }

        write_collection(&self.responses_path(), &responses).await?;
        state.responses = responses;

        Ok(removed)
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut state = self.state.lock().await;

        let forms: Vec<form::Model> = state
            .forms
            .iter()
            .filter(|f| f.is_live(now))
            .cloned()
            .collect();
        let live_ids: HashSet<&str> = forms.iter().map(|f| f.id.as_str()).collect();
        let responses: Vec<response::Model> = state
            .responses
            .iter()
            .filter(|r| r.is_live(now) && live_ids.contains(r.form_id.as_str()))
            .cloned()
            .collect();

        let removed_forms = state.forms.len() - forms.len();
        let removed_responses = state.responses.len() - responses.len();

        if removed_forms > 0 {
            write_collection(&self.forms_path(), &forms).await?;
            state.forms = forms;
        }
        if removed_responses > 0 {
            write_collection(&self.responses_path(), &responses).await?;
            state.responses = responses;
        }

        Ok((removed_forms + removed_responses) as u64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn make_form(id: &str, fill: &str, resp: &str, expires_at: DateTime<Utc>) -> form::Model {
        form::Model {
            id: id.to_string(),
            title: format!("Form {id}"),
            description: None,
            fields: json!([{"id": "field_q0000001", "type": "text", "label": "Q", "order": 0}]),
            fill_link: fill.to_string(),
            response_link: resp.to_string(),
            response_secret: None,
            expiration_choice: "custom".to_string(),
            custom_expiration_minutes: Some(10),
            allow_multiple_responses: true,
            show_response_count: true,
            require_all_fields: false,
            response_count: 0,
            created_at: expires_at - Duration::minutes(10),
            expires_at,
        }
    }

    fn make_response(id: &str, form: &form::Model, submitted_at: DateTime<Utc>) -> response::Model {
        response::Model {
            id: id.to_string(),
            form_id: form.id.clone(),
            answers: json!({"field_q0000001": "hello"}),
            submitter_ip: Some("192.0.2.10".to_string()),
            user_agent: None,
            submitted_at,
            expires_at: form.expires_at,
        }
    }

    async fn open_store(dir: &Path) -> JsonFileStore {
        let store = JsonFileStore::new(dir);
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_create_and_lookup_persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let form = make_form("f1", "AAAAAAAAAAAA", "aaaaaaaaaaaaaaaaaaaaaaaa", now + Duration::minutes(10));

        {
            let store = open_store(tmp.path()).await;
            store.create_form(form.clone()).await.unwrap();
            store.increment_response_count("f1").await.unwrap();
        }

        let store = open_store(tmp.path()).await;
        let found = store
            .get_form_by_fill_link("AAAAAAAAAAAA", now)
            .await
            .unwrap()
            .live()
            .unwrap();
        assert_eq!(found.id, "f1");
        assert_eq!(found.response_count, 1);
    }

    #[tokio::test]
    async fn test_duplicate_link_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(tmp.path()).await;
        let expires = Utc::now() + Duration::minutes(10);

        store
            .create_form(make_form("f1", "AAAAAAAAAAAA", "aaaaaaaaaaaaaaaaaaaaaaaa", expires))
            .await
            .unwrap();
        let err = store
            .create_form(make_form("f2", "AAAAAAAAAAAA", "bbbbbbbbbbbbbbbbbbbbbbbb", expires))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::DuplicateLink(_)));
    }

    #[tokio::test]
    async fn test_expired_but_present_reads_as_expired() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(tmp.path()).await;
        let created = Utc::now();
        let form = make_form("f1", "AAAAAAAAAAAA", "aaaaaaaaaaaaaaaaaaaaaaaa", created + Duration::minutes(10));
        store.create_form(form.clone()).await.unwrap();
        store
            .create_response(make_response("r1", &form, created))
            .await
            .unwrap();

        let later = form.expires_at;
        let lookup = store
            .get_form_by_response_link("aaaaaaaaaaaaaaaaaaaaaaaa", later)
            .await
            .unwrap();

        assert_eq!(
            lookup,
            FormLookup::Expired {
                expires_at: form.expires_at
            }
        );
        assert_eq!(store.count_responses("f1", later).await.unwrap(), 0);
        assert!(store.list_responses("f1", later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_responses_only_touches_named_form() {
        let tmp = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let expires = now + Duration::minutes(10);
        let first = make_form("f1", "AAAAAAAAAAAA", "aaaaaaaaaaaaaaaaaaaaaaaa", expires);
        let second = make_form("f2", "BBBBBBBBBBBB", "bbbbbbbbbbbbbbbbbbbbbbbb", expires);

        {
            let store = open_store(tmp.path()).await;
            store.create_form(first.clone()).await.unwrap();
            store.create_form(second.clone()).await.unwrap();
            for (id, form) in [("r1", &first), ("r2", &first), ("r3", &second)] {
                store.create_response(make_response(id, form, now)).await.unwrap();
                store.increment_response_count(&form.id).await.unwrap();
            }

            let ids = vec!["r1".to_string(), "r3".to_string(), "missing".to_string()];
            assert_eq!(store.delete_responses("f1", &ids).await.unwrap(), 1);
            assert_eq!(store.delete_responses("f1", &ids).await.unwrap(), 0);
        }

        let store = open_store(tmp.path()).await;
        let left: Vec<String> = store
            .list_responses("f1", now)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(left, vec!["r2".to_string()]);
        assert_eq!(store.count_responses("f2", now).await.unwrap(), 1);

        let form = store
            .get_form_by_fill_link("AAAAAAAAAAAA", now)
            .await
            .unwrap()
            .live()
            .unwrap();
        assert_eq!(form.response_count, 2);
    }

    #[tokio::test]
    async fn test_reclaim_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(tmp.path()).await;
        let now = Utc::now();

        let dead = make_form("f1", "AAAAAAAAAAAA", "aaaaaaaaaaaaaaaaaaaaaaaa", now + Duration::minutes(1));
        let alive = make_form("f2", "BBBBBBBBBBBB", "bbbbbbbbbbbbbbbbbbbbbbbb", now + Duration::hours(1));
        store.create_form(dead.clone()).await.unwrap();
        store.create_form(alive.clone()).await.unwrap();
        store.create_response(make_response("r1", &dead, now)).await.unwrap();
        store.create_response(make_response("r2", &alive, now)).await.unwrap();

        let later = now + Duration::minutes(2);
        assert_eq!(store.reclaim_expired(later).await.unwrap(), 2);
        assert_eq!(store.reclaim_expired(later).await.unwrap(), 0);

        assert_eq!(
            store.get_form_by_fill_link("AAAAAAAAAAAA", later).await.unwrap(),
            FormLookup::Missing
        );
        assert_eq!(store.count_responses("f2", later).await.unwrap(), 1);

        let reopened = open_store(tmp.path()).await;
        assert_eq!(reopened.count_responses("f2", later).await.unwrap(), 1);
        assert_eq!(
            reopened.get_form_by_fill_link("AAAAAAAAAAAA", later).await.unwrap(),
            FormLookup::Missing
        );
    }

    #[tokio::test]
    async fn test_reclaim_drops_orphans() {
        let tmp = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let form = make_form("gone", "AAAAAAAAAAAA", "aaaaaaaaaaaaaaaaaaaaaaaa", now + Duration::hours(1));
        let orphan = make_response("r1", &form, now);
        tokio::fs::write(
            tmp.path().join(RESPONSES_FILE),
            serde_json::to_vec(&vec![orphan]).unwrap(),
        )
        .await
        .unwrap();

        let store = open_store(tmp.path()).await;
        assert_eq!(store.reclaim_expired(now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_response_for_missing_form_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(tmp.path()).await;
        let now = Utc::now();
        let form = make_form("f1", "AAAAAAAAAAAA", "aaaaaaaaaaaaaaaaaaaaaaaa", now + Duration::hours(1));

        let err = store
            .create_response(make_response("r1", &form, now))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_newest_first_and_delete_cascades() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(tmp.path()).await;
        let now = Utc::now();
        let form = make_form("f1", "AAAAAAAAAAAA", "aaaaaaaaaaaaaaaaaaaaaaaa", now + Duration::hours(1));
        store.create_form(form.clone()).await.unwrap();
        store
            .create_response(make_response("old", &form, now - Duration::minutes(5)))
            .await
            .unwrap();
        store
            .create_response(make_response("new", &form, now))
            .await
            .unwrap();

        let listed = store.list_responses("f1", now).await.unwrap();
        assert_eq!(listed[0].id, "new");
        assert_eq!(listed[1].id, "old");

        let submitter = store
            .find_response_by_submitter("f1", "192.0.2.10", now)
            .await
            .unwrap();
        assert!(submitter.is_some());

        assert!(store.delete_form("f1").await.unwrap());
        assert!(!store.delete_form("f1").await.unwrap());
        assert_eq!(store.count_responses("f1", now).await.unwrap(), 0);
    }
}
