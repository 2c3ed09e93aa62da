//! In-process store with the same skip-duplicates semantics as Postgres.
//! Used by the pipeline tests and the upload route tests.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;

use crate::ingest::types::{ExistenceMarker, MetricRecord, UserAccount, UserImportRecord};
use crate::store::{IngestStore, StoreError};

#[derive(Debug, Clone)]
struct StoredUser {
    id: i32,
    record: UserImportRecord,
}

#[derive(Debug, Default)]
struct MemoryState {
    metrics: Vec<MetricRecord>,
    metric_keys: HashSet<(NaiveDate, i64, i64)>,
    users: Vec<StoredUser>,
    user_keys: HashSet<(String, String)>,
    markers: Vec<ExistenceMarker>,
    marker_keys: HashSet<ExistenceMarker>,
    next_user_id: i32,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    /// Snapshot of stored metric rows in insertion order.
    pub fn metrics(&self) -> Vec<MetricRecord> {
        self.lock()
            .map(|state| state.metrics.clone())
            .unwrap_or_default()
    }

    pub fn users(&self) -> Vec<UserAccount> {
        self.lock()
            .map(|state| state.users.iter().map(StoredUser::account).collect())
            .unwrap_or_default()
    }

    pub fn existence_markers(&self) -> Vec<ExistenceMarker> {
        self.lock()
            .map(|state| state.markers.clone())
            .unwrap_or_default()
    }

    /// Stored password hash for an identity.
    pub fn stored_password(&self, username: &str, email: &str) -> Option<String> {
        let state = self.lock().ok()?;
        state
            .users
            .iter()
            .find(|user| user.record.username == username && user.record.email == email)
            .map(|user| user.record.password_hash.clone())
    }
}

impl StoredUser {
    fn account(&self) -> UserAccount {
        UserAccount {
            id: self.id,
            username: self.record.username.clone(),
            email: self.record.email.clone(),
            role: self.record.role.clone(),
        }
    }
}

#[rocket::async_trait]
impl IngestStore for MemoryStore {
    async fn insert_metrics(&self, records: &[MetricRecord]) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        let mut written = 0;
        for record in records {
            let key = (record.date, record.account_id, record.campaign_id);
            if state.metric_keys.insert(key) {
                state.metrics.push(record.clone());
                written += 1;
            }
        }
        Ok(written)
    }

    async fn insert_users(&self, records: &[UserImportRecord]) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        let mut written = 0;
        for record in records {
            let key = (record.username.clone(), record.email.clone());
            if state.user_keys.insert(key) {
                state.next_user_id += 1;
                let id = state.next_user_id;
                state.users.push(StoredUser {
                    id,
                    record: record.clone(),
                });
                written += 1;
            }
        }
        Ok(written)
    }

    async fn insert_existence_markers(
        &self,
        markers: &[ExistenceMarker],
    ) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        let mut written = 0;
        for marker in markers {
            if state.marker_keys.insert(marker.clone()) {
                state.markers.push(marker.clone());
                written += 1;
            }
        }
        Ok(written)
    }

    async fn find_users_by_identity(
        &self,
        identities: &[ExistenceMarker],
    ) -> Result<Vec<UserAccount>, StoreError> {
        let wanted: HashSet<(&str, &str)> = identities
            .iter()
            .map(|identity| (identity.username.as_str(), identity.email.as_str()))
            .collect();
        let state = self.lock()?;
        Ok(state
            .users
            .iter()
            .filter(|user| {
                wanted.contains(&(user.record.username.as_str(), user.record.email.as_str()))
            })
            .map(StoredUser::account)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn metric(day: u32, account_id: i64) -> MetricRecord {
        let now = Utc::now();
        MetricRecord {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            account_id,
            campaign_id: 1,
            cost_micros: None,
            clicks: 1.0,
            conversions: 0.0,
            impressions: 10.0,
            interactions: 1.0,
            created_at: now,
            updated_at: now,
        }
    }

    fn user(username: &str) -> UserImportRecord {
        UserImportRecord {
            username: username.into(),
            email: format!("{username}@example.com"),
            password_hash: "$argon2id$stub".into(),
            role: "user".into(),
        }
    }

    #[tokio::test]
    async fn skips_duplicate_metric_keys() {
        let store = MemoryStore::new();
        let written = store
            .insert_metrics(&[metric(1, 1), metric(1, 1), metric(2, 1)])
            .await
            .unwrap();
        assert_eq!(written, 2);

        let written = store.insert_metrics(&[metric(2, 1)]).await.unwrap();
        assert_eq!(written, 0);
        assert_eq!(store.metrics().len(), 2);
    }

    #[tokio::test]
    async fn finds_users_by_identity_pair() {
        let store = MemoryStore::new();
        store
            .insert_users(&[user("alice"), user("bob"), user("alice")])
            .await
            .unwrap();

        let found = store
            .find_users_by_identity(&[
                ExistenceMarker {
                    username: "alice".into(),
                    email: "alice@example.com".into(),
                },
                ExistenceMarker {
                    username: "alice".into(),
                    email: "bob@example.com".into(),
                },
            ])
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].username, "alice");
        assert_eq!(found[0].id, 1);
        assert_eq!(store.users().len(), 2);
    }
}
