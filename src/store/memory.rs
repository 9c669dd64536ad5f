use std::collections::{BTreeMap, HashMap};

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::PortalStore;
use crate::activity::{ActivityType, ALL_TYPES};
use crate::filters::StudentFilter;
use crate::models::{
    ActivityRecord, Batch, BatchKey, ContactMessage, ContactStatus, ProofFile, Student,
};

struct StoredActivity {
    record: ActivityRecord,
    proof_data: Option<Vec<u8>>,
}

#[derive(Default)]
struct Inner {
    students: BTreeMap<String, Student>,
    batches: BTreeMap<BatchKey, Batch>,
    activities: HashMap<ActivityType, Vec<StoredActivity>>,
    messages: Vec<ContactMessage>,
}

/// In-process store backing tests and `serve --in-memory`.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    unavailable: Option<ActivityType>,
    students_unavailable: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every read of one collection fail, as an unreachable table would.
    pub fn with_unavailable_collection(mut self, activity_type: ActivityType) -> Self {
        self.unavailable = Some(activity_type);
        self
    }

    /// Makes student listing fail.
    pub fn with_unavailable_students(mut self) -> Self {
        self.students_unavailable = true;
        self
    }

    fn check_available(&self, activity_type: ActivityType) -> anyhow::Result<()> {
        if self.unavailable == Some(activity_type) {
            bail!("collection {} is unavailable", activity_type.descriptor().table);
        }
        Ok(())
    }
}

fn remove_owned_activities(inner: &mut Inner, email_id: &str) {
    for stored in inner.activities.values_mut() {
        stored.retain(|a| a.record.email_id != email_id);
    }
}

#[async_trait]
impl PortalStore for MemoryStore {
    async fn list_students(&self, filter: &StudentFilter) -> anyhow::Result<Vec<Student>> {
        if self.students_unavailable {
            bail!("students table is unavailable");
        }
        let inner = self.inner.read().await;
        Ok(inner
            .students
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect())
    }

    async fn get_student(&self, email_id: &str) -> anyhow::Result<Option<Student>> {
        Ok(self.inner.read().await.students.get(email_id).cloned())
    }

    async fn upsert_student(&self, student: &Student) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        let mut incoming = student.clone();
        if let Some(existing) = inner.students.get(&student.email_id) {
            incoming.created_at = existing.created_at;
        }
        inner.students.insert(incoming.email_id.clone(), incoming);
        Ok(())
    }

    async fn delete_student(&self, email_id: &str) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().await;
        let removed = inner.students.remove(email_id).is_some();
        if removed {
            remove_owned_activities(&mut inner, email_id);
        }
        Ok(removed)
    }

    async fn list_batches(&self) -> anyhow::Result<Vec<Batch>> {
        Ok(self.inner.read().await.batches.values().cloned().collect())
    }

    async fn upsert_batch(&self, key: &BatchKey) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        inner.batches.entry(key.clone()).or_insert_with(|| Batch {
            key: key.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn delete_batch(&self, key: &BatchKey) -> anyhow::Result<Option<usize>> {
        let mut inner = self.inner.write().await;
        if inner.batches.remove(key).is_none() {
            return Ok(None);
        }

        let members: Vec<String> = inner
            .students
            .values()
            .filter(|s| &s.batch_key() == key)
            .map(|s| s.email_id.clone())
            .collect();
        for email in &members {
            inner.students.remove(email);
            remove_owned_activities(&mut inner, email);
        }
        Ok(Some(members.len()))
    }

    async fn list_activities(
        &self,
        activity_type: ActivityType,
        emails: Option<&[String]>,
    ) -> anyhow::Result<Vec<ActivityRecord>> {
        self.check_available(activity_type)?;
        let inner = self.inner.read().await;
        let mut records: Vec<ActivityRecord> = inner
            .activities
            .get(&activity_type)
            .map(|stored| {
                stored
                    .iter()
                    .filter(|a| emails.map_or(true, |list| list.contains(&a.record.email_id)))
                    .map(|a| a.record.clone())
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(records)
    }

    async fn get_activity(
        &self,
        activity_type: ActivityType,
        id: Uuid,
    ) -> anyhow::Result<Option<ActivityRecord>> {
        self.check_available(activity_type)?;
        let inner = self.inner.read().await;
        Ok(inner
            .activities
            .get(&activity_type)
            .and_then(|stored| stored.iter().find(|a| a.record.id == id))
            .map(|a| a.record.clone()))
    }

    async fn insert_activity(
        &self,
        record: &ActivityRecord,
        proof: Option<&ProofFile>,
    ) -> anyhow::Result<()> {
        self.check_available(record.activity_type)?;
        let mut inner = self.inner.write().await;
        let stored = inner.activities.entry(record.activity_type).or_default();
        if stored.iter().any(|a| a.record.id == record.id) {
            bail!("duplicate activity id {}", record.id);
        }
        stored.push(StoredActivity {
            record: record.clone(),
            proof_data: proof.map(|p| p.data.clone()),
        });
        Ok(())
    }

    async fn update_activity(
        &self,
        record: &ActivityRecord,
        proof: Option<&ProofFile>,
    ) -> anyhow::Result<bool> {
        self.check_available(record.activity_type)?;
        let mut inner = self.inner.write().await;
        let Some(existing) = inner
            .activities
            .get_mut(&record.activity_type)
            .and_then(|stored| stored.iter_mut().find(|a| a.record.id == record.id))
        else {
            return Ok(false);
        };

        let previous_proof = existing.record.proof.clone();
        existing.record = record.clone();
        match proof {
            Some(file) => {
                existing.record.proof = Some(file.meta.clone());
                existing.proof_data = Some(file.data.clone());
            }
            None => existing.record.proof = previous_proof,
        }
        Ok(true)
    }

    async fn delete_activity(&self, activity_type: ActivityType, id: Uuid) -> anyhow::Result<bool> {
        self.check_available(activity_type)?;
        let mut inner = self.inner.write().await;
        let Some(stored) = inner.activities.get_mut(&activity_type) else {
            return Ok(false);
        };
        let before = stored.len();
        stored.retain(|a| a.record.id != id);
        Ok(stored.len() != before)
    }

    async fn fetch_proof(
        &self,
        activity_type: ActivityType,
        id: Uuid,
    ) -> anyhow::Result<Option<ProofFile>> {
        self.check_available(activity_type)?;
        let inner = self.inner.read().await;
        let found = inner
            .activities
            .get(&activity_type)
            .and_then(|stored| stored.iter().find(|a| a.record.id == id));

        Ok(found.and_then(|a| match (&a.record.proof, &a.proof_data) {
            (Some(meta), Some(data)) => Some(ProofFile {
                meta: meta.clone(),
                data: data.clone(),
            }),
            _ => None,
        }))
    }

    async fn latest_activity_updates(
        &self,
        emails: &[String],
    ) -> anyhow::Result<HashMap<String, DateTime<Utc>>> {
        let inner = self.inner.read().await;
        let mut latest: HashMap<String, DateTime<Utc>> = HashMap::new();

        for ty in ALL_TYPES {
            let Some(stored) = inner.activities.get(&ty) else {
                continue;
            };
            for a in stored.iter().filter(|a| emails.contains(&a.record.email_id)) {
                let entry = latest
                    .entry(a.record.email_id.clone())
                    .or_insert(a.record.updated_at);
                if a.record.updated_at > *entry {
                    *entry = a.record.updated_at;
                }
            }
        }

        Ok(latest)
    }

    async fn insert_message(&self, message: &ContactMessage) -> anyhow::Result<()> {
        self.inner.write().await.messages.push(message.clone());
        Ok(())
    }

    async fn list_messages(&self) -> anyhow::Result<Vec<ContactMessage>> {
        let mut messages = self.inner.read().await.messages.clone();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(messages)
    }

    async fn set_message_status(
        &self,
        id: Uuid,
        status: ContactStatus,
    ) -> anyhow::Result<Option<ContactMessage>> {
        let mut inner = self.inner.write().await;
        Ok(inner.messages.iter_mut().find(|m| m.id == id).map(|m| {
            m.status = status;
            m.clone()
        }))
    }

    async fn delete_message(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().await;
        let before = inner.messages.len();
        inner.messages.retain(|m| m.id != id);
        Ok(inner.messages.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(email: &str, batch_no: i32) -> Student {
        Student {
            department: "INFT".to_string(),
            class_division: "A".to_string(),
            batch_no,
            ..Student::new(email)
        }
    }

    #[tokio::test]
    async fn deleting_a_batch_cascades_to_students_and_activities() {
        let store = MemoryStore::new();
        let kept = student("kept@college.edu", 2022);
        let gone = student("gone@college.edu", 2023);
        store.upsert_student(&kept).await.unwrap();
        store.upsert_student(&gone).await.unwrap();
        store.upsert_batch(&gone.batch_key()).await.unwrap();

        for email in ["kept@college.edu", "gone@college.edu"] {
            let rec = ActivityRecord::new(ActivityType::Workshop, email).with_field("title", "x");
            store.insert_activity(&rec, None).await.unwrap();
        }

        let removed = store.delete_batch(&gone.batch_key()).await.unwrap();
        assert_eq!(removed, Some(1));
        assert!(store.get_student("gone@college.edu").await.unwrap().is_none());

        let remaining = store
            .list_activities(ActivityType::Workshop, None)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].email_id, "kept@college.edu");
    }

    #[tokio::test]
    async fn unknown_batch_is_reported_as_missing() {
        let store = MemoryStore::new();
        let key = student("a@college.edu", 2020).batch_key();
        assert_eq!(store.delete_batch(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn update_without_proof_keeps_the_stored_file() {
        let store = MemoryStore::new();
        let file = ProofFile::new("cert.pdf".to_string(), None, b"%PDF".to_vec());
        let mut rec = ActivityRecord::new(ActivityType::Patent, "a@college.edu");
        rec.proof = Some(file.meta.clone());
        store.insert_activity(&rec, Some(&file)).await.unwrap();

        let mut edited = rec.clone();
        edited.proof = None;
        edited.fields.insert("title".to_string(), "Edited".into());
        assert!(store.update_activity(&edited, None).await.unwrap());

        let fetched = store.fetch_proof(ActivityType::Patent, rec.id).await.unwrap().unwrap();
        assert_eq!(fetched.data, b"%PDF");
        assert_eq!(fetched.meta.file_name, "cert.pdf");
    }

    #[tokio::test]
    async fn explicit_empty_scope_matches_nothing() {
        let store = MemoryStore::new();
        let rec = ActivityRecord::new(ActivityType::Workshop, "a@college.edu");
        store.insert_activity(&rec, None).await.unwrap();

        let nobody: &[String] = &[];
        let scoped = store
            .list_activities(ActivityType::Workshop, Some(nobody))
            .await
            .unwrap();
        assert!(scoped.is_empty());
    }
}
