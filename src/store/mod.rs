use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::activity::ActivityType;
use crate::filters::StudentFilter;
use crate::models::{
    ActivityRecord, Batch, BatchKey, ContactMessage, ContactStatus, ProofFile, Student,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Persistence boundary. Implementations return records of one collection in
/// `(created_at, id)` order and never filter beyond what the arguments say.
#[async_trait]
pub trait PortalStore: Send + Sync + 'static {
    async fn list_students(&self, filter: &StudentFilter) -> anyhow::Result<Vec<Student>>;

    async fn find_student_emails(&self, filter: &StudentFilter) -> anyhow::Result<Vec<String>> {
        Ok(self
            .list_students(filter)
            .await?
            .into_iter()
            .map(|s| s.email_id)
            .collect())
    }

    async fn get_student(&self, email_id: &str) -> anyhow::Result<Option<Student>>;
    async fn upsert_student(&self, student: &Student) -> anyhow::Result<()>;
    /// Removes the student and every activity record they own.
    async fn delete_student(&self, email_id: &str) -> anyhow::Result<bool>;

    async fn list_batches(&self) -> anyhow::Result<Vec<Batch>>;
    async fn upsert_batch(&self, key: &BatchKey) -> anyhow::Result<()>;
    /// Returns the number of students removed, or `None` when the batch is unknown.
    async fn delete_batch(&self, key: &BatchKey) -> anyhow::Result<Option<usize>>;

    /// `emails: None` means unscoped; `Some(&[])` matches nothing.
    async fn list_activities(
        &self,
        activity_type: ActivityType,
        emails: Option<&[String]>,
    ) -> anyhow::Result<Vec<ActivityRecord>>;
    async fn get_activity(
        &self,
        activity_type: ActivityType,
        id: Uuid,
    ) -> anyhow::Result<Option<ActivityRecord>>;
    async fn insert_activity(
        &self,
        record: &ActivityRecord,
        proof: Option<&ProofFile>,
    ) -> anyhow::Result<()>;
    /// Replaces fields; replaces the stored proof only when one is given.
    async fn update_activity(
        &self,
        record: &ActivityRecord,
        proof: Option<&ProofFile>,
    ) -> anyhow::Result<bool>;
    async fn delete_activity(&self, activity_type: ActivityType, id: Uuid) -> anyhow::Result<bool>;
    async fn fetch_proof(
        &self,
        activity_type: ActivityType,
        id: Uuid,
    ) -> anyhow::Result<Option<ProofFile>>;
    /// Most recent activity `updated_at` per owner across all collections.
    async fn latest_activity_updates(
        &self,
        emails: &[String],
    ) -> anyhow::Result<HashMap<String, DateTime<Utc>>>;

    async fn insert_message(&self, message: &ContactMessage) -> anyhow::Result<()>;
    /// Newest first.
    async fn list_messages(&self) -> anyhow::Result<Vec<ContactMessage>>;
    async fn set_message_status(
        &self,
        id: Uuid,
        status: ContactStatus,
    ) -> anyhow::Result<Option<ContactMessage>>;
    async fn delete_message(&self, id: Uuid) -> anyhow::Result<bool>;
}
