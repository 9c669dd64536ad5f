//! Create, update, list, download and delete for every activity type through
//! one code path driven by the type's descriptor.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::activity::{ActivityType, DateField};
use crate::completion::is_complete;
use crate::context::RequestContext;
use crate::error::{PortalError, PortalResult};
use crate::models::{parse_loose_date, ActivityRecord, ProofFile, RESERVED_FIELDS};
use crate::store::PortalStore;

/// A submitted activity form: free-form fields plus an optional proof file.
#[derive(Debug, Clone, Default)]
pub struct RecordForm {
    pub email_id: Option<String>,
    pub fields: Map<String, Value>,
    pub proof: Option<ProofFile>,
}

impl RecordForm {
    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn with_proof(mut self, proof: ProofFile) -> Self {
        self.proof = Some(proof);
        self
    }

    fn sanitized_fields(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .filter(|(key, _)| !RESERVED_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SplitRecords {
    pub complete: Vec<ActivityRecord>,
    pub incomplete: Vec<ActivityRecord>,
}

fn validate_record(record: &ActivityRecord) -> PortalResult<()> {
    let descriptor = record.activity_type.descriptor();
    let missing: Vec<&str> = descriptor
        .required_fields
        .iter()
        .copied()
        .filter(|field| !record.is_set(field))
        .collect();
    if !missing.is_empty() {
        return Err(PortalError::validation(format!(
            "{} is missing required field(s): {}",
            descriptor.tag,
            missing.join(", ")
        )));
    }

    let mut date_fields = vec!["end_date"];
    if let DateField::Field(primary) = descriptor.date_field {
        date_fields.push(primary);
    }
    for field in date_fields {
        if let Some(raw) = record.text(field) {
            if parse_loose_date(raw).is_none() {
                return Err(PortalError::validation(format!(
                    "invalid {field}: {raw:?}, expected YYYY-MM-DD"
                )));
            }
        }
    }
    Ok(())
}

async fn load_record(
    store: &dyn PortalStore,
    activity_type: ActivityType,
    id: Uuid,
) -> PortalResult<ActivityRecord> {
    store
        .get_activity(activity_type, id)
        .await?
        .ok_or_else(|| PortalError::not_found(format!("{activity_type} record {id}")))
}

pub async fn create_record(
    store: &dyn PortalStore,
    ctx: &RequestContext,
    activity_type: ActivityType,
    form: RecordForm,
) -> PortalResult<ActivityRecord> {
    let owner = ctx.owner_for(form.email_id.as_deref())?;
    if store.get_student(&owner).await?.is_none() {
        return Err(PortalError::not_found(format!("student {owner}")));
    }

    let mut record = ActivityRecord::new(activity_type, owner);
    record.fields = form.sanitized_fields();
    record.proof = form.proof.as_ref().map(|p| p.meta.clone());
    validate_record(&record)?;

    store.insert_activity(&record, form.proof.as_ref()).await?;
    info!(
        %activity_type,
        id = %record.id,
        owner = %record.email_id,
        with_proof = record.proof.is_some(),
        "activity record created"
    );
    Ok(record)
}

/// Merges the submitted fields over the stored ones; a new proof replaces the old.
pub async fn update_record(
    store: &dyn PortalStore,
    ctx: &RequestContext,
    activity_type: ActivityType,
    id: Uuid,
    form: RecordForm,
) -> PortalResult<ActivityRecord> {
    let mut record = load_record(store, activity_type, id).await?;
    ctx.ensure_can_access(&record.email_id)?;

    record.fields.extend(form.sanitized_fields());
    if let Some(proof) = &form.proof {
        record.proof = Some(proof.meta.clone());
    }
    record.updated_at = Utc::now();
    validate_record(&record)?;

    if !store.update_activity(&record, form.proof.as_ref()).await? {
        return Err(PortalError::not_found(format!("{activity_type} record {id}")));
    }
    info!(%activity_type, %id, replaced_proof = form.proof.is_some(), "activity record updated");
    Ok(record)
}

pub async fn list_records(
    store: &dyn PortalStore,
    ctx: &RequestContext,
    activity_type: ActivityType,
    requested_owner: Option<&str>,
) -> PortalResult<SplitRecords> {
    let owner = ctx.owner_for(requested_owner)?;
    let owners = [owner];
    let records = store
        .list_activities(activity_type, Some(owners.as_slice()))
        .await?;

    let (complete, incomplete): (Vec<_>, Vec<_>) = records.into_iter().partition(is_complete);
    Ok(SplitRecords {
        complete,
        incomplete,
    })
}

pub async fn download_proof(
    store: &dyn PortalStore,
    ctx: &RequestContext,
    activity_type: ActivityType,
    id: Uuid,
) -> PortalResult<ProofFile> {
    let record = load_record(store, activity_type, id).await?;
    ctx.ensure_can_access(&record.email_id)?;

    store
        .fetch_proof(activity_type, id)
        .await?
        .ok_or_else(|| PortalError::not_found(format!("proof for {activity_type} record {id}")))
}

pub async fn delete_record(
    store: &dyn PortalStore,
    ctx: &RequestContext,
    activity_type: ActivityType,
    id: Uuid,
) -> PortalResult<()> {
    let record = load_record(store, activity_type, id).await?;
    ctx.ensure_can_access(&record.email_id)?;

    if !store.delete_activity(activity_type, id).await? {
        return Err(PortalError::not_found(format!("{activity_type} record {id}")));
    }
    info!(%activity_type, %id, "activity record deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Role;
    use crate::models::Student;
    use crate::store::MemoryStore;

    const OWNER: &str = "asha@college.edu";

    async fn store_with_student() -> MemoryStore {
        let store = MemoryStore::new();
        store.upsert_student(&Student::new(OWNER)).await.unwrap();
        store
    }

    fn internship_form() -> RecordForm {
        RecordForm::default()
            .field("company_name", "Acme")
            .field("start_date", "2024-06-01")
    }

    #[tokio::test]
    async fn create_requires_descriptor_fields() {
        let store = store_with_student().await;
        let ctx = RequestContext::student(OWNER);
        let err = create_record(
            &store,
            &ctx,
            ActivityType::Internship,
            RecordForm::default().field("company_name", "Acme"),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("start_date"));
    }

    #[tokio::test]
    async fn create_rejects_unknown_owner() {
        let store = MemoryStore::new();
        let ctx = RequestContext::student("ghost@college.edu");
        let err = create_record(&store, &ctx, ActivityType::Internship, internship_form())
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::NotFound(_)));
    }

    #[tokio::test]
    async fn reserved_keys_are_not_stored_as_fields() {
        let store = store_with_student().await;
        let ctx = RequestContext::student(OWNER);
        let record = create_record(
            &store,
            &ctx,
            ActivityType::Internship,
            internship_form()
                .field("id", "forged")
                .field("email_id", "x@y")
                .field("status", "Completed"),
        )
        .await
        .unwrap();
        assert!(!record.fields.contains_key("id"));
        assert!(!record.fields.contains_key("email_id"));
        assert!(!record.fields.contains_key("status"));
        assert_eq!(record.email_id, OWNER);
    }

    #[tokio::test]
    async fn mixed_case_sign_in_reaches_imported_student() {
        let store = MemoryStore::new();
        let csv = "email_id,first_name,last_name,department,batch_no,class_division,gender\n\
                   Asha@College.edu,Asha,Kulkarni,INFT,2023,A,F\n";
        let students = crate::roster::parse_students(csv.as_bytes()).unwrap();
        crate::roster::import_students(&store, students).await.unwrap();

        let ctx = RequestContext::student("Asha@College.edu");
        let record = create_record(&store, &ctx, ActivityType::Internship, internship_form())
            .await
            .unwrap();
        assert_eq!(record.email_id, OWNER);

        let staff = RequestContext::staff(Role::Faculty);
        let split = list_records(&store, &staff, ActivityType::Internship, Some("ASHA@college.edu"))
            .await
            .unwrap();
        assert_eq!(split.incomplete.len(), 1);
    }

    #[tokio::test]
    async fn update_merges_and_completes_with_proof() {
        let store = store_with_student().await;
        let ctx = RequestContext::student(OWNER);
        let created = create_record(&store, &ctx, ActivityType::Internship, internship_form())
            .await
            .unwrap();

        let proof = ProofFile::new(
            "certificate.pdf".to_string(),
            Some("application/pdf".to_string()),
            b"%PDF-1.4".to_vec(),
        );
        let updated = update_record(
            &store,
            &ctx,
            ActivityType::Internship,
            created.id,
            RecordForm::default()
                .field("end_date", "2024-08-01")
                .with_proof(proof),
        )
        .await
        .unwrap();
        assert_eq!(updated.text("company_name"), Some("Acme"));
        assert!(is_complete(&updated));

        let split = list_records(&store, &ctx, ActivityType::Internship, None)
            .await
            .unwrap();
        assert_eq!(split.complete.len(), 1);
        assert!(split.incomplete.is_empty());
    }

    #[tokio::test]
    async fn other_students_cannot_touch_the_record() {
        let store = store_with_student().await;
        let owner = RequestContext::student(OWNER);
        let created = create_record(&store, &owner, ActivityType::Internship, internship_form())
            .await
            .unwrap();

        let intruder = RequestContext::student("other@college.edu");
        let err = delete_record(&store, &intruder, ActivityType::Internship, created.id)
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Forbidden(_)));

        let admin = RequestContext::staff(Role::Admin);
        delete_record(&store, &admin, ActivityType::Internship, created.id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn proof_download_returns_stored_bytes() {
        let store = store_with_student().await;
        let ctx = RequestContext::student(OWNER);
        let bytes = vec![0u8, 159, 146, 150, 255];
        let created = create_record(
            &store,
            &ctx,
            ActivityType::Patent,
            RecordForm::default()
                .field("title", "Widget")
                .field("application_date", "2024-01-15")
                .with_proof(ProofFile::new("patent.bin".to_string(), None, bytes.clone())),
        )
        .await
        .unwrap();

        let proof = download_proof(&store, &ctx, ActivityType::Patent, created.id)
            .await
            .unwrap();
        assert_eq!(proof.data, bytes);
        assert_eq!(proof.meta.file_name, "patent.bin");
        assert_eq!(proof.meta.content_type, "application/octet-stream");
    }

    #[tokio::test]
    async fn missing_proof_is_not_found() {
        let store = store_with_student().await;
        let ctx = RequestContext::student(OWNER);
        let created = create_record(&store, &ctx, ActivityType::Internship, internship_form())
            .await
            .unwrap();
        let err = download_proof(&store, &ctx, ActivityType::Internship, created.id)
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::NotFound(_)));
    }
}
