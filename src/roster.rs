//! Bulk roster import from CSV and the demo seed.

use std::collections::BTreeSet;
use std::io::Read;

use anyhow::Context;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::activity::ActivityType;
use crate::contact::{submit_message, NewMessage};
use crate::models::{normalize_email, ActivityRecord, BatchKey, ProofFile, Student};
use crate::store::PortalStore;

#[derive(Debug, Deserialize)]
struct StudentRow {
    email_id: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    middle_name: Option<String>,
    #[serde(default)]
    last_name: String,
    department: String,
    batch_no: i32,
    #[serde(alias = "division")]
    class_division: String,
    #[serde(default)]
    gender: String,
    #[serde(default)]
    prn: Option<String>,
    #[serde(default)]
    abc_id: Option<String>,
    #[serde(default)]
    phone_no: Option<String>,
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Rows with a blank email are rejected along with the whole file.
pub fn parse_students<R: Read>(reader: R) -> anyhow::Result<Vec<Student>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut students = Vec::new();

    for (line, result) in reader.deserialize::<StudentRow>().enumerate() {
        let row = result.with_context(|| format!("invalid student row {}", line + 1))?;
        let email_id = normalize_email(&row.email_id);
        if email_id.is_empty() {
            anyhow::bail!("student row {} has no email_id", line + 1);
        }

        students.push(Student {
            first_name: row.first_name,
            middle_name: blank_to_none(row.middle_name),
            last_name: row.last_name,
            department: row.department,
            batch_no: row.batch_no,
            class_division: row.class_division,
            gender: row.gender,
            prn: blank_to_none(row.prn),
            abc_id: blank_to_none(row.abc_id),
            phone_no: blank_to_none(row.phone_no),
            ..Student::new(email_id)
        });
    }

    Ok(students)
}

pub fn parse_batches<R: Read>(reader: R) -> anyhow::Result<Vec<BatchKey>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut batches = Vec::new();
    for (line, result) in reader.deserialize::<BatchKey>().enumerate() {
        batches.push(result.with_context(|| format!("invalid batch row {}", line + 1))?);
    }
    Ok(batches)
}

/// Upserts by email. Roster columns overwrite; profile-only fields a student
/// has already filled in are kept. Every cohort seen is registered as a batch.
pub async fn import_students(store: &dyn PortalStore, students: Vec<Student>) -> anyhow::Result<usize> {
    let mut cohorts = BTreeSet::new();
    let count = students.len();

    for incoming in students {
        let merged = match store.get_student(&incoming.email_id).await? {
            Some(existing) => Student {
                first_name: incoming.first_name,
                middle_name: incoming.middle_name.or(existing.middle_name),
                last_name: incoming.last_name,
                department: incoming.department,
                batch_no: incoming.batch_no,
                class_division: incoming.class_division,
                gender: incoming.gender,
                prn: incoming.prn.or(existing.prn),
                abc_id: incoming.abc_id.or(existing.abc_id),
                phone_no: incoming.phone_no.or(existing.phone_no),
                updated_at: Utc::now(),
                ..existing
            },
            None => incoming,
        };
        cohorts.insert(merged.batch_key());
        store.upsert_student(&merged).await?;
    }

    for key in &cohorts {
        store.upsert_batch(key).await?;
    }
    info!(students = count, batches = cohorts.len(), "student roster imported");
    Ok(count)
}

pub async fn import_batches(store: &dyn PortalStore, batches: Vec<BatchKey>) -> anyhow::Result<usize> {
    for key in &batches {
        store.upsert_batch(key).await?;
    }
    info!(batches = batches.len(), "batch roster imported");
    Ok(batches.len())
}

pub async fn seed(store: &dyn PortalStore) -> anyhow::Result<()> {
    let roster = vec![
        ("avery.lee@college.edu", "Avery", "Lee", "INFT", "A", "M", Some(8.1)),
        ("kiara.patel@college.edu", "Kiara", "Patel", "INFT", "A", "F", Some(9.2)),
        ("jules.moreno@college.edu", "Jules", "Moreno", "CMPN", "B", "F", None),
    ];

    let mut students = Vec::new();
    for (email, first, last, department, division, gender, sgpi) in roster {
        students.push(Student {
            first_name: first.to_string(),
            last_name: last.to_string(),
            department: department.to_string(),
            batch_no: 2023,
            class_division: division.to_string(),
            gender: gender.to_string(),
            average_sgpi: sgpi,
            ..Student::new(email)
        });
    }
    import_students(store, students).await?;

    let proof = ProofFile::new(
        "offer-letter.pdf".to_string(),
        Some("application/pdf".to_string()),
        b"%PDF-1.4 seed".to_vec(),
    );
    let activities = vec![
        (
            ActivityRecord::new(ActivityType::Internship, "avery.lee@college.edu")
                .with_field("company_name", "Acme Analytics")
                .with_field("start_date", "2024-06-01")
                .with_field("end_date", "2024-08-01"),
            Some(&proof),
        ),
        (
            ActivityRecord::new(ActivityType::Internship, "kiara.patel@college.edu")
                .with_field("company_name", "Northwind")
                .with_field("start_date", "2024-06-15")
                .with_field("ongoing", true),
            None,
        ),
        (
            ActivityRecord::new(ActivityType::PaperPublication, "kiara.patel@college.edu")
                .with_field("title", "Sparse attention for sensor data")
                .with_field("date_of_publication", "2024-03-10"),
            None,
        ),
        (
            ActivityRecord::new(ActivityType::Workshop, "jules.moreno@college.edu")
                .with_field("title", "Rust for systems programming")
                .with_field("date", "2024-02-20"),
            None,
        ),
    ];

    for (mut record, proof) in activities {
        record.proof = proof.map(|p| p.meta.clone());
        store.insert_activity(&record, proof).await?;
    }

    submit_message(
        store,
        NewMessage {
            name: "Avery Lee".to_string(),
            email: "avery.lee@college.edu".to_string(),
            message_type: "suggestion".to_string(),
            subject: "Export by semester".to_string(),
            message: "Could the export filter by semester too?".to_string(),
        },
    )
    .await?;

    info!("seed data inserted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::StudentFilter;
    use crate::store::MemoryStore;

    const STUDENTS_CSV: &str = "\
email_id,first_name,middle_name,last_name,department,batch_no,class_division,gender,prn,abc_id,phone_no
Asha@College.edu,Asha,,Kulkarni,INFT,2023,A,F,PRN1,,9800000000
ravi@college.edu,Ravi,K,Shah,CMPN,2024,B,M,,,
";

    #[test]
    fn parses_students_and_blanks_optionals() {
        let students = parse_students(STUDENTS_CSV.as_bytes()).unwrap();
        assert_eq!(students.len(), 2);
        assert_eq!(students[0].email_id, "asha@college.edu");
        assert_eq!(students[0].middle_name, None);
        assert_eq!(students[0].abc_id, None);
        assert_eq!(students[1].middle_name.as_deref(), Some("K"));
    }

    #[test]
    fn bad_batch_number_names_the_row() {
        let csv = "batch_no,department,division\n2023,INFT,A\nlater,INFT,B\n";
        let err = parse_batches(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("row 2"));
    }

    #[tokio::test]
    async fn reimport_keeps_profile_fields() {
        let store = MemoryStore::new();
        let mut existing = Student::new("asha@college.edu");
        existing.linkedin_url = Some("https://linkedin.com/in/asha".to_string());
        existing.abc_id = Some("ABC9".to_string());
        store.upsert_student(&existing).await.unwrap();

        let imported = import_students(&store, parse_students(STUDENTS_CSV.as_bytes()).unwrap())
            .await
            .unwrap();
        assert_eq!(imported, 2);

        let asha = store.get_student("asha@college.edu").await.unwrap().unwrap();
        assert_eq!(asha.department, "INFT");
        assert_eq!(asha.abc_id.as_deref(), Some("ABC9"));
        assert_eq!(asha.linkedin_url.as_deref(), Some("https://linkedin.com/in/asha"));
        assert_eq!(store.list_batches().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn seed_populates_every_area() {
        let store = MemoryStore::new();
        seed(&store).await.unwrap();
        assert_eq!(store.list_students(&StudentFilter::default()).await.unwrap().len(), 3);
        assert_eq!(store.list_messages().await.unwrap().len(), 1);
        let internships = store
            .list_activities(ActivityType::Internship, None)
            .await
            .unwrap();
        assert_eq!(internships.len(), 2);
    }
}
