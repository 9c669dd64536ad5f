use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::error::{PortalError, PortalResult};
use crate::filters::StudentFilter;
use crate::models::{BatchKey, BatchSummary, Student, StudentProfile};
use crate::query::parse_filter_date;
use crate::store::PortalStore;

pub const DEFAULT_SINCE_DAYS: i64 = 30;

pub fn cutoff_date(since_days: i64) -> NaiveDate {
    Utc::now().date_naive() - Duration::days(since_days.max(1))
}

/// `date` when given, otherwise [`DEFAULT_SINCE_DAYS`] before today.
pub fn comparison_date(raw: Option<&str>) -> PortalResult<NaiveDate> {
    Ok(parse_filter_date(raw, "date")?.unwrap_or_else(|| cutoff_date(DEFAULT_SINCE_DAYS)))
}

fn start_of(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or_default()
}

pub fn response_percentage(updated: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = updated as f64 / total as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

fn was_updated(
    student: &Student,
    latest_activity: &HashMap<String, DateTime<Utc>>,
    since: DateTime<Utc>,
) -> bool {
    student.updated_at > since
        || latest_activity
            .get(&student.email_id)
            .is_some_and(|at| *at > since)
}

async fn roster_activity(
    store: &dyn PortalStore,
    students: &[Student],
) -> PortalResult<HashMap<String, DateTime<Utc>>> {
    let emails: Vec<String> = students.iter().map(|s| s.email_id.clone()).collect();
    if emails.is_empty() {
        return Ok(HashMap::new());
    }
    Ok(store.latest_activity_updates(&emails).await?)
}

/// Stored batches plus any cohort implied by the student roster, with counts
/// of students updated after `since`.
pub async fn summarize_batches(
    store: &dyn PortalStore,
    since: NaiveDate,
) -> PortalResult<Vec<BatchSummary>> {
    let students = store.list_students(&StudentFilter::default()).await?;
    let latest = roster_activity(store, &students).await?;
    let since = start_of(since);

    let mut keys: BTreeSet<BatchKey> = store
        .list_batches()
        .await?
        .into_iter()
        .map(|b| b.key)
        .collect();
    keys.extend(
        students
            .iter()
            .filter(|s| s.batch_no > 0)
            .map(Student::batch_key),
    );

    let mut counts: HashMap<BatchKey, (usize, usize)> = HashMap::new();
    for student in &students {
        let entry = counts.entry(student.batch_key()).or_insert((0, 0));
        entry.0 += 1;
        if was_updated(student, &latest, since) {
            entry.1 += 1;
        }
    }

    Ok(keys
        .into_iter()
        .map(|key| {
            let (total, updated) = counts.get(&key).copied().unwrap_or((0, 0));
            BatchSummary {
                key,
                total_students: total,
                updated_students: updated,
                response_percentage: response_percentage(updated, total),
            }
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchStudent {
    #[serde(flatten)]
    pub profile: StudentProfile,
    pub updated: bool,
}

pub fn batch_key_from_params(params: &HashMap<String, String>) -> PortalResult<BatchKey> {
    let get = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| params.get(*k))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let batch_no = get(&["batch_no"])
        .ok_or_else(|| PortalError::validation("batch_no is required"))?;
    let batch_no = batch_no
        .parse::<i32>()
        .map_err(|_| PortalError::validation(format!("invalid batch_no: {batch_no:?}")))?;

    Ok(BatchKey {
        batch_no,
        department: get(&["department"])
            .ok_or_else(|| PortalError::validation("department is required"))?,
        class_division: get(&["class_division", "division"])
            .ok_or_else(|| PortalError::validation("division is required"))?,
    })
}

pub async fn batch_students(
    store: &dyn PortalStore,
    key: &BatchKey,
    since: NaiveDate,
) -> PortalResult<Vec<BatchStudent>> {
    let filter = StudentFilter {
        department: vec![key.department.clone()],
        batch_no: Some(key.batch_no),
        class_division: Some(key.class_division.clone()),
        ..StudentFilter::default()
    };
    let students = store.list_students(&filter).await?;
    let latest = roster_activity(store, &students).await?;
    let since = start_of(since);

    Ok(students
        .into_iter()
        .map(|student| {
            let updated = was_updated(&student, &latest, since);
            BatchStudent {
                profile: student.into(),
                updated,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityType;
    use crate::models::ActivityRecord;
    use crate::store::MemoryStore;

    fn student(email: &str, updated_days_ago: i64) -> Student {
        let stamp = Utc::now() - Duration::days(updated_days_ago);
        Student {
            department: "INFT".to_string(),
            batch_no: 2023,
            class_division: "A".to_string(),
            created_at: stamp,
            updated_at: stamp,
            ..Student::new(email)
        }
    }

    #[test]
    fn percentage_handles_empty_batches() {
        assert_eq!(response_percentage(0, 0), 0.0);
        assert_eq!(response_percentage(1, 3), 33.33);
        assert_eq!(response_percentage(4, 4), 100.0);
    }

    #[test]
    fn cutoff_date_respects_since_days() {
        let expected = Utc::now().date_naive() - Duration::days(14);
        assert_eq!(cutoff_date(14), expected);
    }

    #[test]
    fn batch_key_accepts_division_alias() {
        let params: HashMap<String, String> = [
            ("batch_no", "2023"),
            ("department", "INFT"),
            ("division", "B"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let key = batch_key_from_params(&params).unwrap();
        assert_eq!(key.class_division, "B");
    }

    #[tokio::test]
    async fn profile_or_activity_changes_count_as_updates() {
        let store = MemoryStore::new();
        let stale = student("stale@college.edu", 90);
        let edited = student("edited@college.edu", 2);
        let active = student("active@college.edu", 90);
        for s in [&stale, &edited, &active] {
            store.upsert_student(s).await.unwrap();
        }
        store.upsert_batch(&stale.batch_key()).await.unwrap();

        let rec = ActivityRecord::new(ActivityType::Workshop, "active@college.edu").with_field("title", "x");
        store.insert_activity(&rec, None).await.unwrap();

        let since = cutoff_date(30);
        let summaries = summarize_batches(&store, since).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].total_students, 3);
        assert_eq!(summaries[0].updated_students, 2);
        assert_eq!(summaries[0].response_percentage, 66.67);

        let members = batch_students(&store, &stale.batch_key(), since).await.unwrap();
        let flags: Vec<(String, bool)> = members
            .into_iter()
            .map(|m| (m.profile.student.email_id, m.updated))
            .collect();
        assert_eq!(
            flags,
            vec![
                ("active@college.edu".to_string(), true),
                ("edited@college.edu".to_string(), true),
                ("stale@college.edu".to_string(), false),
            ]
        );
    }

    #[tokio::test]
    async fn stored_batch_without_students_is_listed_empty() {
        let store = MemoryStore::new();
        let key = BatchKey {
            batch_no: 2025,
            department: "CMPN".to_string(),
            class_division: "C".to_string(),
        };
        store.upsert_batch(&key).await.unwrap();
        let summaries = summarize_batches(&store, cutoff_date(30)).await.unwrap();
        assert_eq!(summaries[0].total_students, 0);
        assert_eq!(summaries[0].response_percentage, 0.0);
    }
}
