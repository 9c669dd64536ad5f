use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::activity::{ActivityType, DateField};
use crate::error::PortalError;

/// Student identity is the lowercased, trimmed email address.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub email_id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub batch_no: i32,
    #[serde(default)]
    pub class_division: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub prn: Option<String>,
    #[serde(default)]
    pub abc_id: Option<String>,
    #[serde(default)]
    pub phone_no: Option<String>,
    #[serde(default)]
    pub linkedin_url: Option<String>,
    #[serde(default)]
    pub other_urls: Vec<String>,
    #[serde(default)]
    pub average_sgpi: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Student {
    pub fn new(email_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            email_id: normalize_email(&email_id.into()),
            first_name: String::new(),
            middle_name: None,
            last_name: String::new(),
            department: String::new(),
            batch_no: 0,
            class_division: String::new(),
            gender: String::new(),
            prn: None,
            abc_id: None,
            phone_no: None,
            linkedin_url: None,
            other_urls: Vec::new(),
            average_sgpi: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn full_name(&self) -> String {
        [
            Some(self.first_name.as_str()),
            self.middle_name.as_deref(),
            Some(self.last_name.as_str()),
        ]
        .into_iter()
        .flatten()
        .filter(|part| !part.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ")
    }

    /// Every field the profile form asks for is filled in.
    pub fn profile_complete(&self) -> bool {
        let filled = |value: &str| !value.trim().is_empty();
        let filled_opt = |value: &Option<String>| value.as_deref().is_some_and(filled);

        filled(&self.first_name)
            && filled(&self.last_name)
            && filled(&self.department)
            && filled(&self.class_division)
            && filled(&self.gender)
            && self.batch_no > 0
            && filled_opt(&self.prn)
            && filled_opt(&self.abc_id)
            && filled_opt(&self.phone_no)
            && filled_opt(&self.linkedin_url)
            && self.average_sgpi.is_some()
    }

    pub fn batch_key(&self) -> BatchKey {
        BatchKey {
            batch_no: self.batch_no,
            department: self.department.clone(),
            class_division: self.class_division.clone(),
        }
    }
}

/// Profile view with the derived completion flag.
#[derive(Debug, Clone, Serialize)]
pub struct StudentProfile {
    #[serde(flatten)]
    pub student: Student,
    pub profile_complete: bool,
}

impl From<Student> for StudentProfile {
    fn from(student: Student) -> Self {
        let profile_complete = student.profile_complete();
        Self {
            student,
            profile_complete,
        }
    }
}

/// Partial profile update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StudentUpdate {
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub department: Option<String>,
    pub batch_no: Option<i32>,
    pub class_division: Option<String>,
    pub gender: Option<String>,
    pub prn: Option<String>,
    pub abc_id: Option<String>,
    pub phone_no: Option<String>,
    pub linkedin_url: Option<String>,
    pub other_urls: Option<Vec<String>>,
    pub average_sgpi: Option<f64>,
}

impl StudentUpdate {
    pub fn apply(self, student: &mut Student) -> Result<(), PortalError> {
        let StudentUpdate {
            first_name,
            middle_name,
            last_name,
            department,
            batch_no,
            class_division,
            gender,
            prn,
            abc_id,
            phone_no,
            linkedin_url,
            other_urls,
            average_sgpi,
        } = self;

        if let Some(sgpi) = average_sgpi {
            validate_sgpi(sgpi)?;
        }
        if batch_no.is_some_and(|b| b < 0) {
            return Err(PortalError::validation("batch_no must not be negative"));
        }

        let blank_to_none = |value: String| Some(value).filter(|v| !v.trim().is_empty());

        if let Some(value) = first_name {
            student.first_name = value;
        }
        if let Some(value) = last_name {
            student.last_name = value;
        }
        if let Some(value) = department {
            student.department = value;
        }
        if let Some(value) = class_division {
            student.class_division = value;
        }
        if let Some(value) = gender {
            student.gender = value;
        }
        if let Some(value) = other_urls {
            student.other_urls = value;
        }
        if let Some(value) = batch_no {
            student.batch_no = value;
        }
        if let Some(value) = average_sgpi {
            student.average_sgpi = Some(value);
        }
        if let Some(value) = middle_name {
            student.middle_name = blank_to_none(value);
        }
        if let Some(value) = prn {
            student.prn = blank_to_none(value);
        }
        if let Some(value) = abc_id {
            student.abc_id = blank_to_none(value);
        }
        if let Some(value) = phone_no {
            student.phone_no = blank_to_none(value);
        }
        if let Some(value) = linkedin_url {
            student.linkedin_url = blank_to_none(value);
        }

        student.updated_at = Utc::now();
        Ok(())
    }
}

pub fn validate_sgpi(sgpi: f64) -> Result<(), PortalError> {
    if sgpi.is_finite() && (0.0..=10.0).contains(&sgpi) {
        Ok(())
    } else {
        Err(PortalError::validation(format!(
            "average_sgpi must be between 0 and 10, got {sgpi}"
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchKey {
    pub batch_no: i32,
    pub department: String,
    #[serde(alias = "division")]
    pub class_division: String,
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}-{}", self.batch_no, self.department, self.class_division)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    #[serde(flatten)]
    pub key: BatchKey,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    #[serde(flatten)]
    pub key: BatchKey,
    pub total_students: usize,
    pub updated_students: usize,
    pub response_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofMeta {
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ProofFile {
    pub meta: ProofMeta,
    pub data: Vec<u8>,
}

impl ProofFile {
    pub fn new(file_name: String, content_type: Option<String>, data: Vec<u8>) -> Self {
        Self {
            meta: ProofMeta {
                file_name,
                content_type: content_type
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                size_bytes: data.len() as i64,
                uploaded_at: Utc::now(),
            },
            data,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityRecord {
    pub id: Uuid,
    pub activity_type: ActivityType,
    pub email_id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    pub proof: Option<ProofMeta>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Keys the record envelope owns; submitted forms never store them as fields.
pub const RESERVED_FIELDS: [&str; 7] = [
    "id",
    "email_id",
    "activity_type",
    "proof",
    "status",
    "createdAt",
    "updatedAt",
];

impl ActivityRecord {
    pub fn new(activity_type: ActivityType, email_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            activity_type,
            email_id: email_id.into(),
            fields: Map::new(),
            proof: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// A non-blank textual field value.
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.fields.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim()),
            _ => None,
        }
    }

    pub fn is_set(&self, key: &str) -> bool {
        match self.fields.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        }
    }

    pub fn flag(&self, key: &str) -> bool {
        match self.fields.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "yes" | "on" | "1"
            ),
            Some(Value::Number(n)) => n.as_i64() == Some(1),
            _ => false,
        }
    }

    pub fn has_proof(&self) -> bool {
        self.proof
            .as_ref()
            .is_some_and(|p| !p.file_name.trim().is_empty())
    }

    pub fn title(&self) -> &str {
        self.text(self.activity_type.descriptor().title_field)
            .unwrap_or_default()
    }

    pub fn primary_date(&self) -> Option<NaiveDate> {
        match self.activity_type.descriptor().date_field {
            DateField::CreatedAt => Some(self.created_at.date_naive()),
            DateField::Field(name) => self.text(name).and_then(parse_loose_date),
        }
    }
}

/// Accepts `YYYY-MM-DD` or anything that starts with it, such as RFC 3339.
pub fn parse_loose_date(value: &str) -> Option<NaiveDate> {
    let head = value.trim().get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordStatus {
    Completed,
    Pending,
}

impl RecordStatus {
    pub fn label(self) -> &'static str {
        match self {
            RecordStatus::Completed => "Completed",
            RecordStatus::Pending => "Pending",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Suggestion,
    Report,
    Contact,
}

impl FromStr for MessageType {
    type Err = PortalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "suggestion" => Ok(MessageType::Suggestion),
            "report" => Ok(MessageType::Report),
            "contact" => Ok(MessageType::Contact),
            other => Err(PortalError::validation(format!("unknown message type: {other:?}"))),
        }
    }
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Suggestion => "suggestion",
            MessageType::Report => "report",
            MessageType::Contact => "contact",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContactStatus {
    New,
    InProgress,
    Resolved,
}

impl ContactStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ContactStatus::New => "new",
            ContactStatus::InProgress => "in-progress",
            ContactStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for ContactStatus {
    type Err = PortalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(ContactStatus::New),
            "in-progress" | "in_progress" => Ok(ContactStatus::InProgress),
            "resolved" => Ok(ContactStatus::Resolved),
            other => Err(PortalError::validation(format!("unknown message status: {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContactMessage {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub message_type: MessageType,
    pub subject: String,
    pub message: String,
    pub status: ContactStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_student() -> Student {
        Student {
            first_name: "Asha".to_string(),
            last_name: "Kulkarni".to_string(),
            department: "INFT".to_string(),
            batch_no: 2023,
            class_division: "A".to_string(),
            gender: "F".to_string(),
            prn: Some("PRN001".to_string()),
            abc_id: Some("ABC001".to_string()),
            phone_no: Some("9800000000".to_string()),
            linkedin_url: Some("https://linkedin.com/in/asha".to_string()),
            average_sgpi: Some(8.4),
            ..Student::new("asha@college.edu")
        }
    }

    #[test]
    fn profile_completion_needs_every_required_field() {
        let mut student = complete_student();
        assert!(student.profile_complete());

        student.abc_id = Some("  ".to_string());
        assert!(!student.profile_complete());
    }

    #[test]
    fn update_rejects_out_of_range_sgpi() {
        let mut student = complete_student();
        let update = StudentUpdate {
            average_sgpi: Some(11.0),
            ..StudentUpdate::default()
        };
        assert!(update.apply(&mut student).is_err());
        assert_eq!(student.average_sgpi, Some(8.4));
    }

    #[test]
    fn update_clears_blank_optional_fields() {
        let mut student = complete_student();
        let update = StudentUpdate {
            linkedin_url: Some(String::new()),
            first_name: Some("Asha R.".to_string()),
            ..StudentUpdate::default()
        };
        update.apply(&mut student).unwrap();
        assert_eq!(student.linkedin_url, None);
        assert_eq!(student.first_name, "Asha R.");
        assert!(!student.profile_complete());
    }

    #[test]
    fn loose_dates_accept_timestamps() {
        assert_eq!(
            parse_loose_date("2024-06-01T10:00:00Z"),
            NaiveDate::from_ymd_opt(2024, 6, 1)
        );
        assert_eq!(parse_loose_date("06/01/2024"), None);
        assert_eq!(parse_loose_date("2024"), None);
    }

    #[test]
    fn flags_accept_form_strings() {
        let record = ActivityRecord::new(ActivityType::Internship, "a@b.c")
            .with_field("ongoing", "true")
            .with_field("remote", "no");
        assert!(record.flag("ongoing"));
        assert!(!record.flag("remote"));
        assert!(!record.flag("missing"));
    }

    #[test]
    fn record_serializes_fields_inline() {
        let record = ActivityRecord::new(ActivityType::Workshop, "a@b.c").with_field("title", "Rust 101");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["title"], "Rust 101");
        assert_eq!(json["activity_type"], "Workshop");
        assert!(json["proof"].is_null());
    }

    #[test]
    fn contact_status_uses_kebab_case() {
        assert_eq!(
            "in-progress".parse::<ContactStatus>().unwrap(),
            ContactStatus::InProgress
        );
        assert_eq!(
            serde_json::to_value(ContactStatus::InProgress).unwrap(),
            "in-progress"
        );
    }
}
