use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::error::{PortalError, PortalResult};
use crate::models::Student;
use crate::store::PortalStore;

/// Student-attribute predicates. Every set predicate must hold; departments OR together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentFilter {
    pub department: Vec<String>,
    pub batch_no: Option<i32>,
    pub class_division: Option<String>,
    pub gender: Option<String>,
    pub email: Option<String>,
}

impl StudentFilter {
    /// Reads `department`, `batch_no`, `class_division`, `gender` and `email`.
    /// Blank values count as unset; `department` may be comma-separated.
    pub fn from_params(params: &HashMap<String, String>) -> PortalResult<Self> {
        let text = |key: &str| {
            params
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let batch_no = text("batch_no")
            .map(|raw| {
                raw.parse::<i32>()
                    .map_err(|_| PortalError::validation(format!("invalid batch_no: {raw:?}")))
            })
            .transpose()?;

        Ok(Self {
            department: split_list(params.get("department").map(String::as_str)),
            batch_no,
            class_division: text("class_division"),
            gender: text("gender"),
            email: text("email"),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.department.is_empty()
            && self.batch_no.is_none()
            && self.class_division.is_none()
            && self.gender.is_none()
            && self.email.is_none()
    }

    pub fn matches(&self, student: &Student) -> bool {
        (self.department.is_empty() || self.department.iter().any(|d| d == &student.department))
            && self.batch_no.map_or(true, |b| b == student.batch_no)
            && self
                .class_division
                .as_deref()
                .map_or(true, |d| d == student.class_division)
            && self.gender.as_deref().map_or(true, |g| g == student.gender)
            && self.email.as_deref().map_or(true, |needle| {
                student
                    .email_id
                    .to_lowercase()
                    .contains(&needle.to_lowercase())
            })
    }
}

pub fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Which owners an activity query may see.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EmailScope {
    #[default]
    Unscoped,
    Only(BTreeSet<String>),
}

impl EmailScope {
    /// Skips the store entirely when no predicate is set.
    pub async fn resolve(store: &dyn PortalStore, filter: &StudentFilter) -> PortalResult<Self> {
        if filter.is_empty() {
            return Ok(EmailScope::Unscoped);
        }

        let emails: BTreeSet<String> = store.find_student_emails(filter).await?.into_iter().collect();
        debug!(matched = emails.len(), "resolved student filter");
        Ok(EmailScope::Only(emails))
    }

    pub fn from_emails<I: IntoIterator<Item = String>>(emails: I) -> Self {
        EmailScope::Only(emails.into_iter().collect())
    }

    /// Narrows both scopes to their common owners.
    pub fn intersect(self, other: EmailScope) -> EmailScope {
        match (self, other) {
            (EmailScope::Unscoped, scope) | (scope, EmailScope::Unscoped) => scope,
            (EmailScope::Only(a), EmailScope::Only(b)) => {
                EmailScope::Only(a.intersection(&b).cloned().collect())
            }
        }
    }

    pub fn is_empty_scope(&self) -> bool {
        matches!(self, EmailScope::Only(set) if set.is_empty())
    }

    pub fn as_list(&self) -> Option<Vec<String>> {
        match self {
            EmailScope::Unscoped => None,
            EmailScope::Only(set) => Some(set.iter().cloned().collect()),
        }
    }
}
