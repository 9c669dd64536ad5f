//! Activity query builder: scope, filters, summary counts, pagination and the
//! unpaginated export fetch.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use crate::activity::{ActivityScope, ActivityType};
use crate::completion::{is_complete, status_of};
use crate::error::{PortalError, PortalResult};
use crate::filters::{split_list, EmailScope, StudentFilter};
use crate::models::{normalize_email, ActivityRecord, RecordStatus};
use crate::store::PortalStore;

pub const PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    Any,
    Only(RecordStatus),
    /// A value that names no status; matches nothing.
    Unmatched,
}

impl StatusFilter {
    pub fn parse(raw: Option<&str>) -> Self {
        let value = raw.map(str::trim).unwrap_or_default().to_ascii_lowercase();
        match value.as_str() {
            "" => StatusFilter::Any,
            "completed" | "complete" => StatusFilter::Only(RecordStatus::Completed),
            "pending" | "incomplete" => StatusFilter::Only(RecordStatus::Pending),
            _ => StatusFilter::Unmatched,
        }
    }

    fn admits(self, status: RecordStatus) -> bool {
        match self {
            StatusFilter::Any => true,
            StatusFilter::Only(wanted) => wanted == status,
            StatusFilter::Unmatched => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    Email,
    Type,
    Title,
    Status,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub column: SortColumn,
    pub descending: bool,
}

impl SortKey {
    pub fn parse(sort: Option<&str>, order: Option<&str>) -> PortalResult<Option<Self>> {
        let Some(sort) = sort.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(None);
        };

        let column = match sort.to_ascii_lowercase().as_str() {
            "email" | "email_id" => SortColumn::Email,
            "type" | "activity_type" => SortColumn::Type,
            "title" => SortColumn::Title,
            "status" => SortColumn::Status,
            "date" => SortColumn::Date,
            other => return Err(PortalError::validation(format!("unknown sort column: {other:?}"))),
        };

        let descending = match order.map(|o| o.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("asc") => false,
            Some("desc") => true,
            Some(other) => return Err(PortalError::validation(format!("unknown sort order: {other:?}"))),
        };

        Ok(Some(SortKey { column, descending }))
    }

    /// Undated records sort last in either direction.
    fn compare(self, a: &ActivityRecord, b: &ActivityRecord) -> Ordering {
        let ordering = match self.column {
            SortColumn::Email => a.email_id.cmp(&b.email_id),
            SortColumn::Type => a.activity_type.cmp(&b.activity_type),
            SortColumn::Title => a.title().to_lowercase().cmp(&b.title().to_lowercase()),
            SortColumn::Status => status_of(a).cmp(&status_of(b)),
            SortColumn::Date => match (a.primary_date(), b.primary_date()) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => return Ordering::Less,
                (None, Some(_)) => return Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        };

        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

/// Stable in-memory sort; equal keys keep fetch order.
pub fn sort_records(records: &mut [ActivityRecord], key: SortKey) {
    records.sort_by(|a, b| key.compare(a, b));
}

pub fn parse_filter_date(raw: Option<&str>, name: &str) -> PortalResult<Option<NaiveDate>> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| PortalError::validation(format!("invalid {name}: {value:?}, expected YYYY-MM-DD"))),
    }
}

#[derive(Debug, Clone)]
pub struct ActivityQuery {
    pub scope: ActivityScope,
    pub status: StatusFilter,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub emails: EmailScope,
    pub sort: Option<SortKey>,
}

impl ActivityQuery {
    pub fn new(scope: ActivityScope) -> Self {
        Self {
            scope,
            status: StatusFilter::Any,
            start_date: None,
            end_date: None,
            emails: EmailScope::Unscoped,
            sort: None,
        }
    }

    /// Reads `activity_type`, `status`, `start_date`, `end_date`, `sort` and `order`.
    /// The email scope is left open; callers narrow it with [`ActivityQuery::scoped`].
    pub fn from_params(params: &HashMap<String, String>) -> PortalResult<Self> {
        let get = |key: &str| params.get(key).map(String::as_str);

        let scope: ActivityScope = get("activity_type").unwrap_or("All").parse()?;
        let mut query = ActivityQuery::new(scope)
            .with_dates(get("start_date"), get("end_date"))?
            .with_status(StatusFilter::parse(get("status")));
        query.sort = SortKey::parse(get("sort"), get("order"))?;
        Ok(query)
    }

    pub fn with_dates(mut self, start: Option<&str>, end: Option<&str>) -> PortalResult<Self> {
        self.start_date = parse_filter_date(start, "start_date")?;
        self.end_date = parse_filter_date(end, "end_date")?;
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(PortalError::validation(format!(
                    "start_date {start} is after end_date {end}"
                )));
            }
        }
        Ok(self)
    }

    pub fn with_status(mut self, status: StatusFilter) -> Self {
        self.status = status;
        self
    }

    pub fn scoped(mut self, emails: EmailScope) -> Self {
        self.emails = emails;
        self
    }

    fn admits(&self, record: &ActivityRecord) -> bool {
        if !self.status.admits(status_of(record)) {
            return false;
        }
        if self.start_date.is_none() && self.end_date.is_none() {
            return true;
        }
        let Some(date) = record.primary_date() else {
            return false;
        };
        self.start_date.map_or(true, |start| date >= start)
            && self.end_date.map_or(true, |end| date <= end)
    }
}

/// Full request parsing: activity params, the student predicates and an
/// optional `email_id` list, intersected into one owner scope.
pub async fn query_from_params(
    store: &dyn PortalStore,
    params: &HashMap<String, String>,
) -> PortalResult<ActivityQuery> {
    let query = ActivityQuery::from_params(params)?;
    let filter = StudentFilter::from_params(params)?;
    let mut emails = EmailScope::resolve(store, &filter).await?;

    if let Some(raw) = params.get("email_id") {
        let raw_list = split_list(Some(raw));
        let listed = raw_list.iter().map(|e| normalize_email(e));
        emails = emails.intersect(EmailScope::from_emails(listed));
    }
    Ok(query.scoped(emails))
}

/// Runs the query against every collection in scope, in sheet order.
/// Any collection failure fails the whole fetch.
pub async fn fetch_matching(
    store: &dyn PortalStore,
    query: &ActivityQuery,
) -> PortalResult<Vec<(ActivityType, Vec<ActivityRecord>)>> {
    let emails = query.emails.as_list();
    let mut partitions = Vec::new();

    for activity_type in query.scope.types() {
        if query.emails.is_empty_scope() {
            partitions.push((activity_type, Vec::new()));
            continue;
        }

        let records = store
            .list_activities(activity_type, emails.as_deref())
            .await?
            .into_iter()
            .filter(|record| query.admits(record))
            .collect::<Vec<_>>();
        debug!(%activity_type, matched = records.len(), "queried collection");
        partitions.push((activity_type, records));
    }

    Ok(partitions)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub total_completed: usize,
    pub total_pending: usize,
    pub total_unique_students: usize,
}

pub fn summarize<'a, I>(records: I) -> Summary
where
    I: IntoIterator<Item = &'a ActivityRecord>,
{
    let mut total = 0;
    let mut completed = 0;
    let mut owners = BTreeSet::new();

    for record in records {
        total += 1;
        if is_complete(record) {
            completed += 1;
        }
        owners.insert(record.email_id.as_str());
    }

    Summary {
        total,
        total_completed: completed,
        total_pending: total - completed,
        total_unique_students: owners.len(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityRow {
    #[serde(flatten)]
    pub record: ActivityRecord,
    pub status: RecordStatus,
}

impl From<ActivityRecord> for ActivityRow {
    fn from(mut record: ActivityRecord) -> Self {
        let status = status_of(&record);
        // The derived status owns the `status` key in listing rows.
        record.fields.remove("status");
        Self { record, status }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            limit: PAGE_SIZE,
        }
    }
}

impl Pagination {
    pub fn from_params(params: &HashMap<String, String>) -> PortalResult<Self> {
        let number = |key: &str, default: usize| -> PortalResult<usize> {
            match params.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
                None => Ok(default),
                Some(raw) => raw
                    .parse::<usize>()
                    .map_err(|_| PortalError::validation(format!("invalid {key}: {raw:?}"))),
            }
        };

        let page = number("page", 1)?;
        if page == 0 {
            return Err(PortalError::validation("page must be at least 1"));
        }
        let limit = number("limit", PAGE_SIZE)?.clamp(1, MAX_PAGE_SIZE);
        Ok(Self { page, limit })
    }

    fn offset(self) -> usize {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityPage {
    pub activities: Vec<ActivityRow>,
    #[serde(flatten)]
    pub summary: Summary,
    pub pages: usize,
    pub page: usize,
    pub limit: usize,
}

pub async fn run_page(
    store: &dyn PortalStore,
    query: &ActivityQuery,
    pagination: Pagination,
) -> PortalResult<ActivityPage> {
    let mut records: Vec<ActivityRecord> = fetch_matching(store, query)
        .await?
        .into_iter()
        .flat_map(|(_, records)| records)
        .collect();

    if let Some(key) = query.sort {
        sort_records(&mut records, key);
    }

    let summary = summarize(&records);
    let activities = records
        .into_iter()
        .skip(pagination.offset())
        .take(pagination.limit)
        .map(ActivityRow::from)
        .collect();

    Ok(ActivityPage {
        activities,
        summary,
        pages: summary.total.div_ceil(pagination.limit),
        page: pagination.page,
        limit: pagination.limit,
    })
}

/// Full result set for export, one partition per type in scope.
#[derive(Debug, Clone)]
pub struct ExportSet {
    pub scope: ActivityScope,
    pub partitions: Vec<(ActivityType, Vec<ActivityRecord>)>,
}

impl ExportSet {
    pub fn records(&self) -> impl Iterator<Item = &ActivityRecord> {
        self.partitions.iter().flat_map(|(_, records)| records.iter())
    }
}

pub async fn run_export(store: &dyn PortalStore, query: &ActivityQuery) -> PortalResult<ExportSet> {
    let mut partitions = fetch_matching(store, query).await?;
    if let Some(key) = query.sort {
        for (_, records) in partitions.iter_mut() {
            sort_records(records, key);
        }
    }

    Ok(ExportSet {
        scope: query.scope,
        partitions,
    })
}
