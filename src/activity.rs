//! The per-type descriptor table.
//!
//! Every activity collection shares one storage shape and one CRUD path;
//! what differs between them lives here as data.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::PortalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ActivityType {
    Internship,
    CourseCertification,
    Entrepreneurship,
    NonTechnicalActivity,
    OtherAchievement,
    PaperPublication,
    TechnicalActivity,
    Volunteering,
    Workshop,
    Patent,
    Featured,
}

/// Workbook sheet order.
pub const ALL_TYPES: [ActivityType; 11] = [
    ActivityType::Internship,
    ActivityType::CourseCertification,
    ActivityType::Entrepreneurship,
    ActivityType::NonTechnicalActivity,
    ActivityType::OtherAchievement,
    ActivityType::PaperPublication,
    ActivityType::TechnicalActivity,
    ActivityType::Volunteering,
    ActivityType::Workshop,
    ActivityType::Patent,
    ActivityType::Featured,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    Field(&'static str),
    CreatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionRule {
    /// `end_date` plus proof, and not still running.
    DatedProof,
    ProofOnly,
    Existence,
}

#[derive(Debug)]
pub struct Descriptor {
    pub tag: &'static str,
    pub slug: &'static str,
    pub table: &'static str,
    pub sheet_name: &'static str,
    pub title_field: &'static str,
    pub date_field: DateField,
    pub required_fields: &'static [&'static str],
    pub rule: CompletionRule,
}

const INTERNSHIP: Descriptor = Descriptor {
    tag: "Internship",
    slug: "internship",
    table: "internships",
    sheet_name: "Internship",
    title_field: "company_name",
    date_field: DateField::Field("start_date"),
    required_fields: &["company_name", "start_date"],
    rule: CompletionRule::DatedProof,
};

const COURSE_CERTIFICATION: Descriptor = Descriptor {
    tag: "CourseCertification",
    slug: "course-certification",
    table: "course_certifications",
    sheet_name: "CourseCertification",
    title_field: "course_name",
    date_field: DateField::Field("start_date"),
    required_fields: &["course_name", "start_date"],
    rule: CompletionRule::DatedProof,
};

const ENTREPRENEURSHIP: Descriptor = Descriptor {
    tag: "Entrepreneurship",
    slug: "entrepreneurship",
    table: "entrepreneurships",
    sheet_name: "Entrepreneurship",
    title_field: "company_name",
    date_field: DateField::Field("start_date"),
    required_fields: &["company_name", "start_date"],
    rule: CompletionRule::ProofOnly,
};

const NON_TECHNICAL_ACTIVITY: Descriptor = Descriptor {
    tag: "NonTechnicalActivity",
    slug: "non-technical-activity",
    table: "non_technical_activities",
    sheet_name: "NonTechnicalActivity",
    title_field: "activity_name",
    date_field: DateField::Field("date"),
    required_fields: &["activity_name", "date"],
    rule: CompletionRule::ProofOnly,
};

const OTHER_ACHIEVEMENT: Descriptor = Descriptor {
    tag: "OtherAchievement",
    slug: "other-achievement",
    table: "other_achievements",
    sheet_name: "OtherAchievement",
    title_field: "title",
    date_field: DateField::CreatedAt,
    required_fields: &["title"],
    rule: CompletionRule::Existence,
};

const PAPER_PUBLICATION: Descriptor = Descriptor {
    tag: "PaperPublication",
    slug: "paper-publication",
    table: "paper_publications",
    sheet_name: "PaperPublication",
    title_field: "title",
    date_field: DateField::Field("date_of_publication"),
    required_fields: &["title", "date_of_publication"],
    rule: CompletionRule::Existence,
};

const TECHNICAL_ACTIVITY: Descriptor = Descriptor {
    tag: "TechnicalActivity",
    slug: "technical-activity",
    table: "technical_activities",
    sheet_name: "TechnicalActivity",
    title_field: "event_name",
    date_field: DateField::Field("date"),
    required_fields: &["event_name", "date"],
    rule: CompletionRule::ProofOnly,
};

const VOLUNTEERING: Descriptor = Descriptor {
    tag: "Volunteering",
    slug: "volunteering",
    table: "volunteerings",
    sheet_name: "Volunteering",
    title_field: "organization_name",
    date_field: DateField::Field("date"),
    required_fields: &["organization_name", "date"],
    rule: CompletionRule::ProofOnly,
};

const WORKSHOP: Descriptor = Descriptor {
    tag: "Workshop",
    slug: "workshop",
    table: "workshops",
    sheet_name: "Workshop",
    title_field: "title",
    date_field: DateField::Field("date"),
    required_fields: &["title", "date"],
    rule: CompletionRule::ProofOnly,
};

const PATENT: Descriptor = Descriptor {
    tag: "Patent",
    slug: "patent",
    table: "patents",
    sheet_name: "Patents",
    title_field: "title",
    date_field: DateField::Field("application_date"),
    required_fields: &["title", "application_date"],
    rule: CompletionRule::ProofOnly,
};

const FEATURED: Descriptor = Descriptor {
    tag: "Featured",
    slug: "featured",
    table: "featured",
    sheet_name: "Featured",
    title_field: "title",
    date_field: DateField::CreatedAt,
    required_fields: &["title"],
    rule: CompletionRule::ProofOnly,
};

impl ActivityType {
    pub fn descriptor(self) -> &'static Descriptor {
        match self {
            ActivityType::Internship => &INTERNSHIP,
            ActivityType::CourseCertification => &COURSE_CERTIFICATION,
            ActivityType::Entrepreneurship => &ENTREPRENEURSHIP,
            ActivityType::NonTechnicalActivity => &NON_TECHNICAL_ACTIVITY,
            ActivityType::OtherAchievement => &OTHER_ACHIEVEMENT,
            ActivityType::PaperPublication => &PAPER_PUBLICATION,
            ActivityType::TechnicalActivity => &TECHNICAL_ACTIVITY,
            ActivityType::Volunteering => &VOLUNTEERING,
            ActivityType::Workshop => &WORKSHOP,
            ActivityType::Patent => &PATENT,
            ActivityType::Featured => &FEATURED,
        }
    }

    pub fn tag(self) -> &'static str {
        self.descriptor().tag
    }

    pub fn sheet_name(self) -> &'static str {
        self.descriptor().sheet_name
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ActivityType {
    type Err = PortalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        ALL_TYPES
            .into_iter()
            .find(|ty| {
                let d = ty.descriptor();
                d.tag.eq_ignore_ascii_case(value)
                    || d.slug.eq_ignore_ascii_case(value)
                    || d.sheet_name.eq_ignore_ascii_case(value)
            })
            .ok_or_else(|| PortalError::validation(format!("unknown activity type: {value:?}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityScope {
    All,
    Single(ActivityType),
}

impl ActivityScope {
    pub fn types(self) -> Vec<ActivityType> {
        match self {
            ActivityScope::All => ALL_TYPES.to_vec(),
            ActivityScope::Single(ty) => vec![ty],
        }
    }
}

impl FromStr for ActivityScope {
    type Err = PortalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            return Ok(ActivityScope::All);
        }
        trimmed.parse().map(ActivityScope::Single)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tags_slugs_and_sheet_names() {
        assert_eq!(
            "CourseCertification".parse::<ActivityType>().unwrap(),
            ActivityType::CourseCertification
        );
        assert_eq!(
            "non-technical-activity".parse::<ActivityType>().unwrap(),
            ActivityType::NonTechnicalActivity
        );
        assert_eq!("Patents".parse::<ActivityType>().unwrap(), ActivityType::Patent);
    }

    #[test]
    fn rejects_unknown_types() {
        let err = "Hackathon".parse::<ActivityScope>().unwrap_err();
        assert!(matches!(err, PortalError::Validation(_)));
    }

    #[test]
    fn all_scope_covers_every_collection_in_sheet_order() {
        let sheets: Vec<&str> = ActivityScope::All
            .types()
            .into_iter()
            .map(ActivityType::sheet_name)
            .collect();
        assert_eq!(
            sheets,
            vec![
                "Internship",
                "CourseCertification",
                "Entrepreneurship",
                "NonTechnicalActivity",
                "OtherAchievement",
                "PaperPublication",
                "TechnicalActivity",
                "Volunteering",
                "Workshop",
                "Patents",
                "Featured",
            ]
        );
    }

    #[test]
    fn tables_are_distinct() {
        let mut tables: Vec<&str> = ALL_TYPES.iter().map(|t| t.descriptor().table).collect();
        tables.sort_unstable();
        tables.dedup();
        assert_eq!(tables.len(), ALL_TYPES.len());
    }

    #[test]
    fn primary_dates_match_type_table() {
        assert_eq!(
            ActivityType::PaperPublication.descriptor().date_field,
            DateField::Field("date_of_publication")
        );
        assert_eq!(
            ActivityType::Patent.descriptor().date_field,
            DateField::Field("application_date")
        );
        assert_eq!(
            ActivityType::OtherAchievement.descriptor().date_field,
            DateField::CreatedAt
        );
    }
}
