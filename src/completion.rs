use crate::activity::{ActivityType, CompletionRule};
use crate::models::{ActivityRecord, RecordStatus};

/// Decides whether a record counts as complete. Reads only the record itself.
pub fn is_complete(record: &ActivityRecord) -> bool {
    match record.activity_type.descriptor().rule {
        CompletionRule::Existence => true,
        CompletionRule::ProofOnly => record.has_proof(),
        CompletionRule::DatedProof => {
            if record.flag("ongoing") {
                return false;
            }
            if record.activity_type == ActivityType::CourseCertification
                && record.flag("no_certificate_yet")
            {
                return false;
            }
            record.is_set("end_date") && record.has_proof()
        }
    }
}

pub fn status_of(record: &ActivityRecord) -> RecordStatus {
    if is_complete(record) {
        RecordStatus::Completed
    } else {
        RecordStatus::Pending
    }
}
