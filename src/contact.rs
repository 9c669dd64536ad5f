use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{PortalError, PortalResult};
use crate::models::{ContactMessage, ContactStatus, MessageType};
use crate::store::PortalStore;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewMessage {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, alias = "type")]
    pub message_type: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum StatusOutcome {
    Updated { message: ContactMessage },
    Deleted { id: Uuid },
}

fn required(value: &str, name: &str) -> PortalResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(PortalError::validation(format!("{name} is required")));
    }
    Ok(value.to_string())
}

pub async fn submit_message(store: &dyn PortalStore, input: NewMessage) -> PortalResult<ContactMessage> {
    let email = required(&input.email, "email")?;
    if !email.contains('@') {
        return Err(PortalError::validation(format!("invalid email: {email:?}")));
    }

    let message = ContactMessage {
        id: Uuid::new_v4(),
        name: required(&input.name, "name")?,
        email,
        message_type: required(&input.message_type, "type")?.parse::<MessageType>()?,
        subject: required(&input.subject, "subject")?,
        message: required(&input.message, "message")?,
        status: ContactStatus::New,
        created_at: Utc::now(),
    };

    store.insert_message(&message).await?;
    info!(id = %message.id, kind = message.message_type.as_str(), "contact message received");
    Ok(message)
}

pub async fn list_messages(
    store: &dyn PortalStore,
    ctx: &RequestContext,
) -> PortalResult<Vec<ContactMessage>> {
    ctx.require_staff()?;
    Ok(store.list_messages().await?)
}

/// Resolving a message removes it; other statuses are stored.
pub async fn update_status(
    store: &dyn PortalStore,
    ctx: &RequestContext,
    id: Uuid,
    status: ContactStatus,
) -> PortalResult<StatusOutcome> {
    ctx.require_staff()?;

    if status == ContactStatus::Resolved {
        if !store.delete_message(id).await? {
            return Err(PortalError::not_found(format!("message {id}")));
        }
        info!(%id, "contact message resolved and removed");
        return Ok(StatusOutcome::Deleted { id });
    }

    let message = store
        .set_message_status(id, status)
        .await?
        .ok_or_else(|| PortalError::not_found(format!("message {id}")))?;
    info!(%id, status = status.as_str(), "contact message status changed");
    Ok(StatusOutcome::Updated { message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Role;
    use crate::store::MemoryStore;

    fn input() -> NewMessage {
        NewMessage {
            name: "Asha".to_string(),
            email: "asha@college.edu".to_string(),
            message_type: "Suggestion".to_string(),
            subject: "Dark mode".to_string(),
            message: "Please add one.".to_string(),
        }
    }

    #[test]
    fn type_alias_is_accepted() {
        let parsed: NewMessage = serde_json::from_str(
            r#"{"name":"A","email":"a@b.c","type":"report","subject":"s","message":"m"}"#,
        )
        .unwrap();
        assert_eq!(parsed.message_type, "report");
    }

    #[tokio::test]
    async fn rejects_incomplete_submissions() {
        let store = MemoryStore::new();
        let err = submit_message(
            &store,
            NewMessage {
                subject: "  ".to_string(),
                ..input()
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("subject"));

        let err = submit_message(
            &store,
            NewMessage {
                message_type: "complaint".to_string(),
                ..input()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PortalError::Validation(_)));
    }

    #[tokio::test]
    async fn resolving_deletes_the_message() {
        let store = MemoryStore::new();
        let staff = RequestContext::staff(Role::Admin);
        let created = submit_message(&store, input()).await.unwrap();
        assert_eq!(created.status, ContactStatus::New);

        let outcome = update_status(&store, &staff, created.id, ContactStatus::InProgress)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            StatusOutcome::Updated { ref message } if message.status == ContactStatus::InProgress
        ));

        let outcome = update_status(&store, &staff, created.id, ContactStatus::Resolved)
            .await
            .unwrap();
        assert!(matches!(outcome, StatusOutcome::Deleted { .. }));
        assert!(list_messages(&store, &staff).await.unwrap().is_empty());

        let err = update_status(&store, &staff, created.id, ContactStatus::Resolved)
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::NotFound(_)));
    }

    #[tokio::test]
    async fn students_cannot_read_the_inbox() {
        let store = MemoryStore::new();
        let err = list_messages(&store, &RequestContext::student("a@college.edu"))
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Forbidden(_)));
    }
}
