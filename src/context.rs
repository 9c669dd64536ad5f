use std::str::FromStr;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::error::{PortalError, PortalResult};
use crate::models::normalize_email;

pub const ROLE_HEADER: &str = "x-portal-role";
pub const EMAIL_HEADER: &str = "x-portal-email";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Faculty,
    Admin,
}

impl FromStr for Role {
    type Err = PortalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "faculty" => Ok(Role::Faculty),
            "admin" => Ok(Role::Admin),
            other => Err(PortalError::validation(format!("unknown role: {other:?}"))),
        }
    }
}

/// Who is calling. Set by the authentication gateway in front of the service
/// and passed explicitly to every operation that depends on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub role: Role,
    pub email: Option<String>,
}

impl RequestContext {
    pub fn student(email: impl Into<String>) -> Self {
        Self {
            role: Role::Student,
            email: Some(normalize_email(&email.into())),
        }
    }

    pub fn staff(role: Role) -> Self {
        Self { role, email: None }
    }

    pub fn from_headers(headers: &HeaderMap) -> PortalResult<Self> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let role: Role = header(ROLE_HEADER).ok_or(PortalError::Unauthorized)?.parse()?;
        let email = header(EMAIL_HEADER).map(normalize_email);
        if role == Role::Student && email.is_none() {
            return Err(PortalError::Unauthorized);
        }
        Ok(Self { role, email })
    }

    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Faculty | Role::Admin)
    }

    pub fn require_staff(&self) -> PortalResult<()> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(PortalError::Forbidden("faculty or admin role required".to_string()))
        }
    }

    /// Students always act on themselves; staff must name the student.
    pub fn owner_for(&self, requested: Option<&str>) -> PortalResult<String> {
        let requested = requested
            .map(normalize_email)
            .filter(|v| !v.is_empty());
        if self.is_staff() {
            return requested.ok_or_else(|| PortalError::validation("email_id is required"));
        }

        let own = self.email.as_deref().ok_or(PortalError::Unauthorized)?;
        match requested {
            Some(other) if other != own => Err(PortalError::Forbidden(
                "students may only act on their own records".to_string(),
            )),
            _ => Ok(own.to_string()),
        }
    }

    pub fn ensure_can_access(&self, owner: &str) -> PortalResult<()> {
        if self.is_staff() || self.email.as_deref() == Some(normalize_email(owner).as_str()) {
            Ok(())
        } else {
            Err(PortalError::Forbidden(
                "record belongs to another student".to_string(),
            ))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = PortalError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        RequestContext::from_headers(&parts.headers)
    }
}
