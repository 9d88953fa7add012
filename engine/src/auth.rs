use axum::{extract::FromRequestParts, http::request::Parts};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use tracing::warn;

use crate::error::AppError;

pub const USER_HEADER: &str = "x-user";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Student,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub role: Role,
    pub student_id: Option<String>,
}

#[derive(Deserialize)]
struct UserClaims {
    role: Option<String>,
    #[serde(alias = "studentid", alias = "student_id", rename = "studentId")]
    student_id: Option<String>,
}

impl AuthContext {
    pub fn admin() -> Self {
        Self {
            role: Role::Admin,
            student_id: None,
        }
    }

    pub fn student(studentid: impl Into<String>) -> Self {
        Self {
            role: Role::Student,
            student_id: Some(studentid.into()),
        }
    }

    pub fn from_header(value: &str) -> Result<Self, AppError> {
        let bytes = STANDARD
            .decode(value.trim())
            .map_err(|_| AppError::Unauthorized("x-user header is not valid base64".to_string()))?;
        let claims: UserClaims = serde_json::from_slice(&bytes)
            .map_err(|_| AppError::Unauthorized("x-user header is not valid JSON".to_string()))?;

        let role = match claims.role.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("admin") => Role::Admin,
            Some("user") | Some("student") => Role::Student,
            Some(other) => return Err(AppError::Forbidden(format!("invalid role '{}'", other))),
            None => return Err(AppError::Unauthorized("missing role".to_string())),
        };

        let student_id = claims.student_id.filter(|id| !id.trim().is_empty());
        if role == Role::Student && student_id.is_none() {
            return Err(AppError::Unauthorized("student caller without student id".to_string()));
        }

        Ok(Self { role, student_id })
    }

    pub fn encode(&self) -> String {
        let role = match self.role {
            Role::Admin => "admin",
            Role::Student => "user",
        };
        let payload = serde_json::json!({ "role": role, "studentId": self.student_id });
        STANDARD.encode(payload.to_string())
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn authorize_student(&self, studentid: &str) -> Result<(), AppError> {
        match self.role {
            Role::Admin => Ok(()),
            Role::Student if self.student_id.as_deref() == Some(studentid) => Ok(()),
            Role::Student => {
                warn!(
                    "Student {:?} attempted to access records of {}",
                    self.student_id, studentid
                );
                Err(AppError::Forbidden(format!("no access to student {}", studentid)))
            }
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden("admin role required".to_string()))
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(USER_HEADER)
            .ok_or_else(|| AppError::Unauthorized("missing user data".to_string()))?;
        let value = header
            .to_str()
            .map_err(|_| AppError::Unauthorized("x-user header is not ASCII".to_string()))?;
        AuthContext::from_header(value)
    }
}
