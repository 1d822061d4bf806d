//! Caller identity extracted from request headers.
//!
//! `X-User-ID` and `X-User-Role` are set by the authenticating proxy in front
//! of this service. Requests that reach the service directly must not be
//! trusted with them.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

pub const USER_ID_HEADER: &str = "X-User-ID";
pub const USER_ROLE_HEADER: &str = "X-User-Role";
pub const ADMIN_ROLE: &str = "admin";

/// Authenticated caller.
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: String,
    pub role: Option<String>,
}

impl UserContext {
    pub fn is_admin(&self) -> bool {
        self.role
            .as_deref()
            .is_some_and(|role| role.eq_ignore_ascii_case(ADMIN_ROLE))
    }
}

/// Authenticated caller with the admin role.
#[derive(Debug, Clone)]
pub struct AdminContext(pub UserContext);

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER).ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing {} header", USER_ID_HEADER))
        })?;
        let role = header(parts, USER_ROLE_HEADER).map(str::to_string);

        tracing::Span::current().record("user_id", user_id);

        Ok(UserContext {
            user_id: user_id.to_string(),
            role,
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = UserContext::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(AppError::Forbidden(anyhow::anyhow!("Admin role required")));
        }
        Ok(AdminContext(user))
    }
}
