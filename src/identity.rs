//! Caller identity as asserted by the upstream gateway.
//!
//! The gateway authenticates the request and forwards `x-user-email` and
//! `x-user-role`; this service trusts both and performs no credential checks.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::domain::Role;
use crate::error::{EduError, EduResult};
use crate::util::normalize_email;

pub const EMAIL_HEADER: &str = "x-user-email";
pub const ROLE_HEADER: &str = "x-user-role";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
  pub email: String,
  pub role: Role,
}

impl Identity {
  /// Admins pass every role gate; ownership and enrollment checks still apply.
  pub fn require_role(&self, role: Role) -> EduResult<()> {
    if self.role == Role::Admin || self.role == role {
      Ok(())
    } else {
      Err(EduError::Forbidden(format!("Forbidden: {} only", role_name(role))))
    }
  }
}

fn role_name(role: Role) -> &'static str {
  match role {
    Role::Student => "student",
    Role::Teacher => "teacher",
    Role::Admin => "admin",
  }
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
  S: Send + Sync,
{
  type Rejection = EduError;

  async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
    let header = |name: &str| {
      parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
    };

    let email = header(EMAIL_HEADER).ok_or_else(|| EduError::Unauthorized(format!("missing {EMAIL_HEADER}")))?;
    let role = header(ROLE_HEADER)
      .ok_or_else(|| EduError::Unauthorized(format!("missing {ROLE_HEADER}")))?
      .parse::<Role>()
      .map_err(EduError::Unauthorized)?;

    Ok(Identity { email: normalize_email(&email), role })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::http::Request;

  async fn extract(req: Request<()>) -> EduResult<Identity> {
    let (mut parts, _) = req.into_parts();
    Identity::from_request_parts(&mut parts, &()).await
  }

  #[tokio::test]
  async fn reads_gateway_headers() {
    let req = Request::builder()
      .header(EMAIL_HEADER, " Teacher@School.org ")
      .header(ROLE_HEADER, "teacher")
      .body(())
      .unwrap();
    let id = extract(req).await.unwrap();
    assert_eq!(id, Identity { email: "teacher@school.org".into(), role: Role::Teacher });
  }

  #[tokio::test]
  async fn missing_or_unknown_role_is_unauthorized() {
    let req = Request::builder().header(EMAIL_HEADER, "a@b.c").body(()).unwrap();
    assert!(matches!(extract(req).await, Err(EduError::Unauthorized(_))));

    let req = Request::builder().header(EMAIL_HEADER, "a@b.c").header(ROLE_HEADER, "root").body(()).unwrap();
    assert!(matches!(extract(req).await, Err(EduError::Unauthorized(_))));
  }

  #[test]
  fn admin_passes_role_gates() {
    let admin = Identity { email: "root@x.io".into(), role: Role::Admin };
    assert!(admin.require_role(Role::Teacher).is_ok());
    let student = Identity { email: "s@x.io".into(), role: Role::Student };
    assert!(matches!(student.require_role(Role::Teacher), Err(EduError::Forbidden(_))));
  }
}
