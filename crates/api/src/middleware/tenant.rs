//! Tenant extractor for Axum handlers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::AppError;

/// Header carrying the venue the request acts on.
pub const TENANT_HEADER: &str = "x-tenant-id";

const MAX_TENANT_ID_LEN: usize = 128;

/// Tenant taken from the `x-tenant-id` header.
///
/// Every migration endpoint takes one; there is no default tenant.
///
/// ```ignore
/// async fn my_handler(tenant: TenantContext) -> AppResult<Json<()>> {
///     tracing::info!(tenant_id = %tenant.tenant_id, "handling request");
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: String,
}

impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(TENANT_HEADER)
            .ok_or_else(|| AppError::BadRequest(format!("Missing {TENANT_HEADER} header")))?
            .to_str()
            .map_err(|_| AppError::BadRequest(format!("{TENANT_HEADER} must be visible ASCII")))?;

        let tenant_id = raw.trim();
        if tenant_id.is_empty() || tenant_id.len() > MAX_TENANT_ID_LEN {
            return Err(AppError::BadRequest(format!(
                "{TENANT_HEADER} must be 1 to {MAX_TENANT_ID_LEN} characters"
            )));
        }

        Ok(TenantContext {
            tenant_id: tenant_id.to_string(),
        })
    }
}
