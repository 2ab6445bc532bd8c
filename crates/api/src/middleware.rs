use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use bulkimport_core::TenantId;

use crate::app::errors::json_error;
use crate::context::TenantContext;

/// Request header carrying the tenant scope.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Attach a [`TenantContext`] derived from `X-Tenant-ID`.
pub async fn tenant_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let tenant = extract_tenant(req.headers())
        .map_err(|msg| json_error(StatusCode::BAD_REQUEST, "invalid_tenant", msg))?;

    req.extensions_mut().insert(tenant);
    Ok(next.run(req).await)
}

fn extract_tenant(headers: &HeaderMap) -> Result<TenantContext, String> {
    let Some(header) = headers.get(TENANT_HEADER) else {
        return Ok(TenantContext::default_partition());
    };

    let value = header
        .to_str()
        .map_err(|_| "X-Tenant-ID must be visible ASCII".to_string())?
        .trim();

    value
        .parse::<TenantId>()
        .map(TenantContext::new)
        .map_err(|e| format!("X-Tenant-ID is not a valid id: {e}"))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn absent_header_is_default_partition() {
        let ctx = extract_tenant(&HeaderMap::new()).unwrap();
        assert!(ctx.tenant_id().is_default_partition());
    }

    #[test]
    fn header_is_parsed_as_tenant_id() {
        let tenant = TenantId::new();
        let mut headers = HeaderMap::new();
        headers.insert(TENANT_HEADER, HeaderValue::from_str(&tenant.to_string()).unwrap());
        assert_eq!(extract_tenant(&headers).unwrap().tenant_id(), tenant);

        headers.insert(TENANT_HEADER, HeaderValue::from_static("acme"));
        assert!(extract_tenant(&headers).is_err());
    }
}
