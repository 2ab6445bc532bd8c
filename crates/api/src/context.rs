use bulkimport_core::TenantId;

/// Tenant scope for a request.
///
/// Immutable and present on every import route.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    /// Requests without a tenant header land in the default partition.
    pub fn default_partition() -> Self {
        Self::new(TenantId::default_partition())
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
