//! Job activation policy.

use tracing::{debug, info};

use bulkimport_core::JobId;
use bulkimport_jobs::JobStatus;

use super::registry::{JobRegistry, RegistryError};

/// What an activation attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// The job moved STAGING -> READY.
    Activated,
    /// The job is still waiting for files.
    Pending { received: u32, declared: u32 },
    /// The job had already left STAGING; nothing changed.
    AlreadyActive(JobStatus),
}

/// Decides when a STAGING job becomes runnable.
///
/// The registry only checks that STAGING -> READY is legal; the "all declared
/// files arrived" condition lives here.
#[derive(Debug, Clone)]
pub struct JobActivator<R: JobRegistry> {
    registry: R,
}

impl<R: JobRegistry> JobActivator<R> {
    pub fn new(registry: R) -> Self {
        Self { registry }
    }

    /// Activate the job if every declared file is present. Idempotent.
    pub fn try_activate(&self, job_id: JobId) -> Result<Activation, RegistryError> {
        let snapshot = self.registry.get_status(job_id)?;
        if snapshot.status != JobStatus::Staging {
            return Ok(Activation::AlreadyActive(snapshot.status));
        }

        let received = snapshot.files.len() as u32;
        if received < snapshot.declared_file_count {
            debug!(
                job_id = %job_id,
                received,
                declared = snapshot.declared_file_count,
                "job still waiting for files"
            );
            return Ok(Activation::Pending {
                received,
                declared: snapshot.declared_file_count,
            });
        }

        self.activate(job_id)
    }

    /// Activate regardless of the file count.
    pub fn force_activate(&self, job_id: JobId) -> Result<Activation, RegistryError> {
        self.activate(job_id)
    }

    fn activate(&self, job_id: JobId) -> Result<Activation, RegistryError> {
        match self.registry.activate(job_id) {
            Ok(()) => {
                info!(job_id = %job_id, "job ready for processing");
                Ok(Activation::Activated)
            }
            // Lost a race with another activation.
            Err(RegistryError::Job(bulkimport_jobs::JobError::JobNotStaging(status))) => {
                Ok(Activation::AlreadyActive(status))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use bulkimport_core::TenantId;
    use bulkimport_jobs::{JobSpec, NewJobFile};

    use super::*;
    use crate::jobs::in_memory::InMemoryJobRegistry;

    fn file() -> NewJobFile {
        NewJobFile {
            tenant: TenantId::default_partition(),
            description: String::new(),
            content: b"{}".to_vec(),
        }
    }

    fn staging(registry: &InMemoryJobRegistry, declared: u32, files: usize) -> JobId {
        let id = registry
            .create_job(JobSpec {
                declared_file_count: declared,
                ..JobSpec::default()
            })
            .unwrap();
        registry.append_files(id, (0..files).map(|_| file()).collect()).unwrap();
        id
    }

    #[test]
    fn waits_until_declared_files_arrive() {
        let registry = InMemoryJobRegistry::arc();
        let activator = JobActivator::new(registry.clone());
        let id = staging(&registry, 2, 1);

        assert_eq!(
            activator.try_activate(id).unwrap(),
            Activation::Pending { received: 1, declared: 2 }
        );
        assert_eq!(registry.get_status(id).unwrap().status, JobStatus::Staging);

        registry.append_files(id, vec![file()]).unwrap();
        assert_eq!(activator.try_activate(id).unwrap(), Activation::Activated);
        assert_eq!(
            activator.try_activate(id).unwrap(),
            Activation::AlreadyActive(JobStatus::Ready)
        );
    }

    #[test]
    fn force_activation_ignores_file_count() {
        let registry = InMemoryJobRegistry::arc();
        let activator = JobActivator::new(registry.clone());
        let id = staging(&registry, 3, 1);

        assert_eq!(activator.force_activate(id).unwrap(), Activation::Activated);
        assert_eq!(registry.get_status(id).unwrap().status, JobStatus::Ready);
    }

    #[test]
    fn unknown_job_is_an_error() {
        let activator = JobActivator::new(InMemoryJobRegistry::new());
        assert!(matches!(
            activator.try_activate(JobId::new()),
            Err(RegistryError::UnknownJob(_))
        ));
    }
}
