use k8s_openapi::api::apps::v1::StatefulSet;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::crd::{MsSql, MsSqlStatus};
use crate::error::Error;
use crate::store::ObjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabasePhase {
    Provisioning,
    Ready,
    Halted,
}

impl std::fmt::Display for DatabasePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabasePhase::Provisioning => write!(f, "Provisioning"),
            DatabasePhase::Ready => write!(f, "Ready"),
            DatabasePhase::Halted => write!(f, "Halted"),
        }
    }
}

impl DatabasePhase {
    pub fn observe(desired_replicas: i32, sts: &StatefulSet) -> Self {
        if desired_replicas == 0 {
            return DatabasePhase::Halted;
        }
        let ready = sts
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        if ready >= desired_replicas {
            DatabasePhase::Ready
        } else {
            DatabasePhase::Provisioning
        }
    }
}

/// Record `phase` and the observed generation; skipped when both already
/// match.
pub async fn ensure_phase<S: ObjectStore + ?Sized>(
    store: &S,
    ns: &str,
    db: &MsSql,
    phase: DatabasePhase,
) -> Result<(), Error> {
    let desired = MsSqlStatus {
        phase: Some(phase.to_string()),
        observed_generation: db.metadata.generation,
    };
    if db.status.as_ref() == Some(&desired) {
        debug!(%phase, "status unchanged");
        return Ok(());
    }
    store
        .patch_database_status(ns, &db.name_any(), desired)
        .await?;
    info!(name = %db.name_any(), %phase, "status updated");
    Ok(())
}
