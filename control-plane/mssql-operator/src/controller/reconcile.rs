//! One convergence pass over a single `MSSQL` resource.
//!
//! `fetch -> (absent | deleting -> drop finalizer | ensure finalizer ->
//! network -> credentials -> workload -> status)`. The first failing step
//! ends the pass; every step is idempotent so the next pass starts over.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use super::finalizer::{ensure_finalizer, remove_finalizer};
use super::secret::ensure_credentials;
use super::service::ensure_network;
use super::status::{DatabasePhase, ensure_phase};
use super::types::ChildContext;
use super::workload::ensure_workload;
use crate::config::ControllerSettings;
use crate::error::Error;
use crate::store::ObjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// The resource no longer exists.
    Absent,
    /// The resource is being deleted; `removed` tells whether this pass
    /// dropped the finalizer.
    Finalized { removed: bool },
    Converged { phase: DatabasePhase },
}

pub struct Reconciler<S: ?Sized> {
    store: Arc<S>,
    settings: ControllerSettings,
}

impl<S: ObjectStore + ?Sized> Reconciler<S> {
    pub fn new(store: Arc<S>, settings: ControllerSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    #[instrument(skip(self))]
    pub async fn reconcile(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<PassOutcome, Error> {
        let store = self.store.as_ref();
        let Some(db) = store.get_database(ns, name).await? else {
            debug!("resource is gone");
            return Ok(PassOutcome::Absent);
        };

        if db.is_marked_for_deletion() {
            let removed =
                remove_finalizer(store, ns, &db, &self.settings.finalizer)
                    .await?;
            return Ok(PassOutcome::Finalized { removed });
        }

        let db =
            ensure_finalizer(store, ns, &db, &self.settings.finalizer).await?;
        let ctx = ChildContext::new(&db, &self.settings)?;

        ensure_network(store, &ctx).await?;
        let creds = ensure_credentials(store, &ctx).await?;
        let sts = ensure_workload(store, &ctx, &creds.secret_name).await?;

        let phase = DatabasePhase::observe(db.replicas(), &sts);
        // the name write-back moved the generation forward
        let db = creds.recorded.unwrap_or(db);
        ensure_phase(store, ns, &db, phase).await?;
        info!(%phase, "pass complete");
        Ok(PassOutcome::Converged { phase })
    }
}
