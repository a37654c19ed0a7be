use std::sync::Arc;

use futures_util::StreamExt;
use k8s_openapi::api::{
    apps::v1::StatefulSet,
    core::v1::{Secret, Service},
};
use kube::{
    Client, ResourceExt,
    api::Api,
    runtime::{
        Controller,
        controller::{self, Action},
        watcher::Config,
    },
};
use tracing::{debug, info, warn};

use crate::config::{ControllerSettings, OperatorConfig};
use crate::crd::MsSql;
use crate::error::Error;
use crate::store::KubeStore;

pub mod finalizer;
pub mod merge;
pub mod ownership;
pub mod reconcile;
pub mod secret;
pub mod service;
pub mod status;
pub mod types;
pub mod workload;

#[cfg(test)]
pub(crate) mod test_support;


pub use reconcile::{PassOutcome, Reconciler};

pub struct ControllerContext {
    pub reconciler: Reconciler<KubeStore>,
    pub cfg: OperatorConfig,
}

fn scoped<K>(client: &Client, ns: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as kube::Resource>::DynamicType: Default,
{
    match ns {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

pub async fn run_controller(
    client: Client,
    cfg: OperatorConfig,
) -> anyhow::Result<()> {
    let ns = cfg.watch_namespace.as_deref();
    let databases: Api<MsSql> = scoped(&client, ns);
    let services: Api<Service> = scoped(&client, ns);
    let secrets: Api<Secret> = scoped(&client, ns);
    let stateful_sets: Api<StatefulSet> = scoped(&client, ns);

    let store = Arc::new(KubeStore::new(client.clone(), cfg.field_manager.clone()));
    let settings = ControllerSettings::from_config(&cfg);
    info!(
        namespace = ns.unwrap_or("<all>"),
        concurrency = cfg.concurrency,
        "starting MSSQL controller"
    );
    let concurrency = cfg.concurrency;
    let ctx = Arc::new(ControllerContext {
        reconciler: Reconciler::new(store, settings),
        cfg,
    });

    Controller::new(databases, Config::default())
        .owns(services, Config::default())
        .owns(secrets, Config::default())
        .owns(stateful_sets, Config::default())
        .with_config(controller::Config::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => {
                    debug!(object = %obj_ref, ?action, "reconciled")
                }
                Err(e) => debug!(error = %e, "controller event"),
            }
        })
        .await;

    info!("MSSQL controller stopped");
    Ok(())
}

/// Run one pass under the per-pass deadline. The watched object only
/// identifies the resource; the pass re-reads it from the store.
async fn reconcile(
    obj: Arc<MsSql>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, Error> {
    let name = obj.name_any();
    let ns = obj.namespace().ok_or_else(|| {
        Error::validation(format!("MSSQL {name} has no namespace"))
    })?;
    let deadline = ctx.cfg.reconcile_timeout();

    let outcome = tokio::time::timeout(
        deadline,
        ctx.reconciler.reconcile(&ns, &name),
    )
    .await
    .map_err(|_| {
        Error::Timeout(format!(
            "MSSQL \"{ns}/{name}\" pass exceeded {}s",
            deadline.as_secs()
        ))
    })??;

    Ok(match outcome {
        PassOutcome::Converged { .. } => {
            Action::requeue(ctx.cfg.resync_interval())
        }
        PassOutcome::Absent | PassOutcome::Finalized { .. } => {
            Action::await_change()
        }
    })
}

fn error_policy(
    obj: Arc<MsSql>,
    error: &Error,
    ctx: Arc<ControllerContext>,
) -> Action {
    let class = error.class();
    let delay = ctx.cfg.retry.delay_for(class);
    warn!(
        ns = %obj.namespace().unwrap_or_default(),
        name = %obj.name_any(),
        %class,
        %error,
        retry_in = ?delay,
        "reconcile failed"
    );
    Action::requeue(delay)
}
