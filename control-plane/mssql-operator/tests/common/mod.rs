#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use envconfig::Envconfig;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{
    Client,
    api::{Api, DeleteParams, Patch, PatchParams},
};
use mssql_operator::config::OperatorConfig;
use mssql_operator::crd::{
    Edition, HealthCheckSpec, MsSql, MsSqlSpec, StorageType,
};
use tokio::task::JoinHandle;

// DNS-1123 safe numeric suffix for unique names
pub const DIGITS: [char; 10] =
    ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
pub fn uniq(prefix: &str) -> String {
    format!("{prefix}-{}", nanoid::nanoid!(6, &DIGITS))
}

pub fn test_config(ns: &str) -> OperatorConfig {
    let env = [
        ("MSSQL_OPERATOR_NAMESPACE", ns),
        ("MSSQL_OPERATOR_RESYNC_SECS", "5"),
        ("MSSQL_OPERATOR_RETRY_CONFLICT_SECS", "1"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    OperatorConfig::init_from_hashmap(&env).expect("test config")
}

pub fn durable_spec(version: &str) -> MsSqlSpec {
    MsSqlSpec {
        version: version.into(),
        replicas: Some(1),
        edition: Edition::Developer,
        storage_type: StorageType::Durable,
        storage: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".into()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity("1Gi".into()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ephemeral_storage: None,
        ssl_mode: None,
        auth_secret: None,
        config_secret: None,
        pod_template: None,
        service_templates: vec![],
        health_checker: HealthCheckSpec::default(),
    }
}

/// Poll `get` once per second until it yields a value.
pub async fn wait_for<K, F, Fut>(what: &str, secs: u64, mut get: F) -> K
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<K>>,
{
    for _ in 0..secs {
        if let Some(v) = get().await {
            return v;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    panic!("{what} not observed within {secs}s");
}

/// Aborts the controller task and removes the test resource on drop.
pub struct ControllerGuard {
    ns: String,
    name: String,
    client: Client,
    handle: Option<JoinHandle<()>>,
}

impl ControllerGuard {
    pub fn new(ns: &str, name: &str, client: Client) -> Self {
        Self {
            ns: ns.to_string(),
            name: name.to_string(),
            client,
            handle: None,
        }
    }

    pub fn with_controller(mut self, handle: JoinHandle<()>) -> Self {
        self.handle = Some(handle);
        self
    }
}

impl Drop for ControllerGuard {
    fn drop(&mut self) {
        if let Some(h) = self.handle.take() {
            h.abort();
        }
        let api: Api<MsSql> = Api::namespaced(self.client.clone(), &self.ns);
        let name = self.name.clone();
        tokio::spawn(async move {
            // the controller is gone, so release the finalizer ourselves
            let patch = serde_json::json!({"metadata": {"finalizers": null}});
            let _ = api
                .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await;
            let _ = api.delete(&name, &DeleteParams::default()).await;
        });
    }
}
