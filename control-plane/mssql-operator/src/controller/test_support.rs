use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::crd::{
    Edition, HealthCheckSpec, MsSql, MsSqlSpec, StorageType,
};

/// A durable single-replica database with a uid, as the API server would
/// return it after creation.
pub fn database(name: &str, ns: &str) -> MsSql {
    let mut db = MsSql::new(
        name,
        MsSqlSpec {
            version: "2022-latest".into(),
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
        },
    );
    db.metadata.namespace = Some(ns.into());
    db.metadata.uid = Some(format!("uid-{name}"));
    db.metadata.generation = Some(1);
    db
}
