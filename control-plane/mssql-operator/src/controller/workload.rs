//! Stateful set of database pods.
//!
//! The desired object is layered over the live one so fields this controller
//! does not own (server defaults, foreign sidecars, rollout annotations)
//! survive and a converged workload compares equal to its rebuild.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::apps::v1::{
    StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource,
    ObjectFieldSelector, PersistentVolumeClaim, PodSecurityContext, PodSpec,
    PodTemplateSpec, Probe, SecretKeySelector, SecretVolumeSource, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, ObjectMeta,
};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::merge::{prune_stale, upsert_by_key};
use super::ownership::check_ownership;
use super::secret::{PASSWORD_KEY, USERNAME_KEY};
use super::service::log_verb;
use super::types::{ChildContext, Verb};
use crate::config::ControllerSettings;
use crate::crd::{MsSql, ObjectMetaOverlay, PodSpecOverlay, StorageType};
use crate::error::Error;
use crate::store::ObjectStore;

const UPDATE_STRATEGY_ON_DELETE: &str = "OnDelete";
const PULL_IF_NOT_PRESENT: &str = "IfNotPresent";

/// Storage resolved from the resource: either a claim template or an
/// emptyDir source for the data directory.
#[derive(Debug, Clone, PartialEq)]
pub enum DataStorage {
    Durable(PersistentVolumeClaim),
    Ephemeral(EmptyDirVolumeSource),
}

pub fn resolve_storage(
    db: &MsSql,
    s: &ControllerSettings,
) -> Result<DataStorage, Error> {
    let coords = || {
        format!(
            "MSSQL \"{}/{}\"",
            db.namespace().unwrap_or_default(),
            db.name_any()
        )
    };
    if db.spec.storage.is_some() && db.spec.ephemeral_storage.is_some() {
        return Err(Error::validation(format!(
            "{}: storage and ephemeralStorage are mutually exclusive",
            coords()
        )));
    }
    match db.spec.storage_type {
        StorageType::Durable => {
            let spec = db.spec.storage.clone().ok_or_else(|| {
                Error::validation(format!(
                    "{}: storage is required for Durable storageType",
                    coords()
                ))
            })?;
            Ok(DataStorage::Durable(PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some(s.datadir_volume.clone()),
                    ..Default::default()
                },
                spec: Some(spec),
                status: None,
            }))
        }
        StorageType::Ephemeral => {
            if db.spec.storage.is_some() {
                return Err(Error::validation(format!(
                    "{}: storage must be unset for Ephemeral storageType",
                    coords()
                )));
            }
            Ok(DataStorage::Ephemeral(
                db.spec.ephemeral_storage.clone().unwrap_or_default(),
            ))
        }
    }
}

fn field_ref(name: &str, path: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: None,
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: Some("v1".into()),
                field_path: path.into(),
            }),
            ..Default::default()
        }),
    }
}

fn secret_ref(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.into(),
                key: key.into(),
                optional: None,
            }),
            ..Default::default()
        }),
    }
}

fn literal(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        value_from: None,
    }
}

/// Mandatory environment of the database container, user entries layered
/// on top by name.
pub fn database_env(db: &MsSql, secret_name: &str) -> Vec<EnvVar> {
    let mandatory = vec![
        field_ref("POD_NAME", "metadata.name"),
        field_ref("POD_NAMESPACE", "metadata.namespace"),
        literal("AUTH", "true"),
        secret_ref("MSSQL_SA_USERNAME", secret_name, USERNAME_KEY),
        secret_ref("MSSQL_SA_PASSWORD", secret_name, PASSWORD_KEY),
        literal("MSSQL_PID", &db.spec.edition.to_string()),
        literal("ACCEPT_EULA", "Y"),
    ];
    let user = overlay_spec(db)
        .and_then(|o| o.env.clone())
        .unwrap_or_default();
    upsert_by_key(mandatory, user, |e| e.name.as_str())
}

fn overlay_spec(db: &MsSql) -> Option<&PodSpecOverlay> {
    db.spec.pod_template.as_ref().map(|t| &t.spec)
}

/// Pod volumes: scratch, data (ephemeral storage only) and the config
/// secret, with user volumes replacing any of them by name.
pub fn pod_volumes(
    db: &MsSql,
    s: &ControllerSettings,
    storage: &DataStorage,
) -> Vec<Volume> {
    let mut mandatory = vec![Volume {
        name: s.workdir_volume.clone(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }];
    if let DataStorage::Ephemeral(source) = storage {
        mandatory.push(Volume {
            name: s.datadir_volume.clone(),
            empty_dir: Some(source.clone()),
            ..Default::default()
        });
    }
    if let Some(cfg) = db.spec.config_secret.as_ref() {
        mandatory.push(Volume {
            name: s.config_volume.clone(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(cfg.name.clone()),
                default_mode: Some(0o644),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    let user = overlay_spec(db)
        .and_then(|o| o.volumes.clone())
        .unwrap_or_default();
    upsert_by_key(mandatory, user, |v| v.name.as_str())
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.into(),
        mount_path: path.into(),
        ..Default::default()
    }
}

pub fn database_mounts(db: &MsSql, s: &ControllerSettings) -> Vec<VolumeMount> {
    let mandatory = vec![
        mount(&s.workdir_volume, &s.workdir_path),
        mount(&s.datadir_volume, &s.datadir_path),
    ];
    let user = overlay_spec(db)
        .and_then(|o| o.volume_mounts.clone())
        .unwrap_or_default();
    upsert_by_key(mandatory, user, |m| m.name.as_str())
}

/// Fill the defaults the API server adds to a probe so a stored probe
/// compares equal to the one we render.
fn normalize_probe(probe: Option<&Probe>) -> Option<Probe> {
    let mut p = probe.filter(|p| **p != Probe::default())?.clone();
    p.timeout_seconds.get_or_insert(1);
    p.period_seconds.get_or_insert(10);
    p.success_threshold.get_or_insert(1);
    p.failure_threshold.get_or_insert(3);
    if let Some(http) = p.http_get.as_mut() {
        http.scheme.get_or_insert_with(|| "HTTP".into());
    }
    Some(p)
}

fn init_container(
    db: &MsSql,
    s: &ControllerSettings,
    existing: Option<&Container>,
) -> Container {
    let mut mounts = vec![mount(&s.workdir_volume, &s.workdir_path)];
    let mut script = format!("mkdir -p {}", s.workdir_path);
    if db.spec.config_secret.is_some() {
        mounts.push(mount(&s.config_volume, &s.config_path));
        script.push_str(&format!(
            " && cp -r {}/. {}/",
            s.config_path, s.workdir_path
        ));
    }
    Container {
        name: s.init_container_name.clone(),
        image: Some(s.init_image.clone()),
        image_pull_policy: Some(PULL_IF_NOT_PRESENT.into()),
        command: Some(vec!["/bin/sh".into(), "-c".into(), script]),
        args: None,
        env: None,
        resources: Some(
            overlay_spec(db)
                .and_then(|o| o.resources.clone())
                .unwrap_or_default(),
        ),
        volume_mounts: Some(mounts),
        ..existing.cloned().unwrap_or_default()
    }
}

fn database_container(
    db: &MsSql,
    s: &ControllerSettings,
    secret_name: &str,
    existing: Option<&Container>,
) -> Container {
    let default = PodSpecOverlay::default();
    let overlay = overlay_spec(db).unwrap_or(&default);
    Container {
        name: s.container_name.clone(),
        image: Some(s.database_image(&db.spec.version)),
        image_pull_policy: Some(PULL_IF_NOT_PRESENT.into()),
        command: None,
        args: overlay.args.clone().filter(|a| !a.is_empty()),
        ports: Some(vec![ContainerPort {
            name: Some(s.port_name.clone()),
            container_port: s.port,
            protocol: Some("TCP".into()),
            ..Default::default()
        }]),
        env: Some(database_env(db, secret_name)),
        // stored as {} by the server when unset
        resources: Some(overlay.resources.clone().unwrap_or_default()),
        security_context: overlay.container_security_context.clone(),
        lifecycle: overlay.lifecycle.clone(),
        liveness_probe: normalize_probe(overlay.liveness_probe.as_ref()),
        readiness_probe: normalize_probe(overlay.readiness_probe.as_ref()),
        volume_mounts: Some(database_mounts(db, s)),
        ..existing.cloned().unwrap_or_default()
    }
}

fn pod_meta(
    db: &MsSql,
    s: &ControllerSettings,
    existing: Option<ObjectMeta>,
    overlay: Option<&ObjectMetaOverlay>,
) -> ObjectMeta {
    let mut meta = existing.unwrap_or_default();
    let mut labels = meta.labels.take().unwrap_or_default();
    labels.extend(db.offshoot_labels(s, overlay.and_then(|o| o.labels.as_ref())));
    meta.labels = Some(labels);
    if let Some(extra) = overlay.and_then(|o| o.annotations.as_ref()) {
        let mut annotations: BTreeMap<String, String> =
            meta.annotations.take().unwrap_or_default();
        annotations.extend(extra.clone());
        meta.annotations = Some(annotations);
    }
    meta
}

/// Copy pod-level overlay fields. Absent fields clear ours, except the
/// scheduler name which the server defaults on the template.
fn apply_pod_overlay(pod: &mut PodSpec, o: &PodSpecOverlay) {
    pod.node_selector = o.node_selector.clone();
    pod.affinity = o.affinity.clone();
    pod.tolerations = o.tolerations.clone();
    pod.image_pull_secrets = o.image_pull_secrets.clone();
    pod.priority_class_name = o.priority_class_name.clone();
    pod.priority = o.priority;
    pod.service_account_name = o.service_account_name.clone();
    if o.scheduler_name.is_some() {
        pod.scheduler_name = o.scheduler_name.clone();
    }
    pod.host_network = o.host_network.filter(|b| *b);
    pod.host_pid = o.host_pid.filter(|b| *b);
    pod.host_ipc = o.host_ipc.filter(|b| *b);
    pod.security_context = Some(
        o.security_context
            .clone()
            .unwrap_or_else(PodSecurityContext::default),
    );
}

/// Overlay volumes and init containers applied by the last write.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppliedEntries {
    #[serde(default)]
    volumes: BTreeSet<String>,
    #[serde(default)]
    init_containers: BTreeSet<String>,
}

impl AppliedEntries {
    fn from_overlay(o: &PodSpecOverlay) -> Self {
        Self {
            volumes: o.volumes.iter().flatten().map(|v| v.name.clone()).collect(),
            init_containers: o
                .init_containers
                .iter()
                .flatten()
                .map(|c| c.name.clone())
                .collect(),
        }
    }

    /// An unreadable annotation counts as nothing applied.
    fn read(meta: &ObjectMeta, key: &str) -> Self {
        meta.annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    fn write(&self, meta: &mut ObjectMeta, key: &str) -> Result<(), Error> {
        if !self.volumes.is_empty() || !self.init_containers.is_empty() {
            meta.annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(key.to_string(), serde_json::to_string(self)?);
            return Ok(());
        }
        let now_empty = match meta.annotations.as_mut() {
            Some(a) => {
                a.remove(key);
                a.is_empty()
            }
            None => false,
        };
        if now_empty {
            meta.annotations = None;
        }
        Ok(())
    }
}

/// Build the desired stateful set over `existing`.
///
/// Volume claim templates are immutable, so they are only rendered when the
/// stateful set is created. Overlay entries and the config volume from an
/// earlier write are pruned once they are no longer wanted; entries added by
/// anyone else stay.
pub fn build_stateful_set(
    ctx: &ChildContext<'_>,
    secret_name: &str,
    existing: Option<StatefulSet>,
) -> Result<StatefulSet, Error> {
    let db = ctx.db;
    let s = ctx.settings;
    let storage = resolve_storage(db, s)?;
    let template = db.spec.pod_template.clone().unwrap_or_default();
    let creating = existing.is_none();
    let existing = existing.unwrap_or_default();
    let previous =
        AppliedEntries::read(&existing.metadata, &s.applied_entries_annotation);
    let applied = AppliedEntries::from_overlay(&template.spec);

    let mut metadata = ctx.child_meta(
        existing.metadata,
        db.offshoot_name(),
        Some(&template.controller),
    );
    applied.write(&mut metadata, &s.applied_entries_annotation)?;

    let mut spec: StatefulSetSpec = existing.spec.unwrap_or_default();
    spec.replicas = Some(db.replicas());
    spec.service_name = db.governing_service_name().into();
    spec.selector = LabelSelector {
        match_labels: Some(ctx.selectors()),
        match_expressions: None,
    };
    spec.update_strategy = Some(StatefulSetUpdateStrategy {
        type_: Some(UPDATE_STRATEGY_ON_DELETE.into()),
        rolling_update: None,
    });
    if creating {
        if let DataStorage::Durable(claim) = &storage {
            spec.volume_claim_templates = Some(vec![claim.clone()]);
        }
    }

    let pod_template = std::mem::take(&mut spec.template);
    let mut pod = pod_template.spec.unwrap_or_default();

    let mut init_existing = pod.init_containers.take().unwrap_or_default();
    let wanted_init: BTreeSet<&str> =
        applied.init_containers.iter().map(String::as_str).collect();
    prune_stale(
        &mut init_existing,
        &previous.init_containers,
        &wanted_init,
        |c| c.name.as_str(),
    );
    let init_ours = init_container(
        db,
        s,
        init_existing.iter().find(|c| c.name == s.init_container_name),
    );
    let init = upsert_by_key(
        init_existing.clone(),
        template.spec.init_containers.clone().unwrap_or_default(),
        |c| c.name.as_str(),
    );
    pod.init_containers =
        Some(upsert_by_key(init, [init_ours], |c| c.name.as_str()));

    let main = database_container(
        db,
        s,
        secret_name,
        pod.containers.iter().find(|c| c.name == s.container_name),
    );
    pod.containers =
        upsert_by_key(std::mem::take(&mut pod.containers), [main], |c| {
            c.name.as_str()
        });

    let desired_volumes = pod_volumes(db, s, &storage);
    let mut owned_volumes = previous.volumes;
    owned_volumes.extend([s.config_volume.clone(), s.datadir_volume.clone()]);
    let wanted_volumes: BTreeSet<&str> =
        desired_volumes.iter().map(|v| v.name.as_str()).collect();
    let mut volumes = pod.volumes.take().unwrap_or_default();
    prune_stale(&mut volumes, &owned_volumes, &wanted_volumes, |v| {
        v.name.as_str()
    });
    pod.volumes = Some(upsert_by_key(volumes, desired_volumes, |v| {
        v.name.as_str()
    }));
    apply_pod_overlay(&mut pod, &template.spec);

    spec.template = PodTemplateSpec {
        metadata: Some(pod_meta(
            db,
            s,
            pod_template.metadata,
            Some(&template.metadata),
        )),
        spec: Some(pod),
    };

    Ok(StatefulSet {
        metadata,
        spec: Some(spec),
        status: existing.status,
    })
}

/// Converge the stateful set. The ownership guard runs before anything is
/// built so a foreign object is never touched.
#[instrument(skip_all, fields(ns = %ctx.namespace, name = %ctx.db.offshoot_name()))]
pub async fn ensure_workload<S: ObjectStore + ?Sized>(
    store: &S,
    ctx: &ChildContext<'_>,
    secret_name: &str,
) -> Result<StatefulSet, Error> {
    let name = ctx.db.offshoot_name();
    let existing = store.get_stateful_set(&ctx.namespace, &name).await?;
    if let Some(live) = existing.as_ref() {
        check_ownership(live, &ctx.fingerprint, &ctx.settings.labels)?;
    }

    let (verb, current) = match existing {
        None => {
            let desired = build_stateful_set(ctx, secret_name, None)?;
            (Verb::Created, store.create_stateful_set(desired).await?)
        }
        Some(live) => {
            let desired = build_stateful_set(ctx, secret_name, Some(live.clone()))?;
            if desired == live {
                (Verb::Unchanged, live)
            } else {
                (Verb::Updated, store.replace_stateful_set(desired).await?)
            }
        }
    };
    log_verb("StatefulSet", &name, verb);
    Ok(current)
}
