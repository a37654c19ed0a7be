use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::{
    Affinity, Container, EmptyDirVolumeSource, EnvVar, Lifecycle,
    LocalObjectReference, PersistentVolumeClaimSpec, PodSecurityContext,
    Probe, ResourceRequirements, SecurityContext, Toleration, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::ControllerSettings;
use crate::error::Error;

#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq,
)]
#[kube(
    group = "microsoft.kubedb.com",
    version = "v1alpha1",
    kind = "MSSQL",
    root = "MsSql",
    plural = "mssqls",
    singular = "mssql",
    shortname = "ms",
    category = "datastore",
    category = "kubedb",
    namespaced,
    status = "MsSqlStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MsSqlSpec {
    /// Image tag of the database server (or a full image reference).
    pub version: String,
    /// Number of database pods. Defaults to 1.
    #[serde(default = "default_replicas")]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub edition: Edition,
    #[serde(default)]
    pub storage_type: StorageType,
    /// Claim template used when `storageType` is Durable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<PersistentVolumeClaimSpec>,
    /// emptyDir source used when `storageType` is Ephemeral.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_storage: Option<EmptyDirVolumeSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_secret: Option<SecretReference>,
    /// Secret holding custom configuration files for the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_secret: Option<LocalObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_template: Option<PodTemplateOverlay>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_templates: Vec<NamedServiceTemplate>,
    #[serde(default)]
    pub health_checker: HealthCheckSpec,
}

fn default_replicas() -> Option<i32> {
    Some(1)
}

#[derive(
    Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct MsSqlStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// https://learn.microsoft.com/en-us/sql/linux/sql-server-linux-editions-and-components-2019
#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq,
)]
pub enum Edition {
    #[default]
    Developer,
    Express,
    Standard,
    Enterprise,
}

impl fmt::Display for Edition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edition::Developer => write!(f, "Developer"),
            Edition::Express => write!(f, "Express"),
            Edition::Standard => write!(f, "Standard"),
            Edition::Enterprise => write!(f, "Enterprise"),
        }
    }
}

#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq,
)]
pub enum StorageType {
    #[default]
    Durable,
    Ephemeral,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The secret is created and rotated by the user; the operator only reads it.
    #[serde(default)]
    pub externally_managed: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct ObjectMetaOverlay {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

/// User overlay for the database pods and their stateful set.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct PodTemplateOverlay {
    /// Pod labels and annotations.
    #[serde(default)]
    pub metadata: ObjectMetaOverlay,
    /// Stateful set labels and annotations.
    #[serde(default)]
    pub controller: ObjectMetaOverlay,
    #[serde(default)]
    pub spec: PodSpecOverlay,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpecOverlay {
    // pod level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<Volume>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_containers: Option<Vec<Container>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_network: Option<bool>,
    #[serde(default, rename = "hostPID", skip_serializing_if = "Option::is_none")]
    pub host_pid: Option<bool>,
    #[serde(default, rename = "hostIPC", skip_serializing_if = "Option::is_none")]
    pub host_ipc: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<PodSecurityContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secrets: Option<Vec<LocalObjectReference>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    // database container level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<EnvVar>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Lifecycle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_security_context: Option<SecurityContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_mounts: Option<Vec<VolumeMount>>,
}

#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq,
)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAlias {
    Primary,
    Standby,
    Stats,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct NamedServiceTemplate {
    pub alias: ServiceAlias,
    #[serde(default)]
    pub metadata: ObjectMetaOverlay,
    #[serde(default)]
    pub spec: ServiceSpecOverlay,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpecOverlay {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(default, rename = "clusterIP", skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,
    #[serde(default, rename = "externalIPs", skip_serializing_if = "Option::is_none")]
    pub external_ips: Option<Vec<String>>,
    #[serde(
        default,
        rename = "loadBalancerIP",
        skip_serializing_if = "Option::is_none"
    )]
    pub load_balancer_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_source_ranges: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_traffic_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_node_port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<ServicePortOverlay>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePortOverlay {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<IntOrString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_port: Option<i32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthCheckSpec {
    pub period_seconds: i32,
    pub timeout_seconds: i32,
    pub failure_threshold: i32,
    pub disable_write_check: bool,
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            period_seconds: 10,
            timeout_seconds: 10,
            failure_threshold: 1,
            disable_write_check: false,
        }
    }
}

impl MsSql {
    pub fn offshoot_name(&self) -> String {
        self.name_any()
    }

    pub fn primary_service_name(&self) -> String {
        self.offshoot_name()
    }

    pub fn governing_service_name(&self) -> String {
        format!("{}-pods", self.primary_service_name())
    }

    /// The user-provided secret name when set, `<name>-auth` otherwise.
    pub fn auth_secret_name(&self) -> String {
        self.spec
            .auth_secret
            .as_ref()
            .and_then(|r| r.name.as_deref())
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}-auth", self.offshoot_name()))
    }

    pub fn replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or(1)
    }

    pub fn is_marked_for_deletion(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, token: &str) -> bool {
        self.finalizers().iter().any(|f| f == token)
    }

    pub fn service_template(
        &self,
        alias: ServiceAlias,
    ) -> Option<&NamedServiceTemplate> {
        self.spec.service_templates.iter().find(|t| t.alias == alias)
    }

    /// Controller back-reference used by the garbage collector.
    pub fn owner_reference(&self) -> Result<OwnerReference, Error> {
        self.controller_owner_ref(&()).ok_or_else(|| {
            Error::validation(format!(
                "MSSQL {}/{} has no uid yet",
                self.namespace().unwrap_or_default(),
                self.name_any()
            ))
        })
    }

    /// The ownership fingerprint, also used as the pod selector.
    pub fn offshoot_selectors(
        &self,
        s: &ControllerSettings,
    ) -> BTreeMap<String, String> {
        BTreeMap::from([
            (s.labels.name.clone(), s.resource_fqn.clone()),
            (s.labels.instance.clone(), self.name_any()),
            (s.labels.managed_by.clone(), s.managed_by.clone()),
        ])
    }

    /// Labels for a child object: the resource's own labels and `extra`,
    /// minus operator-domain keys, under the selectors and component label.
    pub fn offshoot_labels(
        &self,
        s: &ControllerSettings,
        extra: Option<&BTreeMap<String, String>>,
    ) -> BTreeMap<String, String> {
        let mut out: BTreeMap<String, String> = self
            .labels()
            .iter()
            .chain(extra.into_iter().flatten())
            .filter(|(k, _)| !is_domain_key(k, &s.managed_by))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.extend(self.offshoot_selectors(s));
        out.insert(s.labels.component.clone(), s.component_database.clone());
        out
    }
}

/// Keys whose prefix is `domain` or a subdomain of it belong to the operator.
fn is_domain_key(key: &str, domain: &str) -> bool {
    match key.split_once('/') {
        Some((prefix, _)) => {
            prefix == domain
                || prefix
                    .strip_suffix(domain)
                    .is_some_and(|rest| rest.ends_with('.'))
        }
        None => false,
    }
}
