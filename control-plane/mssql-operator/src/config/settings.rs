use super::OperatorConfig;

/// Label keys shared by every child object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelKeys {
    pub name: String,
    pub instance: String,
    pub managed_by: String,
    pub component: String,
    pub role: String,
}

impl Default for LabelKeys {
    fn default() -> Self {
        Self {
            name: "app.kubernetes.io/name".into(),
            instance: "app.kubernetes.io/instance".into(),
            managed_by: "app.kubernetes.io/managed-by".into(),
            component: "app.kubernetes.io/component".into(),
            role: "kubedb.com/role".into(),
        }
    }
}

/// Names, ports and images the controller stamps onto child objects.
///
/// Built once at startup and carried in the reconciler so the builders never
/// read process-wide state.
#[derive(Clone, Debug)]
pub struct ControllerSettings {
    pub labels: LabelKeys,
    /// Value of the managed-by label, also the domain of operator-owned keys.
    pub managed_by: String,
    /// Value of the name label (`<plural>.<group domain>`).
    pub resource_fqn: String,
    pub component_database: String,
    pub role_primary: String,
    pub finalizer: String,
    /// Annotation listing the overlay volumes and init containers applied by
    /// the last write, so entries dropped from the overlay can be pruned.
    pub applied_entries_annotation: String,

    pub port_name: String,
    pub port: i32,

    pub container_name: String,
    pub init_container_name: String,
    pub workdir_volume: String,
    pub workdir_path: String,
    pub datadir_volume: String,
    pub datadir_path: String,
    pub config_volume: String,
    pub config_path: String,

    pub image_repository: String,
    pub init_image: String,

    pub username: String,
    pub password_length: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            labels: LabelKeys::default(),
            managed_by: "kubedb.com".into(),
            resource_fqn: "mssqls.kubedb.com".into(),
            component_database: "database".into(),
            role_primary: "primary".into(),
            finalizer: "kubedb.com".into(),
            applied_entries_annotation: "kubedb.com/applied-pod-entries".into(),
            port_name: "db".into(),
            port: 1433,
            container_name: "mssql".into(),
            init_container_name: "copy-config".into(),
            workdir_volume: "workdir".into(),
            workdir_path: "/work-dir".into(),
            datadir_volume: "datadir".into(),
            datadir_path: "/var/opt/mssql".into(),
            config_volume: "custom-config".into(),
            config_path: "/tmp/config".into(),
            image_repository: "mcr.microsoft.com/mssql/server".into(),
            init_image: "busybox".into(),
            username: "sa".into(),
            password_length: 16,
        }
    }
}

impl ControllerSettings {
    pub fn from_config(cfg: &OperatorConfig) -> Self {
        Self {
            image_repository: cfg.database.image_repository.clone(),
            init_image: cfg.database.init_image.clone(),
            password_length: cfg.database.password_length,
            ..Self::default()
        }
    }

    /// Resolve the database image: `version` is a tag unless it already
    /// names a full image reference.
    pub fn database_image(&self, version: &str) -> String {
        if version.contains('/') || version.contains(':') {
            version.to_string()
        } else {
            format!("{}:{}", self.image_repository, version)
        }
    }
}
