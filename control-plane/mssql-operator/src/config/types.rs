use std::time::Duration;

use envconfig::Envconfig;

use crate::error::FailureClass;

#[derive(Envconfig, Clone, Debug)]
pub struct OperatorConfig {
    #[envconfig(from = "HTTP_PORT", default = "8088")]
    pub http_port: u16,

    /// Restrict the watch to one namespace; all namespaces when unset.
    /// Env: MSSQL_OPERATOR_NAMESPACE
    #[envconfig(from = "MSSQL_OPERATOR_NAMESPACE")]
    pub watch_namespace: Option<String>,

    #[envconfig(from = "MSSQL_OPERATOR_FIELD_MANAGER", default = "mssql-operator")]
    pub field_manager: String,

    /// Number of distinct resources reconciled in parallel.
    #[envconfig(from = "MSSQL_OPERATOR_CONCURRENCY", default = "4")]
    pub concurrency: u16,

    /// Deadline for one reconciliation pass.
    /// Env: MSSQL_OPERATOR_RECONCILE_TIMEOUT_SECS
    #[envconfig(from = "MSSQL_OPERATOR_RECONCILE_TIMEOUT_SECS", default = "30")]
    pub reconcile_timeout_secs: u64,

    #[envconfig(from = "MSSQL_OPERATOR_RESYNC_SECS", default = "300")]
    pub resync_secs: u64,

    #[envconfig(nested)]
    pub retry: RetryConfig,

    #[envconfig(nested)]
    pub database: DatabaseConfig,
}

/// Requeue delay per failure class.
#[derive(Envconfig, Clone, Debug)]
pub struct RetryConfig {
    #[envconfig(from = "MSSQL_OPERATOR_RETRY_CONFLICT_SECS", default = "5")]
    pub conflict_secs: u64,
    #[envconfig(from = "MSSQL_OPERATOR_RETRY_VALIDATION_SECS", default = "60")]
    pub validation_secs: u64,
    #[envconfig(from = "MSSQL_OPERATOR_RETRY_TRANSIENT_SECS", default = "15")]
    pub transient_secs: u64,
}

#[derive(Envconfig, Clone, Debug)]
pub struct DatabaseConfig {
    #[envconfig(
        from = "MSSQL_OPERATOR_IMAGE_REPOSITORY",
        default = "mcr.microsoft.com/mssql/server"
    )]
    pub image_repository: String,
    #[envconfig(from = "MSSQL_OPERATOR_INIT_IMAGE", default = "busybox")]
    pub init_image: String,
    #[envconfig(from = "MSSQL_OPERATOR_PASSWORD_LENGTH", default = "16")]
    pub password_length: usize,
}

impl OperatorConfig {
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }
}

impl RetryConfig {
    pub fn delay_for(&self, class: FailureClass) -> Duration {
        let secs = match class {
            FailureClass::Conflict => self.conflict_secs,
            FailureClass::Validation => self.validation_secs,
            FailureClass::Transient => self.transient_secs,
        };
        Duration::from_secs(secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            conflict_secs: 5,
            validation_secs: 60,
            transient_secs: 15,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            image_repository: "mcr.microsoft.com/mssql/server".into(),
            init_image: "busybox".into(),
            password_length: 16,
        }
    }
}
