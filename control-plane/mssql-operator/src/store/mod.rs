//! Object store contract used by the reconciler.
//!
//! Every pass re-reads what it needs through this trait; nothing is cached
//! between passes. Writes of whole objects carry the object's
//! `resourceVersion`, so a concurrent writer surfaces as [`Error::Conflict`]
//! instead of being overwritten.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde_json::json;
use tracing::trace;

#[cfg(test)]
use mockall::automock;

use crate::crd::{MsSql, MsSqlStatus};
use crate::error::{Error, is_not_found};

#[cfg(test)]
pub(crate) mod memory;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_database(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<MsSql>, Error>;

    /// Replace the finalizer list; fails with a conflict if the resource
    /// changed since `resource_version` was read.
    async fn patch_database_finalizers(
        &self,
        ns: &str,
        name: &str,
        finalizers: Vec<String>,
        resource_version: Option<String>,
    ) -> Result<MsSql, Error>;

    /// Persist the resolved credential secret name onto the spec. Guarded by
    /// `resource_version` like the finalizer patch.
    async fn patch_auth_secret_name(
        &self,
        ns: &str,
        name: &str,
        secret_name: &str,
        resource_version: Option<String>,
    ) -> Result<MsSql, Error>;

    async fn patch_database_status(
        &self,
        ns: &str,
        name: &str,
        status: MsSqlStatus,
    ) -> Result<(), Error>;

    async fn get_secret(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<Secret>, Error>;

    async fn create_secret(&self, secret: Secret) -> Result<Secret, Error>;

    async fn get_service(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<Service>, Error>;

    async fn create_service(&self, svc: Service) -> Result<Service, Error>;

    async fn replace_service(&self, svc: Service) -> Result<Service, Error>;

    async fn get_stateful_set(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, Error>;

    async fn create_stateful_set(
        &self,
        sts: StatefulSet,
    ) -> Result<StatefulSet, Error>;

    async fn replace_stateful_set(
        &self,
        sts: StatefulSet,
    ) -> Result<StatefulSet, Error>;
}

/// [`ObjectStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    field_manager: String,
}

impl KubeStore {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api<K>(&self, ns: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), ns)
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

async fn get_opt<K>(api: &Api<K>, name: &str) -> Result<Option<K>, Error>
where
    K: Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn namespace_of<K>(obj: &K) -> Result<String, Error>
where
    K: Resource,
    <K as Resource>::DynamicType: Default,
{
    obj.meta().namespace.clone().ok_or_else(|| {
        Error::validation(format!(
            "{} {} has no namespace",
            K::kind(&Default::default()),
            obj.meta().name.as_deref().unwrap_or_default()
        ))
    })
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_database(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<MsSql>, Error> {
        get_opt(&self.api::<MsSql>(ns), name).await
    }

    async fn patch_database_finalizers(
        &self,
        ns: &str,
        name: &str,
        finalizers: Vec<String>,
        resource_version: Option<String>,
    ) -> Result<MsSql, Error> {
        let mut patch = json!({"metadata": {"finalizers": finalizers}});
        if let Some(rv) = resource_version {
            patch["metadata"]["resourceVersion"] = json!(rv);
        }
        trace!(%ns, %name, ?finalizers, "store: patch finalizers");
        Ok(self
            .api::<MsSql>(ns)
            .patch(name, &self.patch_params(), &Patch::Merge(&patch))
            .await?)
    }

    async fn patch_auth_secret_name(
        &self,
        ns: &str,
        name: &str,
        secret_name: &str,
        resource_version: Option<String>,
    ) -> Result<MsSql, Error> {
        let mut patch = json!({"spec": {"authSecret": {"name": secret_name}}});
        if let Some(rv) = resource_version {
            patch["metadata"] = json!({"resourceVersion": rv});
        }
        trace!(%ns, %name, %secret_name, "store: patch auth secret name");
        Ok(self
            .api::<MsSql>(ns)
            .patch(name, &self.patch_params(), &Patch::Merge(&patch))
            .await?)
    }

    async fn patch_database_status(
        &self,
        ns: &str,
        name: &str,
        status: MsSqlStatus,
    ) -> Result<(), Error> {
        let patch = json!({ "status": status });
        self.api::<MsSql>(ns)
            .patch_status(name, &self.patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_secret(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<Secret>, Error> {
        get_opt(&self.api::<Secret>(ns), name).await
    }

    async fn create_secret(&self, secret: Secret) -> Result<Secret, Error> {
        let ns = namespace_of(&secret)?;
        Ok(self
            .api::<Secret>(&ns)
            .create(&self.post_params(), &secret)
            .await?)
    }

    async fn get_service(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<Service>, Error> {
        get_opt(&self.api::<Service>(ns), name).await
    }

    async fn create_service(&self, svc: Service) -> Result<Service, Error> {
        let ns = namespace_of(&svc)?;
        Ok(self
            .api::<Service>(&ns)
            .create(&self.post_params(), &svc)
            .await?)
    }

    async fn replace_service(&self, svc: Service) -> Result<Service, Error> {
        let ns = namespace_of(&svc)?;
        Ok(self
            .api::<Service>(&ns)
            .replace(&svc.name_any(), &self.post_params(), &svc)
            .await?)
    }

    async fn get_stateful_set(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, Error> {
        get_opt(&self.api::<StatefulSet>(ns), name).await
    }

    async fn create_stateful_set(
        &self,
        sts: StatefulSet,
    ) -> Result<StatefulSet, Error> {
        let ns = namespace_of(&sts)?;
        Ok(self
            .api::<StatefulSet>(&ns)
            .create(&self.post_params(), &sts)
            .await?)
    }

    async fn replace_stateful_set(
        &self,
        sts: StatefulSet,
    ) -> Result<StatefulSet, Error> {
        let ns = namespace_of(&sts)?;
        Ok(self
            .api::<StatefulSet>(&ns)
            .replace(&sts.name_any(), &self.post_params(), &sts)
            .await?)
    }
}
