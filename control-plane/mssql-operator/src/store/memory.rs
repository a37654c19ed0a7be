//! In-memory [`ObjectStore`] for tests.
//!
//! Mirrors the API server behaviour the reconciler relies on: version tokens
//! on every write, conflicts on stale writes or duplicate creates, and
//! removal of a resource once it is deleting and its last finalizer is gone.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::{Resource, ResourceExt};

use super::ObjectStore;
use crate::crd::{MsSql, MsSqlStatus, SecretReference};
use crate::error::Error;

type Key = (String, String);

#[derive(Default)]
struct State {
    version: u64,
    databases: BTreeMap<Key, MsSql>,
    secrets: BTreeMap<Key, Secret>,
    services: BTreeMap<Key, Service>,
    stateful_sets: BTreeMap<Key, StatefulSet>,
    writes: Vec<String>,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn key(ns: &str, name: &str) -> Key {
    (ns.to_string(), name.to_string())
}

fn key_of<K: Resource>(obj: &K) -> Key {
    (
        obj.meta().namespace.clone().unwrap_or_default(),
        obj.meta().name.clone().unwrap_or_default(),
    )
}

fn create_in<K: Resource + Clone>(
    map: &mut BTreeMap<Key, K>,
    mut obj: K,
    version: String,
) -> Result<K, Error> {
    let k = key_of(&obj);
    if map.contains_key(&k) {
        return Err(Error::conflict(format!(
            "{}/{} already exists",
            k.0, k.1
        )));
    }
    obj.meta_mut().resource_version = Some(version);
    map.insert(k, obj.clone());
    Ok(obj)
}

fn replace_in<K: Resource + Clone>(
    map: &mut BTreeMap<Key, K>,
    mut obj: K,
    version: String,
) -> Result<K, Error> {
    let k = key_of(&obj);
    let current = map
        .get(&k)
        .ok_or_else(|| Error::not_found(format!("{}/{}", k.0, k.1)))?;
    if current.meta().resource_version != obj.meta().resource_version {
        return Err(Error::conflict(format!(
            "{}/{} was modified concurrently",
            k.0, k.1
        )));
    }
    obj.meta_mut().resource_version = Some(version);
    map.insert(k, obj.clone());
    Ok(obj)
}

fn check_version(
    db: &MsSql,
    ns: &str,
    name: &str,
    resource_version: Option<&str>,
) -> Result<(), Error> {
    match resource_version {
        Some(rv) if db.meta().resource_version.as_deref() != Some(rv) => {
            Err(Error::conflict(format!(
                "MSSQL {ns}/{name} was modified concurrently"
            )))
        }
        _ => Ok(()),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn insert_database(&self, mut db: MsSql) {
        let mut s = self.lock();
        db.meta_mut().resource_version = Some(s.next_version());
        s.databases.insert(key_of(&db), db);
    }

    pub fn insert_secret(&self, mut secret: Secret) {
        let mut s = self.lock();
        secret.metadata.resource_version = Some(s.next_version());
        s.secrets.insert(key_of(&secret), secret);
    }

    pub fn insert_service(&self, mut svc: Service) {
        let mut s = self.lock();
        svc.metadata.resource_version = Some(s.next_version());
        s.services.insert(key_of(&svc), svc);
    }

    pub fn insert_stateful_set(&self, mut sts: StatefulSet) {
        let mut s = self.lock();
        sts.metadata.resource_version = Some(s.next_version());
        s.stateful_sets.insert(key_of(&sts), sts);
    }

    pub fn database(&self, ns: &str, name: &str) -> Option<MsSql> {
        self.lock().databases.get(&key(ns, name)).cloned()
    }

    pub fn secret(&self, ns: &str, name: &str) -> Option<Secret> {
        self.lock().secrets.get(&key(ns, name)).cloned()
    }

    pub fn service(&self, ns: &str, name: &str) -> Option<Service> {
        self.lock().services.get(&key(ns, name)).cloned()
    }

    pub fn stateful_set(&self, ns: &str, name: &str) -> Option<StatefulSet> {
        self.lock().stateful_sets.get(&key(ns, name)).cloned()
    }

    /// Every write performed so far, as `"<verb> <Kind> <ns>/<name>"`.
    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    fn record(s: &mut State, verb: &str, kind: &str, k: &Key) {
        s.writes.push(format!("{verb} {kind} {}/{}", k.0, k.1));
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_database(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<MsSql>, Error> {
        Ok(self.database(ns, name))
    }

    async fn patch_database_finalizers(
        &self,
        ns: &str,
        name: &str,
        finalizers: Vec<String>,
        resource_version: Option<String>,
    ) -> Result<MsSql, Error> {
        let mut s = self.lock();
        let k = key(ns, name);
        let mut db = s
            .databases
            .get(&k)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("MSSQL {ns}/{name}")))?;
        check_version(&db, ns, name, resource_version.as_deref())?;
        Self::record(&mut s, "patch-finalizers", "MSSQL", &k);
        db.metadata.finalizers = Some(finalizers);
        db.metadata.resource_version = Some(s.next_version());
        if db.is_marked_for_deletion() && db.finalizers().is_empty() {
            s.databases.remove(&k);
        } else {
            s.databases.insert(k, db.clone());
        }
        Ok(db)
    }

    async fn patch_auth_secret_name(
        &self,
        ns: &str,
        name: &str,
        secret_name: &str,
        resource_version: Option<String>,
    ) -> Result<MsSql, Error> {
        let mut s = self.lock();
        let k = key(ns, name);
        let mut db = s
            .databases
            .get(&k)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("MSSQL {ns}/{name}")))?;
        check_version(&db, ns, name, resource_version.as_deref())?;
        Self::record(&mut s, "patch-auth-secret", "MSSQL", &k);
        let reference =
            db.spec.auth_secret.get_or_insert_with(SecretReference::default);
        reference.name = Some(secret_name.to_string());
        db.metadata.resource_version = Some(s.next_version());
        // spec writes bump the generation
        db.metadata.generation = Some(db.metadata.generation.unwrap_or(0) + 1);
        s.databases.insert(k, db.clone());
        Ok(db)
    }

    async fn patch_database_status(
        &self,
        ns: &str,
        name: &str,
        status: MsSqlStatus,
    ) -> Result<(), Error> {
        let mut s = self.lock();
        let k = key(ns, name);
        let mut db = s
            .databases
            .get(&k)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("MSSQL {ns}/{name}")))?;
        Self::record(&mut s, "patch-status", "MSSQL", &k);
        db.status = Some(status);
        db.metadata.resource_version = Some(s.next_version());
        s.databases.insert(k, db);
        Ok(())
    }

    async fn get_secret(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<Secret>, Error> {
        Ok(self.secret(ns, name))
    }

    async fn create_secret(&self, secret: Secret) -> Result<Secret, Error> {
        let mut s = self.lock();
        let version = s.next_version();
        let k = key_of(&secret);
        let created = create_in(&mut s.secrets, secret, version)?;
        Self::record(&mut s, "create", "Secret", &k);
        Ok(created)
    }

    async fn get_service(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<Service>, Error> {
        Ok(self.service(ns, name))
    }

    async fn create_service(&self, svc: Service) -> Result<Service, Error> {
        let mut s = self.lock();
        let version = s.next_version();
        let k = key_of(&svc);
        let created = create_in(&mut s.services, svc, version)?;
        Self::record(&mut s, "create", "Service", &k);
        Ok(created)
    }

    async fn replace_service(&self, svc: Service) -> Result<Service, Error> {
        let mut s = self.lock();
        let version = s.next_version();
        let k = key_of(&svc);
        let replaced = replace_in(&mut s.services, svc, version)?;
        Self::record(&mut s, "replace", "Service", &k);
        Ok(replaced)
    }

    async fn get_stateful_set(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, Error> {
        Ok(self.stateful_set(ns, name))
    }

    async fn create_stateful_set(
        &self,
        sts: StatefulSet,
    ) -> Result<StatefulSet, Error> {
        let mut s = self.lock();
        let version = s.next_version();
        let k = key_of(&sts);
        let created = create_in(&mut s.stateful_sets, sts, version)?;
        Self::record(&mut s, "create", "StatefulSet", &k);
        Ok(created)
    }

    async fn replace_stateful_set(
        &self,
        sts: StatefulSet,
    ) -> Result<StatefulSet, Error> {
        let mut s = self.lock();
        let version = s.next_version();
        let k = key_of(&sts);
        let replaced = replace_in(&mut s.stateful_sets, sts, version)?;
        Self::record(&mut s, "replace", "StatefulSet", &k);
        Ok(replaced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn svc(name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("ns".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn stale_replace_is_a_conflict() {
        let store = MemoryStore::new();
        let created = store.create_service(svc("a")).await.unwrap();
        let mut first = created.clone();
        first.metadata.labels = Some(BTreeMap::from([("k".to_string(), "1".to_string())]));
        store.replace_service(first).await.unwrap();

        let mut stale = created;
        stale.metadata.labels = Some(BTreeMap::from([("k".to_string(), "2".to_string())]));
        let err = store.replace_service(stale).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(
            store.service("ns", "a").unwrap().metadata.labels.unwrap()["k"],
            "1"
        );
    }

    #[tokio::test]
    async fn stale_auth_secret_patch_is_a_conflict() {
        let store = MemoryStore::new();
        store.insert_database(crate::controller::test_support::database("sql1", "ns"));
        let read = store.database("ns", "sql1").unwrap();
        store
            .patch_database_finalizers("ns", "sql1", vec!["kubedb.com".into()], None)
            .await
            .unwrap();

        let err = store
            .patch_auth_secret_name("ns", "sql1", "sql1-auth", read.resource_version())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert!(store.database("ns", "sql1").unwrap().spec.auth_secret.is_none());
    }

    #[tokio::test]
    async fn duplicate_create_is_a_conflict() {
        let store = MemoryStore::new();
        store.create_service(svc("a")).await.unwrap();
        let err = store.create_service(svc("a")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(store.writes(), vec!["create Service ns/a".to_string()]);
    }
}
