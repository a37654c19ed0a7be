use kube::ResourceExt;
use tracing::{info, instrument};

use crate::crd::MsSql;
use crate::error::Error;
use crate::store::ObjectStore;

/// Add `token` to the resource's finalizers if missing.
///
/// Returns the resource as the store now has it; no write happens when the
/// token is already present.
#[instrument(skip_all, fields(ns = %ns, name = %db.name_any()))]
pub async fn ensure_finalizer<S: ObjectStore + ?Sized>(
    store: &S,
    ns: &str,
    db: &MsSql,
    token: &str,
) -> Result<MsSql, Error> {
    if db.has_finalizer(token) {
        return Ok(db.clone());
    }
    let mut finalizers = db.finalizers().to_vec();
    finalizers.push(token.to_string());
    let updated = store
        .patch_database_finalizers(
            ns,
            &db.name_any(),
            finalizers,
            db.resource_version(),
        )
        .await?;
    info!(finalizer = %token, "finalizer added");
    Ok(updated)
}

/// Drop `token` from the resource's finalizers. Returns whether a write
/// happened.
#[instrument(skip_all, fields(ns = %ns, name = %db.name_any()))]
pub async fn remove_finalizer<S: ObjectStore + ?Sized>(
    store: &S,
    ns: &str,
    db: &MsSql,
    token: &str,
) -> Result<bool, Error> {
    if !db.has_finalizer(token) {
        return Ok(false);
    }
    let remaining: Vec<String> = db
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != token)
        .cloned()
        .collect();
    store
        .patch_database_finalizers(
            ns,
            &db.name_any(),
            remaining,
            db.resource_version(),
        )
        .await?;
    info!(finalizer = %token, "finalizer removed");
    Ok(true)
}
