use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    ObjectMeta, OwnerReference,
};
use kube::ResourceExt;

use super::merge::upsert_owner_reference;
use super::ownership::Fingerprint;
use crate::config::ControllerSettings;
use crate::crd::{MsSql, ObjectMetaOverlay};
use crate::error::Error;

/// What an ensure step did to its child object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Created,
    Updated,
    Unchanged,
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verb::Created => write!(f, "created"),
            Verb::Updated => write!(f, "updated"),
            Verb::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Everything a child builder needs, resolved once per pass.
pub struct ChildContext<'a> {
    pub db: &'a MsSql,
    pub settings: &'a ControllerSettings,
    pub namespace: String,
    pub owner: OwnerReference,
    pub fingerprint: Fingerprint,
}

impl<'a> ChildContext<'a> {
    pub fn new(
        db: &'a MsSql,
        settings: &'a ControllerSettings,
    ) -> Result<Self, Error> {
        let namespace = db.namespace().ok_or_else(|| {
            Error::validation(format!("MSSQL {} has no namespace", db.name_any()))
        })?;
        Ok(Self {
            db,
            settings,
            namespace,
            owner: db.owner_reference()?,
            fingerprint: Fingerprint::expected(db, settings),
        })
    }

    /// Child metadata layered over `existing`: foreign labels and
    /// annotations survive, ours are upserted, the owner is referenced once.
    pub fn child_meta(
        &self,
        existing: ObjectMeta,
        name: String,
        overlay: Option<&ObjectMetaOverlay>,
    ) -> ObjectMeta {
        let extra = overlay.and_then(|o| o.labels.as_ref());
        let mut labels = existing.labels.clone().unwrap_or_default();
        labels.extend(self.db.offshoot_labels(self.settings, extra));

        let annotations = match overlay.and_then(|o| o.annotations.as_ref()) {
            Some(a) => {
                let mut merged = existing.annotations.clone().unwrap_or_default();
                merged.extend(a.clone());
                Some(merged)
            }
            None => existing.annotations.clone(),
        };

        ObjectMeta {
            name: Some(name),
            namespace: Some(self.namespace.clone()),
            labels: Some(labels),
            annotations,
            owner_references: Some(upsert_owner_reference(
                existing.owner_references.clone(),
                &self.owner,
            )),
            ..existing
        }
    }

    pub fn selectors(&self) -> BTreeMap<String, String> {
        self.db.offshoot_selectors(self.settings)
    }
}
