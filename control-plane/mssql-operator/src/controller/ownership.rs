//! Ownership guard for child objects.
//!
//! A child object belongs to exactly one `MSSQL` instance. The claim lives in
//! three labels (logical name, instance, managed-by) and is checked before
//! every write to an object that already exists. The guard never adopts or
//! rewrites a foreign fingerprint.

use std::collections::BTreeMap;
use std::fmt;

use kube::{Resource, ResourceExt};

use crate::config::{ControllerSettings, LabelKeys};
use crate::crd::MsSql;
use crate::error::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fingerprint {
    pub name: Option<String>,
    pub instance: Option<String>,
    pub managed_by: Option<String>,
}

impl Fingerprint {
    pub fn expected(db: &MsSql, s: &ControllerSettings) -> Self {
        Self {
            name: Some(s.resource_fqn.clone()),
            instance: Some(db.name_any()),
            managed_by: Some(s.managed_by.clone()),
        }
    }

    pub fn from_labels(
        labels: &BTreeMap<String, String>,
        keys: &LabelKeys,
    ) -> Self {
        Self {
            name: labels.get(&keys.name).cloned(),
            instance: labels.get(&keys.instance).cloned(),
            managed_by: labels.get(&keys.managed_by).cloned(),
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({})",
            self.name.as_deref().unwrap_or("<none>"),
            self.instance.as_deref().unwrap_or("<none>"),
            self.managed_by.as_deref().unwrap_or("<none>")
        )
    }
}

/// Fail with [`Error::Conflict`] unless `existing` carries `expected`.
pub fn check_ownership<K>(
    existing: &K,
    expected: &Fingerprint,
    keys: &LabelKeys,
) -> Result<(), Error>
where
    K: Resource,
    <K as Resource>::DynamicType: Default,
{
    let found = Fingerprint::from_labels(existing.labels(), keys);
    if &found == expected {
        return Ok(());
    }
    Err(Error::conflict(format!(
        "{} \"{}/{}\" is associated with {} but expected to be associated with {}",
        K::kind(&Default::default()),
        existing.namespace().unwrap_or_default(),
        existing.name_any(),
        found,
        expected
    )))
}
