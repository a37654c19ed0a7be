//! Merge helpers for layering user overlays onto mandatory fields.
//!
//! Precedence:
//! - environment, volumes and mounts: keyed by name, the user entry wins;
//! - service ports: keyed by name, the mandatory port keeps its number and
//!   target, existing-only ports survive, new ports are appended;
//! - owner references: keyed by uid.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::ServicePort;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

use crate::crd::ServicePortOverlay;

/// Upsert every item of `overrides` into `base` by key. An override replaces
/// the base entry with the same key in place; new keys are appended in order.
pub fn upsert_by_key<T, F>(
    mut base: Vec<T>,
    overrides: impl IntoIterator<Item = T>,
    key: F,
) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    for item in overrides {
        match base.iter().position(|b| key(b) == key(&item)) {
            Some(i) => base[i] = item,
            None => base.push(item),
        }
    }
    base
}

/// Drop entries whose key is in `owned` but not in `desired`. Entries with
/// other keys belong to someone else and are kept in place.
pub fn prune_stale<T, F>(
    items: &mut Vec<T>,
    owned: &BTreeSet<String>,
    desired: &BTreeSet<&str>,
    key: F,
) where
    F: Fn(&T) -> &str,
{
    items.retain(|item| {
        let k = key(item);
        !owned.contains(k) || desired.contains(k)
    });
}

/// Merge `desired` ports into `existing`.
///
/// Ports are matched by name. A matching existing port takes the desired
/// number, protocol and target; its node port is kept unless the desired
/// port names one. Ports only in `existing` are preserved, ports only in
/// `desired` are appended. Duplicate names in `existing` collapse to the
/// first occurrence.
pub fn merge_service_ports(
    existing: Vec<ServicePort>,
    desired: Vec<ServicePort>,
) -> Vec<ServicePort> {
    let mut out: Vec<ServicePort> = Vec::with_capacity(existing.len());
    for port in existing {
        if !out.iter().any(|p| p.name == port.name) {
            out.push(port);
        }
    }
    for want in desired {
        match out.iter_mut().find(|p| p.name == want.name) {
            Some(have) => {
                have.port = want.port;
                have.protocol = want.protocol;
                have.target_port = want.target_port;
                if want.node_port.is_some() {
                    have.node_port = want.node_port;
                }
                if want.app_protocol.is_some() {
                    have.app_protocol = want.app_protocol;
                }
            }
            None => out.push(want),
        }
    }
    out
}

/// Apply user port overlays on top of an already merged port list.
///
/// The port named `mandatory` may only receive a node port; any other
/// attribute the overlay names for it is ignored. Unknown names are appended
/// when they carry a port number.
pub fn patch_service_ports(
    mut ports: Vec<ServicePort>,
    overlays: &[ServicePortOverlay],
    mandatory: &str,
) -> Vec<ServicePort> {
    for o in overlays {
        match ports
            .iter_mut()
            .find(|p| p.name.as_deref() == Some(o.name.as_str()))
        {
            Some(p) if o.name == mandatory => {
                if o.node_port.is_some() {
                    p.node_port = o.node_port;
                }
            }
            Some(p) => {
                if let Some(port) = o.port {
                    p.port = port;
                }
                if o.target_port.is_some() {
                    p.target_port = o.target_port.clone();
                }
                if o.node_port.is_some() {
                    p.node_port = o.node_port;
                }
            }
            None => {
                if let Some(port) = o.port {
                    ports.push(ServicePort {
                        name: Some(o.name.clone()),
                        port,
                        protocol: Some("TCP".into()),
                        target_port: o.target_port.clone(),
                        node_port: o.node_port,
                        ..Default::default()
                    });
                }
            }
        }
    }
    ports
}

/// Ensure `owner` is present exactly once, keyed by uid.
pub fn upsert_owner_reference(
    refs: Option<Vec<OwnerReference>>,
    owner: &OwnerReference,
) -> Vec<OwnerReference> {
    upsert_by_key(refs.unwrap_or_default(), [owner.clone()], |r| {
        r.uid.as_str()
    })
}
