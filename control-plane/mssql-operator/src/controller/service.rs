//! Primary and governing services of a database instance.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::{debug, info, instrument};

use super::merge::{merge_service_ports, patch_service_ports};
use super::ownership::check_ownership;
use super::types::{ChildContext, Verb};
use crate::crd::{ServiceAlias, ServiceSpecOverlay};
use crate::error::Error;
use crate::store::ObjectStore;

fn mandatory_port(ctx: &ChildContext<'_>) -> ServicePort {
    ServicePort {
        name: Some(ctx.settings.port_name.clone()),
        port: ctx.settings.port,
        protocol: Some("TCP".into()),
        target_port: Some(IntOrString::String(ctx.settings.port_name.clone())),
        ..Default::default()
    }
}

/// Build the client-facing service. With more than one replica only the pod
/// holding the primary role is selected.
pub fn build_primary_service(
    ctx: &ChildContext<'_>,
    existing: Option<Service>,
) -> Service {
    let existing = existing.unwrap_or_default();
    let template = ctx.db.service_template(ServiceAlias::Primary);
    let metadata = ctx.child_meta(
        existing.metadata,
        ctx.db.primary_service_name(),
        template.map(|t| &t.metadata),
    );

    let mut selector = ctx.selectors();
    if ctx.db.replicas() > 1 {
        selector.insert(
            ctx.settings.labels.role.clone(),
            ctx.settings.role_primary.clone(),
        );
    }

    let mut spec = existing.spec.unwrap_or_default();
    spec.selector = Some(selector);
    let ports = merge_service_ports(
        spec.ports.take().unwrap_or_default(),
        vec![mandatory_port(ctx)],
    );
    spec.ports = Some(ports);
    if let Some(t) = template {
        apply_service_overlay(&mut spec, &t.spec, &ctx.settings.port_name);
    }

    Service {
        metadata,
        spec: Some(spec),
        status: existing.status,
    }
}

/// Build the headless service that gives every pod a stable DNS identity,
/// ready or not.
pub fn build_governing_service(
    ctx: &ChildContext<'_>,
    existing: Option<Service>,
) -> Service {
    let existing = existing.unwrap_or_default();
    let metadata = ctx.child_meta(
        existing.metadata,
        ctx.db.governing_service_name(),
        None,
    );
    let mut spec = existing.spec.unwrap_or_default();
    spec.selector = Some(ctx.selectors());
    spec.cluster_ip = Some("None".into());
    spec.type_ = Some("ClusterIP".into());
    spec.publish_not_ready_addresses = Some(true);
    spec.ports = Some(merge_service_ports(
        spec.ports.take().unwrap_or_default(),
        vec![mandatory_port(ctx)],
    ));
    Service {
        metadata,
        spec: Some(spec),
        status: existing.status,
    }
}

/// Layer a service template over `spec`. Only attributes the template names
/// are touched; the mandatory port can gain a node port and nothing else.
pub fn apply_service_overlay(
    spec: &mut ServiceSpec,
    overlay: &ServiceSpecOverlay,
    mandatory_port: &str,
) {
    if overlay.type_.is_some() {
        spec.type_ = overlay.type_.clone();
    }
    if overlay.cluster_ip.is_some() {
        spec.cluster_ip = overlay.cluster_ip.clone();
    }
    if overlay.external_ips.is_some() {
        spec.external_ips = overlay.external_ips.clone();
    }
    if overlay.load_balancer_ip.is_some() {
        spec.load_balancer_ip = overlay.load_balancer_ip.clone();
    }
    if overlay.load_balancer_source_ranges.is_some() {
        spec.load_balancer_source_ranges =
            overlay.load_balancer_source_ranges.clone();
    }
    if overlay.external_traffic_policy.is_some() {
        spec.external_traffic_policy = overlay.external_traffic_policy.clone();
    }
    if overlay.health_check_node_port.is_some() {
        spec.health_check_node_port = overlay.health_check_node_port;
    }
    if let Some(extra) = overlay.ports.as_deref() {
        let ports = spec.ports.take().unwrap_or_default();
        spec.ports = Some(patch_service_ports(ports, extra, mandatory_port));
    }
}

/// Create or update one service, guarded by the ownership fingerprint.
pub async fn upsert_service<S, F>(
    store: &S,
    ctx: &ChildContext<'_>,
    name: &str,
    build: F,
) -> Result<Verb, Error>
where
    S: ObjectStore + ?Sized,
    F: Fn(&ChildContext<'_>, Option<Service>) -> Service,
{
    match store.get_service(&ctx.namespace, name).await? {
        None => {
            store.create_service(build(ctx, None)).await?;
            Ok(Verb::Created)
        }
        Some(existing) => {
            check_ownership(&existing, &ctx.fingerprint, &ctx.settings.labels)?;
            let desired = build(ctx, Some(existing.clone()));
            if desired == existing {
                return Ok(Verb::Unchanged);
            }
            store.replace_service(desired).await?;
            Ok(Verb::Updated)
        }
    }
}

/// Converge the primary service, then the governing service.
#[instrument(skip_all, fields(ns = %ctx.namespace, name = %ctx.db.primary_service_name()))]
pub async fn ensure_network<S: ObjectStore + ?Sized>(
    store: &S,
    ctx: &ChildContext<'_>,
) -> Result<(), Error> {
    let primary = ctx.db.primary_service_name();
    let verb =
        upsert_service(store, ctx, &primary, build_primary_service).await?;
    log_verb("Service", &primary, verb);

    let governing = ctx.db.governing_service_name();
    let verb =
        upsert_service(store, ctx, &governing, build_governing_service).await?;
    log_verb("Service", &governing, verb);
    Ok(())
}

pub(crate) fn log_verb(kind: &str, name: &str, verb: Verb) {
    match verb {
        Verb::Unchanged => debug!(%kind, %name, "unchanged"),
        _ => info!(%kind, %name, %verb, "child object written"),
    }
}
