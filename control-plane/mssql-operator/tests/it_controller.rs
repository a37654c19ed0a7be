// Integration tests require a running Kubernetes cluster with the MSSQL CRD
// applied (`cargo run --bin crdgen | kubectl apply -f -`). Ignored by default.

use k8s_openapi::api::{
    apps::v1::StatefulSet,
    core::v1::{Secret, Service},
};
use kube::{
    Client,
    api::{Api, DeleteParams, PostParams},
};
use mssql_operator::crd::MsSql;
mod common;
use common::{ControllerGuard, durable_spec, test_config, uniq, wait_for};

#[test_log::test(tokio::test)]
#[ignore]
async fn controller_provisions_services_secret_and_stateful_set() {
    let client = Client::try_default().await.expect("kube client");
    let ns = "default";
    let name = uniq("mssql-it");
    let guard = ControllerGuard::new(ns, &name, client.clone());

    let api: Api<MsSql> = Api::namespaced(client.clone(), ns);
    let db = MsSql::new(&name, durable_spec("2022-latest"));
    api.create(&PostParams::default(), &db)
        .await
        .expect("create MSSQL");

    let client_for_ctrl = client.clone();
    let cfg = test_config(ns);
    let ctrl = tokio::spawn(async move {
        let _ = mssql_operator::controller::run_controller(client_for_ctrl, cfg)
            .await;
    });
    let _guard = guard.with_controller(ctrl);

    let secrets: Api<Secret> = Api::namespaced(client.clone(), ns);
    let services: Api<Service> = Api::namespaced(client.clone(), ns);
    let stateful_sets: Api<StatefulSet> = Api::namespaced(client.clone(), ns);

    let secret_name = format!("{name}-auth");
    let secret = wait_for("auth secret", 30, || {
        let (api, n) = (secrets.clone(), secret_name.clone());
        async move { api.get_opt(&n).await.ok().flatten() }
    })
    .await;
    let data = secret.data.expect("secret data");
    assert_eq!(data["username"].0, b"sa".to_vec());
    assert_eq!(data["password"].0.len(), 16);

    let primary = wait_for("primary service", 30, || {
        let (api, n) = (services.clone(), name.clone());
        async move { api.get_opt(&n).await.ok().flatten() }
    })
    .await;
    let port = &primary.spec.unwrap().ports.unwrap()[0];
    assert_eq!((port.name.as_deref(), port.port), (Some("db"), 1433));

    let governing_name = format!("{name}-pods");
    let governing = wait_for("governing service", 30, || {
        let (api, n) = (services.clone(), governing_name.clone());
        async move { api.get_opt(&n).await.ok().flatten() }
    })
    .await;
    assert_eq!(governing.spec.unwrap().cluster_ip.as_deref(), Some("None"));

    let sts = wait_for("stateful set", 30, || {
        let (api, n) = (stateful_sets.clone(), name.clone());
        async move { api.get_opt(&n).await.ok().flatten() }
    })
    .await;
    assert_eq!(sts.spec.unwrap().replicas, Some(1));

    let db = wait_for("auth secret write-back", 30, || {
        let (api, n) = (api.clone(), name.clone());
        async move {
            api.get_opt(&n)
                .await
                .ok()
                .flatten()
                .filter(|db| db.spec.auth_secret.is_some())
        }
    })
    .await;
    assert_eq!(db.auth_secret_name(), secret_name);
}

#[test_log::test(tokio::test)]
#[ignore]
async fn controller_releases_finalizer_on_delete() {
    let client = Client::try_default().await.expect("kube client");
    let ns = "default";
    let name = uniq("mssql-it-del");
    let guard = ControllerGuard::new(ns, &name, client.clone());

    let api: Api<MsSql> = Api::namespaced(client.clone(), ns);
    let db = MsSql::new(&name, durable_spec("2022-latest"));
    api.create(&PostParams::default(), &db)
        .await
        .expect("create MSSQL");

    let client_for_ctrl = client.clone();
    let cfg = test_config(ns);
    let ctrl = tokio::spawn(async move {
        let _ = mssql_operator::controller::run_controller(client_for_ctrl, cfg)
            .await;
    });
    let _guard = guard.with_controller(ctrl);

    wait_for("finalizer", 30, || {
        let (api, n) = (api.clone(), name.clone());
        async move {
            api.get_opt(&n)
                .await
                .ok()
                .flatten()
                .filter(|db| db.has_finalizer("kubedb.com"))
        }
    })
    .await;

    api.delete(&name, &DeleteParams::default())
        .await
        .expect("delete MSSQL");
    wait_for("removal", 30, || {
        let (api, n) = (api.clone(), name.clone());
        async move {
            match api.get_opt(&n).await {
                Ok(None) => Some(()),
                _ => None,
            }
        }
    })
    .await;
}
