//! Credential secret provisioning.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use rand::Rng;
use rand::distr::Alphanumeric;
use rand::seq::SliceRandom;
use tracing::{debug, info, instrument};

use super::ownership::check_ownership;
use super::types::ChildContext;
use crate::crd::MsSql;
use crate::error::Error;
use crate::store::ObjectStore;

pub const USERNAME_KEY: &str = "username";
pub const PASSWORD_KEY: &str = "password";

/// Generate an alphanumeric password of `length` characters from the thread
/// CSPRNG. Lengths of three or more always mix upper case, lower case and
/// digits.
pub fn generate_password(length: usize) -> String {
    let mut rng = rand::rng();
    let mut chars: Vec<char> = Vec::with_capacity(length);
    for range in [b'A'..=b'Z', b'a'..=b'z', b'0'..=b'9'] {
        if chars.len() < length {
            chars.push(rng.random_range(range) as char);
        }
    }
    while chars.len() < length {
        chars.push(rng.sample(Alphanumeric) as char);
    }
    chars.shuffle(&mut rng);
    chars.into_iter().collect()
}

pub fn build_auth_secret(
    ctx: &ChildContext<'_>,
    name: &str,
    password: &str,
) -> Secret {
    Secret {
        metadata: ctx.child_meta(ObjectMeta::default(), name.to_string(), None),
        type_: Some("kubernetes.io/basic-auth".into()),
        data: Some(BTreeMap::from([
            (
                USERNAME_KEY.to_string(),
                ByteString(ctx.settings.username.clone().into_bytes()),
            ),
            (
                PASSWORD_KEY.to_string(),
                ByteString(password.as_bytes().to_vec()),
            ),
        ])),
        ..Default::default()
    }
}

/// Fail with [`Error::Validation`] naming the first required key the secret
/// lacks.
pub fn validate_auth_secret(secret: &Secret) -> Result<(), Error> {
    for key in [USERNAME_KEY, PASSWORD_KEY] {
        if !secret.data.as_ref().is_some_and(|d| d.contains_key(key)) {
            return Err(Error::validation(format!(
                "Secret \"{}/{}\" is missing required key \"{}\"",
                secret.namespace().unwrap_or_default(),
                secret.name_any(),
                key
            )));
        }
    }
    Ok(())
}

/// Secret backing the database, and the resource as returned by the name
/// write-back when one happened.
#[derive(Debug)]
pub struct Credentials {
    pub secret_name: String,
    pub recorded: Option<MsSql>,
}

/// Make sure exactly one valid credential secret backs the database.
///
/// Externally managed secrets are only read. Otherwise the secret is created
/// on first sight, validated afterwards and never regenerated; the resolved
/// name is written back onto the resource when it is not recorded yet.
#[instrument(skip_all, fields(ns = %ctx.namespace, name = %ctx.db.name_any()))]
pub async fn ensure_credentials<S: ObjectStore + ?Sized>(
    store: &S,
    ctx: &ChildContext<'_>,
) -> Result<Credentials, Error> {
    let reference = ctx.db.spec.auth_secret.as_ref();
    if reference.is_some_and(|r| r.externally_managed) {
        let name = reference
            .and_then(|r| r.name.as_deref())
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                Error::validation(format!(
                    "MSSQL \"{}/{}\": authSecret.name is required when externallyManaged is set",
                    ctx.namespace,
                    ctx.db.name_any()
                ))
            })?;
        let secret = store
            .get_secret(&ctx.namespace, name)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("Secret \"{}/{}\"", ctx.namespace, name))
            })?;
        validate_auth_secret(&secret)?;
        debug!(secret = %name, "using externally managed secret");
        return Ok(Credentials {
            secret_name: name.to_string(),
            recorded: None,
        });
    }

    let name = ctx.db.auth_secret_name();
    match store.get_secret(&ctx.namespace, &name).await? {
        None => {
            let password = generate_password(ctx.settings.password_length);
            store
                .create_secret(build_auth_secret(ctx, &name, &password))
                .await?;
            info!(secret = %name, "auth secret created");
        }
        Some(existing) => {
            check_ownership(&existing, &ctx.fingerprint, &ctx.settings.labels)?;
            validate_auth_secret(&existing)?;
        }
    }

    let mut recorded = None;
    if reference.and_then(|r| r.name.as_deref()) != Some(name.as_str()) {
        let db = store
            .patch_auth_secret_name(
                &ctx.namespace,
                &ctx.db.name_any(),
                &name,
                ctx.db.resource_version(),
            )
            .await?;
        info!(secret = %name, "auth secret name recorded");
        recorded = Some(db);
    }
    Ok(Credentials {
        secret_name: name,
        recorded,
    })
}
