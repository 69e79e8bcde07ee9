//! Kubernetes access for the certificate controller
//!
//! Everything the reconciler needs from the API server goes through the
//! [`KubeClient`] trait so the reconcile flow can be tested with mocks.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::ByteString;
use kube::api::{Api, DynamicObject, ListParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info};
use webhook_certs_pki::ArtifactBundle;

#[cfg(test)]
use mockall::automock;

use crate::config::LabelSelector;
use crate::webhook::{ServiceRef, WebhookType};
use crate::Error;

/// The certificate secret together with the artifact bundle it holds
#[derive(Debug, Clone)]
pub struct StoredSecret {
    /// Secret as read, including its `resourceVersion`
    pub secret: Secret,
    /// Snapshot of the four artifact blobs; missing keys are empty
    pub bundle: ArtifactBundle,
}

impl StoredSecret {
    /// Wrap a secret read from the API server
    pub fn from_secret(secret: Secret) -> Self {
        let bundle = bundle_from_secret(&secret);
        Self { secret, bundle }
    }
}

/// Trait abstracting Kubernetes client operations for certificate rotation
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Find the single Service matching `selector` across all namespaces
    ///
    /// Fails with `Error::Selector` unless exactly one Service matches.
    async fn find_service(&self, selector: &LabelSelector) -> Result<ServiceRef, Error>;

    /// Find the single Secret matching `selector` across all namespaces
    ///
    /// Fails with `Error::Selector` unless exactly one Secret matches.
    async fn find_secret(&self, selector: &LabelSelector) -> Result<StoredSecret, Error>;

    /// Write all four artifacts into `secret` in a single replace
    ///
    /// The replace carries the secret's `resourceVersion`, so a concurrent
    /// writer makes this fail with a conflict instead of being overwritten.
    async fn save_secret(&self, secret: &Secret, bundle: &ArtifactBundle) -> Result<(), Error>;

    /// Replace a webhook target with its patched form
    async fn replace_target(
        &self,
        webhook_type: WebhookType,
        object: &DynamicObject,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn find_service(&self, selector: &LabelSelector) -> Result<ServiceRef, Error> {
        let api: Api<Service> = Api::all(self.client.clone());
        let services = api
            .list(&ListParams::default().labels(&selector.to_string()))
            .await?;
        let service = exactly_one(services.items, "services", selector)?;

        let namespace = service
            .namespace()
            .ok_or_else(|| Error::validation("matched service has no namespace"))?;
        let service = ServiceRef::new(service.name_any(), namespace);
        debug!(service = %service.name, namespace = %service.namespace, "found webhook service");
        Ok(service)
    }

    async fn find_secret(&self, selector: &LabelSelector) -> Result<StoredSecret, Error> {
        let api: Api<Secret> = Api::all(self.client.clone());
        let secrets = api
            .list(&ListParams::default().labels(&selector.to_string()))
            .await?;
        let secret = exactly_one(secrets.items, "secrets", selector)?;
        debug!(
            secret = %secret.name_any(),
            namespace = ?secret.namespace(),
            "found certificate secret"
        );
        Ok(StoredSecret::from_secret(secret))
    }

    async fn save_secret(&self, secret: &Secret, bundle: &ArtifactBundle) -> Result<(), Error> {
        let name = secret.name_any();
        let namespace = secret
            .namespace()
            .ok_or_else(|| Error::validation(format!("secret {} has no namespace", name)))?;

        let mut updated = secret.clone();
        write_bundle(&mut updated, bundle);

        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        api.replace(&name, &PostParams::default(), &updated).await?;

        info!(secret = %name, namespace = %namespace, "saved certificate artifacts");
        Ok(())
    }

    async fn replace_target(
        &self,
        webhook_type: WebhookType,
        object: &DynamicObject,
    ) -> Result<(), Error> {
        let ar = webhook_type.api_resource();
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        let name = object.name_any();
        api.replace(&name, &PostParams::default(), object).await?;

        info!(kind = %webhook_type, name = %name, "updated webhook client config");
        Ok(())
    }
}

/// Read the artifact bundle out of a secret's data
pub fn bundle_from_secret(secret: &Secret) -> ArtifactBundle {
    match &secret.data {
        Some(data) => ArtifactBundle::from_named(
            data.iter()
                .map(|(name, value)| (name.as_str(), value.0.as_slice())),
        ),
        None => ArtifactBundle::default(),
    }
}

/// Store all four artifacts in a secret's data, keeping unrelated keys
pub fn write_bundle(secret: &mut Secret, bundle: &ArtifactBundle) {
    let data = secret.data.get_or_insert_with(BTreeMap::new);
    for (name, value) in bundle.iter() {
        data.insert(name.to_string(), ByteString(value.to_vec()));
    }
    // stringData would override data on write
    if let Some(string_data) = secret.string_data.as_mut() {
        for (name, _) in bundle.iter() {
            string_data.remove(name);
        }
    }
}

fn exactly_one<T>(mut items: Vec<T>, what: &str, selector: &LabelSelector) -> Result<T, Error> {
    if items.len() != 1 {
        return Err(Error::selector(format!(
            "{} {} match labels {}, expected exactly 1",
            items.len(),
            what,
            selector
        )));
    }
    items
        .pop()
        .ok_or_else(|| Error::selector(format!("no {} match labels {}", what, selector)))
}
