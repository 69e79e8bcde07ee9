//! Webhook targets and the resource patcher
//!
//! A target is a cluster-scoped resource that carries a webhook client
//! configuration: a CRD with a conversion webhook, a validating or mutating
//! webhook configuration, or an aggregated APIService. Patching works on the
//! resource's JSON body (everything except `metadata`), so one code path
//! serves all four kinds.

use base64::{engine::general_purpose::STANDARD, Engine};
use kube::discovery::ApiResource;
use serde_json::{Map, Value};

use crate::Error;

const CRD_CLIENT_CONFIG: [&str; 4] = ["spec", "conversion", "webhook", "clientConfig"];

/// Kind of resource whose webhook client config is managed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebhookType {
    /// `ValidatingWebhookConfiguration`
    Validating,
    /// `MutatingWebhookConfiguration`
    Mutating,
    /// `CustomResourceDefinition` with a conversion webhook
    CrdConversion,
    /// Aggregated `APIService`
    ApiService,
}

impl WebhookType {
    /// Every webhook type
    pub const ALL: [WebhookType; 4] = [
        WebhookType::Validating,
        WebhookType::Mutating,
        WebhookType::CrdConversion,
        WebhookType::ApiService,
    ];

    /// Kubernetes kind of the target resource
    pub fn kind(self) -> &'static str {
        match self {
            Self::Validating => "ValidatingWebhookConfiguration",
            Self::Mutating => "MutatingWebhookConfiguration",
            Self::CrdConversion => "CustomResourceDefinition",
            Self::ApiService => "APIService",
        }
    }

    /// API resource for dynamic access to the target kind
    pub fn api_resource(self) -> ApiResource {
        let (group, version, plural) = match self {
            Self::Validating => (
                "admissionregistration.k8s.io",
                "v1",
                "validatingwebhookconfigurations",
            ),
            Self::Mutating => (
                "admissionregistration.k8s.io",
                "v1",
                "mutatingwebhookconfigurations",
            ),
            Self::CrdConversion => ("apiextensions.k8s.io", "v1", "customresourcedefinitions"),
            Self::ApiService => ("apiregistration.k8s.io", "v1", "apiservices"),
        };
        ApiResource {
            group: group.to_string(),
            version: version.to_string(),
            api_version: format!("{}/{}", group, version),
            kind: self.kind().to_string(),
            plural: plural.to_string(),
        }
    }

    /// Point the target's client config at `service`
    ///
    /// Admission webhooks that call a URL instead of a service are left alone.
    pub fn inject_service(self, body: &mut Value, service: &ServiceRef) -> Result<(), Error> {
        match self {
            Self::CrdConversion => {
                let client_config = self.required(body, &CRD_CLIENT_CONFIG)?;
                set_service(client_config, service);
            }
            Self::Validating | Self::Mutating => {
                for client_config in self.webhook_client_configs(body)? {
                    if !client_config.contains_key("url") {
                        set_service(client_config, service);
                    }
                }
            }
            Self::ApiService => {
                let spec = self.required(body, &["spec"])?;
                set_service(spec, service);
            }
        }
        Ok(())
    }

    /// Publish `ca_pem` (base64-encoded) as the target's trust bundle
    ///
    /// Admission webhooks that call a URL keep their own bundle.
    pub fn inject_ca_bundle(self, body: &mut Value, ca_pem: &[u8]) -> Result<(), Error> {
        let bundle = Value::String(STANDARD.encode(ca_pem));
        match self {
            Self::CrdConversion => {
                self.required(body, &CRD_CLIENT_CONFIG)?
                    .insert("caBundle".to_string(), bundle);
            }
            Self::Validating | Self::Mutating => {
                for client_config in self.webhook_client_configs(body)? {
                    if !client_config.contains_key("url") {
                        client_config.insert("caBundle".to_string(), bundle.clone());
                    }
                }
            }
            Self::ApiService => {
                self.required(body, &["spec"])?
                    .insert("caBundle".to_string(), bundle);
            }
        }
        Ok(())
    }

    fn required<'a>(
        self,
        body: &'a mut Value,
        path: &[&str],
    ) -> Result<&'a mut Map<String, Value>, Error> {
        nested_object_mut(body, path)
            .ok_or_else(|| Error::field_not_found(self.kind(), path.join(".")))
    }

    /// Client configs of every entry in `webhooks`, failing on the first entry without one
    fn webhook_client_configs(
        self,
        body: &mut Value,
    ) -> Result<Vec<&mut Map<String, Value>>, Error> {
        let webhooks = body
            .get_mut("webhooks")
            .and_then(Value::as_array_mut)
            .ok_or_else(|| Error::field_not_found(self.kind(), "webhooks"))?;
        webhooks
            .iter_mut()
            .enumerate()
            .map(|(i, webhook)| {
                webhook
                    .get_mut("clientConfig")
                    .and_then(Value::as_object_mut)
                    .ok_or_else(|| {
                        Error::field_not_found(self.kind(), format!("webhooks[{}].clientConfig", i))
                    })
            })
            .collect()
    }
}

impl std::fmt::Display for WebhookType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

/// A named target resource and its type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WebhookInfo {
    /// Resource name (the CRD name for conversion webhooks)
    pub name: String,
    /// Resource type
    pub webhook_type: WebhookType,
}

impl WebhookInfo {
    /// Create target info
    pub fn new(name: impl Into<String>, webhook_type: WebhookType) -> Self {
        Self {
            name: name.into(),
            webhook_type,
        }
    }
}

/// The Service that fronts the webhook server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRef {
    /// Service name
    pub name: String,
    /// Service namespace
    pub namespace: String,
}

impl ServiceRef {
    /// Create a service reference
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// In-cluster DNS name the leaf certificate is issued for
    pub fn hostname(&self) -> String {
        format!("{}.{}.svc", self.name, self.namespace)
    }
}

fn nested_object_mut<'a>(
    value: &'a mut Value,
    path: &[&str],
) -> Option<&'a mut Map<String, Value>> {
    path.iter()
        .try_fold(value, |current, key| current.get_mut(*key))
        .and_then(Value::as_object_mut)
}

fn set_service(parent: &mut Map<String, Value>, service: &ServiceRef) {
    let entry = parent
        .entry("service")
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Some(obj) = entry.as_object_mut() {
        obj.insert("name".to_string(), Value::String(service.name.clone()));
        obj.insert(
            "namespace".to_string(),
            Value::String(service.namespace.clone()),
        );
    }
}
