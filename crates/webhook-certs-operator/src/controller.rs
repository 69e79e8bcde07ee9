//! Webhook certificate controller implementation
//!
//! Each reconcile of a configured target runs one rotation pass over the
//! certificate secret and then makes sure the target trusts the current CA:
//!
//! 1. Resolve the webhook Service and the certificate Secret by label
//! 2. Point the target's client config at the Service
//! 3. Rotate the CA and/or leaf if they expire within the lookahead margin
//! 4. Save the secret (one replace with all four artifacts) if anything rotated
//! 5. Inject the CA bundle and replace the target if it changed
//! 6. Signal a restart if the rotation policy asks for one
//!
//! Targets of different kinds run in separate controllers, so two passes may
//! race on the secret. The secret replace is guarded by `resourceVersion`;
//! the losing pass fails with a conflict and is requeued, and its next pass
//! finds the winner's certificates valid.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use kube::api::DynamicObject;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use webhook_certs_pki::{RotationConfig, RotationEngine};

use crate::config::LabelSelector;
use crate::kube_client::KubeClient;
use crate::webhook::WebhookType;
use crate::Error;

/// Default interval between periodic rotation checks (12 hours)
pub const DEFAULT_REQUEUE_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

/// Requeue delay after a retryable failure
pub const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Controller context shared by all reconciles of one target kind
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Rotation engine
    pub engine: RotationEngine,
    /// Kind of target this controller manages
    pub webhook_type: WebhookType,
    /// Names of the managed targets of this kind
    pub targets: HashSet<String>,
    /// Selector for the Service fronting the webhook
    pub service_selector: LabelSelector,
    /// Selector for the certificate Secret
    pub secret_selector: LabelSelector,
    /// Interval between periodic rotation checks
    pub requeue_interval: Duration,
    /// Cancelled when a rotation requests a process restart
    pub restart: CancellationToken,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(kube: Arc<dyn KubeClient>, webhook_type: WebhookType) -> ContextBuilder {
        ContextBuilder::new(kube, webhook_type)
    }

    /// Whether `name` is one of the managed targets
    pub fn manages(&self, name: &str) -> bool {
        self.targets.contains(name)
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    kube: Arc<dyn KubeClient>,
    webhook_type: WebhookType,
    rotation: RotationConfig,
    targets: HashSet<String>,
    service_selector: LabelSelector,
    secret_selector: LabelSelector,
    requeue_interval: Duration,
    restart: CancellationToken,
}

impl ContextBuilder {
    fn new(kube: Arc<dyn KubeClient>, webhook_type: WebhookType) -> Self {
        Self {
            kube,
            webhook_type,
            rotation: RotationConfig::default(),
            targets: HashSet::new(),
            service_selector: LabelSelector::default(),
            secret_selector: LabelSelector::default(),
            requeue_interval: DEFAULT_REQUEUE_INTERVAL,
            restart: CancellationToken::new(),
        }
    }

    /// Set the rotation engine settings
    pub fn rotation(mut self, config: RotationConfig) -> Self {
        self.rotation = config;
        self
    }

    /// Set the managed target names
    pub fn targets<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the Service and Secret selectors
    pub fn selectors(mut self, service: LabelSelector, secret: LabelSelector) -> Self {
        self.service_selector = service;
        self.secret_selector = secret;
        self
    }

    /// Set the periodic rotation check interval
    pub fn requeue_interval(mut self, interval: Duration) -> Self {
        self.requeue_interval = interval;
        self
    }

    /// Set the token cancelled on restart requests
    pub fn restart_token(mut self, token: CancellationToken) -> Self {
        self.restart = token;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            kube: self.kube,
            engine: RotationEngine::new(self.rotation),
            webhook_type: self.webhook_type,
            targets: self.targets,
            service_selector: self.service_selector,
            secret_selector: self.secret_selector,
            requeue_interval: self.requeue_interval,
            restart: self.restart,
        }
    }
}

/// Reconcile a webhook target
///
/// Objects that are not configured targets are ignored.
#[instrument(skip(target, ctx), fields(kind = %ctx.webhook_type, name = %target.name_any()))]
pub async fn reconcile(target: Arc<DynamicObject>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = target.name_any();
    if !ctx.manages(&name) {
        return Ok(Action::await_change());
    }
    debug!("reconciling webhook target");

    let service = ctx.kube.find_service(&ctx.service_selector).await?;
    let stored = ctx.kube.find_secret(&ctx.secret_selector).await?;
    let hostname = service.hostname();

    let mut updated = (*target).clone();
    ctx.webhook_type.inject_service(&mut updated.data, &service)?;

    let outcome = ctx
        .engine
        .rotate(&stored.bundle, &hostname, OffsetDateTime::now_utc())?;

    if outcome.rotated() {
        ctx.kube.save_secret(&stored.secret, &outcome.bundle).await?;
        info!(rotation = %outcome.rotation, hostname = %hostname, "rotated webhook certificates");
    }

    ctx.webhook_type
        .inject_ca_bundle(&mut updated.data, &outcome.bundle.ca_cert)?;

    if updated.data != target.data {
        ctx.kube.replace_target(ctx.webhook_type, &updated).await?;
    } else {
        debug!("webhook client config already up to date");
    }

    if outcome.restart_requested {
        warn!("certificates were refreshed, requesting restart to load the new secret");
        ctx.restart.cancel();
    }

    Ok(Action::requeue(ctx.requeue_interval))
}

/// Error policy for the controller
///
/// Retryable failures are requeued after a short delay. Failures that need
/// a change to the target or configuration wait for the next watch event.
pub fn error_policy(target: Arc<DynamicObject>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        kind = %ctx.webhook_type,
        name = %target.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(ERROR_REQUEUE)
    } else {
        Action::await_change()
    }
}
