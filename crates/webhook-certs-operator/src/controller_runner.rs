//! Controller runner - builds one controller future per managed target kind
//!
//! Targets are watched as dynamic objects so validating, mutating,
//! CRD conversion and APIService targets share a single reconciler.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::api::DynamicObject;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;

use crate::config::ControllerArgs;
use crate::controller::{error_policy, reconcile, Context};
use crate::kube_client::KubeClient;
use crate::webhook::{WebhookInfo, WebhookType};
use crate::Error;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// A boxed controller future
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Group target names by kind, in [`WebhookType::ALL`] order
pub fn targets_by_type(targets: &[WebhookInfo]) -> Vec<(WebhookType, Vec<String>)> {
    WebhookType::ALL
        .into_iter()
        .filter_map(|webhook_type| {
            let names: Vec<String> = targets
                .iter()
                .filter(|t| t.webhook_type == webhook_type)
                .map(|t| t.name.clone())
                .collect();
            (!names.is_empty()).then_some((webhook_type, names))
        })
        .collect()
}

/// Watcher config for a set of target names
///
/// A single target is watched with a field selector on its name; several
/// targets of one kind are filtered in the reconciler.
pub fn watcher_config(names: &[String]) -> WatcherConfig {
    let config = WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);
    match names {
        [only] => config.fields(&format!("metadata.name={}", only)),
        _ => config,
    }
}

/// Build one controller per target kind
pub fn build_controllers(
    client: Client,
    kube: Arc<dyn KubeClient>,
    args: &ControllerArgs,
    restart: CancellationToken,
) -> Result<Vec<ControllerFuture>, Error> {
    let service_selector = args
        .service_selector
        .clone()
        .ok_or_else(|| Error::validation("--service-selector is required"))?;
    let secret_selector = args
        .secret_selector
        .clone()
        .ok_or_else(|| Error::validation("--secret-selector is required"))?;

    let mut controllers: Vec<ControllerFuture> = Vec::new();
    for (webhook_type, names) in targets_by_type(&args.targets()) {
        let ctx = Arc::new(
            Context::builder(kube.clone(), webhook_type)
                .rotation(args.rotation_config())
                .targets(names.iter().cloned())
                .selectors(service_selector.clone(), secret_selector.clone())
                .requeue_interval(args.requeue_interval())
                .restart_token(restart.clone())
                .build(),
        );

        let ar = webhook_type.api_resource();
        let api: Api<DynamicObject> = Api::all_with(client.clone(), &ar);

        tracing::info!(kind = %webhook_type, targets = ?names, "- {} controller", webhook_type);

        controllers.push(Box::pin(
            Controller::new_with(api, watcher_config(&names), ar)
                .shutdown_on_signal()
                .run(reconcile, error_policy, ctx)
                .for_each(log_reconcile_result(webhook_type.kind())),
        ));
    }

    Ok(controllers)
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets_grouped_by_kind() {
        let targets = vec![
            WebhookInfo::new("validator", WebhookType::Validating),
            WebhookInfo::new("a.example.com", WebhookType::CrdConversion),
            WebhookInfo::new("b.example.com", WebhookType::CrdConversion),
        ];
        let grouped = targets_by_type(&targets);
        assert_eq!(
            grouped,
            vec![
                (WebhookType::Validating, vec!["validator".to_string()]),
                (
                    WebhookType::CrdConversion,
                    vec!["a.example.com".to_string(), "b.example.com".to_string()]
                ),
            ]
        );
        assert!(targets_by_type(&[]).is_empty());
    }

    #[test]
    fn test_single_target_uses_field_selector() {
        let config = watcher_config(&["widgets.example.com".to_string()]);
        assert_eq!(
            config.field_selector.as_deref(),
            Some("metadata.name=widgets.example.com")
        );
        assert_eq!(config.timeout, Some(WATCH_TIMEOUT_SECS));

        let config = watcher_config(&["a".to_string(), "b".to_string()]);
        assert_eq!(config.field_selector, None);
    }
}
