//! Command-line and environment configuration

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use webhook_certs_pki::{KeyAlgorithm, RestartPolicy, RotationConfig};

use crate::webhook::{WebhookInfo, WebhookType};
use crate::Error;

/// Default directory the serving certificate secret is mounted at
pub const DEFAULT_CERT_DIR: &str = "/tmp/k8s-webhook-server/serving-certs";

/// Longest accepted certificate validity (100 years)
pub const MAX_VALIDITY_DAYS: i64 = 100 * 365;

/// Options shared by all modes
///
/// Every option is global so it may follow the subcommand.
#[derive(Args, Debug, Clone)]
pub struct ControllerArgs {
    /// Label selector for the Service fronting the webhook (`k=v,k2=v2`)
    #[arg(
        long,
        global = true,
        env = "WEBHOOK_CERTS_SERVICE_SELECTOR",
        value_parser = parse_selector
    )]
    pub service_selector: Option<LabelSelector>,

    /// Label selector for the Secret holding the certificates (`k=v,k2=v2`)
    #[arg(
        long,
        global = true,
        env = "WEBHOOK_CERTS_SECRET_SELECTOR",
        value_parser = parse_selector
    )]
    pub secret_selector: Option<LabelSelector>,

    /// CustomResourceDefinition whose conversion webhook is managed (repeatable)
    #[arg(
        long = "crd",
        global = true,
        env = "WEBHOOK_CERTS_CRDS",
        value_delimiter = ','
    )]
    pub crds: Vec<String>,

    /// ValidatingWebhookConfiguration to manage (repeatable)
    #[arg(
        long = "validating-webhook",
        global = true,
        env = "WEBHOOK_CERTS_VALIDATING_WEBHOOKS",
        value_delimiter = ','
    )]
    pub validating_webhooks: Vec<String>,

    /// MutatingWebhookConfiguration to manage (repeatable)
    #[arg(
        long = "mutating-webhook",
        global = true,
        env = "WEBHOOK_CERTS_MUTATING_WEBHOOKS",
        value_delimiter = ','
    )]
    pub mutating_webhooks: Vec<String>,

    /// APIService to manage (repeatable)
    #[arg(
        long = "api-service",
        global = true,
        env = "WEBHOOK_CERTS_API_SERVICES",
        value_delimiter = ','
    )]
    pub api_services: Vec<String>,

    /// Directory the certificate secret is mounted at
    #[arg(long, global = true, env = "WEBHOOK_CERTS_CERT_DIR", default_value = DEFAULT_CERT_DIR)]
    pub cert_dir: PathBuf,

    /// Common name of the generated CA
    #[arg(long, global = true, env = "WEBHOOK_CERTS_CA_NAME", default_value = "webhook-ca")]
    pub ca_name: String,

    /// Organization of the generated CA
    #[arg(long, global = true, env = "WEBHOOK_CERTS_CA_ORGANIZATION", default_value = "")]
    pub ca_organization: String,

    /// Exit after rotating certificates so the pod restarts with the new secret mounted
    #[arg(long, global = true, env = "WEBHOOK_CERTS_RESTART_ON_SECRET_REFRESH")]
    pub restart_on_secret_refresh: bool,

    /// Seconds between periodic rotation checks
    #[arg(
        long,
        global = true,
        env = "WEBHOOK_CERTS_ROTATION_CHECK_INTERVAL_SECS",
        default_value = "43200"
    )]
    pub rotation_check_interval_secs: u64,

    /// Rotate certificates this many days before they expire
    #[arg(long, global = true, env = "WEBHOOK_CERTS_LOOKAHEAD_DAYS", default_value = "90")]
    pub lookahead_days: i64,

    /// Validity of newly issued certificates in days
    #[arg(long, global = true, env = "WEBHOOK_CERTS_VALIDITY_DAYS", default_value = "3650")]
    pub validity_days: i64,

    /// Key algorithm for new certificates (`rsa2048` or `ecdsa-p256`)
    #[arg(long, global = true, env = "WEBHOOK_CERTS_KEY_ALGORITHM", default_value = "rsa2048")]
    pub key_algorithm: KeyAlgorithm,

    /// Do not check the CA certificate against its own name
    #[arg(long, global = true, env = "WEBHOOK_CERTS_SKIP_CA_HOSTNAME_CHECK")]
    pub skip_ca_hostname_check: bool,
}

impl ControllerArgs {
    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.service_selector.is_none() {
            return Err(Error::validation("--service-selector is required"));
        }
        if self.secret_selector.is_none() {
            return Err(Error::validation("--secret-selector is required"));
        }
        if self.targets().is_empty() {
            return Err(Error::validation(
                "at least one --crd, --validating-webhook, --mutating-webhook or --api-service is required",
            ));
        }
        self.validate_durations()
    }

    /// Reject inconsistent validity settings
    pub fn validate_durations(&self) -> Result<(), Error> {
        if self.rotation_check_interval_secs == 0 {
            return Err(Error::validation(
                "--rotation-check-interval-secs must be positive",
            ));
        }
        if self.lookahead_days < 0 {
            return Err(Error::validation("--lookahead-days must not be negative"));
        }
        if self.validity_days > MAX_VALIDITY_DAYS {
            return Err(Error::validation(format!(
                "--validity-days ({}) must not exceed {}",
                self.validity_days, MAX_VALIDITY_DAYS
            )));
        }
        if self.validity_days <= self.lookahead_days {
            return Err(Error::validation(format!(
                "--validity-days ({}) must exceed --lookahead-days ({})",
                self.validity_days, self.lookahead_days
            )));
        }
        Ok(())
    }

    /// Rotation engine settings
    pub fn rotation_config(&self) -> RotationConfig {
        RotationConfig {
            ca_name: self.ca_name.clone(),
            ca_organization: self.ca_organization.clone(),
            validity: time::Duration::days(self.validity_days),
            lookahead: time::Duration::days(self.lookahead_days),
            key_algorithm: self.key_algorithm,
            verify_ca_hostname: !self.skip_ca_hostname_check,
            restart_policy: if self.restart_on_secret_refresh {
                RestartPolicy::OnRotation
            } else {
                RestartPolicy::Never
            },
            ..RotationConfig::default()
        }
    }

    /// Every configured target
    pub fn targets(&self) -> Vec<WebhookInfo> {
        let groups = [
            (&self.crds, WebhookType::CrdConversion),
            (&self.validating_webhooks, WebhookType::Validating),
            (&self.mutating_webhooks, WebhookType::Mutating),
            (&self.api_services, WebhookType::ApiService),
        ];
        groups
            .into_iter()
            .flat_map(|(names, webhook_type)| {
                names
                    .iter()
                    .filter(|name| !name.is_empty())
                    .map(move |name| WebhookInfo::new(name.clone(), webhook_type))
            })
            .collect()
    }

    /// Interval between periodic rotation checks
    pub fn requeue_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_check_interval_secs)
    }
}

/// Equality-based label selector (`k=v,k2=v2`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    /// Selector matching the given labels
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self(labels)
    }

    /// Labels the selector requires
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl std::fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        f.write_str(&rendered.join(","))
    }
}

fn parse_selector(s: &str) -> Result<LabelSelector, String> {
    let mut labels = BTreeMap::new();
    for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("invalid label selector '{}', expected key=value", pair))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("invalid label selector '{}', empty key", pair));
        }
        labels.insert(key.to_string(), value.trim().to_string());
    }
    if labels.is_empty() {
        return Err("label selector must not be empty".to_string());
    }
    Ok(LabelSelector(labels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct Cli {
        #[command(flatten)]
        args: ControllerArgs,
    }

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["webhook-certs"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("arguments should parse")
    }

    fn minimal() -> Cli {
        parse(&[
            "--service-selector",
            "app=webhook",
            "--secret-selector",
            "app=webhook,role=certs",
            "--crd",
            "widgets.example.com",
        ])
    }

    #[test]
    fn test_parse_selector() {
        let selector = parse_selector("app=webhook, role = certs").expect("selector should parse");
        assert_eq!(selector.labels().get("app").map(String::as_str), Some("webhook"));
        assert_eq!(selector.labels().get("role").map(String::as_str), Some("certs"));
        assert_eq!(selector.to_string(), "app=webhook,role=certs");
    }

    #[test]
    fn test_parse_selector_invalid() {
        assert!(parse_selector("app").is_err());
        assert!(parse_selector("=webhook").is_err());
        assert!(parse_selector("").is_err());
    }

    /// Story: defaults check twice a day and rotate 90 days ahead
    #[test]
    fn story_defaults_check_twice_daily_with_90_day_lookahead() {
        let cli = minimal();
        assert_eq!(cli.args.cert_dir, PathBuf::from(DEFAULT_CERT_DIR));
        assert_eq!(cli.args.requeue_interval(), Duration::from_secs(12 * 60 * 60));

        let config = cli.args.rotation_config();
        assert_eq!(config.ca_name, "webhook-ca");
        assert_eq!(config.lookahead, time::Duration::days(90));
        assert_eq!(config.validity, time::Duration::days(3650));
        assert_eq!(config.key_algorithm, KeyAlgorithm::Rsa2048);
        assert!(config.verify_ca_hostname);
        assert_eq!(config.restart_policy, RestartPolicy::Never);
        cli.args.validate().expect("minimal config should be valid");
    }

    #[test]
    fn test_flags_map_to_rotation_config() {
        let cli = parse(&[
            "--restart-on-secret-refresh",
            "--skip-ca-hostname-check",
            "--key-algorithm",
            "ecdsa-p256",
            "--ca-name",
            "my-ca",
            "--ca-organization",
            "Example",
        ]);
        let config = cli.args.rotation_config();
        assert_eq!(config.restart_policy, RestartPolicy::OnRotation);
        assert!(!config.verify_ca_hostname);
        assert_eq!(config.key_algorithm, KeyAlgorithm::EcdsaP256);
        assert_eq!(config.ca_name, "my-ca");
        assert_eq!(config.ca_organization, "Example");
    }

    #[test]
    fn test_targets_cover_all_webhook_types() {
        let cli = parse(&[
            "--crd",
            "a.example.com,b.example.com",
            "--validating-webhook",
            "validator",
            "--mutating-webhook",
            "mutator",
            "--api-service",
            "v1beta1.metrics.example.com",
        ]);
        let targets = cli.args.targets();
        assert_eq!(targets.len(), 5);
        assert!(targets.contains(&WebhookInfo::new("b.example.com", WebhookType::CrdConversion)));
        assert!(targets.contains(&WebhookInfo::new("validator", WebhookType::Validating)));
        assert!(targets.contains(&WebhookInfo::new("mutator", WebhookType::Mutating)));
        assert!(targets.contains(&WebhookInfo::new(
            "v1beta1.metrics.example.com",
            WebhookType::ApiService
        )));
    }

    #[test]
    fn test_validate_requires_selectors_and_targets() {
        let cli = parse(&["--crd", "widgets.example.com"]);
        assert!(matches!(cli.args.validate(), Err(Error::Validation(_))));

        let cli = parse(&["--service-selector", "app=a", "--secret-selector", "app=b"]);
        assert!(matches!(cli.args.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_out_of_range_validity() {
        let cli = parse(&["--validity-days", "3000000", "--lookahead-days", "90"]);
        match cli.args.validate_durations() {
            Err(Error::Validation(msg)) => assert!(msg.contains("--validity-days")),
            other => panic!("expected Validation error, got {:?}", other),
        }

        let cli = parse(&["--validity-days", "36500", "--lookahead-days", "36499"]);
        cli.args
            .validate_durations()
            .expect("longest validity should be accepted");
    }

    #[test]
    fn test_validate_rejects_lookahead_past_validity() {
        let mut cli = minimal();
        cli.args.lookahead_days = 400;
        cli.args.validity_days = 365;
        assert!(matches!(cli.args.validate(), Err(Error::Validation(_))));
    }
}
