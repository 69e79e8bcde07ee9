//! Kubernetes controller for webhook serving certificates
//!
//! Keeps the serving certificate of a webhook server valid and makes every
//! configured webhook target trust its CA. Certificate logic lives in
//! [`webhook_certs_pki`]; this crate supplies the Kubernetes side of it:
//!
//! - [`config`] - Command-line and environment configuration
//! - [`kube_client`] - Service/Secret lookup by label, secret and target writes
//! - [`webhook`] - Target kinds and the client-config patcher
//! - [`controller`] - Reconciliation and error policy
//! - [`controller_runner`] - Controller construction per target kind
//! - [`certs`] - Certificates mounted into the pod
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod certs;
pub mod config;
pub mod controller;
pub mod controller_runner;
pub mod error;
pub mod kube_client;
pub mod webhook;

pub use error::Error;
