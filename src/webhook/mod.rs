//! # Webhook
//!
//! Everything served on, or kept in sync for, the HTTPS admission endpoint:
//!
//! - `admission`: the pod mutation endpoint
//! - `defaulters`: annotation-gated pod mutation steps
//! - `registry`: image and trust bundle helpers used by the defaulters
//! - `certificate`: watches the serving certificate and reacts to rotation
//! - `ca_bundle`: keeps the webhook configuration's CA bundle current

pub mod admission;
pub mod ca_bundle;
pub mod certificate;
pub mod defaulters;
pub mod registry;

pub use admission::{admission_router, AdmissionError, PodMutator};
pub use ca_bundle::{CaBundleError, CaBundleUpdater, UpdateOutcome};
pub use certificate::{
    ensure_material, CertificateError, CertificatePaths, CertificateReloadHandler,
    CertificateWatcher,
};
pub use defaulters::{build_defaulters, Gate, PodDefaulter};
