//! # rt-bootstrapper
//!
//! Kubernetes controller and pod admission webhook for the runtime bootstrapper.
//!
//! ## Overview
//!
//! 1. **Pull secret replication** - Mirrors the master image pull secret into every namespace
//! 2. **Periodic resync** - Re-marks every copy outdated on a fixed interval
//! 3. **Trust bundle updates** - Keeps the webhook configuration's CA bundle equal to the served CA
//! 4. **Pod defaulting** - Registry overrides, pull secrets, trust bundles and FIPS mode at admission
//!
//! Process-level knobs (ports, timeouts, log format) come from the environment,
//! see [`ControllerConfig`](rt_bootstrapper::config::ControllerConfig).

use anyhow::Result;
use clap::Parser;
use rt_bootstrapper::constants::{
    DEFAULT_CONFIG_FILE_PATH, DEFAULT_WEBHOOK_CERT_NAME, DEFAULT_WEBHOOK_KEY_NAME,
};
use rt_bootstrapper::runtime::{run, RuntimeOptions};
use rt_bootstrapper::webhook::CertificatePaths;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rt-bootstrapper", version, about)]
struct Args {
    /// Path to the bootstrapper JSON configuration
    #[arg(long, env = "RT_BOOTSTRAPPER_CONFIG", default_value = DEFAULT_CONFIG_FILE_PATH)]
    config: PathBuf,

    /// Directory holding the webhook serving certificate, its key and ca.crt
    #[arg(long, default_value = "/tmp/k8s-webhook-server/serving-certs")]
    webhook_cert_path: PathBuf,

    /// File name of the webhook serving certificate
    #[arg(long, default_value = DEFAULT_WEBHOOK_CERT_NAME)]
    webhook_cert_name: String,

    /// File name of the webhook serving key
    #[arg(long, default_value = DEFAULT_WEBHOOK_KEY_NAME)]
    webhook_cert_key: String,

    /// Mutating webhook configuration whose CA bundle is kept current
    #[arg(long)]
    webhook_name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    run(RuntimeOptions {
        config_path: args.config,
        certificates: CertificatePaths::new(args.webhook_cert_path)
            .with_names(args.webhook_cert_name, args.webhook_cert_key),
        webhook_configuration_name: args.webhook_name,
    })
    .await
}
