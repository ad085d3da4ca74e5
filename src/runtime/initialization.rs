//! # Initialization
//!
//! Process wiring: rustls setup, tracing, metrics, configuration, the
//! Kubernetes client, the watch loop, the certificate watcher and both HTTP
//! servers. [`run`] returns when a shutdown signal arrives or a component
//! fails fatally.

use crate::config::{BootstrapperConfig, ControllerConfig};
use crate::controller::{
    MasterSecretPredicate, MasterSecretRef, NamespaceCreatedPredicate, Reconciler,
    SecretReplicator,
};
use crate::observability;
use crate::runtime::error_policy::ErrorPolicy;
use crate::runtime::watch_loop::{namespace_events, secret_events, EventSource, WatchLoop};
use crate::server::{start_server, ServerState};
use crate::store::{ClusterStore, KubeStore};
use crate::webhook::{
    admission_router, build_defaulters, ensure_material, CaBundleUpdater, CertificatePaths,
    CertificateReloadHandler, CertificateWatcher, PodMutator,
};
use anyhow::{anyhow, Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use kube::Client;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, info_span, warn};

/// Grace period for in-flight admission requests on shutdown
const WEBHOOK_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Command line level options.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub config_path: PathBuf,
    pub certificates: CertificatePaths,
    /// Overrides `webhookConfigurationName` from the configuration file
    pub webhook_configuration_name: Option<String>,
}

fn init_tracing(config: &ControllerConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("rt_bootstrapper={}", config.log_level.to_lowercase()).into()
    });
    let result = if config.json_logs() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    result.map_err(|e| anyhow!("unable to initialize tracing: {e}"))
}

/// Resolves once `*rx` becomes true.
async fn shutdown_requested(mut rx: watch::Receiver<bool>) {
    // A dropped sender also means shutdown
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "unable to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Run the bootstrapper until shutdown.
pub async fn run(options: RuntimeOptions) -> Result<()> {
    // Must happen before any TLS use
    let provider_installed = rustls::crypto::ring::default_provider()
        .install_default()
        .is_ok();

    let controller_config = ControllerConfig::from_env();
    init_tracing(&controller_config)?;
    if !provider_installed {
        warn!("rustls crypto provider was already installed");
    }

    info!("Starting rt-bootstrapper");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let mut config = BootstrapperConfig::from_file(&options.config_path)
        .with_context(|| format!("unable to load {}", options.config_path.display()))?;
    if let Some(name) = options.webhook_configuration_name.clone() {
        config.webhook_configuration_name = name;
    }
    info!(
        secret = %format!("{}/{}", config.image_pull_secret_namespace, config.image_pull_secret_name),
        sync_interval = %config.secret_sync_interval,
        webhook_configuration = %config.webhook_configuration_name,
        "configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_state = Arc::new(ServerState::default());

    let metrics_task = tokio::spawn(start_server(
        controller_config.metrics_port,
        Arc::clone(&server_state),
        shutdown_requested(shutdown_rx.clone()),
    ));

    let client = Client::try_default()
        .await
        .context("unable to create Kubernetes client")?;
    let store: Arc<dyn ClusterStore> = Arc::new(KubeStore::new(
        client.clone(),
        controller_config.api_call_timeout(),
    ));

    // Secret replication
    let master = MasterSecretRef::new(
        &config.image_pull_secret_namespace,
        &config.image_pull_secret_name,
    );
    let replicator = SecretReplicator::new(
        info_span!("secret_replicator"),
        Arc::clone(&store),
        master.clone(),
        &config.field_manager,
    );
    let reconciler = Arc::new(Reconciler::new(
        info_span!("reconciler"),
        replicator,
        config.secret_sync_interval(),
    ));
    let sources = vec![
        EventSource::new(
            namespace_events(client.clone()),
            Arc::new(NamespaceCreatedPredicate::new(
                info_span!("namespace_predicate"),
                &master.namespace,
            )),
        ),
        EventSource::new(
            secret_events(client, &master),
            Arc::new(MasterSecretPredicate::new(
                info_span!("master_secret_predicate"),
                &master.name,
                &master.namespace,
            )),
        ),
    ];
    let watch_loop = WatchLoop::new(
        info_span!("watch_loop"),
        reconciler,
        ErrorPolicy::new(
            controller_config.backoff_start_duration(),
            controller_config.backoff_max_duration(),
        ),
        controller_config.max_concurrent_reconciliations,
    );
    let watch_shutdown = shutdown_requested(shutdown_rx.clone());
    let watch_task = tokio::spawn(async move { watch_loop.run(sources, watch_shutdown).await });

    // Admission webhook
    ensure_material(&options.certificates).with_context(|| {
        format!(
            "webhook certificate missing in {}",
            options.certificates.dir.display()
        )
    })?;
    let tls = RustlsConfig::from_pem_file(
        options.certificates.cert_path(),
        options.certificates.key_path(),
    )
    .await
    .context("unable to load webhook serving certificate")?;

    let mutator = PodMutator::new(
        info_span!("pod_mutator"),
        Arc::clone(&store),
        build_defaulters(&config),
        config.scope.namespaces.clone(),
    )
    .with_call_timeout(controller_config.api_call_timeout());
    let webhook_handle = Handle::new();
    let webhook_addr = SocketAddr::from(([0, 0, 0, 0], controller_config.webhook_port));
    let mut webhook_task = tokio::spawn(
        axum_server::bind_rustls(webhook_addr, tls.clone())
            .handle(webhook_handle.clone())
            .serve(admission_router(Arc::new(mutator)).into_make_service()),
    );
    info!(addr = %webhook_addr, "admission webhook listening");

    let updater = CaBundleUpdater::new(
        info_span!("ca_bundle_updater"),
        Arc::clone(&store),
        &config.webhook_configuration_name,
        config.webhook_field_manager(),
    )
    .with_call_timeout(controller_config.api_call_timeout());
    let handler = CertificateReloadHandler::new(
        info_span!("certificate_reload"),
        updater,
        options.certificates.ca_path(),
    );
    let cert_watcher = CertificateWatcher::new(
        info_span!("certificate_watcher"),
        options.certificates.clone(),
        controller_config.cert_reload_debounce(),
        handler,
    )
    .with_tls(tls);
    let mut cert_task = tokio::spawn(cert_watcher.run(shutdown_requested(shutdown_rx)));

    server_state.set_ready(true);
    info!("rt-bootstrapper initialized");

    let result = tokio::select! {
        () = shutdown_signal() => {
            info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
            Ok(())
        }
        joined = &mut cert_task => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(anyhow!(e).context("certificate reload failed")),
            Err(e) => Err(anyhow!(e).context("certificate watcher task failed")),
        },
        joined = &mut webhook_task => match joined {
            Ok(Ok(())) => Err(anyhow!("admission webhook server stopped")),
            Ok(Err(e)) => Err(anyhow!(e).context("admission webhook server failed")),
            Err(e) => Err(anyhow!(e).context("admission webhook task failed")),
        },
    };

    server_state.set_ready(false);
    info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    // Receivers may already be gone
    let _ = shutdown_tx.send(true);
    webhook_handle.graceful_shutdown(Some(WEBHOOK_SHUTDOWN_GRACE));

    if let Err(e) = watch_task.await {
        error!(error = %e, "watch loop task failed");
    }
    match metrics_task.await {
        Ok(Err(e)) => error!(error = %e, "HTTP server error"),
        Err(e) => error!(error = %e, "HTTP server task failed"),
        Ok(Ok(())) => {}
    }

    if result.is_ok() {
        info!("rt-bootstrapper stopped gracefully");
    }
    result
}
