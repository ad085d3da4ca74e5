//! # Certificate Watcher
//!
//! Watches the webhook certificate directory. Whenever the serving
//! certificate material changes the TLS configuration of the webhook server is
//! swapped and the CA bundle of the webhook configuration is brought in line
//! with the co-located `ca.crt`.
//!
//! The first load counts as a reload. A CA bundle that cannot be propagated
//! is fatal: [`CertificateWatcher::run`] returns the error and the process is
//! expected to exit.

use crate::constants::{
    CERTIFICATE_AUTHORITY_FILE_NAME, DEFAULT_WEBHOOK_CERT_NAME, DEFAULT_WEBHOOK_KEY_NAME,
};
use crate::webhook::ca_bundle::{CaBundleError, CaBundleUpdater, UpdateOutcome};
use axum_server::tls_rustls::RustlsConfig;
use notify::{EventKind, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Span};

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("unable to watch certificate directory {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error(transparent)]
    CaBundle(#[from] CaBundleError),
}

/// Location of the webhook serving certificate and its CA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePaths {
    pub dir: PathBuf,
    pub cert_name: String,
    pub key_name: String,
}

impl CertificatePaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cert_name: DEFAULT_WEBHOOK_CERT_NAME.to_string(),
            key_name: DEFAULT_WEBHOOK_KEY_NAME.to_string(),
        }
    }

    #[must_use]
    pub fn with_names(mut self, cert_name: impl Into<String>, key_name: impl Into<String>) -> Self {
        self.cert_name = cert_name.into();
        self.key_name = key_name.into();
        self
    }

    #[must_use]
    pub fn cert_path(&self) -> PathBuf {
        self.dir.join(&self.cert_name)
    }

    #[must_use]
    pub fn key_path(&self) -> PathBuf {
        self.dir.join(&self.key_name)
    }

    #[must_use]
    pub fn ca_path(&self) -> PathBuf {
        self.dir.join(CERTIFICATE_AUTHORITY_FILE_NAME)
    }

    /// SHA-256 over certificate, key and CA, in that order.
    pub fn digest(&self) -> std::io::Result<[u8; 32]> {
        let mut hasher = Sha256::new();
        for path in [self.cert_path(), self.key_path(), self.ca_path()] {
            let content = std::fs::read(&path)?;
            hasher.update((content.len() as u64).to_be_bytes());
            hasher.update(&content);
        }
        Ok(hasher.finalize().into())
    }
}

/// Certificate-reload callback: reads `ca.crt` and propagates it.
#[derive(Debug)]
pub struct CertificateReloadHandler {
    span: Span,
    updater: CaBundleUpdater,
    ca_path: PathBuf,
}

impl CertificateReloadHandler {
    pub fn new(span: Span, updater: CaBundleUpdater, ca_path: impl Into<PathBuf>) -> Self {
        Self {
            span,
            updater,
            ca_path: ca_path.into(),
        }
    }

    pub async fn on_reload(&self) -> Result<UpdateOutcome, CaBundleError> {
        let ca_bundle = tokio::fs::read(&self.ca_path).await.map_err(|source| {
            self.span.in_scope(|| {
                error!(path = %self.ca_path.display(), error = %source, "unable to read certificate");
            });
            CaBundleError::ReadCaFile {
                path: self.ca_path.clone(),
                source,
            }
        })?;
        self.span.in_scope(|| info!("certificate loaded"));

        let outcome = self.updater.update(&ca_bundle).await?;
        self.span.in_scope(|| {
            info!(outcome = outcome.as_str(), "CA bundle propagated");
        });
        Ok(outcome)
    }
}

pub struct CertificateWatcher {
    span: Span,
    paths: CertificatePaths,
    debounce: Duration,
    handler: CertificateReloadHandler,
    tls: Option<RustlsConfig>,
}

impl std::fmt::Debug for CertificateWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateWatcher")
            .field("paths", &self.paths)
            .field("debounce", &self.debounce)
            .field("tls", &self.tls.is_some())
            .finish_non_exhaustive()
    }
}

impl CertificateWatcher {
    pub fn new(
        span: Span,
        paths: CertificatePaths,
        debounce: Duration,
        handler: CertificateReloadHandler,
    ) -> Self {
        Self {
            span,
            paths,
            debounce,
            handler,
            tls: None,
        }
    }

    /// Hot-swap this server configuration on every reload.
    #[must_use]
    pub fn with_tls(mut self, tls: RustlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Run until `shutdown` resolves or a reload fails fatally.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), CertificateError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher =
            notify::recommended_watcher(move |event: notify::Result<notify::Event>| match event {
                Ok(evt) if matches!(evt.kind, EventKind::Access(_)) => {}
                Ok(_) => {
                    // Receiver gone means the watcher is shutting down
                    let _ = tx.send(());
                }
                Err(e) => warn!(error = %e, "certificate watcher error"),
            })
            .map_err(|source| CertificateError::Watch {
                path: self.paths.dir.clone(),
                source,
            })?;
        watcher
            .watch(&self.paths.dir, RecursiveMode::NonRecursive)
            .map_err(|source| CertificateError::Watch {
                path: self.paths.dir.clone(),
                source,
            })?;

        self.span.in_scope(|| {
            info!(dir = %self.paths.dir.display(), "certificate watcher started");
        });

        let mut last_digest = self.paths.digest().ok();
        self.handler.on_reload().await?;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    self.span.in_scope(|| info!("certificate watcher stopped"));
                    return Ok(());
                }
                event = rx.recv() => {
                    if event.is_none() {
                        return Ok(());
                    }
                }
            }

            drain_until_quiet(&mut rx, self.debounce).await;

            let digest = match self.paths.digest() {
                Ok(digest) => digest,
                Err(e) => {
                    // Mid-rotation; the next event completes it
                    self.span.in_scope(|| debug!(error = %e, "certificate material incomplete"));
                    continue;
                }
            };
            if last_digest == Some(digest) {
                self.span.in_scope(|| debug!("certificate material unchanged"));
                continue;
            }

            if let Some(tls) = &self.tls {
                if let Err(e) = tls
                    .reload_from_pem_file(self.paths.cert_path(), self.paths.key_path())
                    .await
                {
                    self.span.in_scope(|| {
                        warn!(error = %e, "unable to reload webhook serving certificate");
                    });
                    continue;
                }
            }

            last_digest = Some(digest);
            self.span.in_scope(|| info!("certificate material reloaded"));
            self.handler.on_reload().await?;
        }
    }
}

/// Swallow events until none arrived for `quiet`.
async fn drain_until_quiet(rx: &mut mpsc::UnboundedReceiver<()>, quiet: Duration) {
    while let Ok(Some(())) = tokio::time::timeout(quiet, rx.recv()).await {}
}

/// Check that the serving certificate and key exist before starting.
pub fn ensure_material(paths: &CertificatePaths) -> std::io::Result<()> {
    for path in [paths.cert_path(), paths.key_path()] {
        if !Path::new(&path).is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MockClusterStore, StoreError};
    use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
    use kube::api::ObjectMeta;
    use std::sync::Arc;

    fn write_material(dir: &Path, ca: Option<&str>) {
        std::fs::write(dir.join("tls.crt"), "cert").unwrap();
        std::fs::write(dir.join("tls.key"), "key").unwrap();
        if let Some(ca) = ca {
            std::fs::write(dir.join("ca.crt"), ca).unwrap();
        }
    }

    fn handler(store: MockClusterStore, ca_path: PathBuf) -> CertificateReloadHandler {
        let updater = CaBundleUpdater::new(Span::none(), Arc::new(store), "wh-cfg", "test");
        CertificateReloadHandler::new(Span::none(), updater, ca_path)
    }

    #[test]
    fn test_paths() {
        let paths = CertificatePaths::new("/certs").with_names("server.crt", "server.key");
        assert_eq!(paths.cert_path(), PathBuf::from("/certs/server.crt"));
        assert_eq!(paths.key_path(), PathBuf::from("/certs/server.key"));
        assert_eq!(paths.ca_path(), PathBuf::from("/certs/ca.crt"));
    }

    #[test]
    fn test_digest_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        write_material(dir.path(), Some("ca-1"));
        let paths = CertificatePaths::new(dir.path());

        let first = paths.digest().unwrap();
        assert_eq!(paths.digest().unwrap(), first);

        std::fs::write(dir.path().join("ca.crt"), "ca-2").unwrap();
        assert_ne!(paths.digest().unwrap(), first);
    }

    #[test]
    fn test_digest_requires_all_files() {
        let dir = tempfile::tempdir().unwrap();
        write_material(dir.path(), None);
        assert!(CertificatePaths::new(dir.path()).digest().is_err());
    }

    #[test]
    fn test_ensure_material() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CertificatePaths::new(dir.path());
        assert!(ensure_material(&paths).is_err());

        write_material(dir.path(), None);
        assert!(ensure_material(&paths).is_ok());
    }

    #[tokio::test]
    async fn test_reload_propagates_ca_file() {
        let dir = tempfile::tempdir().unwrap();
        write_material(dir.path(), Some("CA_NEW"));

        let mut store = MockClusterStore::new();
        store.expect_get_webhook_configuration().returning(|_| {
            Ok(MutatingWebhookConfiguration {
                metadata: ObjectMeta {
                    name: Some("wh-cfg".to_string()),
                    ..ObjectMeta::default()
                },
                ..MutatingWebhookConfiguration::default()
            })
        });

        let outcome = handler(store, dir.path().join("ca.crt"))
            .on_reload()
            .await
            .unwrap();
        // No webhooks to update
        assert_eq!(outcome, UpdateOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_missing_ca_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MockClusterStore::new();
        store.expect_get_webhook_configuration().never();

        let err = handler(store, dir.path().join("ca.crt"))
            .on_reload()
            .await
            .unwrap_err();
        assert!(matches!(err, CaBundleError::ReadCaFile { .. }));
    }

    #[tokio::test]
    async fn test_watcher_stops_on_initial_failure() {
        let dir = tempfile::tempdir().unwrap();
        write_material(dir.path(), Some("CA_NEW"));

        let mut store = MockClusterStore::new();
        store.expect_get_webhook_configuration().returning(|name| {
            Err(StoreError::NotFound {
                kind: "MutatingWebhookConfiguration",
                name: name.to_string(),
            })
        });

        let paths = CertificatePaths::new(dir.path());
        let watcher = CertificateWatcher::new(
            Span::none(),
            paths.clone(),
            Duration::from_millis(10),
            handler(store, paths.ca_path()),
        );

        let err = watcher.run(std::future::pending()).await.unwrap_err();
        assert!(matches!(
            err,
            CertificateError::CaBundle(CaBundleError::Fetch { .. })
        ));
    }

    #[tokio::test]
    async fn test_watcher_returns_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        write_material(dir.path(), Some("CA_NEW"));

        let mut store = MockClusterStore::new();
        store
            .expect_get_webhook_configuration()
            .times(1)
            .returning(|_| Ok(MutatingWebhookConfiguration::default()));

        let paths = CertificatePaths::new(dir.path());
        let watcher = CertificateWatcher::new(
            Span::none(),
            paths.clone(),
            Duration::from_millis(10),
            handler(store, paths.ca_path()),
        );

        watcher.run(async {}).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_until_quiet_coalesces_bursts() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        for _ in 0..5 {
            tx.send(()).unwrap();
        }
        drain_until_quiet(&mut rx, Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }
}
