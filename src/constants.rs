//! # Constants
//!
//! Shared constants used throughout the bootstrapper.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8081;

/// Default HTTPS port the admission webhook listens on
pub const DEFAULT_WEBHOOK_PORT: u16 = 9443;

/// Default timeout applied to every outbound Kubernetes API call (milliseconds)
pub const DEFAULT_API_CALL_TIMEOUT_MS: u64 = 5000;

/// Default number of work items reconciled at the same time
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: usize = 10;

/// Default starting value of the per-item error requeue backoff (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default maximum value of the per-item error requeue backoff (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 300_000;

/// Default quiet period used to coalesce certificate directory events (milliseconds)
pub const DEFAULT_CERT_RELOAD_DEBOUNCE_MS: u64 = 500;

/// Default location of the bootstrapper JSON configuration
pub const DEFAULT_CONFIG_FILE_PATH: &str = "/rt-bootstrapper-config.json";

/// Default name of the mutating webhook configuration carrying our CA bundle
pub const DEFAULT_WEBHOOK_CONFIGURATION_NAME: &str = "rt-bootstrapper-mutating-webhook-configuration";

/// Default server-side apply field manager for credential secrets
pub const DEFAULT_FIELD_MANAGER: &str = "rt-bootstrapper";

/// Suffix appended to the field manager when patching the webhook configuration
pub const WEBHOOK_FIELD_MANAGER_SUFFIX: &str = "-webhook";

/// File names inside the webhook certificate directory
pub const CERTIFICATE_AUTHORITY_FILE_NAME: &str = "ca.crt";
pub const DEFAULT_WEBHOOK_CERT_NAME: &str = "tls.crt";
pub const DEFAULT_WEBHOOK_KEY_NAME: &str = "tls.key";

/// Key of the docker config payload inside a pull secret
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

/// Annotation set on a credential secret whose payload is known to be stale
pub const ANNOTATION_OUTDATED: &str = "rt-bootstrapper.kyma-project.io/outdated";

/// Pod and namespace feature annotations
pub const ANNOTATION_ALTER_IMG_REGISTRY: &str = "rt-cfg.kyma-project.io/alter-img-registry";
pub const ANNOTATION_SET_PULL_SECRET: &str = "rt-cfg.kyma-project.io/add-img-pull-secret";
pub const ANNOTATION_ADD_CLUSTER_TRUST_BUNDLE: &str =
    "rt-cfg.kyma-project.io/add-cluster-trust-bundle";
pub const ANNOTATION_SET_FIPS_MODE: &str = "rt-cfg.kyma-project.io/set-fips-mode";

/// Annotation recording that the admission webhook modified a pod
pub const ANNOTATION_DEFAULTED: &str = "rt-bootstrapper.kyma-project.io/defaulted";

/// Environment variable injected into containers of FIPS-enabled pods
pub const ENV_FIPS_MODE_ENABLED: &str = "KYMA_FIPS_MODE_ENABLED";

/// Path the admission webhook is served under
pub const MUTATE_POD_PATH: &str = "/mutate--v1-pod";
