//! Engine configuration.
//!
//! Settings come from three layers, later ones winning: built-in defaults, an
//! optional YAML file (`IP_RESERVE_CONFIG`), and the `POD_NAMESPACE`
//! environment variable for the tracking record namespace. The result is an
//! immutable `EngineConfig` handed to the engine at construction.

use crate::error::ControllerError;
use cluster_store::RecordRef;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name shared by the tracking ConfigMap and the IPReservation
pub const RECORD_NAME: &str = "ip-reserve-delay-release";
/// Namespace of the tracking ConfigMap unless `POD_NAMESPACE` says otherwise
pub const DEFAULT_TRACKING_NAMESPACE: &str = "ip-reserve";
/// Namespace label that opts a namespace in
pub const NAMESPACE_OPT_IN_KEY: &str = "ip-reserve";
pub const NAMESPACE_OPT_IN_VALUE: &str = "enabled";
/// Permanent placeholder keeping the reserved list non-empty
pub const SENTINEL_ADDRESS: &str = "1.1.1.1";
/// Default selector keys (OR-ed)
pub const STATEFUL_IDENTITY_LABEL: &str = "statefulset.kubernetes.io/pod-name";
pub const BROKER_IDENTITY_LABEL: &str = "brokerId";

pub const ENV_CONFIG_PATH: &str = "IP_RESERVE_CONFIG";
pub const ENV_POD_NAMESPACE: &str = "POD_NAMESPACE";

/// Where the serving certificate is mounted unless `WEBHOOK_CERT_DIR` says otherwise
pub const DEFAULT_WEBHOOK_CERT_DIR: &str = "/tmp/k8s-webhook-server/serving-certs";
/// Lease name used for leader election unless `LEADER_ELECTION_ID` says otherwise
pub const DEFAULT_LEADER_ELECTION_ID: &str = "ip-reserve";

const DEFAULT_MAX_RETAINED_COUNT: usize = 200;
const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 60);
const DEFAULT_RELEASE_PERIOD: Duration = Duration::from_secs(5 * 60);
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(30);

/// Immutable per-run configuration of the retention engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on retained addresses before capacity eviction kicks in
    pub max_retained_count: usize,
    /// Time-to-live of a reservation
    pub retention_duration: Duration,
    /// Period of the release task (not used by the engine itself)
    pub release_period: Duration,
    /// Which removed pods qualify, with any-requirement-matches semantics
    pub selector: LabelSelector,
    /// Name of the cluster-scoped IPReservation
    pub reservation_name: String,
    /// Identity of the tracking ConfigMap
    pub tracking: RecordRef,
    /// Placeholder entry that is never removed from the reserved list
    pub sentinel: String,
    /// Deadline for each individual store call
    pub store_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retained_count: DEFAULT_MAX_RETAINED_COUNT,
            retention_duration: DEFAULT_RETENTION,
            release_period: DEFAULT_RELEASE_PERIOD,
            selector: default_selector(),
            reservation_name: RECORD_NAME.to_string(),
            tracking: RecordRef::new(RECORD_NAME, DEFAULT_TRACKING_NAMESPACE),
            sentinel: SENTINEL_ADDRESS.to_string(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

/// "has a stateful-identity label OR a broker-identity label"
pub fn default_selector() -> LabelSelector {
    let exists = |key: &str| LabelSelectorRequirement {
        key: key.to_string(),
        operator: "Exists".to_string(),
        values: None,
    };
    LabelSelector {
        match_labels: None,
        match_expressions: Some(vec![
            exists(STATEFUL_IDENTITY_LABEL),
            exists(BROKER_IDENTITY_LABEL),
        ]),
    }
}

/// On-disk shape of the configuration file
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    ip_reserve_time: Option<String>,
    ip_reserve_max_count: Option<i64>,
    ip_release_period: Option<String>,
    label_selector: Option<LabelSelector>,
    reservation_name: Option<String>,
    tracking_namespace: Option<String>,
    sentinel: Option<String>,
    store_timeout: Option<String>,
}

impl EngineConfig {
    /// Loads the configuration from an optional file and the namespace override.
    pub fn load(path: Option<&Path>, pod_namespace: Option<String>) -> Result<Self, ControllerError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    ControllerError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::from_yaml(&raw)?
            }
            None => Self::default(),
        };
        if let Some(namespace) = pod_namespace.filter(|ns| !ns.is_empty()) {
            config.tracking.namespace = namespace;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parses a YAML document on top of the defaults.
    pub fn from_yaml(raw: &str) -> Result<Self, ControllerError> {
        let file: ConfigFile = if raw.trim().is_empty() {
            ConfigFile::default()
        } else {
            serde_yaml::from_str(raw)
                .map_err(|e| ControllerError::InvalidConfig(format!("config file: {e}")))?
        };

        let mut config = Self::default();
        if let Some(raw) = file.ip_reserve_time {
            config.retention_duration = parse_duration(&raw)?;
        }
        if let Some(count) = file.ip_reserve_max_count {
            config.max_retained_count = usize::try_from(count)
                .ok()
                .filter(|count| *count > 0)
                .ok_or_else(|| {
                    ControllerError::InvalidConfig(format!("ipReserveMaxCount must be > 0, got {count}"))
                })?;
        }
        if let Some(raw) = file.ip_release_period {
            config.release_period = parse_duration(&raw)?;
        }
        if let Some(selector) = file.label_selector {
            config.selector = selector;
        }
        if let Some(name) = file.reservation_name {
            config.reservation_name = name.clone();
            config.tracking.name = name;
        }
        if let Some(namespace) = file.tracking_namespace {
            config.tracking.namespace = namespace;
        }
        if let Some(sentinel) = file.sentinel {
            config.sentinel = sentinel;
        }
        if let Some(raw) = file.store_timeout {
            config.store_timeout = parse_duration(&raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.max_retained_count == 0 {
            return Err(ControllerError::InvalidConfig("ipReserveMaxCount must be > 0".to_string()));
        }
        for (field, value) in [
            ("ipReserveTime", self.retention_duration),
            ("ipReleasePeriod", self.release_period),
            ("storeTimeout", self.store_timeout),
        ] {
            if value.is_zero() {
                return Err(ControllerError::InvalidConfig(format!("{field} must be > 0")));
            }
        }
        if self.reservation_name.is_empty() || self.tracking.namespace.is_empty() {
            return Err(ControllerError::InvalidConfig("record identity must not be empty".to_string()));
        }
        if crate::codec::parse_address(&self.sentinel).is_none() {
            return Err(ControllerError::InvalidConfig(format!(
                "sentinel {:?} is not an address",
                self.sentinel
            )));
        }
        Ok(())
    }
}

/// Parses a Go-style duration string such as `30m`, `1h30m`, `90s` or `1.5h`.
pub fn parse_duration(input: &str) -> Result<Duration, ControllerError> {
    let invalid = || ControllerError::InvalidConfig(format!("invalid duration {input:?}"));
    let mut rest = input.trim();
    if rest.is_empty() {
        return Err(invalid());
    }
    if rest == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(invalid());
        }
        let (number, tail) = rest.split_at(number_len);
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);

        let value: f64 = number.parse().map_err(|_| invalid())?;
        let unit_seconds = match unit {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(invalid()),
        };
        total += Duration::try_from_secs_f64(value * unit_seconds).map_err(|_| invalid())?;
        rest = next;
    }
    Ok(total)
}

/// Serving certificate and private key of the webhook listener, PEM encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TlsFiles {
    /// `tls.crt` and `tls.key` in `dir`, the layout of a mounted TLS secret.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            cert: dir.join("tls.crt"),
            key: dir.join("tls.key"),
        }
    }
}

/// Leader election for the release task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderElection {
    pub lease_name: String,
    /// Holder identity of this replica (the pod name)
    pub identity: String,
}

/// Process-level settings read from the environment
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub config_path: Option<PathBuf>,
    pub pod_namespace: Option<String>,
    pub metrics_addr: SocketAddr,
    pub webhook_addr: SocketAddr,
    pub webhook_enabled: bool,
    /// `None` serves the webhook over plain HTTP (`WEBHOOK_INSECURE`)
    pub webhook_tls: Option<TlsFiles>,
    pub release_enabled: bool,
    /// `None` unless `LEADER_ELECT` is set
    pub leader_election: Option<LeaderElection>,
}

impl RuntimeSettings {
    pub fn from_env() -> Result<Self, ControllerError> {
        Ok(Self {
            config_path: env::var(ENV_CONFIG_PATH).ok().filter(|p| !p.is_empty()).map(PathBuf::from),
            pod_namespace: env::var(ENV_POD_NAMESPACE).ok(),
            metrics_addr: socket_addr("METRICS_BIND_ADDRESS", "0.0.0.0:8080")?,
            webhook_addr: socket_addr("WEBHOOK_BIND_ADDRESS", "0.0.0.0:9443")?,
            webhook_enabled: flag("WEBHOOK_ENABLE", true)?,
            webhook_tls: webhook_tls(flag("WEBHOOK_INSECURE", false)?, env::var("WEBHOOK_CERT_DIR").ok()),
            release_enabled: flag("RELEASE_ENABLE", true)?,
            leader_election: leader_election(
                flag("LEADER_ELECT", false)?,
                env::var("LEADER_ELECTION_ID").ok(),
                env::var("POD_NAME").ok().or_else(|| env::var("HOSTNAME").ok()),
            )?,
        })
    }
}

fn webhook_tls(insecure: bool, cert_dir: Option<String>) -> Option<TlsFiles> {
    if insecure {
        return None;
    }
    let dir = cert_dir
        .filter(|dir| !dir.is_empty())
        .unwrap_or_else(|| DEFAULT_WEBHOOK_CERT_DIR.to_string());
    Some(TlsFiles::in_dir(dir))
}

fn leader_election(
    enabled: bool,
    lease_name: Option<String>,
    identity: Option<String>,
) -> Result<Option<LeaderElection>, ControllerError> {
    if !enabled {
        return Ok(None);
    }
    let identity = identity.filter(|id| !id.is_empty()).ok_or_else(|| {
        ControllerError::InvalidConfig("LEADER_ELECT needs POD_NAME or HOSTNAME for the holder identity".to_string())
    })?;
    Ok(Some(LeaderElection {
        lease_name: lease_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_LEADER_ELECTION_ID.to_string()),
        identity,
    }))
}

fn socket_addr(var: &str, default: &str) -> Result<SocketAddr, ControllerError> {
    let raw = env::var(var).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .map_err(|e| ControllerError::InvalidConfig(format!("{var}={raw:?}: {e}")))
}

fn flag(var: &str, default: bool) -> Result<bool, ControllerError> {
    match env::var(var) {
        Ok(raw) => parse_flag(&raw)
            .ok_or_else(|| ControllerError::InvalidConfig(format!("{var}={raw:?} is not a boolean"))),
        Err(_) => Ok(default),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_retained_count, 200);
        assert_eq!(config.retention_duration, Duration::from_secs(1800));
        assert_eq!(config.release_period, Duration::from_secs(300));
        assert_eq!(config.tracking, RecordRef::new(RECORD_NAME, "ip-reserve"));
        assert_eq!(config.sentinel, "1.1.1.1");
        assert_eq!(config.selector.match_expressions.as_ref().map(Vec::len), Some(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_overrides() {
        let config = EngineConfig::from_yaml(
            r"
ipReserveTime: 1h
ipReserveMaxCount: 50
ipReleasePeriod: 90s
labelSelector:
  matchLabels:
    app: kafka
",
        )
        .unwrap();
        assert_eq!(config.retention_duration, Duration::from_secs(3600));
        assert_eq!(config.max_retained_count, 50);
        assert_eq!(config.release_period, Duration::from_secs(90));
        assert_eq!(
            config.selector.match_labels.unwrap().get("app").map(String::as_str),
            Some("kafka")
        );
    }

    #[test]
    fn test_from_yaml_rejects_bad_values() {
        assert!(EngineConfig::from_yaml("ipReserveMaxCount: 0").is_err());
        assert!(EngineConfig::from_yaml("ipReserveMaxCount: -3").is_err());
        assert!(EngineConfig::from_yaml("ipReserveTime: 0").is_err());
        assert!(EngineConfig::from_yaml("ipReserveTime: soon").is_err());
        assert!(EngineConfig::from_yaml("sentinel: not-an-ip").is_err());
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = EngineConfig::from_yaml("").unwrap();
        assert_eq!(config.max_retained_count, 200);
    }

    #[test]
    fn test_pod_namespace_overrides_file() {
        let config = EngineConfig::load(None, Some("kube-system".to_string())).unwrap();
        assert_eq!(config.tracking.namespace, "kube-system");

        let config = EngineConfig::load(None, Some(String::new())).unwrap();
        assert_eq!(config.tracking.namespace, DEFAULT_TRACKING_NAMESPACE);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert!(parse_duration("").is_err());
        assert!(parse_duration("m").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("10").is_err());
    }

    #[test]
    fn test_webhook_tls_defaults_to_mounted_secret() {
        let tls = webhook_tls(false, None).unwrap();
        assert_eq!(tls.cert, PathBuf::from("/tmp/k8s-webhook-server/serving-certs/tls.crt"));
        assert_eq!(tls.key, PathBuf::from("/tmp/k8s-webhook-server/serving-certs/tls.key"));

        let tls = webhook_tls(false, Some("/certs".to_string())).unwrap();
        assert_eq!(tls, TlsFiles::in_dir("/certs"));

        assert!(webhook_tls(true, Some("/certs".to_string())).is_none());
    }

    #[test]
    fn test_leader_election_is_opt_in() {
        assert_eq!(leader_election(false, None, Some("pod-a".to_string())).unwrap(), None);

        let election = leader_election(true, None, Some("ip-reserve-7d9f-x2".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(election.lease_name, "ip-reserve");
        assert_eq!(election.identity, "ip-reserve-7d9f-x2");

        let election = leader_election(true, Some("capo".to_string()), Some("pod-a".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(election.lease_name, "capo");
    }

    #[test]
    fn test_leader_election_needs_identity() {
        assert!(matches!(
            leader_election(true, None, None),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(leader_election(true, None, Some(String::new())).is_err());
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
