//! Cluster-wide policies applied to every document before it is deployed.
//!
//! Policies are plain document transforms. They are read once per
//! invocation as part of [`crate::config::Settings`].

use serde_yaml::Value;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::config::{parse_bool, parse_number};
use crate::error::{ConfigError, HerdError, Result};

use super::document::{KubeDocument, ResourceKind};

/// Removes `loadBalancerSourceRanges` from public services.
pub const ENV_POLICY_CLEAR_PUBLIC_IP_ALLOWLIST: &str = "HERD_POLICY_CLEAR_PUBLIC_IP_ALLOWLIST";

/// Upper bound for replica counts.
pub const ENV_POLICY_MAX_REPLICAS: &str = "HERD_POLICY_MAX_REPLICAS";

/// Upper bound for container CPU requests.
pub const ENV_POLICY_MAX_CPU_REQUEST: &str = "HERD_POLICY_MAX_CPU_REQUEST";

/// Label marking a service as publicly exposed.
pub const PUBLIC_SERVICE_LABEL: &str = "publicService";

/// A CPU quantity in millicores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CpuQuantity(u64);

impl CpuQuantity {
    /// Creates a quantity from millicores.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the quantity in millicores.
    #[must_use]
    pub const fn millis(self) -> u64 {
        self.0
    }

    /// Reads a quantity from a YAML value such as `500m`, `"2"` or `0.5`.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => text.parse().ok(),
            Value::Number(n) => n.as_f64().and_then(cores_to_millis),
            _ => None,
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn cores_to_millis(cores: f64) -> Option<CpuQuantity> {
    (cores.is_finite() && cores >= 0.0).then(|| CpuQuantity((cores * 1000.0).round() as u64))
}

impl FromStr for CpuQuantity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(millis) = s.strip_suffix('m') {
            return millis
                .parse()
                .map(Self)
                .map_err(|_| format!("'{s}' is not a millicore quantity"));
        }
        s.parse::<f64>()
            .ok()
            .and_then(cores_to_millis)
            .ok_or_else(|| format!("'{s}' is not a CPU quantity"))
    }
}

impl fmt::Display for CpuQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 1000 == 0 {
            write!(f, "{}", self.0 / 1000)
        } else {
            write!(f, "{}m", self.0)
        }
    }
}

/// Policies enforced on every deployed document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterPolicies {
    /// Strip IP allow-lists from services labelled `publicService`.
    pub clear_public_ip_allowlist: bool,
    /// Cap for `replicas`, `minReplicas` and `maxReplicas`.
    pub max_replicas: Option<u64>,
    /// Cap for container CPU requests.
    pub max_cpu_request: Option<CpuQuantity>,
}

impl ClusterPolicies {
    /// Reads policies through a variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a policy variable holds an invalid value.
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut policies = Self::default();

        if let Some(value) = read(ENV_POLICY_CLEAR_PUBLIC_IP_ALLOWLIST) {
            policies.clear_public_ip_allowlist =
                parse_bool(ENV_POLICY_CLEAR_PUBLIC_IP_ALLOWLIST, &value)?;
        }
        if let Some(value) = read(ENV_POLICY_MAX_REPLICAS) {
            policies.max_replicas = Some(parse_number(ENV_POLICY_MAX_REPLICAS, &value)?);
        }
        if let Some(value) = read(ENV_POLICY_MAX_CPU_REQUEST) {
            let quantity = value.parse::<CpuQuantity>().map_err(|reason| {
                HerdError::Config(ConfigError::invalid(
                    ENV_POLICY_MAX_CPU_REQUEST,
                    value.as_str(),
                    reason,
                ))
            })?;
            policies.max_cpu_request = Some(quantity);
        }

        if !policies.is_empty() {
            debug!("Cluster policies: {policies:?}");
        }
        Ok(policies)
    }

    /// Returns true if no policy is active.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        !self.clear_public_ip_allowlist
            && self.max_replicas.is_none()
            && self.max_cpu_request.is_none()
    }

    /// Applies every active policy to `doc`.
    pub fn apply(&self, doc: &mut KubeDocument) {
        if self.clear_public_ip_allowlist && doc.kind == ResourceKind::Service {
            clear_allowlist(doc);
        }

        if !doc.kind.is_scalable() {
            return;
        }

        let is_hpa = doc.kind == ResourceKind::HorizontalPodAutoscaler;
        let Some(spec) = doc.spec_mut() else {
            return;
        };

        if let Some(max) = self.max_replicas {
            let fields: &[&str] = if is_hpa {
                &["maxReplicas", "minReplicas"]
            } else {
                &["replicas"]
            };
            for field in fields {
                cap_count(spec, field, max);
            }
        }

        if let Some(max) = self.max_cpu_request {
            cap_cpu_requests(spec, max);
        }
    }

    /// Applies every active policy to each document.
    pub fn apply_all(&self, docs: &mut [KubeDocument]) {
        if self.is_empty() {
            return;
        }
        for doc in docs {
            self.apply(doc);
        }
    }
}

fn clear_allowlist(doc: &mut KubeDocument) {
    let public = doc
        .metadata
        .as_ref()
        .is_some_and(|m| m.labels.contains_key(PUBLIC_SERVICE_LABEL));
    if !public {
        return;
    }

    let name = doc.name().unwrap_or_default().to_string();
    let removed = doc
        .spec_mut()
        .and_then(Value::as_mapping_mut)
        .and_then(|spec| spec.remove("loadBalancerSourceRanges"));

    if removed.is_some() {
        debug!("Removed IP allow-list from public service {name}");
    } else {
        warn!("Public service {name} has no IP allow-list to remove");
    }
}

fn cap_count(spec: &mut Value, field: &str, max: u64) {
    let Some(slot) = spec.get_mut(field) else {
        return;
    };
    if slot.as_u64().is_some_and(|current| current > max) {
        debug!("Capping {field} at {max}");
        *slot = Value::from(max);
    }
}

fn cap_cpu_requests(spec: &mut Value, max: CpuQuantity) {
    let Some(pod_spec) = spec.get_mut("template").and_then(|t| t.get_mut("spec")) else {
        return;
    };

    for list in ["containers", "initContainers"] {
        let Some(Value::Sequence(containers)) = pod_spec.get_mut(list) else {
            continue;
        };
        for container in containers {
            let Some(cpu) = container
                .get_mut("resources")
                .and_then(|r| r.get_mut("requests"))
                .and_then(|r| r.get_mut("cpu"))
            else {
                continue;
            };
            if CpuQuantity::from_value(cpu).is_some_and(|current| current > max) {
                debug!("Capping CPU request {cpu:?} at {max}");
                *cpu = Value::String(max.to_string());
            }
        }
    }
}
