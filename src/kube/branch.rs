//! Branch deployments.
//!
//! Rewrites a manifest into an isolated copy for a feature branch: every
//! resource is renamed with a branch suffix, labelled with a TTL, scaled
//! down to one replica, and references between documents are redirected to
//! the renamed resources. Ingress hosts or paths are moved so the copy does
//! not collide with the trunk deployment.

use serde_yaml::{Mapping, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::{ConfigError, HerdError, Result};

use super::document::{parse_documents, serialize_documents, KubeDocument, ObjectMeta, ResourceKind};

/// Label holding the lifetime of a branch deployment.
pub const TTL_LABEL: &str = "ttl-hours";

/// Lower-cases a branch name and replaces `/` with `-`.
#[must_use]
pub fn clean_branch_name(branch: &str) -> String {
    branch.trim().to_lowercase().replace('/', "-")
}

/// Parameters of a branch deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchModification {
    /// Branch name as given.
    pub branch_name: String,
    /// Lifetime of the deployment in hours.
    pub ttl_hours: Option<u32>,
    /// Provenance recorded for branch actions.
    pub origin: Option<String>,
}

impl BranchModification {
    /// Creates parameters for `branch_name`.
    #[must_use]
    pub fn new(branch_name: impl Into<String>) -> Self {
        Self {
            branch_name: branch_name.into(),
            ttl_hours: None,
            origin: None,
        }
    }

    /// Sets the lifetime in hours.
    #[must_use]
    pub const fn with_ttl_hours(mut self, ttl_hours: u32) -> Self {
        self.ttl_hours = Some(ttl_hours);
        self
    }

    /// Sets the provenance.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// The cleaned branch name.
    #[must_use]
    pub fn cleaned_branch_name(&self) -> String {
        clean_branch_name(&self.branch_name)
    }

    /// Provenance of branch actions.
    #[must_use]
    pub fn branch_origin(&self) -> String {
        self.origin
            .clone()
            .unwrap_or_else(|| format!("branch {}", self.cleaned_branch_name()))
    }

    /// Checks the parameters and returns the cleaned branch name and TTL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingBranchName`] or [`ConfigError::MissingTtl`].
    pub fn validate(&self) -> Result<(String, u32)> {
        let cleaned = self.cleaned_branch_name();
        if cleaned.is_empty() {
            return Err(HerdError::Config(ConfigError::MissingBranchName));
        }
        let ttl = self
            .ttl_hours
            .ok_or(HerdError::Config(ConfigError::MissingTtl))?;
        Ok((cleaned, ttl))
    }
}

/// Original name to renamed name, per kind, for one manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameChangeIndex {
    names: HashMap<ResourceKind, HashMap<String, String>>,
}

impl NameChangeIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a rename.
    pub fn record(&mut self, kind: ResourceKind, original: &str, renamed: String) {
        self.names
            .entry(kind)
            .or_default()
            .insert(original.to_string(), renamed);
    }

    /// Looks up the new name of a resource.
    #[must_use]
    pub fn renamed(&self, kind: &ResourceKind, original: &str) -> Option<&str> {
        self.names
            .get(kind)
            .and_then(|names| names.get(original))
            .map(String::as_str)
    }

    /// Number of recorded renames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.values().map(HashMap::len).sum()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records the branch name of every named document.
    ///
    /// # Errors
    ///
    /// Returns an error if the branch name or the TTL is missing.
    pub fn index_documents(
        &mut self,
        docs: &[KubeDocument],
        params: &BranchModification,
    ) -> Result<()> {
        let (branch, _) = params.validate()?;
        for doc in docs {
            match doc.name() {
                Some(name) => self.record(doc.kind.clone(), name, suffixed(name, &branch)),
                None => warn!("Skipping {} document without metadata.name", doc.kind),
            }
        }
        debug!("Indexed {} rename(s) for branch {branch}", self.len());
        Ok(())
    }
}

/// Rewrites manifest text for a branch deployment.
///
/// # Errors
///
/// Returns an error if the parameters are incomplete or the manifest cannot
/// be parsed.
pub fn transform(
    text: &str,
    params: &BranchModification,
    index: &mut NameChangeIndex,
) -> Result<String> {
    let mut docs = parse_documents(text, params.origin.as_deref())?;
    transform_documents(&mut docs, params, index)?;
    serialize_documents(&docs)
}

/// Rewrites parsed documents for a branch deployment.
///
/// The whole document set is indexed before any document is renamed, so
/// references to documents further down the manifest are redirected too.
///
/// # Errors
///
/// Returns an error if the branch name or the TTL is missing.
pub fn transform_documents(
    docs: &mut [KubeDocument],
    params: &BranchModification,
    index: &mut NameChangeIndex,
) -> Result<()> {
    index.index_documents(docs, params)?;
    let (branch, ttl) = params.validate()?;

    let rewriter = Rewriter {
        branch: &branch,
        index: &*index,
    };
    for doc in docs.iter_mut() {
        rewriter.rewrite(doc, ttl);
    }
    Ok(())
}

fn suffixed(name: &str, branch: &str) -> String {
    format!("{name}-{branch}")
}

struct Rewriter<'a> {
    branch: &'a str,
    index: &'a NameChangeIndex,
}

impl Rewriter<'_> {
    fn rewrite(&self, doc: &mut KubeDocument, ttl: u32) {
        let meta = doc.metadata.get_or_insert_with(ObjectMeta::default);
        meta.set_label(TTL_LABEL, ttl.to_string());
        if let Some(name) = meta.name.as_deref() {
            let renamed = self
                .index
                .renamed(&doc.kind, name)
                .map_or_else(|| self.suffix(name), String::from);
            meta.name = Some(renamed);
        }
        self.rewrite_labels(&mut meta.labels);

        let kind = doc.kind.clone();
        if kind == ResourceKind::Ingress {
            if let Some(meta) = doc.metadata.as_mut() {
                disable_ssl_redirect(&mut meta.annotations);
            }
        }
        let rewrite_paths = doc
            .metadata
            .as_ref()
            .is_some_and(|m| has_rewrite_annotation(&m.annotations));

        let Some(spec) = doc.spec_mut() else {
            return;
        };

        self.rewrite_spec(spec);
        match kind {
            ResourceKind::Deployment => set_count(spec, "replicas"),
            ResourceKind::HorizontalPodAutoscaler => {
                set_count(spec, "minReplicas");
                set_count(spec, "maxReplicas");
                if let Some(name) = spec.get_mut("scaleTargetRef").and_then(|r| r.get_mut("name")) {
                    self.suffix_value(name);
                }
            }
            ResourceKind::Ingress => self.rewrite_ingress(spec, rewrite_paths),
            _ => {}
        }
    }

    fn suffix(&self, name: &str) -> String {
        suffixed(name, self.branch)
    }

    fn suffix_value(&self, value: &mut Value) {
        if let Some(name) = value.as_str() {
            *value = Value::String(self.suffix(name));
        }
    }

    fn redirect(&self, value: &mut Value, kind: &ResourceKind) {
        let renamed = value
            .as_str()
            .and_then(|name| self.index.renamed(kind, name))
            .map(String::from);
        if let Some(renamed) = renamed {
            *value = Value::String(renamed);
        }
    }

    fn rewrite_labels(&self, labels: &mut Mapping) {
        for key in ["app", "name"] {
            if let Some(value) = labels.get_mut(key) {
                self.suffix_value(value);
            }
        }
        if let Some(origin) = labels.get_mut("origin") {
            *origin = Value::String(self.branch.to_string());
        }
    }

    fn rewrite_spec(&self, spec: &mut Value) {
        if let Some(Value::Mapping(selector)) = spec.get_mut("selector") {
            self.rewrite_labels(selector);
            if let Some(Value::Mapping(match_labels)) = selector.get_mut("matchLabels") {
                self.rewrite_labels(match_labels);
            }
        }

        for template in ["template", "jobTemplate"] {
            if let Some(template) = spec.get_mut(template) {
                if let Some(meta) = template.get_mut("metadata") {
                    if let Some(name) = meta.get_mut("name") {
                        self.suffix_value(name);
                    }
                    if let Some(Value::Mapping(labels)) = meta.get_mut("labels") {
                        self.rewrite_labels(labels);
                    }
                }
                if let Some(inner) = template.get_mut("spec") {
                    self.rewrite_spec(inner);
                }
            }
        }

        for list in ["containers", "initContainers"] {
            if let Some(Value::Sequence(containers)) = spec.get_mut(list) {
                for container in containers {
                    self.rewrite_container(container);
                }
            }
        }

        if let Some(Value::Sequence(volumes)) = spec.get_mut("volumes") {
            for volume in volumes {
                if let Some(name) = volume.get_mut("configMap").and_then(|c| c.get_mut("name")) {
                    self.redirect(name, &ResourceKind::ConfigMap);
                }
                if let Some(name) = volume.get_mut("secret").and_then(|s| s.get_mut("secretName")) {
                    self.redirect(name, &ResourceKind::Secret);
                }
            }
        }
    }

    fn rewrite_container(&self, container: &mut Value) {
        if let Some(Value::Sequence(env)) = container.get_mut("env") {
            for var in env {
                let Some(source) = var.get_mut("valueFrom") else {
                    continue;
                };
                if let Some(name) = source.get_mut("secretKeyRef").and_then(|r| r.get_mut("name")) {
                    self.redirect(name, &ResourceKind::Secret);
                }
                if let Some(name) = source
                    .get_mut("configMapKeyRef")
                    .and_then(|r| r.get_mut("name"))
                {
                    self.redirect(name, &ResourceKind::ConfigMap);
                }
            }
        }

        if let Some(Value::Sequence(env_from)) = container.get_mut("envFrom") {
            for source in env_from {
                if let Some(name) = source.get_mut("secretRef").and_then(|r| r.get_mut("name")) {
                    self.redirect(name, &ResourceKind::Secret);
                }
                if let Some(name) = source.get_mut("configMapRef").and_then(|r| r.get_mut("name")) {
                    self.redirect(name, &ResourceKind::ConfigMap);
                }
            }
        }
    }

    fn rewrite_ingress(&self, spec: &mut Value, rewrite_paths: bool) {
        for backend in ["defaultBackend", "backend"] {
            if let Some(backend) = spec.get_mut(backend) {
                self.rewrite_backend(backend);
            }
        }

        let mut prefixed_hosts = Vec::new();
        if let Some(Value::Sequence(rules)) = spec.get_mut("rules") {
            for rule in rules {
                if let Some(host) = self.rewrite_rule(rule, rewrite_paths) {
                    prefixed_hosts.push(host);
                }
            }
        }

        // TLS entries must keep covering the prefixed rule hosts.
        let Some(Value::Sequence(tls)) = spec.get_mut("tls") else {
            return;
        };
        for entry in tls {
            let Some(Value::Sequence(hosts)) = entry.get_mut("hosts") else {
                continue;
            };
            for host in hosts {
                if let Some(current) = host.as_str() {
                    if prefixed_hosts.iter().any(|p| p == current) {
                        *host = Value::String(format!("{}-{current}", self.branch));
                    }
                }
            }
        }
    }

    /// Rewrites one ingress rule and returns the original host if it was prefixed.
    fn rewrite_rule(&self, rule: &mut Value, rewrite_paths: bool) -> Option<String> {
        let has_paths = rule
            .get("http")
            .and_then(|h| h.get("paths"))
            .and_then(Value::as_sequence)
            .is_some_and(|paths| paths.iter().any(|p| p.get("path").is_some()));

        let mut prefixed = None;
        if !(rewrite_paths && has_paths) {
            if let Some(host) = rule.get_mut("host") {
                if let Some(current) = host.as_str().map(String::from) {
                    *host = Value::String(format!("{}-{current}", self.branch));
                    prefixed = Some(current);
                }
            }
        }

        if let Some(Value::Sequence(paths)) = rule
            .get_mut("http")
            .and_then(|h| h.get_mut("paths"))
        {
            for path in paths {
                if rewrite_paths {
                    if let Some(value) = path.get_mut("path") {
                        if let Some(current) = value.as_str() {
                            *value = Value::String(format!(
                                "{}/{}",
                                current.trim_end_matches('/'),
                                self.branch
                            ));
                        }
                    }
                }
                if let Some(backend) = path.get_mut("backend") {
                    self.rewrite_backend(backend);
                }
            }
        }
        prefixed
    }

    fn rewrite_backend(&self, backend: &mut Value) {
        if let Some(name) = backend.get_mut("service").and_then(|s| s.get_mut("name")) {
            self.suffix_value(name);
        }
        if let Some(name) = backend.get_mut("serviceName") {
            self.suffix_value(name);
        }
    }
}

fn set_count(spec: &mut Value, field: &str) {
    if let Some(spec) = spec.as_mapping_mut() {
        spec.insert(Value::from(field), Value::from(1));
    }
}

fn disable_ssl_redirect(annotations: &mut Mapping) {
    for (key, value) in annotations.iter_mut() {
        if key.as_str().is_some_and(|k| k.ends_with("ssl-redirect")) {
            *value = Value::from("false");
        }
    }
}

fn has_rewrite_annotation(annotations: &Mapping) -> bool {
    annotations
        .keys()
        .any(|key| key.as_str().is_some_and(|k| k.ends_with("rewrite-target")))
}
