//! Kubernetes manifest documents.
//!
//! A manifest is one or more YAML documents. Each document is split into its
//! kind, a typed `metadata` block and the untyped rest of the body. Keys the
//! model does not know about are kept verbatim and written back unchanged.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

use crate::error::{ActionError, DocumentError, HerdError, Result};

/// Namespace that is left out of identifiers.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Kind of a Kubernetes resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    /// `apps/v1` Deployment.
    Deployment,
    /// Service.
    Service,
    /// Ingress.
    Ingress,
    /// `HorizontalPodAutoscaler`.
    HorizontalPodAutoscaler,
    /// `ConfigMap`.
    ConfigMap,
    /// Secret.
    Secret,
    /// Any other kind, by name.
    Other(String),
}

impl ResourceKind {
    /// Parses a `kind` value.
    #[must_use]
    pub fn parse(kind: &str) -> Self {
        match kind {
            "Deployment" => Self::Deployment,
            "Service" => Self::Service,
            "Ingress" => Self::Ingress,
            "HorizontalPodAutoscaler" => Self::HorizontalPodAutoscaler,
            "ConfigMap" => Self::ConfigMap,
            "Secret" => Self::Secret,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the `kind` value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Deployment => "Deployment",
            Self::Service => "Service",
            Self::Ingress => "Ingress",
            Self::HorizontalPodAutoscaler => "HorizontalPodAutoscaler",
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
            Self::Other(kind) => kind,
        }
    }

    /// Returns true for kinds whose pods are scaled by replica counts.
    #[must_use]
    pub const fn is_scalable(&self) -> bool {
        matches!(self, Self::Deployment | Self::HorizontalPodAutoscaler)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `metadata` block of a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Resource name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Labels.
    #[serde(default, skip_serializing_if = "Mapping::is_empty")]
    pub labels: Mapping,
    /// Annotations.
    #[serde(default, skip_serializing_if = "Mapping::is_empty")]
    pub annotations: Mapping,
    /// Every other metadata key.
    #[serde(flatten)]
    pub extra: Mapping,
}

impl ObjectMeta {
    /// Returns a label value as text.
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).and_then(Value::as_str)
    }

    /// Sets a label.
    pub fn set_label(&mut self, key: &str, value: impl Into<String>) {
        self.labels
            .insert(Value::from(key), Value::String(value.into()));
    }
}

/// One document of a manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct KubeDocument {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Metadata, if the document has any.
    pub metadata: Option<ObjectMeta>,
    /// Every top-level key except `kind` and `metadata`.
    pub body: Mapping,
}

impl KubeDocument {
    /// Builds a document from a parsed YAML value.
    ///
    /// `index` is the position of the document in its manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a mapping, has no `kind`, or has
    /// a malformed `metadata` block.
    pub fn from_value(value: Value, index: usize) -> Result<Self> {
        let Value::Mapping(mut body) = value else {
            return Err(DocumentError::parse(
                format!("document #{index} is not a mapping"),
                None,
            )
            .into());
        };

        let kind = match body.remove("kind") {
            Some(Value::String(kind)) if !kind.is_empty() => ResourceKind::parse(&kind),
            _ => return Err(DocumentError::MissingKind { index }.into()),
        };

        let metadata = match body.remove("metadata") {
            None | Some(Value::Null) => None,
            Some(meta) => Some(serde_yaml::from_value(meta).map_err(|e| {
                DocumentError::parse(format!("metadata of document #{index}: {e}"), None)
            })?),
        };

        Ok(Self {
            kind,
            metadata,
            body,
        })
    }

    /// Converts the document back into a YAML value.
    ///
    /// `apiVersion`, `kind` and `metadata` come first; the remaining keys
    /// keep their original order.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be serialized.
    pub fn to_value(&self) -> Result<Value> {
        let mut out = Mapping::new();
        if let Some(api_version) = self.body.get("apiVersion") {
            out.insert(Value::from("apiVersion"), api_version.clone());
        }
        out.insert(Value::from("kind"), Value::from(self.kind.as_str()));
        if let Some(meta) = &self.metadata {
            let meta = serde_yaml::to_value(meta).map_err(|e| DocumentError::Serialize {
                message: e.to_string(),
            })?;
            out.insert(Value::from("metadata"), meta);
        }
        for (key, value) in &self.body {
            if key.as_str() != Some("apiVersion") {
                out.insert(key.clone(), value.clone());
            }
        }
        Ok(Value::Mapping(out))
    }

    /// Resource name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.name.as_deref())
    }

    /// Namespace, if set.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.namespace.as_deref())
    }

    /// Namespace, or `default` when unset.
    #[must_use]
    pub fn namespace_or_default(&self) -> &str {
        self.namespace().unwrap_or(DEFAULT_NAMESPACE)
    }

    /// The `spec` block, if any.
    #[must_use]
    pub fn spec(&self) -> Option<&Value> {
        self.body.get("spec")
    }

    /// The `spec` block for modification, if any.
    pub fn spec_mut(&mut self) -> Option<&mut Value> {
        self.body.get_mut("spec")
    }

    /// Builds the stable identifier of this document.
    ///
    /// `{Kind}_{name}`, or `{Kind}_{namespace}_{name}` outside the default
    /// namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the document has no name.
    pub fn identifying_string(&self) -> Result<String> {
        let name = self.name().ok_or_else(|| {
            HerdError::Action(ActionError::MissingField {
                action: format!("{} document", self.kind),
                field: String::from("metadata.name"),
            })
        })?;

        Ok(match self.namespace() {
            Some(ns) if ns != DEFAULT_NAMESPACE => format!("{}_{ns}_{name}", self.kind),
            _ => format!("{}_{name}", self.kind),
        })
    }
}

/// Parses every document of a manifest.
///
/// Empty documents (for example a trailing `---`) are skipped.
///
/// # Errors
///
/// Returns an error if the YAML is malformed or a document has no kind.
pub fn parse_documents(text: &str, origin: Option<&str>) -> Result<Vec<KubeDocument>> {
    let mut documents = Vec::new();

    for (index, de) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = Value::deserialize(de).map_err(|e| DocumentError::parse(e.to_string(), origin))?;
        if value.is_null() {
            continue;
        }
        documents.push(KubeDocument::from_value(value, index)?);
    }

    Ok(documents)
}

/// Serializes documents into one multi-document manifest.
///
/// # Errors
///
/// Returns an error if a document cannot be serialized.
pub fn serialize_documents(documents: &[KubeDocument]) -> Result<String> {
    let rendered = documents
        .iter()
        .map(|doc| {
            serde_yaml::to_string(&doc.to_value()?).map_err(|e| {
                HerdError::Document(DocumentError::Serialize {
                    message: e.to_string(),
                })
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(rendered.join("---\n"))
}

/// Groups documents by kind, keeping their order within a kind.
#[must_use]
pub fn group_by_kind(documents: &[KubeDocument]) -> BTreeMap<ResourceKind, Vec<&KubeDocument>> {
    let mut groups: BTreeMap<ResourceKind, Vec<&KubeDocument>> = BTreeMap::new();
    for doc in documents {
        groups.entry(doc.kind.clone()).or_default().push(doc);
    }
    groups
}
