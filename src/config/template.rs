//! Placeholder expansion for manifest text and deployer environments.
//!
//! Variables are passed explicitly through a [`TemplateContext`] instead of
//! being written into the process environment. A context is built for one
//! expansion call and dropped afterwards, so branch placeholders from one
//! manifest can never leak into another.

use std::collections::HashMap;

use crate::error::{ConfigError, HerdError, Result};

/// Variable holding the cleaned branch name.
pub const BRANCH_NAME: &str = "BRANCH_NAME";

/// Variable holding `{branch}-`, or empty outside branch deployments.
pub const BRANCH_NAME_PREFIX: &str = "BRANCH_NAME_PREFIX";

/// Variable holding `-{branch}`, or empty outside branch deployments.
pub const BRANCH_NAME_POSTFIX: &str = "BRANCH_NAME_POSTFIX";

/// Variable holding the tag of the image being deployed.
pub const IMAGE_TAG: &str = "IMAGE_TAG";

/// Variables available to one expansion call.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    /// Explicit variables, consulted first.
    vars: HashMap<String, String>,
    /// Whether unknown names fall through to the process environment.
    inherit_env: bool,
}

impl Default for TemplateContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateContext {
    /// Creates a context that falls back to the process environment.
    #[must_use]
    pub fn new() -> Self {
        Self {
            vars: HashMap::new(),
            inherit_env: true,
        }
    }

    /// Creates a context that only knows its explicit variables.
    #[must_use]
    pub fn isolated() -> Self {
        Self {
            vars: HashMap::new(),
            inherit_env: false,
        }
    }

    /// Adds a variable.
    #[must_use]
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Sets a variable in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Sets the branch placeholders.
    ///
    /// With no branch the placeholders are defined but empty, so manifests
    /// that use them still expand on trunk deployments.
    #[must_use]
    pub fn with_branch(mut self, cleaned_branch: Option<&str>) -> Self {
        match cleaned_branch {
            Some(branch) => {
                self.set(BRANCH_NAME, branch);
                self.set(BRANCH_NAME_PREFIX, format!("{branch}-"));
                self.set(BRANCH_NAME_POSTFIX, format!("-{branch}"));
            }
            None => {
                self.set(BRANCH_NAME, "");
                self.set(BRANCH_NAME_PREFIX, "");
                self.set(BRANCH_NAME_POSTFIX, "");
            }
        }
        self
    }

    /// Resolves a single variable.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<String> {
        self.vars
            .get(name)
            .cloned()
            .or_else(|| self.inherit_env.then(|| std::env::var(name).ok()).flatten())
    }

    /// Expands `${NAME}` and `{{NAME}}` placeholders in `text`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] for any placeholder that
    /// cannot be resolved.
    pub fn expand(&self, text: &str) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        loop {
            let (start, close) = match (rest.find("${"), rest.find("{{")) {
                (Some(dollar), Some(braces)) if braces < dollar => (braces, "}}"),
                (Some(dollar), _) => (dollar, "}"),
                (None, Some(braces)) => (braces, "}}"),
                (None, None) => break,
            };

            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];

            let Some(end) = after.find(close) else {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            };

            let name = after[..end].trim();
            let value = self.lookup(name).ok_or_else(|| {
                HerdError::Config(ConfigError::MissingEnvVar {
                    name: name.to_string(),
                })
            })?;
            out.push_str(&value);
            rest = &after[end + close.len()..];
        }

        out.push_str(rest);
        Ok(out)
    }

    /// Resolves a comma-separated `NAME=VALUE` expansion string.
    ///
    /// Values are expanded like manifest text; a bare `NAME` takes its value
    /// from the context.
    ///
    /// # Errors
    ///
    /// Returns an error if a referenced variable is missing.
    pub fn expand_env_pairs(&self, expansion: &str) -> Result<Vec<(String, String)>> {
        expansion
            .split(',')
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((name, value)) => Ok((name.trim().to_string(), self.expand(value.trim())?)),
                None => self
                    .lookup(pair)
                    .map(|value| (pair.to_string(), value))
                    .ok_or_else(|| {
                        HerdError::Config(ConfigError::MissingEnvVar {
                            name: pair.to_string(),
                        })
                    }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_both_placeholder_styles() {
        let ctx = TemplateContext::isolated()
            .with_var("IMAGE", "registry/app")
            .with_var(IMAGE_TAG, "1.2.3");

        let expanded = ctx
            .expand("image: ${IMAGE}:{{ IMAGE_TAG }}")
            .expect("expand");

        assert_eq!(expanded, "image: registry/app:1.2.3");
    }

    #[test]
    fn test_missing_variable_is_config_error() {
        let ctx = TemplateContext::isolated();
        let err = ctx.expand("host: ${UNKNOWN_HOST}").expect_err("should fail");

        assert!(matches!(
            err,
            HerdError::Config(ConfigError::MissingEnvVar { ref name }) if name == "UNKNOWN_HOST"
        ));
    }

    #[test]
    fn test_branch_placeholders() {
        let ctx = TemplateContext::isolated().with_branch(Some("feature-one"));
        let expanded = ctx
            .expand("name: api${BRANCH_NAME_POSTFIX}\nhost: ${BRANCH_NAME_PREFIX}example.com")
            .expect("expand");

        assert_eq!(expanded, "name: api-feature-one\nhost: feature-one-example.com");
    }

    #[test]
    fn test_branch_placeholders_cleared_on_trunk() {
        let ctx = TemplateContext::isolated().with_branch(None);
        let expanded = ctx.expand("name: api${BRANCH_NAME_POSTFIX}").expect("expand");

        assert_eq!(expanded, "name: api");
    }

    #[test]
    fn test_unterminated_placeholder_is_kept() {
        let ctx = TemplateContext::isolated();
        assert_eq!(ctx.expand("value: ${OPEN").expect("expand"), "value: ${OPEN");
    }

    #[test]
    fn test_expand_env_pairs() {
        let ctx = TemplateContext::isolated()
            .with_var("DB_HOST", "db.internal")
            .with_var("TOKEN", "secret");

        let pairs = ctx
            .expand_env_pairs("DATABASE=${DB_HOST}, TOKEN ,MODE=fast,")
            .expect("pairs");

        assert_eq!(
            pairs,
            vec![
                (String::from("DATABASE"), String::from("db.internal")),
                (String::from("TOKEN"), String::from("secret")),
                (String::from("MODE"), String::from("fast")),
            ]
        );
    }

    #[test]
    fn test_expand_env_pairs_missing() {
        let ctx = TemplateContext::isolated();
        assert!(ctx.expand_env_pairs("ABSENT").is_err());
    }
}
