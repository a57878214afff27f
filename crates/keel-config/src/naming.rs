//! Resource name templates.
//!
//! Physical resource names are derived from templates such as
//! `${org}-foundation-${stack}-lb-sg` so that re-running a build against the
//! same stack always addresses the same resources.
//!
//! Supported variables:
//! - `${org}` - Organization the stacks belong to
//! - `${project}` - Project name from keel.kdl
//! - `${stack}` - Name of the stack being built
//! - `${foundation}` - Foundation stack an application stack binds to
//! - any extra variable added with [`NameContext::with_var`]

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

// Regex for matching ${...} variables
static VAR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)\}").unwrap());

/// Variables available to name templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameContext {
    pub org: String,
    pub project: String,
    pub stack: String,
    pub foundation: Option<String>,
    pub custom: HashMap<String, String>,
}

impl NameContext {
    pub fn new(
        org: impl Into<String>,
        project: impl Into<String>,
        stack: impl Into<String>,
    ) -> Self {
        Self {
            org: org.into(),
            project: project.into(),
            stack: stack.into(),
            foundation: None,
            custom: HashMap::new(),
        }
    }

    pub fn with_foundation(mut self, foundation: impl Into<String>) -> Self {
        self.foundation = Some(foundation.into());
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }

    /// Resolve a variable by name.
    pub fn resolve(&self, name: &str) -> Option<String> {
        match name {
            "org" => Some(self.org.clone()),
            "project" => Some(self.project.clone()),
            "stack" => Some(self.stack.clone()),
            "foundation" => self.foundation.clone(),
            other => self.custom.get(other).cloned(),
        }
    }

    /// Replace every `${var}` in `template`. Unknown variables are left untouched.
    pub fn interpolate(&self, template: &str) -> String {
        VAR_REGEX
            .replace_all(template, |caps: &regex::Captures| {
                self.resolve(&caps[1])
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Interpolate and normalize into a name most cloud APIs accept:
    /// lowercase ASCII alphanumerics and `-`, no leading/trailing or doubled dashes.
    pub fn resource_name(&self, template: &str) -> String {
        let raw = self.interpolate(template).to_ascii_lowercase();
        let mut name = String::with_capacity(raw.len());
        for c in raw.chars() {
            let c = if c.is_ascii_alphanumeric() { c } else { '-' };
            if c == '-' && (name.is_empty() || name.ends_with('-')) {
                continue;
            }
            name.push(c);
        }
        while name.ends_with('-') {
            name.pop();
        }
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_basic_vars() {
        let ctx = NameContext::new("acme", "blog", "foundation-prod");
        assert_eq!(
            ctx.interpolate("${org}-foundation-${stack}-lb-sg"),
            "acme-foundation-foundation-prod-lb-sg"
        );
        assert_eq!(ctx.interpolate("${org}/foundation/${stack}/connectionString"),
            "acme/foundation/foundation-prod/connectionString");
    }

    #[test]
    fn test_unknown_vars_are_left_untouched() {
        let ctx = NameContext::new("acme", "blog", "prod");
        assert_eq!(ctx.interpolate("${nope}-${stack}"), "${nope}-prod");
        assert_eq!(ctx.interpolate("${foundation}"), "${foundation}");
    }

    #[test]
    fn test_foundation_and_custom_vars() {
        let ctx = NameContext::new("acme", "blog", "preview-42")
            .with_foundation("shared")
            .with_var("suffix", "x1");
        assert_eq!(
            ctx.interpolate("${project}-${stack}-${foundation}-${suffix}"),
            "blog-preview-42-shared-x1"
        );
    }

    #[test]
    fn test_resource_name_is_normalized() {
        let ctx = NameContext::new("Acme Corp", "blog", "Feature_X");
        assert_eq!(ctx.resource_name("${org}--${stack}-"), "acme-corp-feature-x");
    }

    #[test]
    fn test_interpolation_is_deterministic() {
        let ctx = NameContext::new("acme", "blog", "prod");
        assert_eq!(
            ctx.resource_name("${org}-foundation-${stack}"),
            ctx.resource_name("${org}-foundation-${stack}")
        );
    }
}
