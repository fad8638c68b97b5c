use crate::{circleci, npm};
use thiserror::Error;

const DEVELOPMENT: &str = "development";
const DEFAULT_BRANCH: &str = "master";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable `{0}`.")]
    Missing(&'static str),
}

/// Decides whether this invocation should do anything at all.
///
/// Checking runs only for builds of the designated branch, or locally
/// when `NODE_ENV` is `development`.
pub struct Activation {
    branch: Option<String>,
    mode: Option<String>,
    designated_branch: String,
}

impl Activation {
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            branch: lookup("CIRCLE_BRANCH"),
            mode: lookup("NODE_ENV"),
            designated_branch: lookup("NOTIFY_BRANCH")
                .filter(|branch| !branch.is_empty())
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.branch.as_deref() == Some(&*self.designated_branch)
            || self.mode.as_deref() == Some(DEVELOPMENT)
    }

    pub fn log(&self) {
        info!("CIRCLE_BRANCH {:?}", self.branch);
        info!("NODE_ENV {:?}", self.mode);
    }
}

pub struct Config {
    pub repo: String,
    pub circle_token: String,
    pub package_name: String,
    pub webhook_url: String,
    pub releases_url: String,
    pub circle_api_url: String,
    pub registry_url: String,
}

impl Config {
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        Ok(Self {
            repo: required("OWN_GITHUB_REPO")?,
            circle_token: required("CIRCLE_TOKEN")?,
            package_name: required("PACKAGE_NAME")?,
            webhook_url: required("SLACK_WEBHOOK_URL")?,
            releases_url: required("RELEASES_URL")?,
            circle_api_url: lookup("CIRCLE_API_URL")
                .unwrap_or_else(|| circleci::DEFAULT_BASE_URL.to_string()),
            registry_url: lookup("NPM_REGISTRY_URL")
                .unwrap_or_else(|| npm::DEFAULT_BASE_URL.to_string()),
        })
    }
}

#[cfg(test)]
pub(crate) fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect::<std::collections::HashMap<_, _>>();
    move |key| vars.get(key).cloned()
}

#[cfg(test)]
use rstest::rstest;

#[cfg(test)]
#[rstest]
#[case(&[("CIRCLE_BRANCH", "master")], true)]
#[case(&[("NODE_ENV", "development")], true)]
#[case(&[("CIRCLE_BRANCH", "feature/x"), ("NODE_ENV", "development")], true)]
#[case(&[("CIRCLE_BRANCH", "feature/x"), ("NODE_ENV", "production")], false)]
#[case(&[("CIRCLE_BRANCH", "main")], false)]
#[case(&[("CIRCLE_BRANCH", "main"), ("NOTIFY_BRANCH", "main")], true)]
#[case(&[("CIRCLE_BRANCH", "master"), ("NOTIFY_BRANCH", "main")], false)]
#[case(&[], false)]
fn test_activation(#[case] vars: &[(&str, &str)], #[case] expected: bool) {
    let activation = Activation::from_lookup(lookup_from(vars));
    assert_eq!(activation.is_active(), expected);
}

#[test]
fn test_config_from_lookup() {
    let config = Config::from_lookup(lookup_from(&[
        ("OWN_GITHUB_REPO", "acme/widget"),
        ("CIRCLE_TOKEN", "secret"),
        ("PACKAGE_NAME", "widget"),
        ("SLACK_WEBHOOK_URL", "https://hooks.slack.com/services/T/B/X"),
        ("RELEASES_URL", "https://github.com/acme/widget/releases"),
    ]))
    .unwrap();

    assert_eq!(config.repo, "acme/widget");
    assert_eq!(config.circle_token, "secret");
    assert_eq!(config.package_name, "widget");
    assert_eq!(config.circle_api_url, circleci::DEFAULT_BASE_URL);
    assert_eq!(config.registry_url, npm::DEFAULT_BASE_URL);
}

#[test]
fn test_config_missing_variable() {
    let result = Config::from_lookup(lookup_from(&[
        ("OWN_GITHUB_REPO", "acme/widget"),
        ("CIRCLE_TOKEN", ""),
        ("PACKAGE_NAME", "widget"),
    ]));

    assert!(matches!(result, Err(ConfigError::Missing("CIRCLE_TOKEN"))));
}
