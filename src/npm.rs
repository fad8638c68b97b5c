use semver::Version;
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://registry.npmjs.org";

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Network error related to `reqwest`.")]
    Network(#[from] reqwest::Error),

    #[error("Failed to parse JSON from npm registry response.")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Package `{0}` has no published semver versions.")]
    NoVersions(String),
}

#[derive(Deserialize)]
struct Packument {
    versions: HashMap<String, serde_json::Value>,
    #[serde(default)]
    time: HashMap<String, serde_json::Value>,
}

#[derive(Debug)]
pub struct PackageRelease {
    pub version: String,
    /// Absent when the registry's `time` map has no entry for `version`.
    pub published_at: Option<String>,
}

pub struct Registry {
    client: reqwest::Client,
    base_url: String,
}

impl Registry {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').into(),
        }
    }

    pub async fn latest_release(&self, package: &str) -> Result<PackageRelease, RegistryError> {
        info!("Getting latest version of {}", package);

        let body = self
            .client
            .get(&format!("{}/{}", self.base_url, encode_package_name(package)))
            .header("Accept", "application/json")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        debug!("npm registry responded with {} bytes", body.len());

        let Packument { versions, time } = serde_json::from_str(&body)?;
        let version = latest_version(versions.keys())
            .ok_or_else(|| RegistryError::NoVersions(package.to_string()))?;
        info!("Got latest version {}", version);

        let published_at = time
            .get(&version)
            .and_then(|published_at| published_at.as_str())
            .map(String::from);

        Ok(PackageRelease {
            version,
            published_at,
        })
    }
}

/// Scoped packages are requested as `@scope%2Fname`.
fn encode_package_name(package: &str) -> String {
    if package.starts_with('@') {
        package.replace('/', "%2F")
    } else {
        package.to_string()
    }
}

/// Picks the highest version by semver precedence, returning it as it was
/// spelled by the registry. Strings that aren't valid semver are skipped.
/// Build metadata does not take part in the ordering.
pub fn latest_version<I, S>(versions: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    versions
        .into_iter()
        .filter_map(|raw| match Version::parse(raw.as_ref()) {
            Ok(version) => Some((version, raw.as_ref().to_string())),
            Err(e) => {
                warn!("Skipping invalid version {:?}: {}", raw.as_ref(), e);
                None
            }
        })
        .max_by(|(a, _), (b, _)| a.cmp_precedence(b))
        .map(|(_, raw)| raw)
}

#[cfg(test)]
use rstest::rstest;

#[cfg(test)]
#[rstest]
#[case(&["1.9.0", "1.10.0"], Some("1.10.0"))]
#[case(&["1.9.0", "1.10.0", "2.0.0-beta"], Some("2.0.0-beta"))]
#[case(&["2.0.0", "2.0.0-beta", "1.10.0"], Some("2.0.0"))]
#[case(&["2.0.0-beta.2", "2.0.0-beta.10", "2.0.0-alpha"], Some("2.0.0-beta.10"))]
#[case(&["0.0.1", "latest", "0.0.2"], Some("0.0.2"))]
#[case(&["1.0.0+zeta", "1.0.0+alpha"], Some("1.0.0+alpha"))]
#[case(&["1.0.0+zeta", "1.0.0-rc.1"], Some("1.0.0+zeta"))]
#[case(&["1.0.0+zeta", "1.0.1"], Some("1.0.1"))]
#[case(&["not-a-version"], None)]
#[case(&[], None)]
fn test_latest_version(#[case] versions: &[&str], #[case] expected: Option<&str>) {
    assert_eq!(latest_version(versions).as_deref(), expected);
}

#[test]
fn test_encode_package_name() {
    assert_eq!(encode_package_name("lodash"), "lodash");
    assert_eq!(encode_package_name("@types/node"), "@types%2Fnode");
}

#[tokio::test]
async fn test_latest_release() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/widget")
        .match_header("accept", "application/json")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "name": "widget",
                "versions": {
                    "1.9.0": {},
                    "1.10.0": {},
                    "1.2.0": {}
                },
                "time": {
                    "created": "2023-01-01T00:00:00.000Z",
                    "modified": "2024-01-05T00:00:00.000Z",
                    "1.2.0": "2023-03-01T00:00:00.000Z",
                    "1.9.0": "2024-01-04T00:00:00.000Z",
                    "1.10.0": "2024-01-02T00:00:00.000Z"
                }
            }"#,
        )
        .create_async()
        .await;

    let registry = Registry::new(crate::http_client().unwrap(), &server.url());
    let release = registry.latest_release("widget").await.unwrap();

    mock.assert_async().await;
    assert_eq!(release.version, "1.10.0");
    assert_eq!(release.published_at.as_deref(), Some("2024-01-02T00:00:00.000Z"));
}

#[tokio::test]
async fn test_latest_release_without_publish_time() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/@acme%2Fwidget")
        .with_status(200)
        .with_body(r#"{"versions": {"3.0.0": {}}}"#)
        .create_async()
        .await;

    let registry = Registry::new(crate::http_client().unwrap(), &server.url());
    let release = registry.latest_release("@acme/widget").await.unwrap();

    assert_eq!(release.version, "3.0.0");
    assert!(release.published_at.is_none());
}

#[tokio::test]
async fn test_package_not_found() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/missing")
        .with_status(404)
        .with_body(r#"{"error": "Not found"}"#)
        .create_async()
        .await;

    let registry = Registry::new(crate::http_client().unwrap(), &server.url());
    let result = registry.latest_release("missing").await;

    assert!(matches!(result, Err(RegistryError::Network(_))));
}

#[tokio::test]
async fn test_package_without_versions() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/empty")
        .with_status(200)
        .with_body(r#"{"versions": {}, "time": {}}"#)
        .create_async()
        .await;

    let registry = Registry::new(crate::http_client().unwrap(), &server.url());
    let result = registry.latest_release("empty").await;

    assert!(matches!(result, Err(RegistryError::NoVersions(_))));
}
