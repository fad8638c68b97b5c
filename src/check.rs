use crate::circleci::{CircleCi, CircleCiError};
use crate::config::{Activation, Config, ConfigError};
use crate::npm::{PackageRelease, Registry, RegistryError};
use crate::webhook::Webhook;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("Config error.")]
    Config(#[from] ConfigError),

    #[error("CircleCI error.")]
    CircleCi(#[from] CircleCiError),

    #[error("Registry error.")]
    Registry(#[from] RegistryError),

    #[error("Invalid timestamp `{value}`.")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Inactive,
    NoPreviousBuild,
    UpToDate { version: String },
    Notified { version: String },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Inactive => write!(f, "not on a release branch, nothing checked"),
            Outcome::NoPreviousBuild => write!(f, "no previous successful build"),
            Outcome::UpToDate { version } => write!(f, "{} is not newer than the last build", version),
            Outcome::Notified { version } => write!(f, "announced {}", version),
        }
    }
}

/// Entry point: consults the activation gate before reading any other
/// configuration, then runs the check.
pub async fn run<F>(lookup: F, client: &reqwest::Client) -> Result<Outcome, CheckError>
where
    F: Fn(&str) -> Option<String>,
{
    let activation = Activation::from_lookup(&lookup);
    activation.log();
    if !activation.is_active() {
        return Ok(Outcome::Inactive);
    }

    let config = Config::from_lookup(&lookup)?;
    execute(&config, client).await
}

pub async fn execute(config: &Config, client: &reqwest::Client) -> Result<Outcome, CheckError> {
    info!("Running check!");

    let circleci = CircleCi::new(client.clone(), &config.circle_api_url, &config.circle_token);
    let build_started = match circleci.last_build_start_time(&config.repo).await? {
        Some(build_started) => build_started,
        None => {
            info!("{} has never built successfully, nothing to compare.", config.repo);
            return Ok(Outcome::NoPreviousBuild);
        }
    };

    let registry = Registry::new(client.clone(), &config.registry_url);
    let PackageRelease {
        version,
        published_at,
    } = registry.latest_release(&config.package_name).await?;

    if !is_newer(published_at.as_deref(), &build_started)? {
        info!("Not sending slack message");
        return Ok(Outcome::UpToDate { version });
    }

    info!("Sending slack message");
    let webhook = Webhook::new(client.clone(), &config.webhook_url);
    let text = announcement(&config.package_name, &version, &config.releases_url);
    if let Err(e) = webhook.send_message(text).await {
        error!("Failed to deliver slack message: {}", e);
    }

    Ok(Outcome::Notified { version })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, CheckError> {
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|source| CheckError::Timestamp {
            value: value.to_string(),
            source,
        })
}

/// Whether the release was published strictly after the build started.
/// A release without a publish time is never newer.
fn is_newer(published_at: Option<&str>, build_started: &str) -> Result<bool, CheckError> {
    let published_at = match published_at {
        Some(published_at) => parse_timestamp(published_at)?,
        None => {
            warn!("Registry has no publish time for the latest version.");
            return Ok(false);
        }
    };

    Ok(published_at > parse_timestamp(build_started)?)
}

fn announcement(package: &str, version: &str, releases_url: &str) -> String {
    format!(
        ":sparkles: *Today is a magical day* :sparkles:

A new version of *{}* was just published! ({})

:sun_with_face: :rainbow: :danceman: :soon: {}",
        package, version, releases_url
    )
}

#[cfg(test)]
use rstest::rstest;

#[cfg(test)]
#[rstest]
#[case(Some("2024-01-02T00:00:00Z"), "2024-01-01T00:00:00Z", true)]
#[case(Some("2024-01-01T00:00:00Z"), "2024-01-01T00:00:00Z", false)]
#[case(Some("2023-12-31T23:59:59Z"), "2024-01-01T00:00:00Z", false)]
#[case(Some("2024-01-01T00:00:00.001Z"), "2024-01-01T00:00:00.000Z", true)]
#[case(Some("2024-01-01T02:00:00+01:00"), "2024-01-01T00:30:00Z", true)]
#[case(None, "2024-01-01T00:00:00Z", false)]
fn test_is_newer(
    #[case] published_at: Option<&str>,
    #[case] build_started: &str,
    #[case] expected: bool,
) {
    assert_eq!(is_newer(published_at, build_started).unwrap(), expected);
}

#[test]
fn test_is_newer_rejects_garbage() {
    let result = is_newer(Some("yesterday"), "2024-01-01T00:00:00Z");
    assert!(matches!(result, Err(CheckError::Timestamp { value, .. }) if value == "yesterday"));
}

#[test]
fn test_announcement() {
    let text = announcement("widget", "2.0.0", "https://github.com/acme/widget/releases");
    assert!(text.starts_with(":sparkles: *Today is a magical day* :sparkles:\n\n"));
    assert!(text.contains("A new version of *widget* was just published! (2.0.0)"));
    assert!(text.ends_with(":soon: https://github.com/acme/widget/releases"));
}

#[cfg(test)]
struct Remote {
    server: mockito::ServerGuard,
}

#[cfg(test)]
impl Remote {
    async fn new() -> Self {
        Self {
            server: mockito::Server::new_async().await,
        }
    }

    fn lookup(&self, branch: &str) -> impl Fn(&str) -> Option<String> {
        let url = self.server.url();
        let hook_url = format!("{}/hooks/release", url);
        crate::config::lookup_from(&[
            ("CIRCLE_BRANCH", branch),
            ("OWN_GITHUB_REPO", "acme/widget"),
            ("CIRCLE_TOKEN", "secret"),
            ("PACKAGE_NAME", "widget"),
            ("SLACK_WEBHOOK_URL", hook_url.as_str()),
            ("RELEASES_URL", "https://github.com/acme/widget/releases"),
            ("CIRCLE_API_URL", url.as_str()),
            ("NPM_REGISTRY_URL", url.as_str()),
        ])
    }

    async fn builds(&mut self, body: &str, expected: usize) -> mockito::Mock {
        self.server
            .mock("GET", "/project/github/acme/widget")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(body)
            .expect(expected)
            .create_async()
            .await
    }

    async fn packument(&mut self, published_at: &str, expected: usize) -> mockito::Mock {
        let body = serde_json::json!({
            "name": "widget",
            "versions": { "1.9.0": {}, "1.10.0": {}, "2.0.0-beta": {} },
            "time": {
                "1.9.0": "2023-06-01T00:00:00Z",
                "1.10.0": "2023-07-01T00:00:00Z",
                "2.0.0-beta": published_at
            }
        });
        self.server
            .mock("GET", "/widget")
            .with_status(200)
            .with_body(body.to_string())
            .expect(expected)
            .create_async()
            .await
    }

    async fn hook(&mut self, expected: usize) -> mockito::Mock {
        use mockito::Matcher;

        self.server
            .mock("POST", "/hooks/release")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r"\*widget\*".into()),
                Matcher::Regex(r"\(2\.0\.0-beta\)".into()),
            ]))
            .with_status(200)
            .with_body("ok")
            .expect(expected)
            .create_async()
            .await
    }
}

#[tokio::test]
async fn test_newer_release_is_announced() {
    let mut remote = Remote::new().await;
    let builds = remote
        .builds(r#"[{"start_time": "2024-01-01T00:00:00Z"}]"#, 1)
        .await;
    let packument = remote.packument("2024-01-02T00:00:00Z", 1).await;
    let hook = remote.hook(1).await;

    let client = crate::http_client().unwrap();
    let outcome = run(remote.lookup("master"), &client).await.unwrap();

    builds.assert_async().await;
    packument.assert_async().await;
    hook.assert_async().await;
    assert_eq!(
        outcome,
        Outcome::Notified {
            version: "2.0.0-beta".into()
        }
    );
}

#[tokio::test]
async fn test_same_time_is_not_announced() {
    let mut remote = Remote::new().await;
    remote
        .builds(r#"[{"start_time": "2024-01-01T00:00:00Z"}]"#, 1)
        .await;
    remote.packument("2024-01-01T00:00:00Z", 1).await;
    let hook = remote.hook(0).await;

    let client = crate::http_client().unwrap();
    let outcome = run(remote.lookup("master"), &client).await.unwrap();

    hook.assert_async().await;
    assert_eq!(
        outcome,
        Outcome::UpToDate {
            version: "2.0.0-beta".into()
        }
    );
}

#[tokio::test]
async fn test_first_build_ends_quietly() {
    let mut remote = Remote::new().await;
    remote.builds("[]", 1).await;
    let packument = remote.packument("2024-01-02T00:00:00Z", 0).await;
    let hook = remote.hook(0).await;

    let client = crate::http_client().unwrap();
    let outcome = run(remote.lookup("master"), &client).await.unwrap();

    packument.assert_async().await;
    hook.assert_async().await;
    assert_eq!(outcome, Outcome::NoPreviousBuild);
}

#[tokio::test]
async fn test_other_branch_makes_no_requests() {
    let mut remote = Remote::new().await;
    let builds = remote.builds("[]", 0).await;
    let packument = remote.packument("2024-01-02T00:00:00Z", 0).await;
    let hook = remote.hook(0).await;

    let client = crate::http_client().unwrap();
    let outcome = run(remote.lookup("feature/docs"), &client).await.unwrap();

    builds.assert_async().await;
    packument.assert_async().await;
    hook.assert_async().await;
    assert_eq!(outcome, Outcome::Inactive);
}

#[tokio::test]
async fn test_registry_failure_is_fatal() {
    let mut remote = Remote::new().await;
    remote
        .builds(r#"[{"start_time": "2024-01-01T00:00:00Z"}]"#, 1)
        .await;
    remote
        .server
        .mock("GET", "/widget")
        .with_status(200)
        .with_body("<html>oops</html>")
        .create_async()
        .await;
    let hook = remote.hook(0).await;

    let client = crate::http_client().unwrap();
    let result = run(remote.lookup("master"), &client).await;

    hook.assert_async().await;
    assert!(matches!(
        result,
        Err(CheckError::Registry(RegistryError::JsonParsing(_)))
    ));
}

#[tokio::test]
async fn test_circleci_failure_hides_token() {
    let mut remote = Remote::new().await;
    remote
        .server
        .mock("GET", "/project/github/acme/widget")
        .match_query(mockito::Matcher::Any)
        .with_status(401)
        .with_body(r#"{"message": "You must log in first."}"#)
        .create_async()
        .await;

    let client = crate::http_client().unwrap();
    let err = run(remote.lookup("master"), &client).await.unwrap_err();
    let report = format!("{:?}", anyhow::Error::from(err));

    assert!(report.contains("401"));
    assert!(!report.contains("secret"));
    assert_eq!(report.matches("Network error related to `reqwest`.").count(), 1);
}
