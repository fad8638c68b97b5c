use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://circleci.com/api/v1.1";

#[derive(Error, Debug)]
pub enum CircleCiError {
    #[error("Network error related to `reqwest`.")]
    Network(#[from] reqwest::Error),

    #[error("Failed to parse JSON from CircleCI response.")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Last successful build has no start time.")]
    MissingStartTime,
}

#[derive(Deserialize)]
struct Build {
    start_time: Option<String>,
}

pub struct CircleCi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl CircleCi {
    pub fn new(client: reqwest::Client, base_url: &str, token: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').into(),
            token: token.into(),
        }
    }

    /// Start time of the most recent successful build of `repo`,
    /// or `None` if the project has never built successfully.
    ///
    /// The token travels in the query string, so URLs are stripped from
    /// request errors before they are returned.
    pub async fn last_build_start_time(&self, repo: &str) -> Result<Option<String>, CircleCiError> {
        info!("Getting last build time of {}", repo);

        let body = self
            .client
            .get(&format!("{}/project/github/{}", self.base_url, repo))
            .query(&[
                ("circle-token", &*self.token),
                ("filter", "successful"),
                ("limit", "1"),
            ])
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(reqwest::Error::without_url)?
            .error_for_status()
            .map_err(reqwest::Error::without_url)?
            .text()
            .await
            .map_err(reqwest::Error::without_url)?;
        debug!("CircleCI responded with {} bytes", body.len());

        let builds = serde_json::from_str::<Vec<Build>>(&body)?;
        info!("CircleCI returned {} successful build(s)", builds.len());

        match builds.into_iter().next() {
            Some(Build {
                start_time: Some(start_time),
            }) => {
                info!("Got last build time of {}", start_time);
                Ok(Some(start_time))
            }
            Some(Build { start_time: None }) => Err(CircleCiError::MissingStartTime),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
fn builds_query() -> mockito::Matcher {
    use mockito::Matcher;

    Matcher::AllOf(vec![
        Matcher::UrlEncoded("circle-token".into(), "secret".into()),
        Matcher::UrlEncoded("filter".into(), "successful".into()),
        Matcher::UrlEncoded("limit".into(), "1".into()),
    ])
}

#[tokio::test]
async fn test_first_build_is_selected() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/project/github/acme/widget")
        .match_query(builds_query())
        .match_header("accept", "application/json")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"[
                {"build_num": 42, "start_time": "2024-01-03T10:00:00.000Z"},
                {"build_num": 41, "start_time": "2024-01-02T10:00:00.000Z"},
                {"build_num": 40, "start_time": null}
            ]"#,
        )
        .create_async()
        .await;

    let circleci = CircleCi::new(crate::http_client().unwrap(), &server.url(), "secret");
    let start_time = circleci.last_build_start_time("acme/widget").await.unwrap();

    mock.assert_async().await;
    assert_eq!(start_time.as_deref(), Some("2024-01-03T10:00:00.000Z"));
}

#[tokio::test]
async fn test_no_previous_build() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/project/github/acme/widget")
        .match_query(builds_query())
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;

    let circleci = CircleCi::new(crate::http_client().unwrap(), &server.url(), "secret");
    let start_time = circleci.last_build_start_time("acme/widget").await.unwrap();

    mock.assert_async().await;
    assert!(start_time.is_none());
}

#[tokio::test]
async fn test_build_without_start_time() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/project/github/acme/widget")
        .match_query(builds_query())
        .with_status(200)
        .with_body(r#"[{"build_num": 7}]"#)
        .create_async()
        .await;

    let circleci = CircleCi::new(crate::http_client().unwrap(), &server.url(), "secret");
    let result = circleci.last_build_start_time("acme/widget").await;

    assert!(matches!(result, Err(CircleCiError::MissingStartTime)));
}

#[tokio::test]
async fn test_unauthorized() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/project/github/acme/widget")
        .match_query(builds_query())
        .with_status(401)
        .with_body(r#"{"message": "You must log in first."}"#)
        .create_async()
        .await;

    let circleci = CircleCi::new(crate::http_client().unwrap(), &server.url(), "secret");
    let result = circleci.last_build_start_time("acme/widget").await;

    match result {
        Err(CircleCiError::Network(e)) => {
            assert_eq!(e.status(), Some(reqwest::StatusCode::UNAUTHORIZED));
            assert!(e.url().is_none());
            assert!(!e.to_string().contains("secret"));
        }
        _ => panic!("expected a network error"),
    }
}
