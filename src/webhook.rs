use serde::Serialize;
use thiserror::Error;

pub struct Webhook {
    client: reqwest::Client,
    url: String,
}

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Network error related to `reqwest`.")]
    Network(#[from] reqwest::Error),
}

#[derive(Serialize)]
struct Message {
    text: String,
}

impl Webhook {
    pub fn new(client: reqwest::Client, url: &str) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Posts `text` to the webhook. Whatever the endpoint answers is not
    /// inspected; only a failure to deliver the request is reported.
    pub async fn send_message<S>(&self, text: S) -> Result<(), WebhookError>
    where
        S: Into<String>,
    {
        let response = self
            .client
            .post(&self.url)
            .json(&Message { text: text.into() })
            .send()
            .await?;
        debug!("Webhook responded with status {}", response.status());

        Ok(())
    }
}

#[tokio::test]
async fn test_send_message() {
    use mockito::Matcher;
    use serde_json::json;

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/services/T/B/X")
        .match_header("content-type", "application/json")
        .match_body(Matcher::Json(json!({ "text": "hello" })))
        .with_status(200)
        .with_body("ok")
        .expect(1)
        .create_async()
        .await;

    let webhook = Webhook::new(
        crate::http_client().unwrap(),
        &format!("{}/services/T/B/X", server.url()),
    );
    webhook.send_message("hello").await.unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn test_response_status_is_ignored() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/services/T/B/X")
        .with_status(500)
        .with_body("invalid_payload")
        .create_async()
        .await;

    let webhook = Webhook::new(
        crate::http_client().unwrap(),
        &format!("{}/services/T/B/X", server.url()),
    );

    assert!(webhook.send_message("hello").await.is_ok());
}
