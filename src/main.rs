#[macro_use]
extern crate log;

use env_logger::Env;
use std::env;

mod check;
mod circleci;
mod config;
mod npm;
mod webhook;

pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::ClientBuilder::new().user_agent(USER_AGENT).build()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("notifier=info")).init();

    info!("Release Notifier: v{}", env!("CARGO_PKG_VERSION"));

    let client = http_client()?;
    let outcome = check::run(|key| env::var(key).ok(), &client).await?;
    info!("Done: {}", outcome);

    Ok(())
}
