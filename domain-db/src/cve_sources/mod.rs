use std::time::Duration;

use reqwest::blocking::Client;

pub mod nist;

/// Blocking HTTP client shared by the advisory sources. Every request made
/// through it is bounded by `timeout`.
pub(crate) fn http_client(timeout: Duration, user_agent: &str) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(Some(timeout))
        .user_agent(user_agent)
        .build()
}
