use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("{service} API returned {status} for {url}: {body}")]
    Api {
        service: &'static str,
        status: u16,
        url: String,
        body: String,
    },

    #[error("missing config value `{0}` (set it in migrate.toml or the environment)")]
    MissingConfig(&'static str),

    #[error("{0}")]
    Usage(String),
}

/// Turn a non-success response into a `MigrateError::Api`, keeping the body for diagnosis.
pub async fn check_status(
    service: &'static str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, MigrateError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().to_string();
    let body = resp.text().await.unwrap_or_default();
    Err(MigrateError::Api {
        service,
        status: status.as_u16(),
        url,
        body,
    })
}
