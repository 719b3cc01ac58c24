//! Shared HTTP plumbing for the admin subcommands: manual, bounded
//! redirect-following toward the cluster leader.

use reqwest::header::LOCATION;
use reqwest::{Method, StatusCode};
use thiserror::Error;

/// Maximum number of consecutive leader redirects to follow.
pub const MAX_REDIRECT: usize = 21;

#[derive(Error, Debug)]
pub enum AdminError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("maximum leader redirect limit exceeded")]
    RedirectLimit,

    #[error("redirect response missing Location header")]
    MissingLocation,

    #[error("server responded with: {0}")]
    Status(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub struct AdminClient {
    http: reqwest::Client,
}

impl AdminClient {
    pub fn new() -> Result<AdminClient, AdminError> {
        // Redirects are followed manually: a 301 here means "go ask the
        // leader", and the chain must stay bounded and observable.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(AdminClient { http })
    }

    /// Issue `method` against `url`, following up to [`MAX_REDIRECT`]
    /// leader redirects. 401 aborts immediately; any other non-2xx,
    /// non-301 status is an error carrying the server's status line.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, AdminError> {
        let mut url = url.to_string();
        let mut redirects = 0usize;
        loop {
            let mut req = self.http.request(method.clone(), &url);
            if let Some(b) = &body {
                req = req
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(b.clone());
            }
            let resp = req.send().await?;

            match resp.status() {
                StatusCode::UNAUTHORIZED => return Err(AdminError::Unauthorized),
                StatusCode::MOVED_PERMANENTLY => {
                    redirects += 1;
                    if redirects > MAX_REDIRECT {
                        return Err(AdminError::RedirectLimit);
                    }
                    url = resp
                        .headers()
                        .get(LOCATION)
                        .and_then(|v| v.to_str().ok())
                        .ok_or(AdminError::MissingLocation)?
                        .to_string();
                }
                status if status.is_success() => return Ok(resp),
                status => return Err(AdminError::Status(status.to_string())),
            }
        }
    }
}
