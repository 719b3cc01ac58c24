//! Cluster-join client: asks an existing node to add this node to the
//! cluster, following leader redirects and retrying across candidates.

use std::net::IpAddr;
use std::time::Duration;

use thiserror::Error;

/// Upper bound on consecutive 301 redirects while joining.
const MAX_JOIN_REDIRECT: usize = 21;

#[derive(Error, Debug)]
pub enum JoinError {
    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unauthorized")]
    Unauthorized,

    #[error("maximum leader redirect limit exceeded")]
    RedirectLimit,

    #[error("redirect response missing Location header")]
    MissingLocation,

    #[error("server responded with: {0}")]
    Status(String),

    #[error("failed to join cluster at any of {0:?}")]
    Exhausted(Vec<String>),
}

/// Attempt to join the cluster through any of `join_addrs`, identifying
/// this node as `id` reachable at Raft address `addr`. Runs `attempts`
/// rounds over the candidates with `interval` between rounds. Returns the
/// URL that accepted the join.
pub async fn join(
    src_ip: Option<IpAddr>,
    join_addrs: &[String],
    id: &str,
    addr: &str,
    voter: bool,
    attempts: usize,
    interval: Duration,
) -> Result<String, JoinError> {
    let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
    if let Some(ip) = src_ip {
        builder = builder.local_address(ip);
    }
    let client = builder.build()?;

    let body = serde_json::json!({ "id": id, "addr": addr, "voter": voter });

    for attempt in 0..attempts {
        for join_addr in join_addrs {
            match join_once(&client, join_addr, &body).await {
                Ok(url) => return Ok(url),
                // An auth failure will not improve with retries.
                Err(JoinError::Unauthorized) => return Err(JoinError::Unauthorized),
                Err(e) => {
                    tracing::warn!(%join_addr, attempt, "join failed: {e}");
                }
            }
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(JoinError::Exhausted(join_addrs.to_vec()))
}

async fn join_once(
    client: &reqwest::Client,
    join_addr: &str,
    body: &serde_json::Value,
) -> Result<String, JoinError> {
    let mut url = join_url(join_addr);
    let mut redirects = 0usize;
    loop {
        let resp = client.post(&url).json(body).send().await?;
        let status = resp.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(JoinError::Unauthorized);
        }
        if status == reqwest::StatusCode::MOVED_PERMANENTLY {
            redirects += 1;
            if redirects > MAX_JOIN_REDIRECT {
                return Err(JoinError::RedirectLimit);
            }
            url = resp
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or(JoinError::MissingLocation)?
                .to_string();
            continue;
        }
        if status.is_success() {
            return Ok(url);
        }
        return Err(JoinError::Status(status.to_string()));
    }
}

/// Ensure the join target has a scheme and the `/join` path.
fn join_url(addr: &str) -> String {
    let base = if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    };
    format!("{}/join", base.trim_end_matches('/'))
}
