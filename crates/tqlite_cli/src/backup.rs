use std::path::Path;

use anyhow::{Context, Result};
use reqwest::Method;

use crate::client::AdminClient;
use crate::Cli;

/// Download a snapshot of the database into `file`.
pub async fn backup(client: &AdminClient, cli: &Cli, file: &Path, fmt: &str) -> Result<()> {
    let mut url = cli.base_url("db/backup");
    if fmt == "sql" {
        url.push_str("?fmt=sql");
    }

    let resp = client.request(Method::GET, &url, None).await?;
    let data = resp.bytes().await?;
    tokio::fs::write(file, &data)
        .await
        .with_context(|| format!("writing {}", file.display()))?;
    println!("backup written to {} ({} bytes)", file.display(), data.len());
    Ok(())
}
