use anyhow::Result;
use reqwest::Method;

use crate::client::AdminClient;
use crate::Cli;

/// Remove the node `id` from the cluster via the target node, following
/// leader redirects as needed.
pub async fn remove_node(client: &AdminClient, cli: &Cli, id: &str) -> Result<()> {
    let url = cli.base_url("remove");
    let body = serde_json::to_vec(&serde_json::json!({ "id": id }))?;
    client.request(Method::DELETE, &url, Some(body)).await?;
    println!("node {id} removed");
    Ok(())
}
