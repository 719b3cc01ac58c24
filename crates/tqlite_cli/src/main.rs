mod backup;
mod client;
mod remove;

use std::process;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Administrative client for a tqlite cluster.
#[derive(Parser, Debug)]
#[command(name = "tqlite", about = "Administrative client for a tqlite cluster")]
struct Cli {
    /// Host of any cluster node.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// HTTP API port.
    #[arg(short = 'p', long, default_value_t = 4001)]
    port: u16,

    /// URL prefix the API is served under.
    #[arg(long, default_value = "/")]
    prefix: String,

    /// URL scheme.
    #[arg(long, default_value = "http")]
    protocol: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Remove a node from the cluster.
    Remove {
        /// ID of the node to remove.
        id: String,
    },
    /// Download a snapshot of the database.
    Backup {
        /// Output file.
        file: std::path::PathBuf,

        /// Snapshot format: binary or sql.
        #[arg(long, default_value = "binary")]
        fmt: String,
    },
}

impl Cli {
    /// Full URL for an API path, e.g. `base_url("remove")` with the default
    /// flags yields `http://127.0.0.1:4001/remove`.
    fn base_url(&self, path: &str) -> String {
        format!(
            "{}://{}:{}{}{}",
            self.protocol, self.host, self.port, self.prefix, path
        )
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("tqlite: error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    tqlite_observability::init_tracing();
    let cli = Cli::parse();
    let client = client::AdminClient::new()?;

    match &cli.command {
        Command::Remove { id } => remove::remove_node(&client, &cli, id).await?,
        Command::Backup { file, fmt } => backup::backup(&client, &cli, file, fmt).await?,
    }
    Ok(())
}
