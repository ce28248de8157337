use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Url;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "admission-cli")]
#[command(about = "Management CLI for the admission gate", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "ADMISSION_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gate status
    Status,
    /// Summarise tracked identities and limits
    Identities,
    /// Show bucket and activity state for one identity
    Identity {
        /// Client identity, e.g. an IP address or "unknown"
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let segments: Vec<&str> = match &cli.command {
        Commands::Status => vec!["admin", "status"],
        Commands::Identities => vec!["admin", "identities"],
        Commands::Identity { id } => vec!["admin", "identities", id.as_str()],
    };

    let res = client
        .get(admin_url(&cli.url, &segments)?)
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

/// Append percent-encoded path segments to the admin base URL.
fn admin_url(base: &str, segments: &[&str]) -> Result<Url, Box<dyn std::error::Error>> {
    let mut url = Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|_| format!("admin URL cannot be a base: {}", base))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            if !text.is_empty() {
                eprintln!("Response: {}", text);
            }
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
