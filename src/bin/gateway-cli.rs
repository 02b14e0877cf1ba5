use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Map, Value};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the service gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8000")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Gateway health and per-service status
    Health,
    /// List registered services with instance detail
    Services,
    /// Gateway, registry and session overview
    Status,
    /// Healthy and unhealthy instances
    Instances,
    /// Register a service instance
    Register {
        name: String,
        address: String,
        /// Instance weight for weighted round robin
        #[arg(short, long)]
        weight: Option<u32>,
    },
    /// Remove a service, or one of its instances with --address
    Unregister {
        name: String,
        #[arg(short, long)]
        address: Option<String>,
    },
    /// Pause or resume background health checks for a service
    Monitoring {
        name: String,
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Probe every instance now
    Probe,
    /// Load balancer counters
    Balancer,
    /// Switch the load balancing strategy
    Strategy { strategy: String },
    /// Rate limiter stats and blocked clients
    RateLimit,
    /// Lift a rate limit block
    Unblock { client: String },
    /// Open WebSocket sessions
    Sessions,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let admin = |path: &str| format!("{}/admin{}", base, path);

    let request = match cli.command {
        Commands::Health => client.get(format!("{}/health", base)),
        Commands::Services => client.get(format!("{}/services", base)),
        Commands::Status => client.get(admin("/status")),
        Commands::Instances => client.get(admin("/instances")),
        Commands::Register {
            name,
            address,
            weight,
        } => {
            let mut metadata = Map::new();
            if let Some(weight) = weight {
                metadata.insert("weight".to_string(), json!(weight));
            }
            client.post(admin("/services")).json(&json!({
                "name": name,
                "address": address,
                "metadata": metadata,
            }))
        }
        Commands::Unregister {
            name,
            address: None,
        } => client.delete(admin(&format!("/services/{}", name))),
        Commands::Unregister {
            name,
            address: Some(address),
        } => client
            .delete(admin(&format!("/services/{}/instances", name)))
            .query(&[("address", address)]),
        Commands::Monitoring { name, enabled } => client
            .put(admin(&format!("/services/{}/monitoring", name)))
            .json(&json!({ "enabled": enabled })),
        Commands::Probe => client.post(admin("/services/probe")),
        Commands::Balancer => client.get(admin("/balancer")),
        Commands::Strategy { strategy } => client
            .put(admin("/balancer/strategy"))
            .json(&json!({ "strategy": strategy })),
        Commands::RateLimit => client.get(admin("/rate-limit")),
        Commands::Unblock { client: target } => {
            client.post(admin(&format!("/rate-limit/unblock/{}", target)))
        }
        Commands::Sessions => client.get(admin("/sessions")),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    if status == reqwest::StatusCode::NO_CONTENT {
        println!("OK");
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
