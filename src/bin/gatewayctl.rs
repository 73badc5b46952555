use clap::{Parser, Subcommand};
use reqwest::StatusCode;

#[derive(Parser)]
#[command(name = "gatewayctl")]
#[command(about = "Management CLI for the function gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:80")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the liveness and readiness probes
    Status,
    /// Count other open connections
    Connections {
        /// Enter the terminating phase first, failing both probes
        #[arg(long)]
        terminate: bool,
    },
    /// Ask the gateway to stop once no other client is connected
    Stop,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Status => {
            for probe in ["livez", "readyz"] {
                let res = client.get(format!("{}/{probe}", cli.url)).send().await?;
                println!("{probe}: {}", describe_probe(res.status()));
            }
        }
        Commands::Connections { terminate } => {
            let res = client
                .get(format!("{}/openConnections", cli.url))
                .query(&[("terminate", terminate.to_string())])
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Stop => {
            let res = client.get(format!("{}/stopServer", cli.url)).send().await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

fn describe_probe(status: StatusCode) -> String {
    match status {
        StatusCode::OK => "ok".to_string(),
        StatusCode::SERVICE_UNAVAILABLE => "terminating".to_string(),
        other => format!("not ok ({other})"),
    }
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
        eprintln!("Response: {}", text);
        return Ok(());
    }

    println!("{text}");
    Ok(())
}
