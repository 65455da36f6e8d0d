use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "lagoon", about = "Lagoon realtime sync demo client")]
pub struct Cli {
    /// Hub endpoint the engine connects to.
    #[arg(long, env = "LAGOON_HUB_URL", default_value = "ws://127.0.0.1:8080/hub")]
    pub hub_url: String,

    /// Base URL for authoritative post reads. Without it, scheduled
    /// refreshes and reconciliation run against an empty local table.
    #[arg(long, env = "LAGOON_API_URL")]
    pub api_url: Option<String>,

    #[arg(long, env = "LAGOON_TOKEN", default_value = "")]
    pub token: String,

    #[arg(long, env = "LAGOON_DEVICE_ID", default_value = "lagoon-cli")]
    pub device_id: String,

    /// Post codes to mark visible right away, as if they were on screen.
    #[arg(long = "watch", value_name = "CODE")]
    pub watch: Vec<String>,
}
