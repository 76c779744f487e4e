//! taskforge — recursive agent task orchestrator: gateway and agent runtime.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use taskforge_core::engine::{RuntimeEngine, RuntimeSettings};
use taskforge_gateway::{AuthConfig, AuthMode, BindMode, GatewayConfig};
use taskforge_llm::{AnthropicProvider, LlmProvider};
use taskforge_store::InMemoryStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "taskforge", about = "Recursive agent task orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        #[arg(short, long, default_value_t = 8787)]
        port: u16,
        #[arg(short, long, default_value = "local")]
        bind: String,
        #[arg(short, long)]
        token: Option<String>,
        /// Weaker token that can only hit read-scoped routes (task/tree status, /active, the WS feed)
        #[arg(long)]
        read_only_token: Option<String>,
        #[arg(long)]
        no_auth: bool,
        #[arg(long)]
        seed: Option<PathBuf>,
        #[arg(long, default_value_t = 4)]
        max_concurrent_agents: usize,
        #[arg(long)]
        manual_stepping: bool,
    },
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve {
            port,
            bind,
            token,
            read_only_token,
            no_auth,
            seed,
            max_concurrent_agents,
            manual_stepping,
        }) => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "taskforge=info,tower_http=info".into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            let bind_mode = match bind.as_str() {
                "lan" | "0.0.0.0" => BindMode::Lan,
                _ => BindMode::Local,
            };
            let auth = if no_auth {
                AuthConfig { mode: AuthMode::None, token: None, read_only_token: None }
            } else {
                AuthConfig { mode: AuthMode::Token, token, read_only_token }
            };
            let config = GatewayConfig { bind: bind_mode, port, auth };

            let store = Arc::new(InMemoryStore::new());
            if let Some(seed_path) = seed {
                let data = taskforge_store::load_seed(&seed_path)?;
                store.seed(data);
            }

            let provider: Arc<dyn LlmProvider> = match std::env::var("ANTHROPIC_API_KEY") {
                Ok(key) => Arc::new(AnthropicProvider::new(key)),
                Err(_) => {
                    tracing::warn!("ANTHROPIC_API_KEY not set, using fake provider that refuses every call");
                    Arc::new(taskforge_llm::FakeProvider::new(vec![]))
                }
            };

            let tools = Arc::new(taskforge_tools::create_default_registry());

            let mut settings = RuntimeSettings::default();
            settings.max_concurrent_agents = max_concurrent_agents;
            settings.manual_stepping_enabled = manual_stepping;

            let (engine, push_rx): (Arc<RuntimeEngine>, _) = RuntimeEngine::new(store, provider, tools, settings);

            let engine_for_run = engine.clone();
            tokio::spawn(async move { engine_for_run.run().await });

            taskforge_gateway::start_gateway(config, engine, push_rx).await?;
        }

        Some(Commands::Version) | None => {
            println!("taskforge v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
