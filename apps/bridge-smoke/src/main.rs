use std::{env, sync::Arc};

use bridge_client::{BridgeClient, BridgeClientConfig, StaticTokenProvider, TokenProvider};

mod logging;

#[tokio::main]
async fn main() {
    logging::init();

    let base_url =
        env::var("BRIDGE_URL").unwrap_or_else(|_| "https://bridge.example.org".to_owned());
    let token = env::var("BRIDGE_TOKEN")
        .ok()
        .filter(|value| !value.trim().is_empty());
    let api_key = env::var("BRIDGE_API_KEY")
        .ok()
        .filter(|value| !value.trim().is_empty());

    let token_provider: Arc<dyn TokenProvider> = Arc::new(match token {
        Some(token) => StaticTokenProvider::new(token),
        None => StaticTokenProvider::none(),
    });

    let mut config = BridgeClientConfig::new(base_url, token_provider);
    if let Some(api_key) = api_key {
        config = config.with_api_key(api_key);
    }

    let client = BridgeClient::new(config);
    match client.health().await {
        Ok(health) => {
            println!(
                "Bridge '{}' version {} reachable (ok={}, time={}).",
                health.service, health.version, health.ok, health.time
            );
            println!("Set BRIDGE_TOKEN to exercise authenticated endpoints.");
        }
        Err(err) => {
            eprintln!("Failed to reach bridge: {err}");
            std::process::exit(1);
        }
    }
}
