//! `local-llm health`: Check that the configured server answers.

use local_llm_config::AppConfig;
use local_llm_core::provider::Provider;
use local_llm_providers::OpenAiCompatProvider;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let provider = OpenAiCompatProvider::from_config(&config.provider)?;

    println!("Checking {} ...", provider.base_url());

    match provider.health_check().await {
        Ok(true) => {
            println!("   OK: server is reachable");
            Ok(())
        }
        Ok(false) => Err(format!("{} answered with an error status", provider.base_url()).into()),
        Err(e) => Err(format!("Cannot reach {}: {e}", provider.base_url()).into()),
    }
}
