//! `local-llm proxy`: Start the forwarding proxy.

use local_llm_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.proxy.port = port;
    }

    println!("Local LLM Proxy");
    println!("   Listening:  {}:{}", config.proxy.host, config.proxy.port);
    println!("   Forwarding: {}", config.proxy.target_url);
    println!("   Timeout:    {}s", config.proxy.timeout_secs);

    local_llm_proxy::start(config.proxy).await?;

    Ok(())
}
