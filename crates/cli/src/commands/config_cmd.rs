//! `local-llm config`: Configuration management commands.

use std::path::Path;

use local_llm_config::AppConfig;

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let mut redacted = config.clone();
    if redacted.provider.api_key.is_some() {
        redacted.provider.api_key = Some("[REDACTED]".into());
    }
    if redacted.proxy.api_key.is_some() {
        redacted.proxy.api_key = Some("[REDACTED]".into());
    }

    let toml_str = toml::to_string_pretty(&redacted)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    if write_default(&config_path)? {
        println!("Wrote {}", config_path.display());
    } else {
        println!("{} already exists, leaving it alone", config_path.display());
    }
    Ok(())
}

/// Write the default config to `path` unless a file is already there.
fn write_default(path: &Path) -> Result<bool, std::io::Error> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_writes_loadable_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        assert!(write_default(&path).unwrap());
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.chat.max_tool_iterations, 10);

        std::fs::write(&path, "[chat]\nmodel = \"mistral\"\n").unwrap();
        assert!(!write_default(&path).unwrap());
        assert_eq!(AppConfig::load_from(&path).unwrap().chat.model, "mistral");
    }
}
