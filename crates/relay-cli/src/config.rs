//! Configuration file support

use relay_ai::{Model, providers};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Model used when neither the config nor the command line names one
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

/// How finished tool results are approved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// Ask before every continuation
    #[default]
    Manual,
    /// Continue as soon as the response ends
    Auto,
}

/// MCP server to use as the tool backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Configuration for relay
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default model to use
    pub model: Option<String>,
    /// API base URL
    pub base_url: Option<String>,
    /// Maximum output tokens per response
    pub max_tokens: Option<u32>,
    /// System prompt sent with every request
    pub system_prompt: Option<String>,
    /// Approval mode
    pub approval: ApprovalMode,
    /// API key (alternative to ANTHROPIC_API_KEY)
    pub api_key: Option<String>,
    /// Tool backend
    pub mcp: Option<McpConfig>,
    /// Tool names always served by the local store
    pub intercept: Vec<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("relay")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("RELAY_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            model: Some(DEFAULT_MODEL.to_string()),
            ..Default::default()
        };

        default_config.save()?;
        Ok(path)
    }

    /// Get the API key, checking config then env
    pub fn get_api_key(&self) -> Option<String> {
        providers::get_api_key(self.api_key.as_deref(), API_KEY_ENV).ok()
    }

    /// Build the model definition, preferring `model_override`
    pub fn model(&self, model_override: Option<String>) -> Model {
        let id = model_override
            .or_else(|| self.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let mut model = Model::anthropic(id);
        if let Some(ref base_url) = self.base_url {
            model.base_url = base_url.clone();
        }
        if let Some(max_tokens) = self.max_tokens {
            model.max_tokens = max_tokens;
        }
        model
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# relay configuration file
# Place at ~/.config/relay/config.toml (Linux/Mac) or %APPDATA%\relay\config.toml (Windows)

# Default model to use
model = "claude-sonnet-4-5-20250929"

# API endpoint and output limit (optional)
# base_url = "https://api.anthropic.com"
# max_tokens = 4096

# System prompt (optional)
# system_prompt = "You are a careful coding assistant."

# Approval mode for tool results: "manual" or "auto"
approval = "manual"

# Tool names always served by the built-in in-memory editor
# intercept = ["str_replace_editor"]

# API key (optional - ANTHROPIC_API_KEY is used otherwise)
# api_key = "sk-ant-..."

# MCP server used as the tool backend (optional)
# Without one, relay offers its built-in in-memory editor
# [mcp]
# command = "your-mcp-server"
# args = ["--root", "."]
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(example_config()).unwrap();
        assert_eq!(config.model.as_deref(), Some(DEFAULT_MODEL));
        assert_eq!(config.approval, ApprovalMode::Manual);
        assert!(config.mcp.is_none());
        assert!(config.api_key.is_none());
        assert!(config.intercept.is_empty());
    }

    #[test]
    fn test_mcp_section() {
        let config: Config = toml::from_str(
            r#"
[mcp]
command = "mcp-server"
args = ["--root", "."]
"#,
        )
        .unwrap();
        assert_eq!(
            config.mcp,
            Some(McpConfig {
                command: "mcp-server".into(),
                args: vec!["--root".into(), ".".into()],
            })
        );
    }

    #[test]
    fn test_empty_config_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.model.is_none());
        assert!(config.mcp.is_none());
        assert_eq!(config.approval, ApprovalMode::Manual);
    }

    #[test]
    fn test_auto_approval_and_intercept() {
        let config: Config = toml::from_str(
            r#"
approval = "auto"
intercept = ["str_replace_editor"]
"#,
        )
        .unwrap();
        assert_eq!(config.approval, ApprovalMode::Auto);
        assert_eq!(config.intercept, vec!["str_replace_editor".to_string()]);
    }

    #[test]
    fn test_model_overrides() {
        let config = Config {
            model: Some("from-config".into()),
            base_url: Some("http://localhost:8080".into()),
            max_tokens: Some(1024),
            ..Default::default()
        };
        let model = config.model(None);
        assert_eq!(model.id, "from-config");
        assert_eq!(model.base_url, "http://localhost:8080");
        assert_eq!(model.max_tokens, 1024);

        assert_eq!(config.model(Some("from-flag".into())).id, "from-flag");
        assert_eq!(Config::default().model(None).id, DEFAULT_MODEL);
    }

    #[test]
    fn test_config_key_wins() {
        let config = Config {
            api_key: Some("sk-config".into()),
            ..Default::default()
        };
        assert_eq!(config.get_api_key().as_deref(), Some("sk-config"));
    }
}
