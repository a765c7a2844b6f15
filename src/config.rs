use clap::{Parser, Subcommand};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HistoryConfig {
    pub connection_string: String,
    pub pool_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub backend: String, // "gemini", "remote", or "ollama"
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_secs: u64,
}

/// Settings used by the interactive `ask` client.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub data_dir: String,
    /// External speech-to-text program; each stdout line is a transcript chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dictation_command: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub web: WebConfig,
    pub llm: LlmConfig,
    pub history: HistoryConfig,
    pub auth: AuthConfig,
    pub client: ClientConfig,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Interactive terminal client talking to a running server
    Ask {
        /// Server base URL, overrides client.server_url
        #[arg(long)]
        server: Option<String>,
    },
    /// Mint a bearer token for the history endpoints
    IssueToken {
        #[arg(long)]
        user_id: String,
    },
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        // Built-in defaults are the lowest layer
        let mut config_builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/nl-sql/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // NLSQL__LLM__API_KEY=... style overrides
        config_builder = config_builder.add_source(
            Environment::with_prefix("NLSQL")
                .prefix_separator("__")
                .separator("__"),
        );

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(Command::Ask { server: Some(server) }) = &args.command {
            config.client.server_url = server.clone();
        }

        config.apply_legacy_env();

        Ok(config)
    }

    /// Honour the bare variable names older deployments export.
    fn apply_legacy_env(&mut self) {
        if self.llm.api_key.is_none() && self.llm.backend == "gemini" {
            self.llm.api_key = std::env::var("GEMINI_API_KEY").ok();
        }
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            if !secret.is_empty() {
                self.auth.jwt_secret = secret;
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 3001,
            },
            llm: LlmConfig {
                backend: "gemini".to_string(),
                model: "gemini-2.0-flash".to_string(),
                api_key: None,
                api_url: None,
            },
            history: HistoryConfig {
                connection_string: "nl-sql-history.duckdb".to_string(),
                pool_size: 5,
            },
            auth: AuthConfig {
                jwt_secret: "change-me".to_string(),
                token_ttl_secs: 60 * 60 * 24,
            },
            client: ClientConfig {
                server_url: "http://127.0.0.1:3001".to_string(),
                data_dir: ".nl-sql".to_string(),
                dictation_command: None,
            },
        }
    }
}
