use crate::config::{
    llm::{CompletionTokenPolicy, LLMConfiguration},
    seed::{UserSeed, WorkspaceSeed},
};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;

/// Deployment profile selecting the baseline defaults.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    #[default]
    Dev,
    Test,
    Prod,
}

impl FromStr for Profile {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Dev),
            "test" => Ok(Self::Test),
            "prod" | "production" => Ok(Self::Prod),
            other => Err(ConfigError::InvalidValue {
                key: "profile".into(),
                message: format!("unknown profile '{other}'"),
            }),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CorsConfig {
    /// Empty means any origin
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allow_credentials: false,
            max_age_seconds: 600,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_id_header: String,
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3001,
            request_id_header: "x-request-id".into(),
            cors: CorsConfig::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    /// JSON-lines file receiving telemetry events; events only go to tracing when unset
    pub event_log_path: Option<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct FeatureFlags {
    /// Enforces bearer-token identity and per-user daily quotas
    pub multi_user_mode: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ChatConfig {
    /// Stored exchanges replayed as prompt context when a workspace sets no limit
    pub history_limit: usize,
    /// Frames buffered between the relay task and the response body.
    ///
    /// At 1 a write completes only once the body has taken the previous
    /// frame. Larger values let writes return before frames reach the socket.
    pub stream_buffer: usize,
    pub completion_token_policy: CompletionTokenPolicy,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_limit: 20,
            stream_buffer: 1,
            completion_token_policy: CompletionTokenPolicy::PreferUpstream,
        }
    }
}

/// The main configuration structure for the chat relay server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub profile: Profile,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub features: FeatureFlags,
    pub chat: ChatConfig,
    pub llm: LLMConfiguration,
    pub workspaces: Vec<WorkspaceSeed>,
    pub users: Vec<UserSeed>,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_for_profile(Profile::Dev)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("unsupported configuration format '{extension}'; use yaml, json or toml")]
    UnsupportedFormat { extension: String },

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
}

impl Config {
    /// Baseline configuration for a profile.
    #[must_use]
    pub fn default_for_profile(profile: Profile) -> Self {
        let logging = match profile {
            Profile::Dev => LoggingConfig {
                level: "debug".into(),
                format: LogFormat::Text,
                event_log_path: None,
            },
            Profile::Test => LoggingConfig {
                level: "warn".into(),
                format: LogFormat::Text,
                event_log_path: None,
            },
            Profile::Prod => LoggingConfig {
                level: "info".into(),
                format: LogFormat::Json,
                event_log_path: Some(PathBuf::from("logs/events.jsonl")),
            },
        };

        let server = match profile {
            Profile::Prod => ServerConfig {
                host: "0.0.0.0".into(),
                ..ServerConfig::default()
            },
            Profile::Dev | Profile::Test => ServerConfig::default(),
        };

        let workspaces = match profile {
            Profile::Dev => vec![WorkspaceSeed::new("general", "General").with_thread("welcome")],
            Profile::Test | Profile::Prod => Vec::new(),
        };

        Self {
            profile,
            server,
            logging,
            features: FeatureFlags::default(),
            chat: ChatConfig::default(),
            llm: LLMConfiguration::default(),
            workspaces,
            users: Vec::new(),
        }
    }

    /// Loads the configuration from a file, environment variables, or defaults.
    ///
    /// Precedence, lowest first: profile defaults, configuration file,
    /// `CHATRELAY_*` environment variables, then `port_override`.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the file cannot be read or parsed, an
    /// environment override is malformed, or validation fails.
    pub fn load_config(
        config_path: Option<PathBuf>,
        port_override: Option<u16>,
    ) -> Result<Self, ConfigError> {
        let profile = match env::var("CHATRELAY_PROFILE") {
            Ok(value) => value.parse()?,
            Err(_) => Profile::default(),
        };

        let mut config = match config_path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default_for_profile(profile),
        };

        config.apply_env_overrides()?;

        if let Some(port) = port_override {
            config.server.port = port;
        }

        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_error = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => {
                serde_yml::from_str(&content).map_err(|err| parse_error(err.to_string()))
            }
            Some("json") => {
                serde_json::from_str(&content).map_err(|err| parse_error(err.to_string()))
            }
            Some("toml") => toml::from_str(&content).map_err(|err| parse_error(err.to_string())),
            other => Err(ConfigError::UnsupportedFormat {
                extension: other.unwrap_or_default().to_string(),
            }),
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = env::var("CHATRELAY_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("CHATRELAY_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "CHATRELAY_PORT".into(),
                message: "must be a valid number between 1 and 65535".into(),
            })?;
        }
        if let Ok(level) = env::var("CHATRELAY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = env::var("CHATRELAY_LOG_FORMAT") {
            self.logging.format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "CHATRELAY_LOG_FORMAT".into(),
                        message: format!("expected 'text' or 'json', got '{other}'"),
                    });
                }
            };
        }
        if let Ok(path) = env::var("CHATRELAY_EVENT_LOG_PATH") {
            self.logging.event_log_path = Some(PathBuf::from(path)).filter(|p| !p.as_os_str().is_empty());
        }
        if let Ok(flag) = env::var("CHATRELAY_MULTI_USER_MODE") {
            self.features.multi_user_mode = parse_bool("CHATRELAY_MULTI_USER_MODE", &flag)?;
        }
        if let Ok(limit) = env::var("CHATRELAY_HISTORY_LIMIT") {
            self.chat.history_limit = limit.parse().map_err(|_| ConfigError::InvalidValue {
                key: "CHATRELAY_HISTORY_LIMIT".into(),
                message: "must be a non-negative integer".into(),
            })?;
        }

        self.llm.apply_env_overrides();
        Ok(())
    }

    /// Validate the complete configuration including LLM settings
    ///
    /// # Errors
    /// Returns every problem found, one message per entry.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("Invalid server port. Must be greater than 0.".to_string());
        }
        if self.chat.stream_buffer == 0 {
            errors.push("chat.stream_buffer must be greater than 0".to_string());
        }

        let mut slugs = std::collections::HashSet::new();
        for workspace in &self.workspaces {
            if workspace.slug.trim().is_empty() {
                errors.push(format!("Workspace '{}' has an empty slug", workspace.name));
            } else if !slugs.insert(workspace.slug.as_str()) {
                errors.push(format!("Duplicate workspace slug '{}'", workspace.slug));
            }
            if let Some(provider) = &workspace.chat_provider
                && !self.llm.providers.contains_key(provider)
            {
                errors.push(format!(
                    "Workspace '{}' references unknown provider '{provider}'",
                    workspace.slug
                ));
            }
        }

        if let Err(llm_errors) = self.llm.validate() {
            errors.extend(llm_errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    const ENV_VARS: &[&str] = &[
        "CHATRELAY_PROFILE",
        "CHATRELAY_HOST",
        "CHATRELAY_PORT",
        "CHATRELAY_LOG_LEVEL",
        "CHATRELAY_LOG_FORMAT",
        "CHATRELAY_EVENT_LOG_PATH",
        "CHATRELAY_MULTI_USER_MODE",
        "CHATRELAY_HISTORY_LIMIT",
        "CHATRELAY_DEFAULT_PROVIDER",
        "CHATRELAY_PROVIDER_BASE_URL",
        "CHATRELAY_PROVIDER_MODEL",
    ];

    fn cleanup_env_vars() {
        for var in ENV_VARS {
            unsafe {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_profile_defaults() {
        let dev = Config::default_for_profile(Profile::Dev);
        assert_eq!(dev.server.port, 3001);
        assert_eq!(dev.logging.format, LogFormat::Text);
        assert_eq!(dev.workspaces.len(), 1);
        assert_eq!(dev.chat.history_limit, 20);
        assert_eq!(dev.chat.stream_buffer, 1);
        assert_eq!(
            dev.chat.completion_token_policy,
            CompletionTokenPolicy::PreferUpstream
        );

        let prod = Config::default_for_profile(Profile::Prod);
        assert_eq!(prod.logging.format, LogFormat::Json);
        assert_eq!(prod.server.host, "0.0.0.0");
        assert!(prod.logging.event_log_path.is_some());
    }

    #[test]
    #[serial]
    fn test_load_config_with_port_override() {
        cleanup_env_vars();
        let config = Config::load_config(None, Some(4000)).unwrap();
        assert_eq!(config.server.port, 4000);
    }

    #[test]
    #[serial]
    fn test_load_config_zero_port_validation() {
        cleanup_env_vars();
        let err = Config::load_config(None, Some(0)).unwrap_err();
        assert!(err.to_string().contains("Invalid server port"));
    }

    #[test]
    #[serial]
    fn test_load_config_with_environment_variables() {
        cleanup_env_vars();
        unsafe {
            env::set_var("CHATRELAY_PROFILE", "test");
            env::set_var("CHATRELAY_PORT", "9090");
            env::set_var("CHATRELAY_LOG_FORMAT", "json");
            env::set_var("CHATRELAY_MULTI_USER_MODE", "true");
            env::set_var("CHATRELAY_HISTORY_LIMIT", "5");
        }

        let config = Config::load_config(None, None).unwrap();
        cleanup_env_vars();

        assert_eq!(config.profile, Profile::Test);
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.features.multi_user_mode);
        assert_eq!(config.chat.history_limit, 5);
    }

    #[test]
    #[serial]
    fn test_load_config_invalid_port_environment() {
        cleanup_env_vars();
        unsafe {
            env::set_var("CHATRELAY_PORT", "invalid_port");
        }
        let result = Config::load_config(None, None);
        cleanup_env_vars();

        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        assert!(err.to_string().contains("CHATRELAY_PORT"));
    }

    #[test]
    #[serial]
    fn test_load_config_from_yaml_file() {
        cleanup_env_vars();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("chatrelay.yaml");
        fs::write(
            &path,
            r#"
profile: prod
server:
  port: 8088
features:
  multi_user_mode: true
chat:
  history_limit: 10
  completion_token_policy: max
workspaces:
  - slug: docs
    name: Docs
    system_prompt: Answer from the docs.
    threads:
      - slug: intro
users:
  - username: ada
    token: secret-token
    daily_message_limit: 3
"#,
        )
        .unwrap();

        let config = Config::load_config(Some(path), None).unwrap();
        assert_eq!(config.profile, Profile::Prod);
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.features.multi_user_mode);
        assert_eq!(config.chat.completion_token_policy, CompletionTokenPolicy::Max);
        assert_eq!(config.workspaces[0].threads[0].slug, "intro");
        assert_eq!(config.users[0].daily_message_limit, Some(3));
    }

    #[test]
    #[serial]
    fn test_load_config_from_toml_and_json() {
        cleanup_env_vars();
        let temp_dir = TempDir::new().unwrap();

        let toml_path = temp_dir.path().join("chatrelay.toml");
        fs::write(
            &toml_path,
            "[server]\nport = 7070\n\n[[workspaces]]\nslug = \"a\"\nname = \"A\"\n",
        )
        .unwrap();
        let config = Config::load_config(Some(toml_path), None).unwrap();
        assert_eq!(config.server.port, 7070);
        assert_eq!(config.workspaces[0].slug, "a");

        let json_path = temp_dir.path().join("chatrelay.json");
        fs::write(&json_path, r#"{ "chat": { "stream_buffer": 8 } }"#).unwrap();
        let config = Config::load_config(Some(json_path), None).unwrap();
        assert_eq!(config.chat.stream_buffer, 8);
    }

    #[test]
    #[serial]
    fn test_unsupported_extension_and_missing_file() {
        cleanup_env_vars();
        let temp_dir = TempDir::new().unwrap();
        let ini = temp_dir.path().join("chatrelay.ini");
        fs::write(&ini, "port=1").unwrap();
        assert!(matches!(
            Config::load_config(Some(ini), None),
            Err(ConfigError::UnsupportedFormat { .. })
        ));

        let missing = temp_dir.path().join("missing.yaml");
        assert!(matches!(
            Config::load_config(Some(missing), None),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_validation_rejects_duplicate_and_unknown_references() {
        let mut config = Config::default_for_profile(Profile::Test);
        let mut docs = WorkspaceSeed::new("docs", "Docs");
        docs.chat_provider = Some("nope".into());
        config.workspaces = vec![docs, WorkspaceSeed::new("docs", "Again")];

        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("Duplicate workspace slug 'docs'")));
        assert!(errors.iter().any(|e| e.contains("unknown provider 'nope'")));
    }

    #[test]
    fn test_profile_parsing() {
        assert_eq!("production".parse::<Profile>().unwrap(), Profile::Prod);
        assert!("staging".parse::<Profile>().is_err());
    }
}
