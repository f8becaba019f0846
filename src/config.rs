//! Configuration with layered resolution using figment.
//!
//! Resolution order (highest priority last):
//! 1. Compiled defaults
//! 2. User config: `~/.config/ollama-memory/config.toml` (XDG) or platform config dir
//! 3. Explicit config file passed with `--config` (TOML, or JSON for `.json`)
//! 4. Flat environment names: `NEO4J_URI`, `OLLAMA_MODEL`, `LOG_FILE`, ...
//! 5. Nested environment variables: `OLLAMA_MEMORY_<SECTION>__<KEY>`
//!
//! # Example
//!
//! ```toml
//! [neo4j]
//! uri = "bolt://localhost:7687"
//! user = "neo4j"
//! password = "secret"
//!
//! [llm]
//! model = "qwen2.5:7b"
//! temperature = 0.1
//!
//! [embedder]
//! model = "nomic-embed-text:v1.5"
//! dimensions = 768
//!
//! [throttle]
//! max_in_flight = 3
//!
//! [logging]
//! file_path = "logs/ollama-memory.log"
//! rotation = "daily"
//! max_files = 30
//! ```

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Configuration loading or validation failure.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Boxed to keep `Result<Config, ConfigError>` small on the stack.
    #[error(transparent)]
    Load(Box<figment::Error>),

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub neo4j: Neo4jConfig,
    pub llm: LlmConfig,
    pub embedder: EmbedderConfig,
    pub throttle: ThrottleConfig,
    pub memory: MemoryConfig,
    pub search: SearchConfig,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub graph: GraphConfig,
}

/// Neo4j connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Neo4jConfig {
    /// Bolt URI, e.g. `bolt://localhost:7687`.
    pub uri: String,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    /// Size of the driver's connection pool.
    pub max_connections: usize,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: None,
            database: "neo4j".to_string(),
            max_connections: 16,
        }
    }
}

/// Chat model used for entity and fact extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// Sampling temperature, `0.0..=2.0`.
    pub temperature: f32,
    /// Upper bound on generated tokens (`num_predict`).
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "qwen2.5:7b".to_string(),
            temperature: 0.1,
            max_tokens: 4096,
            timeout_secs: 120,
        }
    }
}

/// Embedding model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub base_url: String,
    pub model: String,
    /// Expected vector length; responses of any other length are rejected.
    pub dimensions: usize,
    pub timeout_secs: u64,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text:v1.5".to_string(),
            dimensions: 768,
            timeout_secs: 60,
        }
    }
}

/// Limit on simultaneous requests to the model server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub max_in_flight: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self { max_in_flight: 3 }
    }
}

/// Episode ingestion behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Group used when a tool call does not name one.
    pub default_group_id: String,
    /// Run LLM extraction on new episodes. When off, episodes are stored as-is.
    pub extract_entities: bool,
    /// Reuse existing entities with the same name in the same group.
    pub deduplicate: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            default_group_id: "default".to_string(),
            extract_entities: true,
            deduplicate: true,
        }
    }
}

/// Search tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Hard cap on results returned by any search or listing tool.
    pub max_results: usize,
    /// Minimum cosine similarity for a vector hit to count.
    pub min_similarity: f32,
    /// Candidates fetched per strategy (vector index, keyword match) before ranking.
    pub candidate_pool: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: 50,
            min_similarity: 0.5,
            candidate_pool: 1000,
        }
    }
}

/// Log file rotation policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Log file path; file logging is disabled when unset.
    pub file_path: Option<PathBuf>,
    pub rotation: Rotation,
    /// Number of rotated files kept on disk.
    pub max_files: usize,
    /// Mirror logs to stderr.
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            rotation: Rotation::Daily,
            max_files: 30,
            console: true,
        }
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token required by the HTTP transport when set.
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            api_key: None,
        }
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Neo4j,
    /// Process-local store, lost on exit.
    Ephemeral,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub backend: StoreBackend,
}

/// Flat environment names kept for compatibility with existing deployments.
const FLAT_ENV_KEYS: &[(&str, &str)] = &[
    ("NEO4J_URI", "neo4j.uri"),
    ("NEO4J_USER", "neo4j.user"),
    ("NEO4J_PASSWORD", "neo4j.password"),
    ("NEO4J_DATABASE", "neo4j.database"),
    ("OLLAMA_BASE_URL", "llm.base_url"),
    ("OLLAMA_MODEL", "llm.model"),
    ("OLLAMA_TEMPERATURE", "llm.temperature"),
    ("OLLAMA_EMBEDDING_BASE_URL", "embedder.base_url"),
    ("OLLAMA_EMBEDDING_MODEL", "embedder.model"),
    ("OLLAMA_EMBEDDING_DIMENSIONS", "embedder.dimensions"),
    ("MAX_IN_FLIGHT", "throttle.max_in_flight"),
    ("SEARCH_LIMIT", "search.max_results"),
    ("LOG_LEVEL", "logging.level"),
    ("LOG_FILE", "logging.file_path"),
    ("SERVER_HOST", "server.host"),
    ("SERVER_PORT", "server.port"),
];

impl Config {
    /// Load config with layered resolution (defaults → user → file → env).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Config = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Build the provider stack without extracting.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()))
            // Layer 2: User config
            .merge(Toml::file(Self::user_config_path()));

        // Layer 3: Explicit file
        if let Some(path) = path {
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }

        figment
            // Layer 4: Flat env names
            .merge(Env::raw().filter_map(|key| {
                FLAT_ENV_KEYS
                    .iter()
                    .find(|(name, _)| key.as_str().eq_ignore_ascii_case(name))
                    .map(|(_, path)| (*path).into())
            }))
            // Layer 5: Nested env (highest priority)
            .merge(Env::prefixed("OLLAMA_MEMORY_").split("__"))
    }

    /// Check ranges and required values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.neo4j.uri.trim().is_empty() {
            return Err(ConfigError::invalid("neo4j.uri", "must not be empty"));
        }
        if self.llm.model.trim().is_empty() || self.llm.base_url.trim().is_empty() {
            return Err(ConfigError::invalid(
                "llm",
                "model and base_url must not be empty",
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::invalid(
                "llm.temperature",
                format!("{} is outside 0.0..=2.0", self.llm.temperature),
            ));
        }
        if self.embedder.model.trim().is_empty() || self.embedder.base_url.trim().is_empty() {
            return Err(ConfigError::invalid(
                "embedder",
                "model and base_url must not be empty",
            ));
        }
        if self.embedder.dimensions == 0 {
            return Err(ConfigError::invalid("embedder.dimensions", "must be > 0"));
        }
        if self.throttle.max_in_flight == 0 {
            return Err(ConfigError::invalid("throttle.max_in_flight", "must be > 0"));
        }
        if self.search.max_results == 0 {
            return Err(ConfigError::invalid("search.max_results", "must be > 0"));
        }
        if !(-1.0..=1.0).contains(&self.search.min_similarity) {
            return Err(ConfigError::invalid(
                "search.min_similarity",
                "must be within -1.0..=1.0",
            ));
        }
        if self.logging.max_files == 0 {
            return Err(ConfigError::invalid("logging.max_files", "must be > 0"));
        }
        if self.server.port == 0 {
            return Err(ConfigError::invalid("server.port", "must be > 0"));
        }
        Ok(())
    }

    /// Startup summary with credentials left out.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "llm_model": self.llm.model,
            "embedder_model": self.embedder.model,
            "embedder_dimensions": self.embedder.dimensions,
            "neo4j_uri": self.neo4j.uri,
            "neo4j_database": self.neo4j.database,
            "backend": self.graph.backend,
            "max_in_flight": self.throttle.max_in_flight,
            "log_level": self.logging.level,
            "extract_entities": self.memory.extract_entities,
            "deduplicate": self.memory.deduplicate,
        })
    }

    /// User config path: ~/.config/ollama-memory/config.toml (XDG) or platform config dir.
    fn user_config_path() -> PathBuf {
        if let Some(home) = dirs::home_dir() {
            let xdg_path = home
                .join(".config")
                .join("ollama-memory")
                .join("config.toml");
            if xdg_path.exists() {
                return xdg_path;
            }
        }
        dirs::config_dir()
            .map(|p| p.join("ollama-memory").join("config.toml"))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.embedder.dimensions, 768);
        assert_eq!(config.throttle.max_in_flight, 3);
        assert_eq!(config.logging.rotation, Rotation::Daily);
    }

    #[test]
    fn test_rejects_out_of_range_temperature() {
        let mut config = Config::default();
        config.llm.temperature = 2.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("llm.temperature"));
    }

    #[test]
    fn test_rejects_zero_in_flight() {
        let mut config = Config::default();
        config.throttle.max_in_flight = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_file_and_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "memory.json",
                r#"{"llm": {"model": "llama3.2:3b"}, "embedder": {"dimensions": 384}}"#,
            )?;
            jail.set_env("NEO4J_URI", "bolt://graph:7687");
            jail.set_env("OLLAMA_MEMORY_THROTTLE__MAX_IN_FLIGHT", "5");

            let config: Config = Config::figment(Some(Path::new("memory.json"))).extract()?;
            assert_eq!(config.llm.model, "llama3.2:3b");
            assert_eq!(config.embedder.dimensions, 384);
            assert_eq!(config.neo4j.uri, "bolt://graph:7687");
            assert_eq!(config.throttle.max_in_flight, 5);
            // untouched sections keep their defaults
            assert_eq!(config.memory.default_group_id, "default");
            Ok(())
        });
    }

    #[test]
    fn test_toml_file_rotation() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "memory.toml",
                r#"
                [logging]
                file_path = "logs/memory.log"
                rotation = "hourly"
                "#,
            )?;

            let config: Config = Config::figment(Some(Path::new("memory.toml"))).extract()?;
            assert_eq!(config.logging.rotation, Rotation::Hourly);
            assert_eq!(
                config.logging.file_path.as_deref(),
                Some(Path::new("logs/memory.log"))
            );
            Ok(())
        });
    }

    #[test]
    fn test_summary_hides_password() {
        let mut config = Config::default();
        config.neo4j.password = Some("hunter2".to_string());
        let summary = config.summary().to_string();
        assert!(!summary.contains("hunter2"));
    }
}
