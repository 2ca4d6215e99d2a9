use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_model() -> String {
    "llama3.1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Base URL of the embedding/rerank service.
    pub embeddings_url: String,
    /// Base URL of the vector store HTTP API.
    pub vector_store_url: String,
    /// How many nearest neighbors to request from the vector store.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// How many results to ask the rerank service to keep.
    #[serde(default = "default_rerank_top_n")]
    pub rerank_top_n: usize,
}

fn default_top_n() -> usize {
    10
}

fn default_rerank_top_n() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "ragsmith.db".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_system_prompt() -> String {
    "You are a careful assistant for questions about the GDPR and EDPB guidance. \
     Use the provided retrieval tools when the user asks about specific provisions, \
     and cite the passages you relied on."
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionsConfig {
    /// Hard cap on live sessions; the least-recently-used entry is evicted
    /// when a new session would exceed it.
    #[serde(default = "default_session_capacity")]
    pub capacity: usize,
    /// Sessions idle longer than this are dropped on the next registry access.
    #[serde(default = "default_session_ttl_minutes")]
    pub ttl_minutes: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            capacity: default_session_capacity(),
            ttl_minutes: default_session_ttl_minutes(),
        }
    }
}

fn default_session_capacity() -> usize {
    256
}

fn default_session_ttl_minutes() -> u64 {
    60
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config at {}: {}", path.display(), e))?;
        let mut config: AppConfig = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;

        // API key can live in the environment instead of the file.
        if config.provider.api_key.is_empty() {
            if let Ok(key) = std::env::var("RAGSMITH_API_KEY") {
                config.provider.api_key = key;
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn minimal_config_gets_defaults() {
        let toml = r#"
            [provider]
            api_key = "sk-test"

            [retrieval]
            embeddings_url = "http://localhost:8001"
            vector_store_url = "http://localhost:8000"
        "#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.retrieval.top_n, 10);
        assert_eq!(config.retrieval.rerank_top_n, 3);
        assert_eq!(config.state.db_path, "ragsmith.db");
        assert_eq!(config.sessions.capacity, 256);
        assert!(config.provider.base_url.starts_with("http://localhost"));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = AppConfig::load(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }

    #[test]
    fn load_reads_full_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"
            [provider]
            api_key = "sk-test"
            model = "gpt-4o-mini"

            [retrieval]
            embeddings_url = "http://localhost:8001"
            vector_store_url = "http://localhost:8000"
            top_n = 5

            [sessions]
            capacity = 8
            ttl_minutes = 5
        "#
        )
        .unwrap();
        let config = AppConfig::load(f.path()).unwrap();
        assert_eq!(config.provider.model, "gpt-4o-mini");
        assert_eq!(config.retrieval.top_n, 5);
        assert_eq!(config.sessions.capacity, 8);
    }
}
