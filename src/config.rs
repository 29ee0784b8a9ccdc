//! Configuração do projeval carregada a partir de `projeval.toml`.
//!
//! A struct [`Config`] agrupa os parâmetros por seção (`[database]`,
//! `[storage]`, `[tasks]`, `[llm]`, `[clustering]`, `[logging]`).
//! Valores ausentes no arquivo usam defaults sensíveis e as variáveis de
//! ambiente `PROJEVAL_*` têm precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{EvalError, Result};

/// Caminho padrão do arquivo de configuração.
pub const DEFAULT_CONFIG_FILE: &str = "projeval.toml";

/// Arquivo inicial gravado por `projeval init`; espelha os valores padrão.
pub const CONFIG_TEMPLATE: &str = r#"[database]
path = "data/projeval.db"

[storage]
root = "data/objects"
# public_base_url = "https://files.example/bucket"

[tasks]
workers = 1
queue_capacity = 1000
results_capacity = 1000
shutdown_timeout_secs = 30

[llm]
url = "http://127.0.0.1:11434/api/chat"
model = "qwen3-8b:latest"
timeout_secs = 300
max_retries = 3
retry_base_delay_ms = 1000
temperature = 0.2
top_p = 0.9
top_k = 5
request_delay_ms = 500

[clustering]
url = "http://127.0.0.1:8083"
timeout_secs = 300

[logging]
level = "info"
json = false
"#;

/// Configuração de nível superior.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Banco relacional (SQLite).
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

/// Armazenamento de objetos em disco.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    /// Base pública usada em `url_for`; sem ela, URLs `file://`.
    #[serde(default)]
    pub public_base_url: Option<String>,
}

/// Pool de workers e filas.
#[derive(Debug, Clone, Deserialize)]
pub struct TasksConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_capacity")]
    pub results_capacity: usize,

    /// Prazo para drenar tarefas em execução no desligamento.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

/// Endpoint de modelo de linguagem (chat no estilo Ollama).
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retentativas após a primeira chamada.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Atraso base em milissegundos para backoff exponencial.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Quantos trechos entram no contexto de cada critério.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Pausa entre critérios consecutivos.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
}

/// Serviço externo de clusterização de observações.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusteringConfig {
    #[serde(default = "default_clustering_url")]
    pub url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filtro padrão; `RUST_LOG` tem precedência.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/projeval.db")
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/objects")
}

fn default_workers() -> usize {
    1
}

fn default_capacity() -> usize {
    1000
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_llm_url() -> String {
    "http://127.0.0.1:11434/api/chat".to_string()
}

fn default_llm_model() -> String {
    "qwen3-8b:latest".to_string()
}

// Chamadas ao LLM e à clusterização podem levar minutos.
fn default_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_temperature() -> f32 {
    0.2
}

fn default_top_p() -> f32 {
    0.9
}

fn default_top_k() -> usize {
    5
}

fn default_request_delay_ms() -> u64 {
    500
}

fn default_clustering_url() -> String {
    "http://127.0.0.1:8083".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            public_base_url: None,
        }
    }
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_capacity(),
            results_capacity: default_capacity(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_llm_url(),
            model: default_llm_model(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            request_delay_ms: default_request_delay_ms(),
        }
    }
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            url: default_clustering_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl TasksConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Config {
    /// Carrega a configuração de `path` (ou `projeval.toml` no diretório atual).
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<Config>(&contents)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Aplica sobrescritas vindas do ambiente. `lookup` é injetável para testes.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = var("PROJEVAL_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(root) = var("PROJEVAL_STORAGE_ROOT") {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(url) = var("PROJEVAL_LLM_URL") {
            self.llm.url = url;
        }
        if let Some(model) = var("PROJEVAL_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(url) = var("PROJEVAL_CLUSTERING_URL") {
            self.clustering.url = url;
        }
        if let Some(workers) = var("PROJEVAL_WORKERS") {
            self.tasks.workers = workers.trim().parse().map_err(|_| {
                EvalError::Config(format!("PROJEVAL_WORKERS is not a number: {workers}"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.tasks.workers == 0 {
            return Err(EvalError::Config("tasks.workers must be > 0".into()));
        }
        if self.tasks.queue_capacity == 0 {
            return Err(EvalError::Config("tasks.queue_capacity must be > 0".into()));
        }
        if self.tasks.results_capacity == 0 {
            return Err(EvalError::Config(
                "tasks.results_capacity must be > 0".into(),
            ));
        }
        if self.llm.top_k == 0 {
            return Err(EvalError::Config("llm.top_k must be > 0".into()));
        }
        Ok(())
    }
}
