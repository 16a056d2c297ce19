use anyhow::{Context, Result};
use dotenvy::dotenv;
use sqlx::postgres::PgConnectOptions;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::credentials::{ClassifierCredentials, SecretString};
use crate::error::PipelineError;

pub const DEFAULT_INDEX_URL: &str = "https://index.commoncrawl.org/CC-MAIN-2025-13-index";
pub const DEFAULT_DATA_URL: &str = "https://data.commoncrawl.org";
pub const DEFAULT_RESULT_BUDGET: usize = 2000;

/// Pipeline configuration, built once at process start and passed to each stage.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the hand-off artifacts and the registry input
    pub data_dir: PathBuf,
    pub crawl: CrawlSettings,
    pub registry: RegistrySettings,
    pub matching: MatchSettings,
    /// Absent until a stage that needs it asks for it
    pub classifier: Option<ClassifierCredentials>,
    pub database: DatabaseSettings,
}

#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub index_url: String,
    pub data_url: String,
    /// Host suffix, e.g. "au" for `*.au/*`
    pub domain_suffix: String,
    pub result_budget: usize,
    pub max_pages: usize,
    pub index_timeout: Duration,
    pub fetch_timeout: Duration,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            index_url: DEFAULT_INDEX_URL.to_string(),
            data_url: DEFAULT_DATA_URL.to_string(),
            domain_suffix: "au".to_string(),
            result_budget: DEFAULT_RESULT_BUDGET,
            max_pages: 1,
            index_timeout: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Nesting depth of one entry element (root element is depth 1)
    pub entry_depth: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self { entry_depth: 2 }
    }
}

#[derive(Debug, Clone)]
pub struct MatchSettings {
    /// Name-similarity threshold below which a pair is never sent to the
    /// classifier. 0.0 sends every pair.
    pub min_similarity: f32,
    /// Cap on classifier calls per run
    pub max_pairs: Option<usize>,
    pub classifier_timeout: Duration,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            min_similarity: 0.0,
            max_pairs: None,
            classifier_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// Full connection URL; takes precedence over the discrete parameters
    pub url: Option<SecretString>,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: Option<SecretString>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            host: "postgres".to_string(),
            port: 5432,
            dbname: "airflow".to_string(),
            user: "airflow".to_string(),
            password: None,
        }
    }
}

impl DatabaseSettings {
    pub fn connect_options(&self) -> std::result::Result<PgConnectOptions, PipelineError> {
        if let Some(url) = &self.url {
            return PgConnectOptions::from_str(url.expose())
                .map_err(|e| PipelineError::Config(format!("invalid DATABASE_URL: {}", e)));
        }

        let password = self.password.as_ref().ok_or_else(|| {
            PipelineError::Config("POSTGRES_PASSWORD or DATABASE_URL must be set".into())
        })?;

        Ok(PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.dbname)
            .username(&self.user)
            .password(password.expose()))
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let crawl_defaults = CrawlSettings::default();
        let match_defaults = MatchSettings::default();
        let db_defaults = DatabaseSettings::default();

        let crawl = CrawlSettings {
            index_url: get("CC_INDEX_URL").unwrap_or(crawl_defaults.index_url),
            data_url: get("CC_DATA_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(crawl_defaults.data_url),
            domain_suffix: get("DOMAIN_SUFFIX")
                .map(|s| s.trim_start_matches('.').to_string())
                .unwrap_or(crawl_defaults.domain_suffix),
            result_budget: parse_or(get("N_RESULTS"), "N_RESULTS", crawl_defaults.result_budget)?,
            max_pages: parse_or(get("CC_MAX_PAGES"), "CC_MAX_PAGES", crawl_defaults.max_pages)?,
            index_timeout: secs_or(get("CC_INDEX_TIMEOUT_SECS"), "CC_INDEX_TIMEOUT_SECS", crawl_defaults.index_timeout)?,
            fetch_timeout: secs_or(get("CC_FETCH_TIMEOUT_SECS"), "CC_FETCH_TIMEOUT_SECS", crawl_defaults.fetch_timeout)?,
        };

        let registry = RegistrySettings {
            entry_depth: parse_or(
                get("REGISTRY_ENTRY_DEPTH"),
                "REGISTRY_ENTRY_DEPTH",
                RegistrySettings::default().entry_depth,
            )?,
        };
        if registry.entry_depth == 0 {
            anyhow::bail!("REGISTRY_ENTRY_DEPTH must be at least 1");
        }

        let matching = MatchSettings {
            min_similarity: parse_or(
                get("MATCH_MIN_SIMILARITY"),
                "MATCH_MIN_SIMILARITY",
                match_defaults.min_similarity,
            )?,
            max_pairs: get("MATCH_MAX_PAIRS")
                .map(|v| v.parse::<usize>())
                .transpose()
                .context("MATCH_MAX_PAIRS must be a valid number")?,
            classifier_timeout: secs_or(
                get("GEMINI_TIMEOUT_SECS"),
                "GEMINI_TIMEOUT_SECS",
                match_defaults.classifier_timeout,
            )?,
        };
        if !(0.0..=1.0).contains(&matching.min_similarity) {
            anyhow::bail!("MATCH_MIN_SIMILARITY must be between 0 and 1");
        }

        let classifier = get("GEMINI_API_KEY").map(|key| {
            ClassifierCredentials::new(
                key,
                get("GEMINI_MODEL").unwrap_or_else(|| gemini_client::DEFAULT_MODEL.to_string()),
                get("GEMINI_BASE_URL")
                    .unwrap_or_else(|| gemini_client::DEFAULT_BASE_URL.to_string()),
            )
        });

        let database = DatabaseSettings {
            url: get("DATABASE_URL").map(SecretString::from),
            host: get("POSTGRES_HOST").unwrap_or(db_defaults.host),
            port: parse_or(get("POSTGRES_PORT"), "POSTGRES_PORT", db_defaults.port)?,
            dbname: get("POSTGRES_DB").unwrap_or(db_defaults.dbname),
            user: get("POSTGRES_USER").unwrap_or(db_defaults.user),
            password: get("POSTGRES_PASSWORD").map(SecretString::from),
        };

        Ok(Self {
            data_dir: get("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            crawl,
            registry,
            matching,
            classifier,
            database,
        })
    }

    /// Override the artifact directory (CLI flag).
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    /// Classifier credentials, or a config error for the stage that needs them.
    pub fn require_classifier(&self) -> std::result::Result<&ClassifierCredentials, PipelineError> {
        self.classifier
            .as_ref()
            .ok_or_else(|| PipelineError::Config("GEMINI_API_KEY must be set".into()))
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid number, got {:?}", key, v)),
        None => Ok(default),
    }
}

fn secs_or(value: Option<String>, key: &str, default: Duration) -> Result<Duration> {
    parse_or(value, key, default.as_secs()).map(Duration::from_secs)
}
