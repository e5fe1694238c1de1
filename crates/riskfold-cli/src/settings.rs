//! Runtime settings of the command line driver
//!
//! Read from an optional `config/riskfold` file and `RISKFOLD_*` environment
//! variables. `DATABASE_URL` is honored when `RISKFOLD_DATABASE_URL` is not set.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Postgres connection string
    #[serde(default)]
    pub database_url: Option<String>,

    /// Pool size of the Postgres store
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Log output: `text` or `json`
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_max_connections() -> u32 {
    5
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: default_max_connections(),
            log_format: default_log_format(),
        }
    }
}

impl Settings {
    /// Load `.env`, then the settings file and environment
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut settings: Settings = config::Config::builder()
            .add_source(config::File::with_name("config/riskfold").required(false))
            .add_source(config::Environment::with_prefix("RISKFOLD"))
            .build()
            .and_then(|cfg| cfg.try_deserialize())
            .map_err(|e| anyhow::anyhow!("Failed to load settings: {}", e))?;

        if settings.database_url.is_none() {
            settings.database_url = std::env::var("DATABASE_URL").ok();
        }
        Ok(settings)
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}
