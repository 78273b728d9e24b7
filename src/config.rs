use std::env;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL must be set to a production Postgres instance")]
    MissingDatabaseUrl,
    #[error("DB_MAX_CONNECTIONS must be a positive integer, got '{0}'")]
    InvalidMaxConnections(String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub log_level: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;
        let max_connections = parse_max_connections(env::var("DB_MAX_CONNECTIONS").ok())?;
        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            database_url,
            max_connections,
            log_level,
        })
    }
}

fn parse_max_connections(value: Option<String>) -> Result<u32, ConfigError> {
    match value {
        None => Ok(5),
        Some(raw) => match raw.trim().parse::<u32>() {
            Ok(count) if count > 0 => Ok(count),
            _ => Err(ConfigError::InvalidMaxConnections(raw)),
        },
    }
}
