use std::time::Duration as StdDuration;

#[derive(Clone, Debug, serde::Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl DatabaseConfig {
    pub fn connection_string(&self) -> String {
        format!("sqlite://{}", self.path)
    }
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_redirects: usize,
}

impl HttpConfig {
    pub fn timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.timeout_seconds)
    }
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: DatabaseConfig {
                path: "local.db".to_string(),
            },
            http: HttpConfig {
                user_agent: "HECK YEAH Webmentions v0.0.1".to_string(),
                timeout_seconds: 10,
                max_redirects: 10,
            },
        }
    }
}

/// Loads configuration from an optional `configuration.toml` in the working
/// directory, then `WEBMENTIONS__`-prefixed environment variables, falling
/// back to the built-in defaults in [`Config::default`].
pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let defaults = Config::default();

    let config_reader = config::Config::builder()
        .set_default("database.path", defaults.database.path)?
        .set_default("http.user_agent", defaults.http.user_agent)?
        .set_default("http.timeout_seconds", defaults.http.timeout_seconds)?
        .set_default("http.max_redirects", defaults.http.max_redirects as i64)?
        .add_source(
            config::File::new("configuration.toml", config::FileFormat::Toml).required(false),
        )
        .add_source(
            config::Environment::with_prefix("webmentions")
                .try_parsing(true)
                .separator("__"),
        )
        .build()?;

    config_reader.try_deserialize::<Config>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.database.path, "local.db");
        assert_eq!(config.http.timeout_seconds, 10);
        assert_eq!(config.http.max_redirects, 10);
    }
}
