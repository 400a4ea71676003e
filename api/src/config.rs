use analysis_common::config::DatabaseConfig;
use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3400")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub database: DatabaseConfig,

    /// URL of the remote filter/model catalog (YAML document), fetched
    /// once at startup and cached locally.
    #[envconfig(
        from = "FILTER_CATALOG_URL",
        default = "https://example.com/models.yaml"
    )]
    pub filter_catalog_url: String,

    #[envconfig(from = "FILTER_CATALOG_CACHE_DIR", default = ".")]
    pub filter_catalog_cache_dir: String,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
