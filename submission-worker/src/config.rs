use analysis_common::config::{ClusterConfig, DatabaseConfig, EnvSecDuration};
use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3401")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub database: DatabaseConfig,

    #[envconfig(nested = true)]
    pub cluster: ClusterConfig,

    /// How often the worker polls for submittable Jobs.
    #[envconfig(from = "SUBMISSION_WAIT_TIME_SECS", default = "10")]
    pub wait_time: EnvSecDuration,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
