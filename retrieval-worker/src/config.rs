use analysis_common::config::{ClusterConfig, DatabaseConfig, EnvMsDuration, EnvSecDuration};
use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3402")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub database: DatabaseConfig,

    #[envconfig(nested = true)]
    pub cluster: ClusterConfig,

    /// How often the worker polls active Jobs.
    #[envconfig(from = "RETRIEVAL_WAIT_TIME_SECS", default = "10")]
    pub wait_time: EnvSecDuration,

    /// How many consecutive delivery failures a Job tolerates before
    /// moving to `failed_upload`.
    #[envconfig(from = "MAX_UPLOAD_FAILURES", default = "5")]
    pub max_upload_failures: i32,

    /// Wall-clock budget for a `running`/`running_plot` Job before it is
    /// considered expired. Constrained to 1-24 hours at startup.
    #[envconfig(from = "EXPANSION_TIME_LIMIT_HOURS", default = "12")]
    pub time_limit_hours: u64,

    /// Timeout applied to each callback delivery attempt.
    #[envconfig(from = "CALLBACK_REQUEST_TIMEOUT_MS", default = "60000")]
    pub request_timeout: EnvMsDuration,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
