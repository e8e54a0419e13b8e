//! CLI flags and environment-variable configuration.

use clap::Parser;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "loyalty-service", about = "Loyalty-points service")]
pub struct Config {
    /// Address the HTTP API listens on
    #[arg(short = 'a', long = "address", env = "RUN_ADDRESS", default_value = "0.0.0.0:8080")]
    pub run_address: String,

    /// Base address of the external accrual service
    #[arg(
        short = 'r',
        long = "accrual-system-address",
        env = "ACCRUAL_SYSTEM_ADDRESS",
        default_value = "localhost:8081"
    )]
    pub accrual_address: String,

    /// PostgreSQL connection URI
    #[arg(short = 'd', long = "database-uri", env = "DATABASE_URI")]
    pub database_uri: String,

    /// Secret used to sign access tokens
    #[arg(short = 's', long = "app-secret", env = "APP_SECRET", default_value = "aPp$eCr3t")]
    pub app_secret: String,

    #[arg(long, env = "RETRIEVER_CONCURRENCY", default_value_t = 10)]
    pub retriever_concurrency: usize,

    #[arg(long, env = "ROUTER_CONCURRENCY", default_value_t = 10)]
    pub router_concurrency: usize,

    #[arg(long, env = "PROCESSING_CONCURRENCY", default_value_t = 10)]
    pub processing_concurrency: usize,

    #[arg(long, env = "INVALID_CONCURRENCY", default_value_t = 10)]
    pub invalid_concurrency: usize,

    #[arg(long, env = "PROCESSED_CONCURRENCY", default_value_t = 10)]
    pub processed_concurrency: usize,

    /// Orders per writer database transaction
    #[arg(long, env = "UPDATE_BATCH_SIZE", default_value_t = 100)]
    pub update_batch_size: usize,

    /// Seconds granted to in-flight HTTP requests on shutdown
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 30)]
    pub shutdown_timeout: u64,

    #[arg(short = 'l', long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Directory for the optional log file
    #[arg(long, env = "LOG_DIR", default_value = "logs")]
    pub log_dir: String,

    /// When set, JSON logs are also written to this file (daily rotation)
    #[arg(long, env = "LOG_FILE")]
    pub log_file: Option<String>,

    /// Path of the flamegraph written after a SIGUSR1 CPU capture
    #[arg(long, env = "CPU_PROFILE_FILE", default_value = "cpu-profile.svg")]
    pub cpu_profile_file: String,

    /// Seconds of CPU samples collected per capture
    #[arg(long, env = "CPU_PROFILE_DURATION", default_value_t = 30)]
    pub cpu_profile_duration: u64,
}

impl Config {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    pub fn cpu_profile_duration(&self) -> Duration {
        Duration::from_secs(self.cpu_profile_duration)
    }
}
