use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IngestConfig {
    /// Hard ceiling on lines loaded per job. The whole log is held in
    /// memory to support rewinding to a match's first round.
    pub max_lines: usize,
    /// Wall-clock budget for one job.
    pub job_timeout_secs: u64,
    /// How many jobs may run at once.
    pub worker_count: usize,
    pub db_pool_size: u32,
    /// How many times a commit is retried after a transient database error.
    pub commit_retries: u32,
    /// Run pipelines against an in-memory store and never touch Postgres.
    pub dry_run: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_lines: 1_000_000,
            job_timeout_secs: 90,
            worker_count: 4,
            db_pool_size: 20,
            commit_retries: 3,
            dry_run: false,
        }
    }
}

impl IngestConfig {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file("FRAGDB.toml"))
            .merge(Env::prefixed("FRAGDB_"))
    }

    pub fn config() -> figment::Result<Self> {
        Self::figment().extract()
    }
}
