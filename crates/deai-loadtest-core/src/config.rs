//! Configuration management for load test runs
//!
//! Settings are layered from, lowest to highest precedence:
//! - Built-in defaults
//! - `./config/loadtest.{toml,yaml,json}`
//! - The file named by `DEAI_LOADTEST_CONFIG`
//! - `DEAI_LOADTEST_*` environment variables (`__` separates nesting levels)

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{LoadTestError, LoadTestResult};
use crate::targets::PerformanceTargets;
use crate::task::TaskKind;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LoadTestSettings {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub load: TestConfiguration,

    #[serde(default)]
    pub sampling: SamplingConfig,

    #[serde(default)]
    pub targets: PerformanceTargets,
}

impl LoadTestSettings {
    /// Load configuration from every source, then validate it.
    ///
    /// Example override: `DEAI_LOADTEST_LOAD__CONCURRENT_USERS=20`
    pub fn load() -> LoadTestResult<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("./config/loadtest").required(false));

        if let Ok(config_path) = std::env::var("DEAI_LOADTEST_CONFIG") {
            tracing::debug!(path = %config_path, "adding configuration file");
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("DEAI_LOADTEST")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("load.task_types")
                .try_parsing(true),
        );

        let settings: LoadTestSettings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        tracing::debug!(
            base_url = %settings.api.base_url,
            users = settings.load.concurrent_users,
            total_tasks = settings.load.total_tasks,
            "configuration loaded"
        );

        Ok(settings)
    }

    /// Load configuration from a specific file path, then validate it.
    pub fn from_file<P: AsRef<Path>>(path: P) -> LoadTestResult<Self> {
        let settings: LoadTestSettings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration values
    pub fn validate(&self) -> LoadTestResult<()> {
        self.api.validate()?;
        self.load.validate()?;
        self.sampling.validate()?;
        self.targets.validate()
    }
}

/// Connection settings for the remote task service
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,

    /// Per-request client timeout.
    pub request_timeout_secs: f64,

    /// Password used when registering virtual users.
    pub user_password: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_secs: 60.0,
            user_password: "load_test_password_123".to_string(),
        }
    }
}

impl ApiConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_secs)
    }

    fn validate(&self) -> LoadTestResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(LoadTestError::invalid_config("api.base_url must not be empty"));
        }
        positive("api.request_timeout_secs", self.request_timeout_secs)
    }
}

/// Immutable description of the load to generate.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TestConfiguration {
    /// Accepted submissions to aim for across all users.
    pub total_tasks: u64,

    pub concurrent_users: u32,

    /// Active nodes expected behind the service (checked, never enforced).
    pub target_nodes: u32,

    pub ramp_up_secs: f64,

    pub sustained_secs: f64,

    /// Grace period for in-flight tasks once submissions stop.
    pub ramp_down_secs: f64,

    pub max_cost_per_task: f64,

    pub task_types: Vec<TaskKind>,

    /// Pause between two submissions of the same user.
    pub think_time_secs: f64,

    pub poll_interval_secs: f64,

    pub task_timeout_secs: f64,

    /// Ceiling of simultaneously in-flight submission calls.
    pub submission_concurrency: usize,
}

impl Default for TestConfiguration {
    fn default() -> Self {
        Self {
            total_tasks: 100,
            concurrent_users: 10,
            target_nodes: 10,
            ramp_up_secs: 10.0,
            sustained_secs: 290.0,
            ramp_down_secs: 30.0,
            max_cost_per_task: 0.1,
            task_types: TaskKind::ALL.to_vec(),
            think_time_secs: 1.0,
            poll_interval_secs: 2.0,
            task_timeout_secs: 120.0,
            submission_concurrency: 16,
        }
    }
}

impl TestConfiguration {
    #[must_use]
    pub fn ramp_up(&self) -> Duration {
        Duration::from_secs_f64(self.ramp_up_secs)
    }

    #[must_use]
    pub fn sustained(&self) -> Duration {
        Duration::from_secs_f64(self.sustained_secs)
    }

    #[must_use]
    pub fn ramp_down(&self) -> Duration {
        Duration::from_secs_f64(self.ramp_down_secs)
    }

    /// Window during which users may submit: ramp-up plus sustained.
    #[must_use]
    pub fn test_duration(&self) -> Duration {
        self.ramp_up() + self.sustained()
    }

    #[must_use]
    pub fn think_time(&self) -> Duration {
        Duration::from_secs_f64(self.think_time_secs)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs)
    }

    #[must_use]
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.task_timeout_secs)
    }

    /// Submission attempts allowed to user `index` when `users` users are running.
    ///
    /// The remainder of `total_tasks / users` goes to the lowest indices, so
    /// budgets differ by at most one and sum to `total_tasks`.
    #[must_use]
    pub fn user_budget(&self, index: u32, users: u32) -> u64 {
        if users == 0 {
            return 0;
        }
        let users = u64::from(users);
        let base = self.total_tasks / users;
        let remainder = self.total_tasks % users;
        if u64::from(index) < remainder {
            base + 1
        } else {
            base
        }
    }

    pub fn validate(&self) -> LoadTestResult<()> {
        if self.concurrent_users == 0 {
            return Err(LoadTestError::invalid_config("load.concurrent_users must be > 0"));
        }
        if self.task_types.is_empty() {
            return Err(LoadTestError::invalid_config("load.task_types must not be empty"));
        }
        if self.submission_concurrency == 0 {
            return Err(LoadTestError::invalid_config(
                "load.submission_concurrency must be > 0",
            ));
        }
        non_negative("load.ramp_up_secs", self.ramp_up_secs)?;
        non_negative("load.sustained_secs", self.sustained_secs)?;
        non_negative("load.ramp_down_secs", self.ramp_down_secs)?;
        non_negative("load.think_time_secs", self.think_time_secs)?;
        non_negative("load.max_cost_per_task", self.max_cost_per_task)?;
        positive("load.poll_interval_secs", self.poll_interval_secs)?;
        positive("load.task_timeout_secs", self.task_timeout_secs)?;
        if self.test_duration().is_zero() {
            return Err(LoadTestError::invalid_config(
                "load.ramp_up_secs + load.sustained_secs must be > 0",
            ));
        }
        Ok(())
    }
}

/// Cadences of the background probes
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub resource_interval_secs: f64,

    pub health_interval_secs: f64,

    /// Cadence of the progress log line.
    pub progress_interval_secs: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            resource_interval_secs: 5.0,
            health_interval_secs: 5.0,
            progress_interval_secs: 10.0,
        }
    }
}

impl SamplingConfig {
    #[must_use]
    pub fn resource_interval(&self) -> Duration {
        Duration::from_secs_f64(self.resource_interval_secs)
    }

    #[must_use]
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs_f64(self.health_interval_secs)
    }

    #[must_use]
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs_f64(self.progress_interval_secs)
    }

    fn validate(&self) -> LoadTestResult<()> {
        positive("sampling.resource_interval_secs", self.resource_interval_secs)?;
        positive("sampling.health_interval_secs", self.health_interval_secs)?;
        positive("sampling.progress_interval_secs", self.progress_interval_secs)
    }
}

fn non_negative(name: &str, value: f64) -> LoadTestResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(LoadTestError::invalid_config(format!("{name} must be >= 0")))
    }
}

fn positive(name: &str, value: f64) -> LoadTestResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(LoadTestError::invalid_config(format!("{name} must be > 0")))
    }
}
