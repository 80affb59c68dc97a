//! Config for the arena behaviors
//!
//! This module provides configuration options for controlling the behavior of
//! the arena: validation batch sizing, deadlines and parallelism.
//!
//! Configuration can be created programmatically using [`Configuration::new()`]
//! or by reading environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! The following environment variables can be used to override configuration
//! values. All values are optional. Boolean flags are case-insensitive; set
//! the value to `"true"` to enable a flag.
//!
//! - `ARENA_VERBOSE` — Enable verbose output (default: `true`)
//! - `ARENA_LOG` — Enable logging to a file (default: `false`)
//! - `ARENA_VALIDATION_GAMES` — Games per submission validation batch (default: `15`)
//! - `ARENA_VALIDATION_DEADLINE_MS` — Validation batch deadline in milliseconds (default: `2000`)
//! - `ARENA_MAX_PARALLEL` — Maximum concurrent league batches (default: number of CPUs)

use std::time::Duration;

/// Configuration for arena behaviors.
#[derive(Debug, Clone, Copy)]
pub struct Configuration {
    pub(crate) verbose: bool,
    pub(crate) log: bool,
    pub(crate) validation_games: usize,
    pub(crate) validation_deadline: Duration,
    pub(crate) max_parallel: usize,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - The arena will print league progress to stdout.
    /// - Logging to file is disabled.
    /// - Submission validation runs 15 games under a 2 second deadline.
    /// - Up to one league batch per CPU runs concurrently.
    pub fn new() -> Self {
        Self {
            verbose: true,
            log: false,
            validation_games: 15,
            validation_deadline: Duration::from_secs(2),
            max_parallel: num_cpus::get(),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// See the module documentation for the recognized variables. Any other
    /// value (including unset, or unparseable numbers) will result in using
    /// the default value for each field.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }
        fn get_env_number(var: &str, default: usize) -> usize {
            match std::env::var(var) {
                Ok(val) => val.parse().unwrap_or(default),
                Err(_) => default,
            }
        }

        let defaults = Self::new();
        Self {
            verbose: get_env_flag("ARENA_VERBOSE", defaults.verbose),
            log: get_env_flag("ARENA_LOG", defaults.log),
            validation_games: get_env_number("ARENA_VALIDATION_GAMES", defaults.validation_games),
            validation_deadline: Duration::from_millis(get_env_number(
                "ARENA_VALIDATION_DEADLINE_MS",
                defaults.validation_deadline.as_millis() as usize,
            ) as u64),
            max_parallel: get_env_number("ARENA_MAX_PARALLEL", defaults.max_parallel).max(1),
        }
    }

    /// Enable or disable silent mode.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Set the number of games a submission validation batch runs.
    pub fn with_validation_games(mut self, value: usize) -> Self {
        self.validation_games = value;
        self
    }

    /// Set the wall-clock deadline of a submission validation batch.
    pub fn with_validation_deadline(mut self, value: Duration) -> Self {
        self.validation_deadline = value;
        self
    }

    /// Set the maximum number of league batches running concurrently.
    /// Clamped to at least 1.
    pub fn with_max_parallel(mut self, value: usize) -> Self {
        self.max_parallel = value.max(1);
        self
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}
