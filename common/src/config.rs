//! Configuration types for runtime and execution settings

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Throttling configuration for resource control
#[derive(Debug, Clone, Copy, Default)]
pub struct ThrottleConfig {
    /// Maximum number of open files (None = 80% of system limit, 0 = no limit)
    pub max_open_files: Option<usize>,
    /// Operations per second throttle (0 = no throttle)
    pub ops_throttle: usize,
}

impl ThrottleConfig {
    /// Open file limit to apply, resolving the default against the process limit.
    pub fn resolve_max_open_files(&self) -> anyhow::Result<usize> {
        if let Some(max_open_files) = self.max_open_files {
            return Ok(max_open_files);
        }
        let (soft, _hard) =
            nix::sys::resource::getrlimit(nix::sys::resource::Resource::RLIMIT_NOFILE)?;
        let limit = usize::try_from(soft).unwrap_or(usize::MAX);
        Ok(std::cmp::max(1, limit / 10 * 8))
    }
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

impl OutputConfig {
    pub fn level_filter(&self) -> tracing::level_filters::LevelFilter {
        if self.quiet {
            return tracing::level_filters::LevelFilter::OFF;
        }
        match self.verbose {
            0 => tracing::level_filters::LevelFilter::ERROR,
            1 => tracing::level_filters::LevelFilter::INFO,
            2 => tracing::level_filters::LevelFilter::DEBUG,
            _ => tracing::level_filters::LevelFilter::TRACE,
        }
    }
}
