//! Trace output configuration

use std::path::{Path, PathBuf};

/// Environment variable selecting the output file
pub const OUTPUT_ENV_VAR: &str = "TRACE_OUTPUT";

/// Output file used when [`OUTPUT_ENV_VAR`] is unset
pub const DEFAULT_OUTPUT_PATH: &str = "trace.json";

/// Hard ceiling on tracked call depth
pub const MAX_CALL_DEPTH: usize = 2048;

/// Configuration for a trace session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceConfig {
    /// Where the event log is written
    pub output_path: PathBuf,
    /// Frames beyond this depth are counted but not tracked
    pub max_depth: usize,
}

impl TraceConfig {
    /// Configuration writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: path.into(),
            max_depth: MAX_CALL_DEPTH,
        }
    }

    /// Read the output destination from `TRACE_OUTPUT`
    ///
    /// An unset or empty variable selects `trace.json` in the working
    /// directory.
    pub fn from_env() -> Self {
        match std::env::var_os(OUTPUT_ENV_VAR) {
            Some(path) if !path.is_empty() => Self::new(path),
            _ => Self::default(),
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = TraceConfig::default();
        assert_eq!(config.output_path(), Path::new("trace.json"));
        assert_eq!(config.max_depth, 2048);
    }

    #[test]
    fn test_with_max_depth() {
        let config = TraceConfig::new("/tmp/out.json").with_max_depth(8);
        assert_eq!(config.max_depth, 8);
        assert_eq!(config.output_path(), Path::new("/tmp/out.json"));
    }

    #[test]
    #[serial]
    fn test_from_env_uses_variable() {
        std::env::set_var(OUTPUT_ENV_VAR, "/tmp/custom_trace.json");
        let config = TraceConfig::from_env();
        std::env::remove_var(OUTPUT_ENV_VAR);
        assert_eq!(config.output_path(), Path::new("/tmp/custom_trace.json"));
    }

    #[test]
    #[serial]
    fn test_from_env_falls_back_to_default() {
        std::env::remove_var(OUTPUT_ENV_VAR);
        assert_eq!(TraceConfig::from_env(), TraceConfig::default());

        std::env::set_var(OUTPUT_ENV_VAR, "");
        let config = TraceConfig::from_env();
        std::env::remove_var(OUTPUT_ENV_VAR);
        assert_eq!(config, TraceConfig::default());
    }
}
