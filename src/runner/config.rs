//! Runner configuration

/// Configuration for the subprocess runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Shell and leading arguments; the command is appended as the last argument
    pub shell: Vec<String>,

    /// Maximum bytes of output kept per step
    pub max_log_bytes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            shell: vec!["sh".to_string(), "-e".to_string(), "-c".to_string()],
            max_log_bytes: 1024 * 1024,
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(mut self, shell: Vec<String>) -> Self {
        if !shell.is_empty() {
            self.shell = shell;
        }
        self
    }

    pub fn with_max_log_bytes(mut self, max_log_bytes: usize) -> Self {
        self.max_log_bytes = max_log_bytes;
        self
    }
}
