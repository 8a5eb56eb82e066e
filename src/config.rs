use std::time::Duration;

use crate::error::ConfigError;
use crate::Wrapping;

pub const MAX_LOOP_COUNT: u64 = 1_000_000;
pub const DEFAULT_LOOP_COUNT: u64 = 100_000;
pub const DEFAULT_REPETITIONS: u32 = 10;

/// Settings shared by every snippet of one `profile` call.
///
/// Values are validated when set, so a `HarnessConfig` that exists is always
/// usable; nothing is checked again at run time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HarnessConfig {
    set_up: String,
    tear_down: String,
    loop_count: u64,
    wrapping: Wrapping,
    repetitions: u32,
    timeout: Option<Duration>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            set_up: String::new(),
            tear_down: String::new(),
            loop_count: DEFAULT_LOOP_COUNT,
            wrapping: Wrapping::default(),
            repetitions: DEFAULT_REPETITIONS,
            timeout: None,
        }
    }
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_set_up(mut self, set_up: impl Into<String>) -> Self {
        self.set_up = set_up.into();
        self
    }

    pub fn with_tear_down(mut self, tear_down: impl Into<String>) -> Self {
        self.tear_down = tear_down.into();
        self
    }

    pub fn with_loop_count(mut self, loop_count: u64) -> Result<Self, ConfigError> {
        if loop_count == 0 || loop_count > MAX_LOOP_COUNT {
            return Err(ConfigError::LoopCountOutOfRange {
                got: loop_count,
                max: MAX_LOOP_COUNT,
            });
        }
        self.loop_count = loop_count;
        Ok(self)
    }

    pub fn with_wrapping(mut self, wrapping: Wrapping) -> Self {
        self.wrapping = wrapping;
        self
    }

    pub fn with_repetitions(mut self, repetitions: u32) -> Result<Self, ConfigError> {
        if repetitions == 0 {
            return Err(ConfigError::ZeroRepetitions);
        }
        self.repetitions = repetitions;
        Ok(self)
    }

    /// Upper bound on a single child-process invocation. `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Result<Self, ConfigError> {
        if timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ZeroTimeout);
        }
        self.timeout = timeout;
        Ok(self)
    }

    pub fn set_up(&self) -> &str {
        &self.set_up
    }

    pub fn tear_down(&self) -> &str {
        &self.tear_down
    }

    pub fn loop_count(&self) -> u64 {
        self.loop_count
    }

    pub fn wrapping(&self) -> Wrapping {
        self.wrapping
    }

    pub fn repetitions(&self) -> u32 {
        self.repetitions
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}
