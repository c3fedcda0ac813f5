use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub const DEFAULT_WINDOW_SIZE: usize = 30;
pub const DEFAULT_PREFETCH: usize = 1;
pub const DEFAULT_TRIGGER_POINT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Entries per window; the unit of fetching.
    pub window_size: usize,
    /// Windows to fetch ids for on either side of a requested window.
    pub prefetch: usize,
    /// Distance from a window edge at which the neighbouring window is
    /// fetched too.
    pub trigger_point: usize,
    /// Drop requests for windows no range observer is looking at.
    pub optimise_fetching: bool,
    /// The source can send deltas between states. Without this, an id list
    /// from a different state replaces the whole list.
    pub can_get_delta_updates: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            prefetch: DEFAULT_PREFETCH,
            trigger_point: DEFAULT_TRIGGER_POINT,
            optimise_fetching: false,
            can_get_delta_updates: true,
        }
    }
}

impl QueryConfig {
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn with_trigger_point(mut self, trigger_point: usize) -> Self {
        self.trigger_point = trigger_point;
        self
    }

    pub fn with_optimise_fetching(mut self, optimise_fetching: bool) -> Self {
        self.optimise_fetching = optimise_fetching;
        self
    }

    pub fn with_delta_updates(mut self, can_get_delta_updates: bool) -> Self {
        self.can_get_delta_updates = can_get_delta_updates;
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.window_size == 0 {
            return Err(EngineError::InvalidConfig("window_size must be non-zero".into()));
        }
        if self.trigger_point > self.window_size {
            return Err(EngineError::InvalidConfig(format!(
                "trigger_point {} exceeds window_size {}",
                self.trigger_point, self.window_size
            )));
        }
        Ok(())
    }
}
