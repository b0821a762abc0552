//! Runtime configuration of the reactive engine.

/// Default number of rows handed to one parallel work item.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Tunables for [`ReactiveEngine`](crate::reactive::engine::ReactiveEngine).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReactiveConfig {
    /// Rows per work item in value-diff passes. Values below 1 are treated as 1.
    pub batch_size: usize,
    /// Run passes and consumer stages on the rayon pool.
    pub parallel: bool,
    /// Freeze the component registry when the first tick starts.
    ///
    /// Every reactive marker is allocated at registration, so freezing only
    /// rejects types first named after that point, and any reactive group or
    /// update group registered later.
    pub freeze_registry_on_first_tick: bool,
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self { batch_size: DEFAULT_BATCH_SIZE, parallel: true, freeze_registry_on_first_tick: false }
    }
}

impl ReactiveConfig {
    /// Sets the rows per work item.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Enables or disables parallel execution.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Enables or disables registry freezing on the first tick.
    pub fn with_freeze_registry_on_first_tick(mut self, freeze: bool) -> Self {
        self.freeze_registry_on_first_tick = freeze;
        self
    }

    /// Batch size clamped to at least one row.
    #[inline]
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}
