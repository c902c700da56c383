//! Cascaded timeout coordination.
//!
//! Every query runs under three nested timeouts: the HTTP endpoint, the queue
//! wait, and the engine execution. The coordinator keeps them strictly
//! ordered (`endpoint > queue > execution`) with 30-second buffers so an
//! inner layer always times out before its parent gives up on it.

use std::time::Duration;

/// Execution context that caps the endpoint timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutContext {
    /// Testing tools and browsers expect fast synchronous answers.
    Interactive,
    /// Streaming responses hold the connection open longer.
    Streaming,
    /// Queued work gets the widest budget.
    Queued,
}

/// The derived timeout budget for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutBudget {
    pub endpoint: Duration,
    pub queue: Duration,
    pub execution: Duration,
}

/// Derives coordinated timeouts from a requested value and context.
#[derive(Debug, Clone)]
pub struct TimeoutCoordinator {
    queue_buffer: Duration,
    execution_buffer: Duration,
    max_interactive: Duration,
    max_streaming: Duration,
    max_queued: Duration,
    floor: Duration,
}

impl Default for TimeoutCoordinator {
    fn default() -> Self {
        Self {
            queue_buffer: Duration::from_secs(30),
            execution_buffer: Duration::from_secs(30),
            max_interactive: Duration::from_secs(30),
            max_streaming: Duration::from_secs(300),
            max_queued: Duration::from_secs(600),
            floor: Duration::from_secs(30),
        }
    }
}

impl TimeoutCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculates the budget for a requested timeout in the given context.
    ///
    /// Queue and execution timeouts never drop below 30 seconds, so for small
    /// requested values the three layers converge on the floor.
    pub fn calculate(&self, requested: Duration, context: TimeoutContext) -> TimeoutBudget {
        let cap = match context {
            TimeoutContext::Interactive => self.max_interactive,
            TimeoutContext::Streaming => self.max_streaming,
            TimeoutContext::Queued => self.max_queued,
        };

        let endpoint = requested.min(cap);
        let queue = endpoint.saturating_sub(self.queue_buffer).max(self.floor);
        let execution = queue.saturating_sub(self.execution_buffer).max(self.floor);

        TimeoutBudget {
            endpoint,
            queue,
            execution,
        }
    }
}
