//! Per-variable read request pacing.

use std::time::Duration;

use crate::registry::VariableRegistry;
use crate::runtime::RuntimeState;

/// Decides which variables need a new read request.
///
/// A variable is due when no request was sent yet, or when at least the
/// poll interval has passed since the last one.
#[derive(Debug, Clone, Copy)]
pub struct PollScheduler {
    interval_ms: i64,
}

impl PollScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: i64::try_from(interval.as_millis()).unwrap_or(i64::MAX),
        }
    }

    pub fn is_due(&self, last_request_ms: Option<i64>, now_ms: i64) -> bool {
        match last_request_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.interval_ms,
        }
    }

    /// Names of the due variables, in configuration order.
    pub fn due<'a>(
        &self,
        registry: &'a VariableRegistry,
        runtime: &RuntimeState,
        now_ms: i64,
    ) -> Vec<&'a str> {
        registry
            .names()
            .filter(|name| self.is_due(runtime.last_request_ms(name), now_ms))
            .collect()
    }

    /// Record that a request for `name` went out at `now_ms`.
    pub fn mark_requested(&self, runtime: &mut RuntimeState, name: &str, now_ms: i64) {
        runtime.entry(name).last_request_ms = Some(now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VariableConfig;

    fn registry() -> VariableRegistry {
        VariableRegistry::new(vec![
            VariableConfig::new("P1", "kW"),
            VariableConfig::new("P2", "kW"),
        ])
    }

    #[test]
    fn test_never_requested_is_due() {
        let scheduler = PollScheduler::new(Duration::from_millis(5000));
        let runtime = RuntimeState::new();
        assert_eq!(scheduler.due(&registry(), &runtime, 0), vec!["P1", "P2"]);
    }

    #[test]
    fn test_interval_boundary() {
        let scheduler = PollScheduler::new(Duration::from_millis(5000));
        let registry = registry();
        let mut runtime = RuntimeState::new();

        scheduler.mark_requested(&mut runtime, "P1", 10_000);

        assert_eq!(scheduler.due(&registry, &runtime, 14_999), vec!["P2"]);
        assert_eq!(scheduler.due(&registry, &runtime, 15_000), vec!["P1", "P2"]);
    }

    #[test]
    fn test_cleared_requests_are_due_again() {
        let scheduler = PollScheduler::new(Duration::from_millis(5000));
        let registry = registry();
        let mut runtime = RuntimeState::new();

        scheduler.mark_requested(&mut runtime, "P1", 1_000);
        scheduler.mark_requested(&mut runtime, "P2", 1_000);
        assert!(scheduler.due(&registry, &runtime, 2_000).is_empty());

        runtime.clear_request_times();
        assert_eq!(scheduler.due(&registry, &runtime, 2_000), vec!["P1", "P2"]);
    }
}
