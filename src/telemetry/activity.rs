//! Scoped activities
//!
//! An [`Activity`] makes exactly one terminal transition: `complete()`,
//! `fail()`, or drop. Dropping a started activity counts as a failure, so an
//! early `?` return, a cancelled future or a panic still records the span.

use std::time::{Duration, Instant};

use super::aggregator::TelemetryAggregator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    Started,
    Completed,
    Failed,
}

/// Timed span recording `<name>` duration, `<name>.count` and `<name>.errors`
#[must_use = "an activity dropped without complete() is recorded as failed"]
#[derive(Debug)]
pub struct Activity<'a> {
    telemetry: &'a TelemetryAggregator,
    name: String,
    started: Instant,
    state: ActivityState,
}

impl<'a> Activity<'a> {
    pub(crate) fn start(telemetry: &'a TelemetryAggregator, name: &str) -> Self {
        Self {
            telemetry,
            name: name.to_string(),
            started: Instant::now(),
            state: ActivityState::Started,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ActivityState {
        self.state
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Finish successfully, returning the recorded duration
    pub fn complete(mut self) -> Duration {
        self.finish(ActivityState::Completed)
    }

    /// Finish as failed, returning the recorded duration
    pub fn fail(mut self) -> Duration {
        self.finish(ActivityState::Failed)
    }

    fn finish(&mut self, terminal: ActivityState) -> Duration {
        let elapsed = self.started.elapsed();
        if self.state != ActivityState::Started {
            return elapsed;
        }
        self.state = terminal;

        self.telemetry
            .record_activity(&self.name, elapsed, terminal == ActivityState::Failed);
        elapsed
    }
}

impl Drop for Activity<'_> {
    fn drop(&mut self) {
        if self.state == ActivityState::Started {
            tracing::debug!(activity = %self.name, "activity dropped before completion");
            self.finish(ActivityState::Failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_counts_as_failure() {
        let telemetry = TelemetryAggregator::default();
        {
            let _activity = telemetry.start_activity("abandoned");
        }

        let snap = telemetry.metrics_snapshot();
        assert_eq!(snap.counter("abandoned.count"), 1);
        assert_eq!(snap.counter("abandoned.errors"), 1);
        assert!(snap.duration("abandoned").is_some());
    }

    #[test]
    fn test_early_return_is_recorded() {
        fn parse(
            telemetry: &TelemetryAggregator,
            input: &str,
        ) -> Result<i32, std::num::ParseIntError> {
            let activity = telemetry.start_activity("parse");
            let value = input.parse::<i32>()?;
            activity.complete();
            Ok(value)
        }

        let telemetry = TelemetryAggregator::default();
        assert!(parse(&telemetry, "12").is_ok());
        assert!(parse(&telemetry, "twelve").is_err());

        let snap = telemetry.metrics_snapshot();
        assert_eq!(snap.counter("parse.count"), 2);
        assert_eq!(snap.counter("parse.errors"), 1);
    }

    #[test]
    fn test_panic_is_recorded() {
        let telemetry = TelemetryAggregator::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _activity = telemetry.start_activity("explode");
            panic!("boom");
        }));
        assert!(result.is_err());

        let snap = telemetry.metrics_snapshot();
        assert_eq!(snap.counter("explode.count"), 1);
        assert_eq!(snap.counter("explode.errors"), 1);
    }
}
