use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::AgentHostError;
use crate::turn::TurnOutcome;

const RECENT_REPORTS: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TurnReport {
    pub duration: Duration,
    pub model_calls: usize,
    pub tool_invocations: usize,
    pub tool_failures: usize,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MetricsSummary {
    pub turns: u64,
    pub successes: u64,
    pub failures: u64,
    pub model_calls: u64,
    pub tool_invocations: u64,
    pub tool_failures: u64,
    pub success_rate: f32,
}

#[derive(Default)]
struct MetricsState {
    recent: VecDeque<TurnReport>,
    summary: MetricsSummary,
}

/// Per-turn counters shared by every request a host serves.
#[derive(Default, Clone)]
pub struct MetricsTracker {
    state: Arc<Mutex<MetricsState>>,
}

impl std::fmt::Debug for MetricsTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsTracker")
            .field("turns", &self.lock().summary.turns)
            .finish()
    }
}

impl MetricsTracker {
    pub fn start_turn(&self) -> TurnGuard {
        TurnGuard {
            start: Instant::now(),
            metrics: self.clone(),
            recorded: false,
        }
    }

    /// Most recent reports, oldest first.
    pub fn reports(&self) -> Vec<TurnReport> {
        self.lock().recent.iter().cloned().collect()
    }

    pub fn summary(&self) -> MetricsSummary {
        self.lock().summary.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, report: TurnReport) {
        let mut state = self.lock();
        let summary = &mut state.summary;
        summary.turns += 1;
        if report.success {
            summary.successes += 1;
        } else {
            summary.failures += 1;
        }
        summary.model_calls += report.model_calls as u64;
        summary.tool_invocations += report.tool_invocations as u64;
        summary.tool_failures += report.tool_failures as u64;
        summary.success_rate = summary.successes as f32 / summary.turns as f32;

        if state.recent.len() == RECENT_REPORTS {
            state.recent.pop_front();
        }
        state.recent.push_back(report);
    }
}

/// Records exactly one report per turn. A guard dropped without `succeed` or
/// `fail` (the request future was abandoned) counts as a cancelled turn.
pub struct TurnGuard {
    start: Instant,
    metrics: MetricsTracker,
    recorded: bool,
}

impl TurnGuard {
    pub fn succeed(mut self, outcome: &TurnOutcome) -> TurnReport {
        self.record(TurnReport {
            duration: self.start.elapsed(),
            model_calls: outcome.model_calls,
            tool_invocations: outcome.tool_invocations,
            tool_failures: outcome.tool_failures,
            success: true,
            error_kind: None,
        })
    }

    pub fn fail(mut self, err: &AgentHostError) -> TurnReport {
        self.record(Self::failure(self.start, err.kind()))
    }

    fn failure(start: Instant, kind: &str) -> TurnReport {
        TurnReport {
            duration: start.elapsed(),
            success: false,
            error_kind: Some(kind.to_string()),
            ..TurnReport::default()
        }
    }

    fn record(&mut self, report: TurnReport) -> TurnReport {
        self.recorded = true;
        self.metrics.push(report.clone());
        report
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        if !self.recorded {
            let report = Self::failure(self.start, AgentHostError::Cancelled.kind());
            self.record(report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn outcome(tools: usize, failures: usize) -> TurnOutcome {
        TurnOutcome {
            reply: "ok".into(),
            history: vec![Message::assistant("ok")],
            model_calls: tools + 1,
            tool_invocations: tools,
            tool_failures: failures,
            transitions: Vec::new(),
        }
    }

    #[test]
    fn tracks_success_rate() {
        let tracker = MetricsTracker::default();
        let report = tracker.start_turn().succeed(&outcome(2, 1));
        assert_eq!(report.model_calls, 3);
        tracker
            .start_turn()
            .fail(&AgentHostError::ToolLoopLimitExceeded { limit: 2 });

        let summary = tracker.summary();
        assert_eq!(summary.turns, 2);
        assert_eq!(summary.tool_invocations, 2);
        assert_eq!(summary.tool_failures, 1);
        assert_eq!(summary.success_rate, 0.5);

        let reports = tracker.reports();
        assert_eq!(reports[1].error_kind.as_deref(), Some("tool_loop_limit_exceeded"));
    }

    #[test]
    fn keeps_a_bounded_window_of_reports() {
        let tracker = MetricsTracker::default();
        for _ in 0..RECENT_REPORTS + 10 {
            tracker.start_turn().succeed(&outcome(0, 0));
        }
        assert_eq!(tracker.reports().len(), RECENT_REPORTS);
        assert_eq!(tracker.summary().turns, (RECENT_REPORTS + 10) as u64);
    }

    #[test]
    fn abandoned_turn_counts_as_cancelled() {
        let tracker = MetricsTracker::default();
        let guard = tracker.start_turn();
        drop(guard);
        tracker.start_turn().succeed(&outcome(0, 0));

        let summary = tracker.summary();
        assert_eq!(summary.turns, 2);
        assert_eq!(summary.failures, 1);
        assert_eq!(tracker.reports()[0].error_kind.as_deref(), Some("cancelled"));
    }
}
