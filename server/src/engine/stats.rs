//! Run-level aggregation of session results

use crate::engine::classify::ErrorCategory;
use crate::engine::ramp::RampStage;
use crate::engine::session::SessionResult;
use crate::engine::tracker::TrackerSnapshot;
use metrics::counter;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

/// Everything a run produced, in one serializable report
#[derive(Debug, Clone, Serialize)]
pub struct LoadTestSummary {
    pub total_sessions: usize,
    pub setup_successful_sessions: usize,
    pub successful_sessions: usize,
    pub failed_sessions: usize,
    pub total_questions_sent: u64,
    pub total_responses_received: u64,
    /// Responses received as a percentage of questions sent
    pub success_rate: f64,
    /// Fully successful sessions as a percentage of all sessions
    pub session_success_rate: f64,
    pub peak_concurrent_requests: i64,
    pub final_concurrent_requests: i64,
    pub requests_started: u64,
    pub requests_completed: u64,
    pub errors_by_category: BTreeMap<ErrorCategory, u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ramp_stages: Vec<RampStage>,
    pub individual_results: Vec<SessionResult>,
}

/// Fold per-session results and the final tracker snapshot into one
/// summary. Also bumps the run-level counters.
pub fn aggregate(
    results: Vec<SessionResult>,
    snapshot: TrackerSnapshot,
    ramp_stages: Vec<RampStage>,
) -> LoadTestSummary {
    let total_sessions = results.len();
    let setup_successful_sessions = results.iter().filter(|r| r.setup_successful).count();
    let successful_sessions = results.iter().filter(|r| r.successful).count();
    let failed_sessions = total_sessions - successful_sessions;
    let total_questions_sent: u64 = results.iter().map(|r| r.questions_sent).sum();
    let total_responses_received: u64 = results.iter().map(|r| r.responses_received).sum();

    let success_rate = if total_questions_sent > 0 {
        total_responses_received as f64 / total_questions_sent as f64 * 100.0
    } else {
        0.0
    };
    let session_success_rate = if total_sessions > 0 {
        successful_sessions as f64 / total_sessions as f64 * 100.0
    } else {
        0.0
    };

    let mut errors_by_category: BTreeMap<ErrorCategory, u64> = BTreeMap::new();
    for result in &results {
        if let Some(category) = result.error {
            *errors_by_category.entry(category).or_insert(0) += 1;
        }
    }

    counter!("chatload_questions_sent_total").increment(total_questions_sent);
    counter!("chatload_responses_received_total").increment(total_responses_received);
    counter!("chatload_sessions_total").increment(total_sessions as u64);
    counter!("chatload_sessions_failed_total").increment(failed_sessions as u64);
    for (category, count) in &errors_by_category {
        counter!("chatload_session_errors_total", "category" => category.to_string())
            .increment(*count);
    }

    LoadTestSummary {
        total_sessions,
        setup_successful_sessions,
        successful_sessions,
        failed_sessions,
        total_questions_sent,
        total_responses_received,
        success_rate,
        session_success_rate,
        peak_concurrent_requests: snapshot.peak,
        final_concurrent_requests: snapshot.current,
        requests_started: snapshot.started,
        requests_completed: snapshot.completed,
        errors_by_category,
        ramp_stages,
        individual_results: results,
    }
}

impl LoadTestSummary {
    /// End-of-run report in the log stream
    pub fn log(&self) {
        info!(
            total_sessions = self.total_sessions,
            successful_sessions = self.successful_sessions,
            failed_sessions = self.failed_sessions,
            setup_successful_sessions = self.setup_successful_sessions,
            questions_sent = self.total_questions_sent,
            responses_received = self.total_responses_received,
            success_rate = format!("{:.1}%", self.success_rate),
            session_success_rate = format!("{:.1}%", self.session_success_rate),
            peak_concurrent_requests = self.peak_concurrent_requests,
            "load test complete"
        );
        for (category, count) in &self.errors_by_category {
            info!(category = %category, count, "session failures");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(
        index: usize,
        sent: u64,
        received: u64,
        error: Option<ErrorCategory>,
    ) -> SessionResult {
        SessionResult {
            session_index: index,
            questions_sent: sent,
            responses_received: received,
            successful: sent == received && sent > 0,
            setup_successful: error != Some(ErrorCategory::SetupFailed),
            error,
        }
    }

    fn snapshot(peak: i64, started: u64, completed: u64) -> TrackerSnapshot {
        TrackerSnapshot {
            current: 0,
            peak,
            started,
            completed,
        }
    }

    #[test]
    fn test_aggregate_mixed_outcomes() {
        let results = vec![
            result(1, 3, 3, None),
            result(2, 3, 1, Some(ErrorCategory::ConnectionClosed)),
            result(3, 0, 0, Some(ErrorCategory::SetupFailed)),
            result(4, 2, 0, Some(ErrorCategory::ConnectionClosed)),
        ];
        let summary = aggregate(results, snapshot(3, 8, 4), Vec::new());

        assert_eq!(summary.total_sessions, 4);
        assert_eq!(summary.successful_sessions, 1);
        assert_eq!(summary.failed_sessions, 3);
        assert_eq!(summary.setup_successful_sessions, 3);
        assert_eq!(summary.total_questions_sent, 8);
        assert_eq!(summary.total_responses_received, 4);
        assert!((summary.success_rate - 50.0).abs() < f64::EPSILON);
        assert!((summary.session_success_rate - 25.0).abs() < f64::EPSILON);
        assert_eq!(
            summary.errors_by_category[&ErrorCategory::ConnectionClosed],
            2
        );
        assert_eq!(summary.errors_by_category[&ErrorCategory::SetupFailed], 1);
        assert_eq!(summary.peak_concurrent_requests, 3);
    }

    #[test]
    fn test_aggregate_empty_run_avoids_division() {
        let summary = aggregate(Vec::new(), snapshot(0, 0, 0), Vec::new());
        assert_eq!(summary.total_sessions, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.session_success_rate, 0.0);
        assert!(summary.errors_by_category.is_empty());
    }

    #[test]
    fn test_summary_serializes_categories_as_strings() {
        let results = vec![result(1, 1, 0, Some(ErrorCategory::GatewayTimeout504))];
        let summary = aggregate(results, snapshot(1, 1, 0), Vec::new());
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["errors_by_category"]["504_gateway_timeout"], 1);
        assert!(json.get("ramp_stages").is_none());
    }
}
