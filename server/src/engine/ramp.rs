//! Staged ramp-up and run orchestration
//!
//! A run is a set of session tasks sharing one tracker. Flat runs
//! start every session at once; progressive runs start them in stages
//! computed by [`RampSchedule`] with a fixed pause between stages.

use crate::engine::session::{SessionContext, SessionEngine, SessionResult};
use crate::engine::stats::{self, LoadTestSummary};
use crate::engine::tracker::monitor_tracker;
use crate::engine::classify::ErrorCategory;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Progressive-mode parameters
#[derive(Debug, Clone)]
pub struct RampConfig {
    /// Sessions in the first stage
    pub start_sessions: usize,
    /// Cumulative session ceiling
    pub max_sessions: usize,
    /// Sessions added per later stage
    pub increment: usize,
    /// Pause between stages
    pub interval: Duration,
}

/// One executed stage of a progressive run
#[derive(Debug, Clone, Serialize)]
pub struct RampStage {
    pub stage: usize,
    pub sessions: usize,
    pub cumulative_sessions: usize,
}

/// Pure stage iterator: first stage is `start_sessions` (capped at
/// the ceiling), later stages add `increment` until the cumulative
/// total reaches `max_sessions` exactly, the last stage shrinking to
/// fit.
pub struct RampSchedule {
    start: usize,
    max: usize,
    increment: usize,
    stage: usize,
    cumulative: usize,
}

impl RampSchedule {
    pub fn new(config: &RampConfig) -> Self {
        Self {
            start: config.start_sessions,
            max: config.max_sessions,
            increment: config.increment,
            stage: 0,
            cumulative: 0,
        }
    }
}

impl Iterator for RampSchedule {
    type Item = RampStage;

    fn next(&mut self) -> Option<RampStage> {
        if self.cumulative >= self.max {
            return None;
        }
        let size = if self.stage == 0 {
            self.start.min(self.max)
        } else {
            self.increment.min(self.max - self.cumulative)
        };
        if size == 0 {
            return None;
        }
        self.stage += 1;
        self.cumulative += size;
        Some(RampStage {
            stage: self.stage,
            sessions: size,
            cumulative_sessions: self.cumulative,
        })
    }
}

/// Orchestrates one run: spawns sessions, keeps the monitor alive for
/// the duration, and folds everything into a summary.
pub struct LoadRunner {
    ctx: Arc<SessionContext>,
    monitor_interval: Duration,
    run_timeout: Option<Duration>,
}

impl LoadRunner {
    pub fn new(
        ctx: Arc<SessionContext>,
        monitor_interval: Duration,
        run_timeout: Option<Duration>,
    ) -> Self {
        Self {
            ctx,
            monitor_interval,
            run_timeout,
        }
    }

    /// Start `num_sessions` sessions all at once
    pub async fn run_flat(&self, num_sessions: usize) -> LoadTestSummary {
        info!(num_sessions, "starting flat load test");
        self.ctx.tracker.reset();
        let deadline = self.deadline();
        let monitor = self.spawn_monitor();

        let handles = self.spawn_sessions(1, num_sessions);
        let results = collect_results(handles, deadline).await;

        monitor.abort();
        let summary = stats::aggregate(results, self.ctx.tracker.snapshot(), Vec::new());
        summary.log();
        summary
    }

    /// Start sessions in stages, pausing between them. Sessions from
    /// earlier stages keep running while later stages start.
    pub async fn run_progressive(&self, ramp: RampConfig) -> LoadTestSummary {
        info!(
            start = ramp.start_sessions,
            max = ramp.max_sessions,
            increment = ramp.increment,
            interval_secs = ramp.interval.as_secs(),
            "starting progressive load test"
        );
        self.ctx.tracker.reset();
        let deadline = self.deadline();
        let monitor = self.spawn_monitor();

        let mut handles = Vec::new();
        let mut stages = Vec::new();
        let mut schedule = RampSchedule::new(&ramp).peekable();
        while let Some(stage) = schedule.next() {
            info!(
                stage = stage.stage,
                new_sessions = stage.sessions,
                cumulative = stage.cumulative_sessions,
                "starting ramp stage"
            );
            let first_index = stage.cumulative_sessions - stage.sessions + 1;
            handles.extend(self.spawn_sessions(first_index, stage.sessions));
            let last = schedule.peek().is_none();
            stages.push(stage);
            if !last {
                tokio::time::sleep(ramp.interval).await;
            }
        }

        let results = collect_results(handles, deadline).await;

        monitor.abort();
        let summary = stats::aggregate(results, self.ctx.tracker.snapshot(), stages);
        summary.log();
        summary
    }

    fn spawn_sessions(
        &self,
        first_index: usize,
        count: usize,
    ) -> Vec<(usize, JoinHandle<SessionResult>)> {
        (first_index..first_index + count)
            .map(|index| {
                let engine = SessionEngine::new(index, self.ctx.clone());
                (index, tokio::spawn(engine.run()))
            })
            .collect()
    }

    fn spawn_monitor(&self) -> JoinHandle<()> {
        tokio::spawn(monitor_tracker(
            self.ctx.tracker.clone(),
            self.monitor_interval,
        ))
    }

    fn deadline(&self) -> Option<tokio::time::Instant> {
        self.run_timeout.map(|t| tokio::time::Instant::now() + t)
    }
}

/// Await every session, enforcing the optional run deadline. A
/// session still running at the deadline is aborted, which drops its
/// channel and closes the socket; it is reported as timed out.
async fn collect_results(
    handles: Vec<(usize, JoinHandle<SessionResult>)>,
    deadline: Option<tokio::time::Instant>,
) -> Vec<SessionResult> {
    let mut results = Vec::with_capacity(handles.len());
    for (index, mut handle) in handles {
        let joined = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(session = index, "run deadline passed, cancelling session");
                    handle.abort();
                    // Wait for the cancellation to land so the session's
                    // cleanup (socket close, tracker release) has run
                    // before the final snapshot is taken
                    match handle.await {
                        // Lost the race with completion; keep the result
                        Ok(result) => results.push(result),
                        Err(_) => results.push(SessionResult::aborted(
                            index,
                            ErrorCategory::ConnectionTimeout,
                        )),
                    }
                    continue;
                }
            },
            None => (&mut handle).await,
        };
        match joined {
            Ok(result) => results.push(result),
            Err(e) => {
                warn!(session = index, error = %e, "session task failed");
                results.push(SessionResult::aborted(index, ErrorCategory::Unknown));
            }
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{
        BootstrapClient, BootstrapError, ChannelConnector, ChannelError, ChatChannel,
        SessionGrant, TokenGrant,
    };
    use crate::config::{CoursePool, MessageConfig, QuestionPlan};
    use crate::engine::tracker::ConcurrencyTracker;
    use async_trait::async_trait;

    fn schedule(start: usize, max: usize, increment: usize) -> Vec<RampStage> {
        RampSchedule::new(&RampConfig {
            start_sessions: start,
            max_sessions: max,
            increment,
            interval: Duration::from_secs(0),
        })
        .collect()
    }

    #[test]
    fn test_schedule_shrinks_final_stage_to_ceiling() {
        let stages = schedule(10, 95, 30);
        let sizes: Vec<usize> = stages.iter().map(|s| s.sessions).collect();
        let cumulative: Vec<usize> = stages.iter().map(|s| s.cumulative_sessions).collect();
        assert_eq!(sizes, vec![10, 30, 30, 25]);
        assert_eq!(cumulative, vec![10, 40, 70, 95]);
        assert_eq!(stages.last().unwrap().stage, 4);
    }

    #[test]
    fn test_schedule_exact_fit_has_no_empty_stage() {
        let stages = schedule(10, 70, 30);
        let sizes: Vec<usize> = stages.iter().map(|s| s.sessions).collect();
        assert_eq!(sizes, vec![10, 30, 30]);
    }

    #[test]
    fn test_start_capped_at_ceiling() {
        let stages = schedule(100, 50, 30);
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].sessions, 50);
        assert_eq!(stages[0].cumulative_sessions, 50);
    }

    #[test]
    fn test_zero_increment_stops_after_first_stage() {
        let stages = schedule(10, 50, 0);
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].sessions, 10);
    }

    #[test]
    fn test_zero_start_yields_no_stages() {
        assert!(schedule(0, 50, 10).is_empty());
    }

    struct GrantingBootstrap;

    #[async_trait]
    impl BootstrapClient for GrantingBootstrap {
        async fn issue_token(&self) -> Result<TokenGrant, BootstrapError> {
            Ok(TokenGrant {
                token: "tok".to_string(),
                client_code: None,
                session_id: Some("sess".to_string()),
                connection_id: None,
            })
        }

        async fn create_session(&self, _token: &str) -> Result<SessionGrant, BootstrapError> {
            Ok(SessionGrant {
                session_id: "sess".to_string(),
            })
        }
    }

    /// Accepts sends but never delivers a response
    struct StalledChannel;

    #[async_trait]
    impl ChatChannel for StalledChannel {
        async fn send_text(&mut self, _text: String) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn next_message(&mut self) -> Option<Result<String, ChannelError>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    struct StalledConnector;

    #[async_trait]
    impl ChannelConnector for StalledConnector {
        async fn connect(&self, _token: &str) -> Result<Box<dyn ChatChannel>, ChannelError> {
            Ok(Box::new(StalledChannel))
        }
    }

    fn stalled_context() -> Arc<SessionContext> {
        Arc::new(SessionContext {
            bootstrap: Arc::new(GrantingBootstrap),
            connector: Arc::new(StalledConnector),
            tracker: Arc::new(ConcurrencyTracker::new()),
            questions: QuestionPlan {
                courses: vec![CoursePool {
                    course_id: "TEST100".to_string(),
                    questions: vec!["question".to_string()],
                }],
            },
            message: MessageConfig::default(),
            encryption_enabled: true,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline_cancels_sessions_and_frees_slots() {
        let ctx = stalled_context();
        let runner = LoadRunner::new(
            ctx.clone(),
            Duration::from_secs(60),
            Some(Duration::from_secs(5)),
        );

        let summary = runner.run_flat(2).await;

        assert_eq!(summary.total_sessions, 2);
        assert_eq!(summary.successful_sessions, 0);
        assert_eq!(
            summary.errors_by_category[&ErrorCategory::ConnectionTimeout],
            2
        );
        // Each session had one request in flight when it was cancelled;
        // the slots must come back before the final snapshot
        assert_eq!(summary.requests_started, 2);
        assert_eq!(summary.requests_completed, 0);
        assert_eq!(summary.final_concurrent_requests, 0);
        assert_eq!(summary.peak_concurrent_requests, 2);
    }
}
