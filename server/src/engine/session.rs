//! Per-session request/response state machine
//!
//! One engine instance drives one simulated client: bootstrap, a
//! single channel, then a strictly alternating question/answer
//! exchange over the whole per-course question queue. Every failure is
//! absorbed here and turned into a terminal [`SessionResult`]; nothing
//! propagates to sibling sessions or the ramp controller.

use crate::client::{BootstrapClient, BootstrapError, ChannelConnector, ChannelError, ChatChannel};
use crate::codec;
use crate::config::{MessageConfig, QuestionPlan, QuestionRequest};
use crate::engine::classify::{ErrorCategory, FailureKind, FailureSignal, classify};
use crate::engine::tracker::ConcurrencyTracker;
use crate::protocol::{ChatRequest, ChatResponse};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Dependencies shared by every session in a run
pub struct SessionContext {
    pub bootstrap: Arc<dyn BootstrapClient>,
    pub connector: Arc<dyn ChannelConnector>,
    pub tracker: Arc<ConcurrencyTracker>,
    pub questions: QuestionPlan,
    pub message: MessageConfig,
    pub encryption_enabled: bool,
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Authenticating,
    Connecting,
    Exchanging,
    Draining,
    Closed,
}

/// Terminal per-session outcome
#[derive(Debug, Clone, Serialize)]
pub struct SessionResult {
    pub session_index: usize,
    pub questions_sent: u64,
    pub responses_received: u64,
    pub successful: bool,
    pub setup_successful: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCategory>,
}

impl SessionResult {
    /// Result for a session that never got going (panicked task,
    /// cancelled run)
    pub fn aborted(session_index: usize, error: ErrorCategory) -> Self {
        Self {
            session_index,
            questions_sent: 0,
            responses_received: 0,
            successful: false,
            setup_successful: false,
            error: Some(error),
        }
    }
}

/// One simulated chat client
pub struct SessionEngine {
    index: usize,
    ctx: Arc<SessionContext>,
    state: SessionState,

    // Credentials from bootstrap
    token: Option<String>,
    client_code: Option<String>,
    session_id: Option<String>,
    connection_id: Option<String>,

    // Replaced wholesale on every server update that carries it
    session_attributes: Option<Value>,

    pending: Vec<QuestionRequest>,
    next_question: usize,
    all_questions_sent: bool,

    questions_sent: u64,
    responses_received: u64,
    waiting_for_response: bool,
    question_sent_at: Option<Instant>,

    failure: Option<ErrorCategory>,
}

impl Drop for SessionEngine {
    // The run deadline cancels session tasks mid-await; an in-flight
    // request still has to free its tracker slot. Ordinary exits go
    // through finish(), which clears the flag first.
    fn drop(&mut self) {
        if self.waiting_for_response {
            self.ctx.tracker.release();
        }
    }
}

impl SessionEngine {
    pub fn new(index: usize, ctx: Arc<SessionContext>) -> Self {
        Self {
            index,
            ctx,
            state: SessionState::Idle,
            token: None,
            client_code: None,
            session_id: None,
            connection_id: None,
            session_attributes: None,
            pending: Vec::new(),
            next_question: 0,
            all_questions_sent: false,
            questions_sent: 0,
            responses_received: 0,
            waiting_for_response: false,
            question_sent_at: None,
            failure: None,
        }
    }

    /// Drive the full session lifecycle to a terminal result
    pub async fn run(mut self) -> SessionResult {
        self.state = SessionState::Authenticating;
        if let Err(e) = self.setup().await {
            warn!(session = self.index, error = %e, "session setup failed");
            self.failure = Some(ErrorCategory::SetupFailed);
            return self.finish();
        }

        self.pending = self.ctx.questions.build_queue();
        info!(
            session = self.index,
            questions = self.pending.len(),
            "session starting"
        );

        self.state = SessionState::Connecting;
        let token = self.token.clone().unwrap_or_default();
        let mut channel = match self.ctx.connector.connect(&token).await {
            Ok(channel) => channel,
            Err(e) => {
                let category = classify(&e.signal());
                warn!(session = self.index, error = %e, category = %category, "channel connect failed");
                self.failure = Some(category);
                return self.finish();
            }
        };

        self.state = SessionState::Exchanging;
        self.exchange(channel.as_mut()).await;

        // Channel is released on every exit path
        let _ = channel.close().await;

        self.finish()
    }

    /// Obtain token and session id from the bootstrap collaborator.
    /// Terminal on any failure; never retried.
    async fn setup(&mut self) -> Result<(), BootstrapError> {
        let grant = self.ctx.bootstrap.issue_token().await?;
        self.client_code = grant.client_code;
        self.session_id = grant.session_id;
        self.connection_id = grant.connection_id;
        self.token = Some(grant.token);

        if self.session_id.is_none() {
            let token = self.token.as_deref().unwrap_or_default();
            let session = self.ctx.bootstrap.create_session(token).await?;
            self.session_id = Some(session.session_id);
        }
        Ok(())
    }

    /// Send the first question, then react to inbound messages until
    /// the queue is drained or the channel goes away.
    async fn exchange(&mut self, channel: &mut dyn ChatChannel) {
        self.send_next(channel).await;

        while self.state == SessionState::Exchanging {
            match channel.next_message().await {
                Some(Ok(raw)) => {
                    self.handle_message(&raw, channel).await;
                    if self.all_questions_sent && self.questions_sent == self.responses_received {
                        self.state = SessionState::Draining;
                    }
                }
                Some(Err(e)) => {
                    let category = classify(&e.signal());
                    warn!(session = self.index, error = %e, category = %category, "channel failed");
                    self.failure = Some(category);
                    break;
                }
                None => {
                    // Remote closed the channel
                    if !(self.all_questions_sent
                        && self.questions_sent == self.responses_received)
                    {
                        let signal = FailureSignal::new(
                            FailureKind::Closed,
                            "connection closed by server",
                        );
                        self.failure = Some(classify(&signal));
                        warn!(session = self.index, "connection closed by server");
                    }
                    break;
                }
            }
        }
    }

    /// Advance through the pending queue until one question is in
    /// flight or the queue is exhausted. An explicit loop so repeated
    /// send failures cannot grow the call stack.
    async fn send_next(&mut self, channel: &mut dyn ChatChannel) {
        while self.next_question < self.pending.len() {
            let question = self.pending[self.next_question].clone();
            self.next_question += 1;

            let request = self.build_request(&question);
            let json = match serde_json::to_string(&request) {
                Ok(json) => json,
                Err(e) => {
                    warn!(session = self.index, error = %e, "failed to serialize request");
                    continue;
                }
            };
            let wire = codec::encrypt(&json, self.ctx.encryption_enabled);

            match channel.send_text(wire).await {
                Ok(()) => {
                    self.ctx.tracker.increment();
                    self.questions_sent += 1;
                    self.waiting_for_response = true;
                    self.question_sent_at = Some(Instant::now());
                    debug!(
                        session = self.index,
                        sent = self.questions_sent,
                        total = self.pending.len(),
                        course = %question.course_id,
                        "question sent"
                    );
                    return;
                }
                Err(ChannelError::Closed(msg)) => {
                    debug!(session = self.index, reason = %msg, "channel closed while sending");
                    return;
                }
                Err(e) => {
                    // Skip forward; an individual send failure does not
                    // abort the session
                    warn!(session = self.index, error = %e, "send failed, advancing to next question");
                    continue;
                }
            }
        }

        self.all_questions_sent = true;
        if self.questions_sent == self.responses_received {
            info!(
                session = self.index,
                answered = self.responses_received,
                "all questions answered, closing channel"
            );
            self.state = SessionState::Draining;
            let _ = channel.close().await;
        }
    }

    /// Decode one inbound frame. Decode failures are logged and the
    /// session keeps waiting; only the terminal marker advances it.
    async fn handle_message(&mut self, raw: &str, channel: &mut dyn ChatChannel) {
        let decrypted = match codec::decrypt(raw, self.ctx.encryption_enabled) {
            Ok(plain) => plain,
            Err(e) => {
                warn!(session = self.index, error = %e, "failed to decrypt chunk, ignoring");
                return;
            }
        };

        let response: ChatResponse = match serde_json::from_str(&decrypted) {
            Ok(response) => response,
            Err(_) => {
                debug!(session = self.index, "non-JSON chunk, ignoring");
                return;
            }
        };

        if let Some(attributes) = response.session_attributes {
            // Wholesale replacement, never a field-by-field merge
            self.session_attributes = Some(attributes);
        }

        if let Some(answer) = response.complete_response {
            if !self.waiting_for_response {
                // No request outstanding; counting this would break
                // responses_received <= questions_sent
                debug!(session = self.index, "unsolicited terminal response, ignoring");
                return;
            }
            self.responses_received += 1;
            self.ctx.tracker.decrement_on_completion();
            self.waiting_for_response = false;

            let latency_ms = self
                .question_sent_at
                .map(|t| t.elapsed().as_secs_f64() * 1000.0);
            debug!(
                session = self.index,
                received = self.responses_received,
                sent = self.questions_sent,
                latency_ms,
                preview = %answer.chars().take(80).collect::<String>(),
                "response received"
            );

            if !self.all_questions_sent {
                self.send_next(channel).await;
            }
        }
    }

    fn build_request(&self, question: &QuestionRequest) -> ChatRequest {
        ChatRequest {
            session_id: self.session_id.clone().unwrap_or_default(),
            connection_id: self.connection_id.clone(),
            request_id: Uuid::new_v4(),
            client_code: self.client_code.clone(),
            request_to_generate_greeting_message: self
                .ctx
                .message
                .request_to_generate_greeting_message,
            language_code: self.ctx.message.language_code.clone(),
            user_message: question.text.clone(),
            session_attributes: self
                .session_attributes
                .clone()
                .unwrap_or_else(|| Value::Object(Default::default())),
            user_message_date_and_time: ChatRequest::now_timestamp(),
            user_timezone: self.ctx.message.user_timezone.clone(),
            conversation_id: Uuid::new_v4(),
            course_id: question.course_id.clone(),
        }
    }

    /// Terminal bookkeeping shared by every exit path
    fn finish(&mut self) -> SessionResult {
        if self.waiting_for_response {
            // The in-flight request will never be answered; its slot
            // must still be freed
            self.ctx.tracker.release();
            self.waiting_for_response = false;
        }
        self.state = SessionState::Closed;

        let successful =
            self.questions_sent == self.responses_received && self.questions_sent > 0;
        info!(
            session = self.index,
            sent = self.questions_sent,
            received = self.responses_received,
            successful,
            error = self.failure.map(|c| c.to_string()),
            "session finished"
        );

        SessionResult {
            session_index: self.index,
            questions_sent: self.questions_sent,
            responses_received: self.responses_received,
            successful,
            setup_successful: self.session_id.is_some(),
            error: self.failure,
        }
    }
}
