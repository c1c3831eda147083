//! Service configuration
//!
//! Configuration is loaded from environment variables; the per-course
//! question pools ship with built-in defaults and can be replaced
//! wholesale from a JSON file (`QUESTIONS_FILE`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::time::Duration;
use tracing::warn;

/// Main service configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Trigger API bind address
    pub host: String,
    /// Trigger API port
    pub port: u16,

    /// Chat service endpoints and credentials
    pub target: TargetConfig,

    /// Load-run defaults (overridable per trigger request)
    pub load: LoadConfig,

    /// Constant fields of every outbound message
    pub message: MessageConfig,

    /// Per-course question pools
    pub questions: QuestionPlan,
}

/// Chat service endpoints and credentials
#[derive(Debug, Clone)]
pub struct TargetConfig {
    /// Base URL of the bootstrap HTTP API
    pub api_base_url: String,
    /// Full WebSocket endpoint (token appended as a query parameter)
    pub websocket_url: String,
    /// Origin header required by the channel handshake
    pub websocket_origin: String,
    /// Bootstrap credentials
    pub access_key: String,
    pub secret_key: String,
    /// `environment` header on bootstrap calls
    pub environment: String,
    /// Whether payloads are wire-codec encrypted
    pub encryption_enabled: bool,
    /// Channel handshake timeout
    pub connect_timeout: Duration,
    /// Opaque user-context blob forwarded on token issue
    pub user_context: Value,
    /// Opaque metadata blob forwarded on token issue
    pub metadata: Value,
}

/// Load-run defaults
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Flat mode: sessions started at once
    pub num_sessions: usize,
    /// Progressive mode: initial cohort size
    pub ramp_start_sessions: usize,
    /// Progressive mode: cumulative session ceiling
    pub ramp_max_sessions: usize,
    /// Progressive mode: sessions added per stage
    pub ramp_increment: usize,
    /// Progressive mode: pause between stages
    pub ramp_interval: Duration,
    /// Concurrency monitor reporting interval
    pub monitor_interval: Duration,
    /// Optional whole-run deadline; sessions still running when it
    /// passes are cancelled and their channels closed
    pub run_timeout: Option<Duration>,
}

/// Constant fields of every outbound message
#[derive(Debug, Clone)]
pub struct MessageConfig {
    pub request_to_generate_greeting_message: u8,
    pub language_code: String,
    pub user_timezone: String,
}

/// One question drawn from a course pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRequest {
    pub course_id: String,
    pub text: String,
}

/// Question pool for one course
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoursePool {
    pub course_id: String,
    pub questions: Vec<String>,
}

/// Ordered per-course question pools; every session asks all of them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionPlan {
    pub courses: Vec<CoursePool>,
}

impl QuestionPlan {
    /// Build the ordered queue one session works through: pools
    /// concatenated in course order, questions in pool order.
    pub fn build_queue(&self) -> Vec<QuestionRequest> {
        let mut queue = Vec::new();
        for pool in &self.courses {
            for question in &pool.questions {
                queue.push(QuestionRequest {
                    course_id: pool.course_id.clone(),
                    text: question.clone(),
                });
            }
        }
        queue
    }

    pub fn questions_per_session(&self) -> usize {
        self.courses.iter().map(|p| p.questions.len()).sum()
    }

    /// Load a plan from a JSON file: `{"courses": [{"course_id": ..,
    /// "questions": [..]}]}`. Replaces the built-in pools wholesale.
    pub fn from_file(path: &str) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(std::io::Error::other)
    }
}

impl Default for QuestionPlan {
    fn default() -> Self {
        let general: Vec<String> = [
            "Hi, please explain the course description",
            "What are the modules of this course?",
            "What topics will I learn in this course?",
            "How is this course structured?",
            "What are the learning objectives?",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        Self {
            courses: vec![
                CoursePool {
                    course_id: "MED1060".to_string(),
                    questions: general.clone(),
                },
                CoursePool {
                    course_id: "BUMA1000".to_string(),
                    questions: general,
                },
            ],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            target: TargetConfig::default(),
            load: LoadConfig::default(),
            message: MessageConfig::default(),
            questions: QuestionPlan::default(),
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:9000".to_string(),
            websocket_url: "ws://127.0.0.1:9001/chatbot".to_string(),
            websocket_origin: "http://127.0.0.1".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            environment: "dev".to_string(),
            encryption_enabled: true,
            connect_timeout: Duration::from_secs(30),
            user_context: Value::Object(Default::default()),
            metadata: Value::Object(Default::default()),
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            num_sessions: 2,
            ramp_start_sessions: 10,
            ramp_max_sessions: 500,
            ramp_increment: 50,
            ramp_interval: Duration::from_secs(180),
            monitor_interval: Duration::from_secs(5),
            run_timeout: None,
        }
    }
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            request_to_generate_greeting_message: 0,
            language_code: "en".to_string(),
            user_timezone: "UTC".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = env::var("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }

        // Target config
        if let Ok(url) = env::var("API_BASE_URL") {
            config.target.api_base_url = url;
        }
        if let Ok(url) = env::var("WEBSOCKET_URL") {
            config.target.websocket_url = url;
        }
        if let Ok(origin) = env::var("WEBSOCKET_ORIGIN") {
            config.target.websocket_origin = origin;
        }
        if let Ok(key) = env::var("API_ACCESS_KEY") {
            config.target.access_key = key;
        }
        if let Ok(key) = env::var("API_SECRET_KEY") {
            config.target.secret_key = key;
        }
        if let Ok(val) = env::var("TARGET_ENVIRONMENT") {
            config.target.environment = val;
        }
        if let Ok(val) = env::var("ENCRYPTION_ENABLED") {
            config.target.encryption_enabled = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = env::var("CONNECT_TIMEOUT_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.target.connect_timeout = Duration::from_secs(secs);
        }

        // Load config
        if let Ok(val) = env::var("NUM_SESSIONS")
            && let Ok(v) = val.parse()
        {
            config.load.num_sessions = v;
        }
        if let Ok(val) = env::var("RAMP_START_SESSIONS")
            && let Ok(v) = val.parse()
        {
            config.load.ramp_start_sessions = v;
        }
        if let Ok(val) = env::var("RAMP_MAX_SESSIONS")
            && let Ok(v) = val.parse()
        {
            config.load.ramp_max_sessions = v;
        }
        if let Ok(val) = env::var("RAMP_INCREMENT")
            && let Ok(v) = val.parse()
        {
            config.load.ramp_increment = v;
        }
        if let Ok(val) = env::var("RAMP_INTERVAL_SECONDS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.load.ramp_interval = Duration::from_secs(secs);
        }
        if let Ok(val) = env::var("MONITOR_INTERVAL_SECONDS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.load.monitor_interval = Duration::from_secs(secs);
        }
        if let Ok(val) = env::var("RUN_TIMEOUT_SECONDS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.load.run_timeout = Some(Duration::from_secs(secs));
        }

        // Message config
        if let Ok(val) = env::var("LANGUAGE_CODE") {
            config.message.language_code = val;
        }
        if let Ok(val) = env::var("USER_TIMEZONE") {
            config.message.user_timezone = val;
        }

        // Question plan
        if let Ok(path) = env::var("QUESTIONS_FILE")
            && !path.is_empty()
        {
            match QuestionPlan::from_file(&path) {
                Ok(plan) => config.questions = plan,
                Err(e) => {
                    warn!("Failed to load question plan from {}: {}", path, e);
                }
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert!(config.target.encryption_enabled);
        assert_eq!(config.load.ramp_increment, 50);
    }

    #[test]
    fn test_question_queue_order() {
        let plan = QuestionPlan {
            courses: vec![
                CoursePool {
                    course_id: "A".to_string(),
                    questions: vec!["a1".to_string(), "a2".to_string()],
                },
                CoursePool {
                    course_id: "B".to_string(),
                    questions: vec!["b1".to_string()],
                },
            ],
        };

        let queue = plan.build_queue();
        assert_eq!(plan.questions_per_session(), 3);
        assert_eq!(
            queue,
            vec![
                QuestionRequest {
                    course_id: "A".to_string(),
                    text: "a1".to_string()
                },
                QuestionRequest {
                    course_id: "A".to_string(),
                    text: "a2".to_string()
                },
                QuestionRequest {
                    course_id: "B".to_string(),
                    text: "b1".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_config_from_env_defaults() {
        // No env vars set in this test, so defaults come back
        let config = Config::from_env();
        assert_eq!(config.load.num_sessions, 2);
    }
}
