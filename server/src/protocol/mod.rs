pub mod messages;

pub use messages::{ChatRequest, ChatResponse};
