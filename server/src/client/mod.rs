//! Outbound clients for the chat service: the bootstrap HTTP API that
//! issues tokens and session ids, and the persistent WebSocket channel
//! the question/answer exchange runs over. Both sit behind traits so
//! the session engine can be driven against in-process fakes.

pub mod bootstrap;
pub mod channel;

pub use bootstrap::{BootstrapClient, BootstrapError, HttpBootstrapClient, SessionGrant, TokenGrant};
pub use channel::{ChannelConnector, ChannelError, ChatChannel, WsConnector};
