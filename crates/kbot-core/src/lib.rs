pub mod bus;
pub mod config;
pub mod error;
pub mod rpc;
pub mod types;

pub use bus::Bus;
pub use error::{CoreError, Result};
pub use rpc::{
    AgentRpcClient, NewSessionParams, PromptContent, PromptRequest, PromptResponse, PromptSource,
    RpcError, SessionUpdate, SessionUpdateKind,
};
pub use types::{
    AgentSession, AgentSessionStatus, Conversation, ConversationStatus, ConversationTurn,
    EventRange, NormalizedMessage, PeerKind, Role, Sender, SessionEvent, SessionEventType,
    SessionKey,
};
