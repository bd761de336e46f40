//! Core types shared by every conclave crate: the unified event model, the
//! derived conversation snapshot, guidance events, attachments, shared
//! configuration, and the error taxonomy.

pub mod attachment;
pub mod config;
pub mod conversation;
pub mod error;
pub mod event;
pub mod guidance;

pub use attachment::{Attachment, AttachmentRow, AttachmentSource};
pub use config::Config;
pub use conversation::{
    current_turn, has_open_turn, is_closed, last_turn_closer, owner_agent_id, ConversationMetadata,
    ConversationStatus, Snapshot,
};
pub use error::{Error, Result};
pub use event::{
    AgentId, AppendProposal, ConversationId, EventBody, Finality, MessagePayload, SystemPayload,
    TracePayload, UnifiedEvent,
};
pub use guidance::{GuidanceEvent, GuidanceKind};
