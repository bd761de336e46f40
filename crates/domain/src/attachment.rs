use serde::{Deserialize, Serialize};

/// A file attached to a message, either inlined or referenced by a
/// content-addressed `docId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    #[serde(flatten)]
    pub source: AttachmentSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttachmentSource {
    Inline { content: String },
    Reference { doc_id: String },
}

/// A stored attachment document, addressed by `(conversation, docId)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRow {
    pub doc_id: String,
    pub name: String,
    pub content_type: String,
    pub content: String,
}
