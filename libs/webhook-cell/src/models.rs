// libs/webhook-cell/src/models.rs
use serde::Deserialize;
use uuid::Uuid;

/// Provider callback envelope, WhatsApp Cloud API shape. Only the parts the
/// ingestor acts on are modeled; everything else passes through untouched.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookChange {
    pub value: ChangeValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub statuses: Vec<StatusUpdate>,
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
}

/// Delivery/read acknowledgement for a message the dispatcher sent.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdate {
    /// The provider message id written on the reminder at dispatch.
    pub id: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub from: Option<String>,
    pub context: Option<MessageContext>,
    pub interactive: Option<InteractivePayload>,
}

/// Reference to the message this one replies to.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageContext {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractivePayload {
    pub button_reply: Option<ButtonReply>,
}

/// Button ids are rendered as `confirmar:<appointment_id>` or
/// `cancelar:<appointment_id>` when the template embeds the appointment.
#[derive(Debug, Clone, Deserialize)]
pub struct ButtonReply {
    pub id: String,
    pub title: Option<String>,
}

impl ButtonReply {
    pub fn parse_action(&self) -> Option<(ReplyAction, Option<Uuid>)> {
        let (verb, rest) = match self.id.split_once(':') {
            Some((verb, rest)) => (verb, Uuid::parse_str(rest).ok()),
            None => (self.id.as_str(), None),
        };
        match verb {
            "confirmar" => Some((ReplyAction::Confirm, rest)),
            "cancelar" => Some((ReplyAction::Cancel, rest)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyAction {
    Confirm,
    Cancel,
}

impl ReplyAction {
    pub fn event_kind(&self) -> &'static str {
        match self {
            ReplyAction::Confirm => "reply_confirmar",
            ReplyAction::Cancel => "reply_cancelar",
        }
    }
}

/// Counters for one processed callback, logged and returned to the
/// provider (which ignores the body).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IngestReport {
    pub statuses_recorded: u32,
    pub replies_processed: u32,
    pub duplicates_skipped: u32,
    pub errors_logged: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("signature verification failed")]
    InvalidSignature,

    #[error("unparseable payload: {0}")]
    InvalidPayload(String),

    #[error("database error: {0}")]
    DatabaseError(String),
}
