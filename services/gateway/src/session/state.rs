use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStep {
    Select,
    Upsert,
}

/// Lifecycle of one write session, in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    AwaitingMetadata,
    AwaitingOwnerChannel,
    AwaitingBindingWrite(BindingStep),
    AwaitingWriterInit,
    Active,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::AwaitingMetadata => "awaiting_metadata",
            SessionState::AwaitingOwnerChannel => "awaiting_owner_channel",
            SessionState::AwaitingBindingWrite(BindingStep::Select) => "awaiting_binding_select",
            SessionState::AwaitingBindingWrite(BindingStep::Upsert) => "awaiting_binding_upsert",
            SessionState::AwaitingWriterInit => "awaiting_writer_init",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
