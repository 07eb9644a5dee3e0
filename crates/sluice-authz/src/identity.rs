use serde::{Deserialize, Serialize};

/// Authenticated principal attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub subject: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Identity {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            groups: Vec::new(),
        }
    }

    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    /// Subject followed by group names, the order ACL entries are checked in.
    pub fn sids(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.subject.as_str()).chain(self.groups.iter().map(String::as_str))
    }
}
