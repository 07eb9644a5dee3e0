use crate::{Action, Identity, wildcard_match};
use serde::{Deserialize, Serialize};

/// One grant: principals matching `subject` may perform `actions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    pub subject: String,
    pub actions: Vec<Action>,
}

impl AclEntry {
    pub fn new(subject: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            subject: subject.into(),
            actions,
        }
    }

    fn grants(&self, identity: &Identity, action: Action) -> bool {
        self.actions.contains(&action)
            && identity
                .sids()
                .any(|sid| wildcard_match(&self.subject, sid))
    }
}

/// Access-control object attached to a topic.
///
/// An empty object grants nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessControl {
    entries: Vec<AclEntry>,
}

impl AccessControl {
    pub fn new(entries: Vec<AclEntry>) -> Self {
        Self { entries }
    }

    pub fn allows(&self, identity: &Identity, action: Action) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.grants(identity, action))
    }

    pub fn entries(&self) -> &[AclEntry] {
        &self.entries
    }
}
