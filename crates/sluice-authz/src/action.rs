use crate::AuthzError;
use serde::{Deserialize, Serialize};

// Deserialized through `FromStr` so catalogue typos name the bad action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Action {
    #[serde(rename = "topic.describe")]
    TopicDescribe,
    #[serde(rename = "topic.read")]
    TopicRead,
    #[serde(rename = "topic.write")]
    TopicWrite,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::TopicDescribe => "topic.describe",
            Action::TopicRead => "topic.read",
            Action::TopicWrite => "topic.write",
        }
    }

    // Name used in access-denied messages.
    pub fn right_name(self) -> &'static str {
        match self {
            Action::TopicDescribe => "DescribeTopic",
            Action::TopicRead => "ReadTopic",
            Action::TopicWrite => "WriteTopic",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = AuthzError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "topic.describe" => Ok(Action::TopicDescribe),
            "topic.read" => Ok(Action::TopicRead),
            "topic.write" => Ok(Action::TopicWrite),
            other => Err(AuthzError::InvalidAction(other.to_string())),
        }
    }
}

impl TryFrom<String> for Action {
    type Error = AuthzError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
