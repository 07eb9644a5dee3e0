//! Topic metadata directory.
//!
//! A describe call returns a point-in-time snapshot of a topic: its partitions and
//! their owners, the balancer that hands out round-robin partitions, the access
//! control object, and the codecs producers may use.
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use sluice_authz::AccessControl;
use sluice_wire::Codec;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::session::assignment::canonical_topic;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionLocation {
    pub owner: String,
}

#[derive(Debug, Clone)]
pub struct TopicDescription {
    // Canonical topic name, the one partition hashing uses.
    pub name: String,
    pub partitions: BTreeMap<u32, PartitionLocation>,
    pub balancer: String,
    pub acl: AccessControl,
    // Empty means every known codec is allowed.
    pub codecs: Vec<Codec>,
}

impl TopicDescription {
    pub fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    pub fn accepts_codec(&self, codec: Codec) -> bool {
        self.codecs.is_empty() || self.codecs.contains(&codec)
    }

    pub fn supported_codecs(&self) -> Vec<Codec> {
        if self.codecs.is_empty() {
            Codec::ALL.to_vec()
        } else {
            self.codecs.clone()
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum DirectoryError {
    #[error("path '{0}' does not exist or is not a topic")]
    NotFound(String),
    #[error("metadata directory unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait MetadataDirectory: Send + Sync {
    async fn describe(&self, topic: &str) -> Result<TopicDescription, DirectoryError>;
}

/// Topic entry of the YAML catalogue.
#[derive(Debug, Clone, Deserialize)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: u32,
    #[serde(default)]
    pub codecs: Vec<Codec>,
    #[serde(default)]
    pub acl: AccessControl,
}

#[derive(Debug, Deserialize)]
struct Catalogue {
    #[serde(default)]
    topics: Vec<TopicSpec>,
}

/// Directory backed by an in-process catalogue.
#[derive(Default)]
pub struct InMemoryDirectory {
    topics: RwLock<HashMap<String, TopicDescription>>,
    unavailable: AtomicBool,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: impl IntoIterator<Item = TopicSpec>) -> Self {
        let directory = Self::new();
        for spec in specs {
            directory.upsert_topic(spec);
        }
        directory
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let catalogue: Catalogue =
            serde_yaml::from_str(contents).with_context(|| "parse topic catalogue yaml")?;
        Ok(Self::from_specs(catalogue.topics))
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read topic catalogue: {}", path.display()))?;
        Self::from_yaml_str(&contents)
    }

    pub fn upsert_topic(&self, spec: TopicSpec) {
        let name = canonical_topic(&spec.name).to_string();
        let partitions = (0..spec.partitions)
            .map(|id| {
                (
                    id,
                    PartitionLocation {
                        owner: format!("{name}/partition-{id}"),
                    },
                )
            })
            .collect();
        let description = TopicDescription {
            balancer: format!("{name}/balancer"),
            name: name.clone(),
            partitions,
            acl: spec.acl,
            codecs: spec.codecs,
        };
        self.topics.write().insert(name, description);
    }

    /// Replace the access control object of an existing topic.
    pub fn set_acl(&self, topic: &str, acl: AccessControl) -> bool {
        match self.topics.write().get_mut(canonical_topic(topic)) {
            Some(description) => {
                description.acl = acl;
                true
            }
            None => false,
        }
    }

    /// Make every describe call fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl MetadataDirectory for InMemoryDirectory {
    async fn describe(&self, topic: &str) -> Result<TopicDescription, DirectoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable("describe disabled".to_string()));
        }
        self.topics
            .read()
            .get(canonical_topic(topic))
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(topic.to_string()))
    }
}
