//! Capability derivation for the authorization callout.
//!
//! The allow-list of a grant is three fixed subjects scoped to the room
//! (and user) plus whatever the five feature-category provisioners return.
//! Categories run in a fixed order; the first one that fails aborts the
//! whole derivation, so a partial allow-list never leaves this module.

mod consumer;
mod retry;

pub use consumer::{
    room_stream_key, ConsumerBackend, ConsumerStatus, RedisConsumerBackend,
    StreamConsumerProvisioner,
};
pub use retry::RetryPolicy;

use crate::config::SubjectsConfig;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{instrument, warn};

/// Feature categories that each need their own consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureCategory {
    Chat,
    SystemPublic,
    SystemPrivate,
    Whiteboard,
    DataChannel,
}

impl FeatureCategory {
    /// Provisioning order.
    pub const ALL: [FeatureCategory; 5] = [
        FeatureCategory::Chat,
        FeatureCategory::SystemPublic,
        FeatureCategory::SystemPrivate,
        FeatureCategory::Whiteboard,
        FeatureCategory::DataChannel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FeatureCategory::Chat => "chat",
            FeatureCategory::SystemPublic => "system_public",
            FeatureCategory::SystemPrivate => "system_private",
            FeatureCategory::Whiteboard => "whiteboard",
            FeatureCategory::DataChannel => "data_channel",
        }
    }

    /// Whether participants may publish into the category themselves.
    /// System channels are written by the server only.
    pub fn grants_publish(self) -> bool {
        matches!(
            self,
            FeatureCategory::Chat | FeatureCategory::Whiteboard | FeatureCategory::DataChannel
        )
    }

    pub fn subject_prefix(self, subjects: &SubjectsConfig) -> &str {
        match self {
            FeatureCategory::Chat => &subjects.chat,
            FeatureCategory::SystemPublic => &subjects.system_public,
            FeatureCategory::SystemPrivate => &subjects.system_private,
            FeatureCategory::Whiteboard => &subjects.whiteboard,
            FeatureCategory::DataChannel => &subjects.data_channel,
        }
    }
}

impl fmt::Display for FeatureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
pub enum ProvisionError {
    /// The backing store failed. Retried when a retry policy allows.
    #[error("consumer backend error: {0}")]
    Backend(String),

    /// The request can never succeed. Not retried.
    #[error("consumer request rejected: {0}")]
    Rejected(String),
}

impl ProvisionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProvisionError::Backend(_))
    }
}

/// Ensures the consumer for one category exists and returns the subjects
/// the grant must allow for it.
#[async_trait::async_trait]
pub trait ConsumerProvisioner: Send + Sync {
    async fn provision(&self, room_id: &str, user_id: &str) -> Result<Vec<String>, ProvisionError>;
}

/// The five category provisioners.
#[derive(Clone)]
pub struct ProvisionerSet {
    pub chat: Arc<dyn ConsumerProvisioner>,
    pub system_public: Arc<dyn ConsumerProvisioner>,
    pub system_private: Arc<dyn ConsumerProvisioner>,
    pub whiteboard: Arc<dyn ConsumerProvisioner>,
    pub data_channel: Arc<dyn ConsumerProvisioner>,
}

impl ProvisionerSet {
    /// One [`StreamConsumerProvisioner`] per category over a shared backend.
    pub fn streams(backend: Arc<dyn ConsumerBackend>, subjects: &SubjectsConfig) -> Self {
        let make = |category: FeatureCategory| -> Arc<dyn ConsumerProvisioner> {
            Arc::new(StreamConsumerProvisioner::new(
                category,
                category.subject_prefix(subjects).to_string(),
                Arc::clone(&backend),
            ))
        };
        Self {
            chat: make(FeatureCategory::Chat),
            system_public: make(FeatureCategory::SystemPublic),
            system_private: make(FeatureCategory::SystemPrivate),
            whiteboard: make(FeatureCategory::Whiteboard),
            data_channel: make(FeatureCategory::DataChannel),
        }
    }

    pub fn get(&self, category: FeatureCategory) -> &Arc<dyn ConsumerProvisioner> {
        match category {
            FeatureCategory::Chat => &self.chat,
            FeatureCategory::SystemPublic => &self.system_public,
            FeatureCategory::SystemPrivate => &self.system_private,
            FeatureCategory::Whiteboard => &self.whiteboard,
            FeatureCategory::DataChannel => &self.data_channel,
        }
    }
}

/// Ordered allow-list. Append-only; duplicates are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList(Vec<String>);

impl AllowList {
    pub fn push(&mut self, subject: String) {
        self.0.push(subject);
    }

    pub fn extend(&mut self, subjects: impl IntoIterator<Item = String>) {
        self.0.extend(subjects);
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

#[derive(Debug, Error)]
pub enum AssembleError {
    /// A room or user id that is not a single subject token would widen
    /// every room-scoped subject.
    #[error("identifier {0:?} is not a single subject token")]
    InvalidIdentifier(String),

    #[error("failed to provision {category} permissions: {source}")]
    Provisioning {
        category: FeatureCategory,
        #[source]
        source: ProvisionError,
    },
}

fn is_single_token(id: &str) -> bool {
    !id.is_empty()
        && !id
            .chars()
            .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace())
}

/// Builds the allow-list for a verified (room, user) pair.
#[derive(Clone)]
pub struct CapabilityAssembler {
    provisioners: ProvisionerSet,
    system_js_worker: String,
    retry: RetryPolicy,
}

impl CapabilityAssembler {
    pub fn new(provisioners: ProvisionerSet, subjects: &SubjectsConfig, retry: RetryPolicy) -> Self {
        Self {
            provisioners,
            system_js_worker: subjects.system_js_worker.clone(),
            retry,
        }
    }

    /// Subjects every participant gets regardless of provisioning.
    pub fn fixed_subjects(&self, room_id: &str, user_id: &str) -> [String; 3] {
        [
            "$JS.API.INFO".to_string(),
            format!("$JS.API.STREAM.INFO.{room_id}"),
            format!("{}.{room_id}.{user_id}", self.system_js_worker),
        ]
    }

    /// Derive the allow-list. Fail-closed: any category failure is an error
    /// and nothing is returned.
    ///
    /// # Errors
    ///
    /// `InvalidIdentifier` for ids that are not single subject tokens,
    /// `Provisioning` naming the first category that failed.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn assemble(&self, room_id: &str, user_id: &str) -> Result<AllowList, AssembleError> {
        for id in [room_id, user_id] {
            if !is_single_token(id) {
                return Err(AssembleError::InvalidIdentifier(id.to_string()));
            }
        }

        let mut allow = AllowList::default();
        allow.extend(self.fixed_subjects(room_id, user_id));

        for category in FeatureCategory::ALL {
            let provisioner = self.provisioners.get(category);
            let subjects = self
                .retry
                .run(category, || provisioner.provision(room_id, user_id))
                .await
                .map_err(|source| {
                    warn!(
                        target: "rc.capabilities",
                        error = %source,
                        room_id = %room_id,
                        category = %category,
                        "Provisioning failed, denying"
                    );
                    AssembleError::Provisioning { category, source }
                })?;
            allow.extend(subjects);
        }

        Ok(allow)
    }
}
