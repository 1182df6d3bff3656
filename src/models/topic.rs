use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named routing destination for published events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    /// Unique identifier, immutable once created
    pub id: Uuid,

    /// Unique topic name
    pub name: String,

    /// Free-form notes
    pub notes: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Topic {
    /// Create a new topic
    pub fn new(name: String, notes: Option<String>) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            name,
            notes,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Link between a subscription and a topic it consumes from
///
/// Disabling a link stops new fan-out without deleting history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSubscription {
    /// Topic being subscribed to
    pub topic_id: Uuid,

    /// Whether new events on the topic fan out to the owning subscription
    pub enabled: bool,
}
