use serde::{Deserialize, Serialize};

/// Identity used by every consumer created from one client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Consumer group shared by all instances of the application
    pub group_name: String,

    /// Name of this instance inside the group
    pub consumer_name: String,
}

impl ClientConfig {
    pub fn new(group_name: impl Into<String>, consumer_name: impl Into<String>) -> Self {
        Self {
            group_name: group_name.into(),
            consumer_name: consumer_name.into(),
        }
    }
}
