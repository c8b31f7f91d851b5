//! Serializable queue snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::PrincipalId;

/// One waiting member as stored in a backup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelpeeBackup {
    pub principal_id: PrincipalId,
    pub wait_start: DateTime<Utc>,
    pub up_next: bool,
}

/// A queue's line and subscribers, in line order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueBackup {
    pub name: String,
    pub waiting: Vec<HelpeeBackup>,
    #[serde(default)]
    pub subscribers: Vec<PrincipalId>,
}

impl QueueBackup {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribers_default_when_missing() {
        let json = r#"{"name":"Lab","waiting":[]}"#;
        let backup = QueueBackup::from_json(json).unwrap();
        assert_eq!(backup.name, "Lab");
        assert!(backup.subscribers.is_empty());
    }
}
