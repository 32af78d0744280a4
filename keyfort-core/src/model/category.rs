//! Categories group accounts for display.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known id of the reserved "All" category. It exists in every
/// dataset, sorts first, and can never be renamed or deleted.
pub const ALL_CATEGORY_ID: Uuid = Uuid::from_u128(0x4b46_0000_0000_4000_8000_000000000001);

/// Display name of the reserved category.
pub const ALL_CATEGORY_NAME: &str = "All";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    /// Symbolic icon name resolved by the presentation layer.
    pub icon: String,
    pub last_modified: DateTime<Utc>,
}

impl Category {
    pub fn new(name: impl Into<String>, icon: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            icon: icon.into(),
            last_modified: Utc::now(),
        }
    }

    /// The reserved category, created once per fresh dataset.
    pub fn reserved() -> Self {
        Self {
            id: ALL_CATEGORY_ID,
            name: ALL_CATEGORY_NAME.to_string(),
            icon: "folder-all".to_string(),
            last_modified: Utc::now(),
        }
    }

    pub fn is_reserved(&self) -> bool {
        self.id == ALL_CATEGORY_ID
    }
}
