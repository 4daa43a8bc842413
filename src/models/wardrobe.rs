//! Saved try-on results.

use serde::{Deserialize, Serialize};

/// A saved image belonging to exactly one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WardrobeItem {
    pub id: String,
    pub user_id: String,
    /// Opaque encoded payload (base64 data URL from the client)
    pub image_data: String,
    pub created_at: String,
}

impl WardrobeItem {
    pub fn new(user_id: &str, image_data: String, created_at: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            image_data,
            created_at,
        }
    }
}

/// Sort newest first; ties keep a stable order by ID.
pub fn sort_newest_first(items: &mut [WardrobeItem]) {
    items.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}
