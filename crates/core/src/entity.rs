//! Entity trait: identity + continuity across state changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

/// Audit metadata embedded in entities that are mutated over their lifetime.
///
/// Entities own one of these by value instead of inheriting audit fields from a
/// shared base type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditInfo {
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AuditInfo {
    pub fn created(at: DateTime<Utc>) -> Self {
        Self {
            created_at: at,
            updated_at: None,
        }
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = Some(at);
    }

    /// Latest modification time (creation time if never updated).
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}
