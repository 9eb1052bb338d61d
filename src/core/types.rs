use super::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle phase of an optimistic collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionPhase {
    /// No owner bound; the mirror is empty.
    Uninitialized,
    /// Owner bound, initial `list` in flight.
    Loading,
    /// Mirror populated (possibly empty after a failed load); mutations accepted.
    Ready,
}

impl fmt::Display for CollectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Loading => write!(f, "loading"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

/// Product attributes copied at insertion time for immediate rendering.
///
/// These are a snapshot, not kept in sync with the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayFields {
    pub name: String,
    pub image_ref: Option<String>,
    pub price: f64,
}

impl DisplayFields {
    pub fn new(name: impl Into<String>, price: f64) -> Self {
        Self {
            name: name.into(),
            image_ref: None,
            price,
        }
    }

    pub fn with_image(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }
}

/// Identity of a persisted row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteRowId {
    /// Locally generated stand-in used until the remote store answers.
    Pending(Uuid),
    /// Identity assigned by the remote store.
    Assigned(String),
}

impl RemoteRowId {
    pub fn placeholder() -> Self {
        Self::Pending(Uuid::new_v4())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub fn assigned(&self) -> Option<&str> {
        match self {
            Self::Assigned(id) => Some(id),
            Self::Pending(_) => None,
        }
    }
}

impl fmt::Display for RemoteRowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending(id) => write!(f, "pending-{}", id),
            Self::Assigned(id) => f.write_str(id),
        }
    }
}

/// What a caller hands to `add`: the item before it has an owner or a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDraft {
    pub item_id: String,
    pub fields: DisplayFields,
    pub quantity: u32,
}

impl ItemDraft {
    pub fn new(item_id: impl Into<String>, fields: DisplayFields) -> Self {
        Self {
            item_id: item_id.into(),
            fields,
            quantity: 1,
        }
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    /// Rejects entries that would render blank.
    pub fn validate(&self) -> Result<()> {
        if self.item_id.trim().is_empty() {
            return Err(SyncError::Rejected("item_id must not be empty".to_string()));
        }
        if self.fields.name.trim().is_empty() {
            return Err(SyncError::Rejected(format!(
                "item '{}' has an empty display name",
                self.item_id
            )));
        }
        if self.quantity == 0 {
            return Err(SyncError::Rejected(format!(
                "item '{}' must have a positive quantity",
                self.item_id
            )));
        }
        Ok(())
    }
}

/// One entry of a favorites or cart collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedItem {
    pub owner_id: String,
    pub item_id: String,
    pub fields: DisplayFields,
    pub quantity: u32,
    pub remote_row_id: RemoteRowId,
    pub added_at: DateTime<Utc>,
}

impl TrackedItem {
    /// Optimistic entry carrying a placeholder row id.
    pub fn pending(owner_id: impl Into<String>, draft: ItemDraft) -> Self {
        Self::from_draft(owner_id, draft, RemoteRowId::placeholder())
    }

    pub fn persisted(
        owner_id: impl Into<String>,
        draft: ItemDraft,
        row_id: impl Into<String>,
    ) -> Self {
        Self::from_draft(owner_id, draft, RemoteRowId::Assigned(row_id.into()))
    }

    fn from_draft(owner_id: impl Into<String>, draft: ItemDraft, remote_row_id: RemoteRowId) -> Self {
        Self {
            owner_id: owner_id.into(),
            item_id: draft.item_id,
            fields: draft.fields,
            quantity: draft.quantity,
            remote_row_id,
            added_at: Utc::now(),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        !self.remote_row_id.is_pending()
    }

    pub fn draft(&self) -> ItemDraft {
        ItemDraft {
            item_id: self.item_id.clone(),
            fields: self.fields.clone(),
            quantity: self.quantity,
        }
    }

    pub fn subtotal(&self) -> f64 {
        self.fields.price * f64::from(self.quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_validation() {
        let ok = ItemDraft::new("p1", DisplayFields::new("Pearl Ring", 120.0));
        assert!(ok.validate().is_ok());

        let blank_name = ItemDraft::new("p2", DisplayFields::new("  ", 0.0));
        assert!(matches!(blank_name.validate(), Err(SyncError::Rejected(_))));

        let blank_id = ItemDraft::new("", DisplayFields::new("Locket", 80.0));
        assert!(matches!(blank_id.validate(), Err(SyncError::Rejected(_))));

        let zero = ok.clone().with_quantity(0);
        assert!(matches!(zero.validate(), Err(SyncError::Rejected(_))));
    }

    #[test]
    fn pending_item_is_not_confirmed() {
        let draft = ItemDraft::new("p1", DisplayFields::new("Pearl Ring", 120.0)).with_quantity(2);
        let item = TrackedItem::pending("u1", draft.clone());
        assert!(!item.is_confirmed());
        assert!(item.remote_row_id.to_string().starts_with("pending-"));
        assert_eq!(item.draft(), draft);
        assert_eq!(item.subtotal(), 240.0);

        let stored = TrackedItem::persisted("u1", draft, "row-9");
        assert!(stored.is_confirmed());
        assert_eq!(stored.remote_row_id.assigned(), Some("row-9"));
    }
}
