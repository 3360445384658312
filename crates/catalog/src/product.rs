use serde::{Deserialize, Serialize};

use tradepost_core::{DomainError, DomainResult, Entity, ProductId};

/// Unvalidated product input, as received from a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDraft {
    pub name: String,
    pub description: String,
    pub category: String,
}

/// A catalog product.
///
/// Identity is immutable after creation. Price is deliberately absent here:
/// it belongs to the per-seller [`crate::Offer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    name: String,
    description: String,
    category: String,
}

impl Product {
    pub fn create(id: ProductId, draft: ProductDraft) -> DomainResult<Self> {
        if draft.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if draft.category.trim().is_empty() {
            return Err(DomainError::validation("category cannot be empty"));
        }
        Ok(Self {
            id,
            name: draft.name.trim().to_string(),
            description: draft.description,
            category: draft.category.trim().to_string(),
        })
    }

    /// Rehydrate from stored fields (already validated at creation time).
    pub fn from_stored(
        id: ProductId,
        name: String,
        description: String,
        category: String,
    ) -> Self {
        Self {
            id,
            name,
            description,
            category,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn category(&self) -> &str {
        &self.category
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
