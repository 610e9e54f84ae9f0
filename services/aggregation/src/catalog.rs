//! Category display-name lookup
//!
//! The query layer enriches bare category ids with names from an external
//! catalog. The lookup is batched (one call per query, not per row) and
//! total: ids the catalog does not know simply stay out of the returned
//! map, and the caller substitutes a placeholder label.

use async_trait::async_trait;
use std::collections::HashMap;
use types::ids::CategoryId;

/// Placeholder label for ids the catalog does not know.
pub fn placeholder_name(id: CategoryId) -> String {
    format!("Unknown Category: {id}")
}

/// External catalog collaborator resolving category display names.
#[async_trait]
pub trait CategoryCatalog: Send + Sync {
    /// Names for the given ids; unknown ids are absent from the result.
    async fn names_of(&self, ids: &[CategoryId]) -> HashMap<CategoryId, String>;
}

/// Catalog backed by a fixed in-memory table.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    names: HashMap<CategoryId, String>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(id, name)` pairs.
    pub fn with_names<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (i64, S)>,
        S: Into<String>,
    {
        Self {
            names: pairs
                .into_iter()
                .map(|(id, name)| (CategoryId::from_i64(id), name.into()))
                .collect(),
        }
    }

    pub fn insert(&mut self, id: CategoryId, name: impl Into<String>) {
        self.names.insert(id, name.into());
    }
}

#[async_trait]
impl CategoryCatalog for InMemoryCatalog {
    async fn names_of(&self, ids: &[CategoryId]) -> HashMap<CategoryId, String> {
        ids.iter()
            .filter_map(|id| self.names.get(id).map(|name| (*id, name.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_known_ids_resolve() {
        let catalog = InMemoryCatalog::with_names([(101, "Beverages"), (102, "Snacks")]);
        let names = catalog
            .names_of(&[CategoryId::from_i64(101), CategoryId::from_i64(102)])
            .await;
        assert_eq!(names[&CategoryId::from_i64(101)], "Beverages");
        assert_eq!(names.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_absent() {
        let catalog = InMemoryCatalog::with_names([(101, "Beverages")]);
        let names = catalog
            .names_of(&[CategoryId::from_i64(101), CategoryId::from_i64(999)])
            .await;
        assert_eq!(names.len(), 1);
        assert!(!names.contains_key(&CategoryId::from_i64(999)));
    }

    #[test]
    fn test_placeholder_label() {
        assert_eq!(
            placeholder_name(CategoryId::from_i64(999)),
            "Unknown Category: 999"
        );
    }
}
