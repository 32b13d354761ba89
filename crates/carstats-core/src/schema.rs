//! Merged field schema and field ownership.
//!
//! Providers are merged in priority order. Ownership of a field key goes to
//! the first provider that declares it. Metadata is merged by plain
//! overwrite, so a lower-priority provider's description of a key can still
//! replace the stored metadata even though it does not own the key. The two
//! rules are intentionally different.

use std::collections::HashMap;

use serde::Serialize;

use crate::provider::{FieldSchema, FieldSchemas, ProviderIdentity};

/// Immutable result of one merge. Replaced wholesale, never edited.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaSnapshot {
    fields: HashMap<String, FieldSchema>,
    owners: HashMap<String, ProviderIdentity>,
}

impl SchemaSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Merge provider schemas given in priority order.
    ///
    /// Providers whose schema could not be fetched are simply left out by
    /// the caller; they contribute nothing to this merge.
    pub fn merge<'a, I>(reports: I) -> Self
    where
        I: IntoIterator<Item = (&'a ProviderIdentity, &'a FieldSchemas)>,
    {
        let mut fields = HashMap::new();
        let mut owners: HashMap<String, ProviderIdentity> = HashMap::new();

        for (provider, schema) in reports {
            for (key, field) in schema {
                owners
                    .entry(key.clone())
                    .or_insert_with(|| provider.clone());
                fields.insert(key.clone(), field.clone());
            }
        }

        Self { fields, owners }
    }

    pub fn fields(&self) -> &HashMap<String, FieldSchema> {
        &self.fields
    }

    pub fn owners(&self) -> &HashMap<String, ProviderIdentity> {
        &self.owners
    }

    pub fn field(&self, key: &str) -> Option<&FieldSchema> {
        self.fields.get(key)
    }

    pub fn owner_of(&self, key: &str) -> Option<&ProviderIdentity> {
        self.owners.get(key)
    }

    pub fn is_owned_by(&self, key: &str, provider: &ProviderIdentity) -> bool {
        self.owners.get(key) == Some(provider)
    }

    /// Keys owned by `provider`, sorted.
    pub fn owned_by(&self, provider: &ProviderIdentity) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .owners
            .iter()
            .filter(|(_, owner)| *owner == provider)
            .map(|(key, _)| key.as_str())
            .collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
