//! Ownership filter applied to every batch before it reaches a consumer.

use crate::provider::{Measurements, ProviderIdentity};
use crate::schema::SchemaSnapshot;

/// Keep only the values `provider` owns under `snapshot`.
///
/// Pure: no locking beyond whatever the caller did to obtain `snapshot`. A
/// snapshot that is momentarily stale during a reconnect is acceptable.
pub fn filter_values(
    provider: &ProviderIdentity,
    mut values: Measurements,
    snapshot: &SchemaSnapshot,
) -> Measurements {
    values.retain(|key, _| snapshot.is_owned_by(key, provider));
    values
}
