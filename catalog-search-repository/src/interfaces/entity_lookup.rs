//! Entity lookup trait used by the versioning rewriter.

use async_trait::async_trait;
use catalog_search_shared::EntityUrn;

use crate::errors::SearchIndexError;
use crate::types::VersionedEntity;

/// Narrow lookup interface resolving entity identifiers to indexed entities.
///
/// A miss is `Ok(None)`; only backend failures are errors.
#[async_trait]
pub trait EntityLookup: Send + Sync {
    /// Find the entity with the given precise (versioned) identifier.
    async fn lookup_by_precise_id(
        &self,
        urn: &EntityUrn,
    ) -> Result<Option<VersionedEntity>, SearchIndexError>;

    /// Find the latest version of the entity with the given virtual identifier.
    async fn lookup_by_virtual_id(
        &self,
        urn: &EntityUrn,
    ) -> Result<Option<VersionedEntity>, SearchIndexError>;
}
