use async_trait::async_trait;
use tether_model::ObjectHandle;
use tether_types::ObjectUuid;

use crate::error::RegistryResult;

/// Source the registry consults to materialize an unknown identity.
///
/// Loaders are tried in registration order; the first to return an object
/// wins. A loader that deserializes the object itself should obtain it
/// through the registry so that the pending entry is filled in place.
#[async_trait]
pub trait ObjectLoader: Send + Sync {
    async fn load_object(&self, uuid: ObjectUuid) -> RegistryResult<Option<ObjectHandle>>;
}
