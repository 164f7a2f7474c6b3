use tether_model::{ObjectHandle, PropertyDescriptor};
use tether_serial::SerialContext;
use tether_types::{ChangeRecord, ObjectUuid};

/// A channel that receives serialized changes from a watcher.
pub trait WatchSubscriber: SerialContext {
    /// This subscriber as a plain serialization context.
    fn as_context(&self) -> &dyn SerialContext;

    /// Stable identity of the subscriber, usually its channel id.
    fn subscriber_id(&self) -> ObjectUuid;

    /// A watched object changed. `record` was serialized with this
    /// subscriber's own context, so any dependents it references have
    /// already been reported to it.
    fn property_changed(&self, object: &ObjectHandle, prop: &PropertyDescriptor, record: ChangeRecord);
}
