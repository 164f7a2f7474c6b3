use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

use tether_model::{ClassRegistry, LoadCompleteHook, ObjectHandle};
use tether_types::ObjectUuid;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{RegistryError, RegistryResult};
use crate::loader::ObjectLoader;

/// Completion status of one known identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadState {
    /// Requested, but no object has been constructed yet.
    Loading,
    /// An object exists and is being populated.
    Constructed,
    Success,
    Error(String),
}

impl LoadState {
    /// `Success` or `Error`.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Success | Self::Error(_))
    }
}

/// Reports whether a loaded object has gone stale in its backing source.
pub type StaleCheck = Arc<dyn Fn(&ObjectHandle) -> bool + Send + Sync>;

struct KnownObjectEntry {
    object: Option<ObjectHandle>,
    state: watch::Sender<LoadState>,
    stale_check: Option<StaleCheck>,
    reloading: bool,
    load_started: bool,
    load_notified: bool,
}

impl KnownObjectEntry {
    fn new(object: Option<ObjectHandle>, state: LoadState) -> Self {
        let (state, _) = watch::channel(state);
        Self {
            object,
            state,
            stale_check: None,
            reloading: false,
            load_started: false,
            load_notified: false,
        }
    }

    fn state(&self) -> LoadState {
        self.state.borrow().clone()
    }

    fn is_settled(&self) -> bool {
        self.state.borrow().is_settled()
    }
}

/// Per-process registry of known objects.
///
/// Construct with [`IdentityRegistry::new`]; the registry is always shared
/// behind an `Arc` because load episodes run as spawned tasks. Loading
/// requires a Tokio runtime.
pub struct IdentityRegistry {
    classes: Arc<ClassRegistry>,
    entries: Mutex<HashMap<ObjectUuid, KnownObjectEntry>>,
    loaders: RwLock<Vec<Weak<dyn ObjectLoader>>>,
    self_ref: Weak<IdentityRegistry>,
}

impl IdentityRegistry {
    pub fn new(classes: Arc<ClassRegistry>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            classes,
            entries: Mutex::new(HashMap::new()),
            loaders: RwLock::new(Vec::new()),
            self_ref: self_ref.clone(),
        })
    }

    pub fn classes(&self) -> &Arc<ClassRegistry> {
        &self.classes
    }

    /// Register a loader. The registry keeps only a weak reference.
    pub fn add_loader(&self, loader: &Arc<dyn ObjectLoader>) {
        self.loaders
            .write()
            .expect("loader lock poisoned")
            .push(Arc::downgrade(loader));
    }

    /// Allocate a new object and register it as pending.
    ///
    /// Fails if a live object that is not being reloaded is already
    /// registered for `uuid`: double construction would break the
    /// one-identity-one-object guarantee.
    pub fn create_object(&self, class: &str, uuid: Option<ObjectUuid>) -> RegistryResult<ObjectHandle> {
        let descriptor = self.classes.require(class)?;
        let uuid = uuid.unwrap_or_default();
        let mut entries = self.lock();
        match entries.get_mut(&uuid) {
            Some(entry) => match entry.object.clone() {
                Some(existing) if !entry.reloading => Err(RegistryError::DuplicateIdentity {
                    uuid,
                    class: existing.class_name().to_string(),
                }),
                Some(existing) => Ok(existing),
                None => {
                    let object = ObjectHandle::new(descriptor, uuid);
                    entry.object = Some(object.clone());
                    entry.state.send_replace(LoadState::Constructed);
                    Ok(object)
                }
            },
            None => {
                let object = ObjectHandle::new(descriptor, uuid);
                entries.insert(
                    uuid,
                    KnownObjectEntry::new(Some(object.clone()), LoadState::Constructed),
                );
                Ok(object)
            }
        }
    }

    /// Get-or-create used while deserializing.
    ///
    /// Reuses a placeholder created for a forward reference, an object being
    /// reloaded, or an already loaded object receiving fresh data. A failed
    /// entry restarts its episode.
    pub fn obtain_object(&self, class: &str, uuid: ObjectUuid) -> RegistryResult<ObjectHandle> {
        {
            let mut entries = self.lock();
            if let Some(entry) = entries.get_mut(&uuid) {
                if let Some(existing) = &entry.object {
                    if !existing.descriptor().is_a(class) {
                        return Err(RegistryError::ClassMismatch {
                            uuid,
                            expected: class.to_string(),
                            found: existing.class_name().to_string(),
                        });
                    }
                    let existing = existing.clone();
                    if !entry.is_settled() || matches!(entry.state(), LoadState::Error(_)) {
                        entry.state.send_replace(LoadState::Constructed);
                    }
                    return Ok(existing);
                }
            }
        }
        self.create_object(class, Some(uuid))
    }

    /// Construct a local object and mark it complete immediately.
    pub fn new_object(&self, class: &str) -> RegistryResult<ObjectHandle> {
        let object = self.create_object(class, None)?;
        self.set_object_complete(&object, None)
    }

    /// Record an object that exists outside any load episode, such as one a
    /// channel has just saved or sent.
    pub fn register_known(&self, object: &ObjectHandle) -> RegistryResult<()> {
        let uuid = object.uuid();
        let mut entries = self.lock();
        match entries.get_mut(&uuid) {
            Some(entry) => match entry.object.clone() {
                Some(existing) if !existing.ptr_eq(object) => {
                    return Err(RegistryError::DuplicateIdentity {
                        uuid,
                        class: existing.class_name().to_string(),
                    })
                }
                Some(_) => return Ok(()),
                None => entry.object = Some(object.clone()),
            },
            None => {
                entries.insert(uuid, KnownObjectEntry::new(Some(object.clone()), LoadState::Loading));
            }
        }
        drop(entries);
        self.set_object_complete(object, None).map(|_| ())
    }

    /// The object, if its episode ended successfully.
    pub fn try_get(&self, uuid: ObjectUuid) -> Option<ObjectHandle> {
        let entries = self.lock();
        let entry = entries.get(&uuid)?;
        match entry.state() {
            LoadState::Success => entry.object.clone(),
            _ => None,
        }
    }

    /// The object, even if it is still being populated.
    pub fn try_get_incomplete(&self, uuid: ObjectUuid) -> Option<ObjectHandle> {
        let entries = self.lock();
        let entry = entries.get(&uuid)?;
        match entry.state() {
            LoadState::Error(_) => None,
            _ => entry.object.clone(),
        }
    }

    pub fn status(&self, uuid: ObjectUuid) -> Option<LoadState> {
        self.lock().get(&uuid).map(KnownObjectEntry::state)
    }

    /// Resolve an identity without waiting for the rest of the graph.
    ///
    /// Returns at once for a loaded object (or a constructed one when
    /// `allow_incomplete`). Otherwise every concurrent caller waits on the
    /// same load episode, which is started at most once. A registered
    /// staleness check that reports stale re-enters loading and refreshes
    /// the same instance.
    pub async fn get_by_uuid_no_wait(
        &self,
        uuid: ObjectUuid,
        allow_incomplete: bool,
    ) -> RegistryResult<ObjectHandle> {
        enum Next {
            Wait(watch::Receiver<LoadState>),
            CheckStale(StaleCheck, ObjectHandle),
        }

        let next = {
            let mut entries = self.lock();
            match entries.get_mut(&uuid) {
                Some(entry) => match (entry.state(), entry.object.clone()) {
                    (LoadState::Success, Some(object)) => match &entry.stale_check {
                        Some(check) => Next::CheckStale(Arc::clone(check), object),
                        None => return Ok(object),
                    },
                    (LoadState::Constructed, Some(object)) if allow_incomplete => {
                        return Ok(object)
                    }
                    (LoadState::Error(reason), _) => {
                        return Err(RegistryError::LoadFailed { uuid, reason })
                    }
                    _ => {
                        if entry.object.is_none() {
                            self.start_load(entry, uuid);
                        }
                        Next::Wait(entry.state.subscribe())
                    }
                },
                None => {
                    let entry = entries
                        .entry(uuid)
                        .or_insert_with(|| KnownObjectEntry::new(None, LoadState::Loading));
                    self.start_load(entry, uuid);
                    Next::Wait(entry.state.subscribe())
                }
            }
        };

        let rx = match next {
            Next::Wait(rx) => rx,
            Next::CheckStale(check, object) => {
                if !check(&object) {
                    return Ok(object);
                }
                debug!(uuid = %uuid, "stale object, reloading");
                self.begin_reload(uuid)?
            }
        };
        self.await_entry(uuid, rx, allow_incomplete).await
    }

    /// Resolve an identity, then wait until every pending entry has settled
    /// so the returned object's cross-references are populated.
    pub async fn get_by_uuid(&self, uuid: ObjectUuid) -> RegistryResult<ObjectHandle> {
        let object = self.get_by_uuid_no_wait(uuid, false).await?;
        self.wait_for_all().await;
        Ok(object)
    }

    /// Settle an object's episode.
    ///
    /// Once no entry is pending any more, every loaded object whose class
    /// registered a data-load-complete hook is notified, once.
    pub fn set_object_complete(
        &self,
        object: &ObjectHandle,
        error: Option<String>,
    ) -> RegistryResult<ObjectHandle> {
        let uuid = object.uuid();
        let hooks = {
            let mut entries = self.lock();
            let entry = entries
                .entry(uuid)
                .or_insert_with(|| KnownObjectEntry::new(None, LoadState::Loading));
            match entry.object.clone() {
                Some(existing) if !existing.ptr_eq(object) => {
                    return Err(RegistryError::DuplicateIdentity {
                        uuid,
                        class: existing.class_name().to_string(),
                    })
                }
                Some(_) => {}
                None => entry.object = Some(object.clone()),
            }
            entry.reloading = false;
            match error {
                None => {
                    object.set_loaded(true);
                    entry.state.send_replace(LoadState::Success);
                }
                Some(reason) => {
                    warn!(uuid = %uuid, class = object.class_name(), %reason, "object load failed");
                    entry.state.send_replace(LoadState::Error(reason));
                }
            }
            collect_load_hooks(&mut entries)
        };
        for (hook, target) in hooks {
            hook(&target);
        }
        Ok(object.clone())
    }

    /// Wait until every entry pending at any point during the call settles.
    pub async fn wait_for_all(&self) {
        loop {
            let pending: Vec<watch::Receiver<LoadState>> = self
                .lock()
                .values()
                .filter(|e| !e.is_settled())
                .map(|e| e.state.subscribe())
                .collect();
            if pending.is_empty() {
                return;
            }
            for mut rx in pending {
                // A dropped sender means the entry was forgotten.
                let _ = rx.wait_for(LoadState::is_settled).await;
            }
        }
    }

    /// `true` iff no entry is pending.
    pub fn is_all_complete(&self) -> bool {
        self.lock().values().all(KnownObjectEntry::is_settled)
    }

    /// Install a staleness check for a known identity.
    pub fn set_stale_check(&self, uuid: ObjectUuid, check: StaleCheck) -> bool {
        match self.lock().get_mut(&uuid) {
            Some(entry) => {
                entry.stale_check = Some(check);
                true
            }
            None => false,
        }
    }

    /// Refresh a known object from the loaders, in place.
    pub async fn reload(&self, uuid: ObjectUuid) -> RegistryResult<ObjectHandle> {
        let rx = self.begin_reload(uuid)?;
        self.await_entry(uuid, rx, false).await
    }

    /// Drop an identity, clearing any sticky error.
    pub fn forget(&self, uuid: ObjectUuid) -> Option<ObjectHandle> {
        self.lock().remove(&uuid).and_then(|e| e.object)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of entries that have not settled.
    pub fn pending_count(&self) -> usize {
        self.lock().values().filter(|e| !e.is_settled()).count()
    }

    fn begin_reload(&self, uuid: ObjectUuid) -> RegistryResult<watch::Receiver<LoadState>> {
        let mut entries = self.lock();
        let entry = entries.get_mut(&uuid).ok_or_else(|| RegistryError::LoadFailed {
            uuid,
            reason: "unknown identity".into(),
        })?;
        if !entry.reloading {
            entry.reloading = true;
            entry.state.send_replace(LoadState::Loading);
            self.start_load(entry, uuid);
        }
        Ok(entry.state.subscribe())
    }

    fn start_load(&self, entry: &mut KnownObjectEntry, uuid: ObjectUuid) {
        if entry.load_started {
            return;
        }
        entry.load_started = true;
        let registry = self.self_ref.clone();
        tokio::spawn(async move {
            if let Some(registry) = registry.upgrade() {
                registry.run_load(uuid).await;
            }
        });
    }

    async fn run_load(&self, uuid: ObjectUuid) {
        let loaders: Vec<Arc<dyn ObjectLoader>> = self
            .loaders
            .read()
            .expect("loader lock poisoned")
            .iter()
            .filter_map(Weak::upgrade)
            .collect();

        let mut outcome = Ok(None);
        for loader in loaders {
            match loader.load_object(uuid).await {
                Ok(None) => continue,
                found => {
                    outcome = found;
                    break;
                }
            }
        }

        let failure = {
            let mut entries = self.lock();
            let Some(entry) = entries.get_mut(&uuid) else {
                return;
            };
            entry.load_started = false;
            if entry.is_settled() {
                return;
            }
            match &outcome {
                Ok(Some(_)) => None,
                Ok(None) => Some("object not found".to_string()),
                Err(e) => Some(e.to_string()),
            }
        };

        match (outcome, failure) {
            (Ok(Some(object)), _) => {
                if let Err(e) = self.set_object_complete(&object, None) {
                    warn!(uuid = %uuid, error = %e, "loader returned a conflicting object");
                    self.fail(uuid, e.to_string());
                }
            }
            (_, Some(reason)) => self.fail(uuid, reason),
            _ => {}
        }
    }

    fn fail(&self, uuid: ObjectUuid, reason: String) {
        let hooks = {
            let mut entries = self.lock();
            let Some(entry) = entries.get_mut(&uuid) else {
                return;
            };
            debug!(uuid = %uuid, %reason, "load episode failed");
            entry.reloading = false;
            entry.state.send_replace(LoadState::Error(reason));
            collect_load_hooks(&mut entries)
        };
        for (hook, target) in hooks {
            hook(&target);
        }
    }

    async fn await_entry(
        &self,
        uuid: ObjectUuid,
        mut rx: watch::Receiver<LoadState>,
        allow_incomplete: bool,
    ) -> RegistryResult<ObjectHandle> {
        let state = rx
            .wait_for(|s| s.is_settled() || (allow_incomplete && *s == LoadState::Constructed))
            .await
            .map(|s| s.clone())
            .unwrap_or_else(|_| LoadState::Error("identity forgotten while loading".into()));
        match state {
            LoadState::Error(reason) => Err(RegistryError::LoadFailed { uuid, reason }),
            _ => self
                .lock()
                .get(&uuid)
                .and_then(|e| e.object.clone())
                .ok_or_else(|| RegistryError::LoadFailed {
                    uuid,
                    reason: "identity forgotten while loading".into(),
                }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ObjectUuid, KnownObjectEntry>> {
        self.entries.lock().expect("registry lock poisoned")
    }
}

fn collect_load_hooks(
    entries: &mut HashMap<ObjectUuid, KnownObjectEntry>,
) -> Vec<(LoadCompleteHook, ObjectHandle)> {
    if !entries.values().all(KnownObjectEntry::is_settled) {
        return Vec::new();
    }
    let mut hooks = Vec::new();
    for entry in entries.values_mut() {
        if entry.load_notified || entry.state() != LoadState::Success {
            continue;
        }
        let Some(object) = &entry.object else {
            continue;
        };
        if let Some(hook) = object.descriptor().load_complete_hook() {
            entry.load_notified = true;
            hooks.push((Arc::clone(hook), object.clone()));
        }
    }
    hooks
}

impl std::fmt::Debug for IdentityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityRegistry")
            .field("known", &self.len())
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tether_model::{PropertyDescriptor, TypeBuilder, ValueShape};

    // ----------------------------------------------------------------
    // Fixtures
    // ----------------------------------------------------------------

    fn classes() -> Arc<ClassRegistry> {
        let classes = ClassRegistry::new();
        classes
            .register(
                TypeBuilder::new("Doc")
                    .property(PropertyDescriptor::new("title", ValueShape::text()).persistent()),
            )
            .unwrap();
        Arc::new(classes)
    }

    /// Loader that builds a `Doc` through the registry after a short delay.
    struct DocLoader {
        registry: Mutex<Weak<IdentityRegistry>>,
        calls: AtomicUsize,
        fail: AtomicBool,
        missing: AtomicBool,
        title: Mutex<String>,
    }

    impl DocLoader {
        fn attach(registry: &Arc<IdentityRegistry>) -> Arc<Self> {
            let loader = Arc::new(Self {
                registry: Mutex::new(Arc::downgrade(registry)),
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                missing: AtomicBool::new(false),
                title: Mutex::new("loaded".into()),
            });
            let dyn_loader: Arc<dyn ObjectLoader> = loader.clone();
            registry.add_loader(&dyn_loader);
            loader
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ObjectLoader for DocLoader {
        async fn load_object(&self, uuid: ObjectUuid) -> RegistryResult<Option<ObjectHandle>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(RegistryError::Loader("backend down".into()));
            }
            if self.missing.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let registry = self.registry.lock().unwrap().upgrade().unwrap();
            let object = registry.obtain_object("Doc", uuid)?;
            let title = self.title.lock().unwrap().clone();
            object.set("title", title.as_str())?;
            Ok(Some(object))
        }
    }

    // ----------------------------------------------------------------
    // Construction
    // ----------------------------------------------------------------

    #[test]
    fn double_construction_is_rejected() {
        let registry = IdentityRegistry::new(classes());
        let id = ObjectUuid::new();
        registry.create_object("Doc", Some(id)).unwrap();
        let err = registry.create_object("Doc", Some(id)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateIdentity { .. }));
    }

    #[test]
    fn unknown_class_is_rejected() {
        let registry = IdentityRegistry::new(classes());
        assert!(matches!(
            registry.create_object("Nope", None),
            Err(RegistryError::Model(_))
        ));
    }

    #[test]
    fn obtain_reuses_existing_object() {
        let registry = IdentityRegistry::new(classes());
        let id = ObjectUuid::new();
        let a = registry.obtain_object("Doc", id).unwrap();
        let b = registry.obtain_object("Doc", id).unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(registry.status(id), Some(LoadState::Constructed));
        assert!(registry.try_get(id).is_none());
        assert!(registry.try_get_incomplete(id).is_some());
    }

    #[test]
    fn new_object_is_complete() {
        let registry = IdentityRegistry::new(classes());
        let obj = registry.new_object("Doc").unwrap();
        assert!(obj.is_loaded());
        assert!(registry.try_get(obj.uuid()).is_some());
        assert!(registry.is_all_complete());
    }

    #[test]
    fn register_known_rejects_impostor() {
        let registry = IdentityRegistry::new(classes());
        let obj = registry.new_object("Doc").unwrap();
        registry.register_known(&obj).unwrap();
        let impostor = registry
            .classes()
            .instantiate("Doc", Some(obj.uuid()))
            .unwrap();
        assert!(matches!(
            registry.register_known(&impostor),
            Err(RegistryError::DuplicateIdentity { .. })
        ));
    }

    // ----------------------------------------------------------------
    // Loading
    // ----------------------------------------------------------------

    #[tokio::test]
    async fn concurrent_gets_share_one_load() {
        let registry = IdentityRegistry::new(classes());
        let loader = DocLoader::attach(&registry);
        let id = ObjectUuid::new();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry.get_by_uuid_no_wait(id, false).await
            }));
        }
        let mut objects = Vec::new();
        for task in tasks {
            objects.push(task.await.unwrap().unwrap());
        }

        assert_eq!(loader.calls(), 1);
        assert!(objects.iter().all(|o| o.ptr_eq(&objects[0])));
        assert_eq!(objects[0].get("title").unwrap().as_str(), Some("loaded"));
        assert_eq!(registry.status(id), Some(LoadState::Success));
    }

    #[tokio::test]
    async fn load_errors_are_sticky() {
        let registry = IdentityRegistry::new(classes());
        let loader = DocLoader::attach(&registry);
        loader.fail.store(true, Ordering::SeqCst);
        let id = ObjectUuid::new();

        let first = registry.get_by_uuid_no_wait(id, false).await.unwrap_err();
        assert!(matches!(first, RegistryError::LoadFailed { .. }));
        loader.fail.store(false, Ordering::SeqCst);
        let second = registry.get_by_uuid_no_wait(id, false).await.unwrap_err();
        assert_eq!(first, second);
        assert_eq!(loader.calls(), 1);

        registry.forget(id);
        assert!(registry.get_by_uuid_no_wait(id, false).await.is_ok());
        assert_eq!(loader.calls(), 2);
    }

    #[tokio::test]
    async fn missing_object_fails() {
        let registry = IdentityRegistry::new(classes());
        let loader = DocLoader::attach(&registry);
        loader.missing.store(true, Ordering::SeqCst);
        let err = registry
            .get_by_uuid_no_wait(ObjectUuid::new(), false)
            .await
            .unwrap_err();
        match err {
            RegistryError::LoadFailed { reason, .. } => assert_eq!(reason, "object not found"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn incomplete_objects_are_returned_when_allowed() {
        let registry = IdentityRegistry::new(classes());
        let obj = registry.create_object("Doc", None).unwrap();
        let got = registry.get_by_uuid_no_wait(obj.uuid(), true).await.unwrap();
        assert!(got.ptr_eq(&obj));
        assert!(!got.is_loaded());
    }

    #[tokio::test]
    async fn stale_objects_reload_in_place() {
        let registry = IdentityRegistry::new(classes());
        let loader = DocLoader::attach(&registry);
        let id = ObjectUuid::new();
        let obj = registry.get_by_uuid_no_wait(id, false).await.unwrap();

        let stale = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stale);
        assert!(registry.set_stale_check(id, Arc::new(move |_: &ObjectHandle| flag.swap(false, Ordering::SeqCst))));

        *loader.title.lock().unwrap() = "fresh".into();
        let same = registry.get_by_uuid_no_wait(id, false).await.unwrap();
        assert_eq!(same.get("title").unwrap().as_str(), Some("loaded"));
        assert_eq!(loader.calls(), 1);

        stale.store(true, Ordering::SeqCst);
        let reloaded = registry.get_by_uuid_no_wait(id, false).await.unwrap();
        assert!(reloaded.ptr_eq(&obj));
        assert_eq!(reloaded.get("title").unwrap().as_str(), Some("fresh"));
        assert_eq!(loader.calls(), 2);
    }

    #[tokio::test]
    async fn explicit_reload_refreshes() {
        let registry = IdentityRegistry::new(classes());
        let loader = DocLoader::attach(&registry);
        let id = ObjectUuid::new();
        let obj = registry.get_by_uuid_no_wait(id, false).await.unwrap();
        *loader.title.lock().unwrap() = "again".into();
        let reloaded = registry.reload(id).await.unwrap();
        assert!(reloaded.ptr_eq(&obj));
        assert_eq!(obj.get("title").unwrap().as_str(), Some("again"));
    }

    // ----------------------------------------------------------------
    // Completion
    // ----------------------------------------------------------------

    #[tokio::test]
    async fn get_by_uuid_waits_for_pending_graph() {
        let registry = IdentityRegistry::new(classes());
        let pending = registry.create_object("Doc", None).unwrap();
        let ready = registry.new_object("Doc").unwrap();

        let task = {
            let registry = Arc::clone(&registry);
            let id = ready.uuid();
            tokio::spawn(async move { registry.get_by_uuid(id).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        registry.set_object_complete(&pending, None).unwrap();
        let got = task.await.unwrap().unwrap();
        assert!(got.ptr_eq(&ready));
        assert!(registry.is_all_complete());
    }

    #[test]
    fn load_complete_hook_fires_once_after_everything_settles() {
        let fired = Arc::new(AtomicUsize::new(0));
        let classes = classes();
        let counter = Arc::clone(&fired);
        classes
            .register(TypeBuilder::new("Watcher").on_data_load_complete(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        let registry = IdentityRegistry::new(classes);

        let watcher = registry.create_object("Watcher", None).unwrap();
        let other = registry.create_object("Doc", None).unwrap();
        registry.set_object_complete(&watcher, None).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        registry.set_object_complete(&other, None).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        registry.set_object_complete(&watcher, None).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn completion_with_error_is_recorded() {
        let registry = IdentityRegistry::new(classes());
        let obj = registry.create_object("Doc", None).unwrap();
        registry
            .set_object_complete(&obj, Some("bad data".into()))
            .unwrap();
        assert_eq!(
            registry.status(obj.uuid()),
            Some(LoadState::Error("bad data".into()))
        );
        assert!(registry.try_get_incomplete(obj.uuid()).is_none());
        let again = registry.obtain_object("Doc", obj.uuid()).unwrap();
        assert!(again.ptr_eq(&obj));
        assert_eq!(registry.status(obj.uuid()), Some(LoadState::Constructed));
    }
}
