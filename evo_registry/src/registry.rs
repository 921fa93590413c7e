//! Registry facade: segment lifecycle, config lock, queries and mutation

use crate::arena::{Arena, validate_segment_size};
use crate::config::{AttachMode, RegistryConfig};
use crate::discovery::{RegistryInfo, remove_registry_files, write_metadata};
use crate::error::{RegistryError, RegistryResult};
use crate::iter::{self, Visit};
use crate::kinds::{Component, Pin, PinDirection, Signal};
use crate::list;
use crate::lock::{self, ConfigGuard, ConfigHold, ConfigView, LockClass, LockPolicy};
use crate::object::{Kind, ObjectHeader, RegistryObject, validate_name};
use crate::offset::Offset;
use crate::platform::{
    LinuxMemoryConfig, attach_segment_mmap, create_anonymous_mmap, create_segment_mmap,
    get_current_pid,
};
use crate::root::{ROOT_LAYOUT_HASH, RootState};
use evo::config::Validate;
use evo::shm::consts::KIND_COUNT;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Kinds owned by a component and destroyed with it
const OWNED_KINDS: [Kind; 6] = [
    Kind::Pin,
    Kind::Parameter,
    Kind::Function,
    Kind::Thread,
    Kind::VTable,
    Kind::Instance,
];

/// Registry usage snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    /// Arena size in bytes
    pub size: usize,
    /// Bytes taken by both allocators, root record included
    pub used: usize,
    /// Bytes still free
    pub available: usize,
    /// Live objects, indexed by [`Kind::index`]
    pub objects_per_kind: [usize; KIND_COUNT],
}

impl ArenaStats {
    /// Live objects of one kind
    pub fn objects(&self, kind: Kind) -> usize {
        self.objects_per_kind[kind.index()]
    }

    /// Live objects of all kinds
    pub fn total_objects(&self) -> usize {
        self.objects_per_kind.iter().sum()
    }
}

/// One process's handle on a configuration registry
pub struct Registry {
    arena: Arena,
    policy: LockPolicy,
    /// Created the named segment; removes its files on drop
    creator: bool,
}

static SEGMENT_SEQ: AtomicU32 = AtomicU32::new(0);

/// Identifier distinguishing this segment from any other
fn new_segment_id() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let seq = u64::from(SEGMENT_SEQ.fetch_add(1, Ordering::Relaxed));
    let id = (u64::from(get_current_pid()) << 32) ^ nanos ^ (seq << 16);
    id.max(1)
}

impl Registry {
    /// Create a named registry segment and initialize its root
    pub fn create(name: &str, size: usize) -> RegistryResult<Self> {
        Self::create_with(name, size, &LinuxMemoryConfig::default())
    }

    fn create_with(name: &str, size: usize, memory: &LinuxMemoryConfig) -> RegistryResult<Self> {
        validate_segment_size(size)?;
        let mmap = create_segment_mmap(name, size, memory)?;
        let registry = Self {
            arena: Arena::from_mmap(Some(name.to_string()), mmap)?,
            policy: LockPolicy::default(),
            creator: true,
        };

        let segment_id = new_segment_id();
        registry.arena.initialize(segment_id);
        write_metadata(&RegistryInfo {
            name: name.to_string(),
            size,
            segment_id,
            creator_pid: get_current_pid(),
            layout_hash: ROOT_LAYOUT_HASH,
            created_at: SystemTime::now(),
        })?;

        info!(name, size, segment_id, "Created registry segment");
        Ok(registry)
    }

    /// Attach to a named registry segment created by another process
    ///
    /// A segment whose creator has not finished initializing is attached
    /// anyway; operations fail with `RegistryNotReady` until it is ready.
    pub fn attach(name: &str) -> RegistryResult<Self> {
        Self::attach_with(name, &LinuxMemoryConfig::default())
    }

    fn attach_with(name: &str, memory: &LinuxMemoryConfig) -> RegistryResult<Self> {
        let mmap = attach_segment_mmap(name, memory)?;
        let arena = Arena::from_mmap(Some(name.to_string()), mmap)?;
        if arena.root().state() == RootState::Ready {
            arena.ensure_ready()?;
        }

        info!(
            name,
            size = arena.len(),
            ready = arena.is_ready(),
            "Attached to registry segment"
        );
        Ok(Self {
            arena,
            policy: LockPolicy::default(),
            creator: false,
        })
    }

    /// Create the named segment, or attach if it already exists
    pub fn create_or_attach(name: &str, size: usize) -> RegistryResult<Self> {
        Self::create_or_attach_with(name, size, &LinuxMemoryConfig::default())
    }

    fn create_or_attach_with(
        name: &str,
        size: usize,
        memory: &LinuxMemoryConfig,
    ) -> RegistryResult<Self> {
        match Self::create_with(name, size, memory) {
            Err(RegistryError::AlreadyExists { .. }) => Self::attach_with(name, memory),
            result => result,
        }
    }

    /// Private registry for a single process
    pub fn anonymous(size: usize) -> RegistryResult<Self> {
        validate_segment_size(size)?;
        let arena = Arena::from_mmap(None, create_anonymous_mmap(size)?)?;
        arena.initialize(new_segment_id());
        debug!(size, "Created anonymous registry");
        Ok(Self {
            arena,
            policy: LockPolicy::default(),
            creator: false,
        })
    }

    /// Open the registry a process configuration describes
    pub fn from_config(config: &RegistryConfig) -> RegistryResult<Self> {
        config.validate()?;
        let settings = &config.registry;
        let memory = settings.memory_config();

        let registry = match settings.mode {
            AttachMode::Create => Self::create_with(&settings.segment, settings.size, &memory)?,
            AttachMode::Attach => Self::attach_with(&settings.segment, &memory)?,
            AttachMode::CreateOrAttach => {
                Self::create_or_attach_with(&settings.segment, settings.size, &memory)?
            }
            AttachMode::Anonymous => Self::anonymous(settings.size)?,
        };
        Ok(registry.with_policy(settings.lock_policy()))
    }

    /// Replace the config lock policy
    pub fn with_policy(mut self, policy: LockPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The underlying arena
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Segment name, `None` for anonymous registries
    pub fn name(&self) -> Option<&str> {
        self.arena.name()
    }

    /// Identifier of the physical segment
    pub fn segment_id(&self) -> u64 {
        self.arena.root().segment_id()
    }

    /// True once the root is initialized by a compatible build
    pub fn is_ready(&self) -> bool {
        self.arena.is_ready()
    }

    // ─── Config lock ────────────────────────────────────────────────

    /// Acquire the config lock, waiting up to the policy timeout
    pub fn acquire_config(&self) -> RegistryResult<ConfigGuard<'_>> {
        self.arena.ensure_ready()?;
        lock::acquire(self.arena.root(), &self.policy)
    }

    /// Acquire the config lock if it is free right now
    pub fn try_acquire_config(&self) -> RegistryResult<Option<ConfigGuard<'_>>> {
        self.arena.ensure_ready()?;
        Ok(lock::try_acquire(self.arena.root(), &self.policy))
    }

    /// True if some process holds the config lock
    pub fn is_config_held(&self) -> bool {
        self.arena.is_ready() && lock::is_held(self.arena.root())
    }

    /// Non-blocking proof that the config lock is held, for realtime readers
    pub fn observe_config(&self) -> RegistryResult<ConfigView> {
        self.arena.ensure_ready()?;
        lock::observe(self.arena.root())
    }

    /// Active lock level
    pub fn lock_level(&self) -> LockClass {
        lock::level(self.arena.root())
    }

    /// Change the lock level
    pub fn set_lock_level(&self, guard: &mut ConfigGuard<'_>, level: LockClass) -> RegistryResult<()> {
        self.check(guard)?;
        lock::set_level(self.arena.root(), level);
        info!(?level, "Registry lock level changed");
        Ok(())
    }

    fn check<H: ConfigHold + ?Sized>(&self, hold: &H) -> RegistryResult<()> {
        self.arena.ensure_ready()?;
        lock::verify(self.arena.root(), hold)
    }

    // ─── Queries ────────────────────────────────────────────────────

    /// Walk the objects of type `T`, optionally only those named `name`
    ///
    /// The callback's return value steers the walk (see [`Visit`]); without
    /// a callback the call only counts. Returns the number of matches
    /// visited.
    pub fn for_each<'a, T, H, F, R>(
        &'a self,
        hold: &'a H,
        name: Option<&str>,
        callback: Option<F>,
    ) -> RegistryResult<usize>
    where
        T: RegistryObject + 'a,
        H: ConfigHold + ?Sized,
        F: FnMut(&'a T) -> R,
        R: Into<Visit>,
    {
        iter::for_each(&self.arena, hold, T::KIND, name, callback)
    }

    /// [`Registry::for_each`] with the kind chosen at runtime
    pub fn for_each_kind<'a, H, F, R>(
        &'a self,
        hold: &'a H,
        kind: Kind,
        name: Option<&str>,
        callback: Option<F>,
    ) -> RegistryResult<usize>
    where
        H: ConfigHold + ?Sized,
        F: FnMut(&'a ObjectHeader) -> R,
        R: Into<Visit>,
    {
        iter::for_each(&self.arena, hold, kind, name, callback)
    }

    /// Number of objects of type `T`, optionally only those named `name`
    pub fn count<T: RegistryObject, H: ConfigHold + ?Sized>(
        &self,
        hold: &H,
        name: Option<&str>,
    ) -> RegistryResult<usize> {
        self.count_kind(hold, T::KIND, name)
    }

    /// [`Registry::count`] with the kind chosen at runtime
    pub fn count_kind<H: ConfigHold + ?Sized>(
        &self,
        hold: &H,
        kind: Kind,
        name: Option<&str>,
    ) -> RegistryResult<usize> {
        self.check(hold)?;
        iter::count::<ObjectHeader>(&self.arena, kind, name)
    }

    /// First object of type `T` named `name`, in list order
    pub fn find<'a, T, H>(&'a self, hold: &'a H, name: &str) -> RegistryResult<Option<&'a T>>
    where
        T: RegistryObject + 'a,
        H: ConfigHold + ?Sized,
    {
        let mut found = None;
        self.for_each(
            hold,
            Some(name),
            Some(|object: &'a T| {
                found = Some(object);
                Visit::Stop
            }),
        )?;
        Ok(found)
    }

    /// Resolve a cached offset to a live object of type `T`
    ///
    /// Like traversal results, the reference lives no longer than the hold,
    /// so it cannot survive a mutation made through the guard.
    pub fn resolve<'a, T, H>(&'a self, hold: &'a H, offset: Offset) -> RegistryResult<&'a T>
    where
        T: RegistryObject + 'a,
        H: ConfigHold + ?Sized,
    {
        self.check(hold)?;
        self.arena.resolve_node(offset, T::KIND)
    }

    /// Walk the objects of type `T` owned by the component at `owner`
    ///
    /// Returns the number of owned objects visited; the callback steers the
    /// walk as in [`Registry::for_each`].
    pub fn for_each_owned_by<'a, T, H, F, R>(
        &'a self,
        hold: &'a H,
        owner: Offset,
        callback: F,
    ) -> RegistryResult<usize>
    where
        T: RegistryObject + 'a,
        H: ConfigHold + ?Sized,
        F: FnMut(&'a T) -> R,
        R: Into<Visit>,
    {
        self.for_each_where(hold, |object: &T| object.owner() == owner, callback)
    }

    /// Walk the pins linked to the signal at `signal`, in pin list order
    pub fn for_each_linked_pin<'a, H, F, R>(
        &'a self,
        hold: &'a H,
        signal: Offset,
        callback: F,
    ) -> RegistryResult<usize>
    where
        H: ConfigHold + ?Sized,
        F: FnMut(&'a Pin) -> R,
        R: Into<Visit>,
    {
        self.for_each_where(hold, |pin: &Pin| pin.signal() == Some(signal), callback)
    }

    /// [`Registry::for_each`] restricted to objects accepted by `filter`
    fn for_each_where<'a, T, H, P, F, R>(
        &'a self,
        hold: &'a H,
        mut filter: P,
        mut callback: F,
    ) -> RegistryResult<usize>
    where
        T: RegistryObject + 'a,
        H: ConfigHold + ?Sized,
        P: FnMut(&T) -> bool,
        F: FnMut(&'a T) -> R,
        R: Into<Visit>,
    {
        let mut matched = 0usize;
        self.for_each(
            hold,
            None,
            Some(|object: &'a T| {
                if !filter(object) {
                    return Visit::Continue;
                }
                matched += 1;
                callback(object).into()
            }),
        )?;
        Ok(matched)
    }

    /// Offset of an object obtained from this registry
    pub fn offset_of<T: RegistryObject>(&self, object: &T) -> RegistryResult<Offset> {
        self.arena.offset_of(object)
    }

    /// Usage snapshot
    pub fn stats<H: ConfigHold + ?Sized>(&self, hold: &H) -> RegistryResult<ArenaStats> {
        self.check(hold)?;
        let usage = self.arena.usage()?;
        let mut objects_per_kind = [0usize; KIND_COUNT];
        for kind in Kind::ALL {
            objects_per_kind[kind.index()] = iter::count::<ObjectHeader>(&self.arena, kind, None)?;
        }
        Ok(ArenaStats {
            size: usage.size,
            used: usage.used_bottom + usage.used_top,
            available: usage.available,
            objects_per_kind,
        })
    }

    // ─── Mutation ───────────────────────────────────────────────────

    /// Allocate zeroed storage for realtime data (pin values, ring buffers)
    pub fn allocate(&self, guard: &mut ConfigGuard<'_>, size: usize) -> RegistryResult<Offset> {
        self.check(guard)?;
        self.arena.allocate(size)
    }

    /// Create an object of type `T` and link it at the tail of its list
    ///
    /// `init` fills the payload before the object becomes visible to
    /// readers. `owner` is the owning component, or null.
    pub fn create_object<T, F>(
        &self,
        guard: &mut ConfigGuard<'_>,
        name: &str,
        owner: Offset,
        init: F,
    ) -> RegistryResult<Offset>
    where
        T: RegistryObject,
        F: FnOnce(&T),
    {
        self.check(guard)?;
        let kind = T::KIND;
        let root = self.arena.root();
        lock::ensure_unlocked(root, kind)?;
        validate_name(name)?;

        if iter::count::<ObjectHeader>(&self.arena, kind, Some(name))? > 0 {
            return Err(RegistryError::DuplicateName {
                kind,
                name: name.to_string(),
            });
        }
        if let Some(owner) = owner.non_null() {
            self.arena.locate_node::<Component>(owner, Kind::Component)?;
        }

        let offset = match list::pop_free(&self.arena, kind)? {
            Some(reused) => {
                self.arena.zero(reused, size_of::<T>())?;
                debug!(%kind, offset = %reused, "Reusing freed object");
                reused
            }
            None => self.arena.allocate_top(size_of::<T>(), align_of::<T>())?,
        };

        let object: &T = self.arena.locate(offset)?;
        object.header().init(kind, root.take_id(), owner, name);
        init(object);
        list::append(&self.arena, kind, offset)?;

        debug!(%kind, name, offset = %offset, "Created object");
        Ok(offset)
    }

    /// Destroy an object of type `T`. Destroying a component also destroys
    /// every object it owns. Destroying a pin or a signal breaks its links
    /// first.
    ///
    /// Offsets cached for destroyed objects stop resolving.
    pub fn destroy_object<T: RegistryObject>(
        &self,
        guard: &mut ConfigGuard<'_>,
        offset: Offset,
    ) -> RegistryResult<()> {
        self.check(guard)?;
        lock::ensure_unlocked(self.arena.root(), T::KIND)?;
        self.arena.locate_node::<T>(offset, T::KIND)?;

        if T::KIND == Kind::Component {
            for kind in OWNED_KINDS {
                let mut owned = Vec::new();
                iter::walk::<ObjectHeader, _, _>(
                    &self.arena,
                    kind,
                    None,
                    Some(|header: &ObjectHeader| {
                        if header.owner() == offset {
                            owned.push(self.arena.offset_of(header));
                        }
                    }),
                )?;
                for child in owned {
                    self.release(kind, child?)?;
                }
            }
        }

        self.release(T::KIND, offset)
    }

    fn release(&self, kind: Kind, offset: Offset) -> RegistryResult<()> {
        match kind {
            Kind::Pin => self.unlink_pin(self.arena.locate_node(offset, Kind::Pin)?),
            Kind::Signal => self.unlink_signal(offset)?,
            _ => {}
        }
        if !list::unlink(&self.arena, kind, offset)? {
            return Err(RegistryError::StaleObject {
                offset: offset.get(),
                expected: kind,
            });
        }
        let header: &ObjectHeader = self.arena.locate(offset)?;
        debug!(%kind, name = %header.name(), offset = %offset, "Destroyed object");
        header.retire();
        list::push_free(&self.arena, kind, offset)
    }

    // ─── Wiring ─────────────────────────────────────────────────────

    /// Link `pin` to `signal`, or unlink it with `None`
    ///
    /// Pin and signal must carry the same value type, and a signal takes at
    /// most one output pin. A pin already linked elsewhere is moved.
    pub fn link(
        &self,
        guard: &mut ConfigGuard<'_>,
        pin: Offset,
        signal: Option<Offset>,
    ) -> RegistryResult<()> {
        self.check(guard)?;
        lock::ensure_unlocked(self.arena.root(), Kind::Pin)?;
        let pin_ref: &Pin = self.arena.locate_node(pin, Kind::Pin)?;

        let Some(signal) = signal else {
            self.unlink_pin(pin_ref);
            return Ok(());
        };
        let signal_ref: &Signal = self.arena.locate_node(signal, Kind::Signal)?;
        if pin_ref.signal() == Some(signal) {
            return Ok(());
        }

        if pin_ref.value_type.load(Ordering::Acquire) != signal_ref.value_type.load(Ordering::Acquire) {
            return Err(RegistryError::TypeMismatch {
                pin: pin_ref.name().to_string(),
                signal: signal_ref.name().to_string(),
            });
        }
        let direction = pin_ref.direction();
        if direction == Some(PinDirection::Out) && signal_ref.writers.load(Ordering::Acquire) > 0 {
            return Err(RegistryError::SignalHasWriter {
                signal: signal_ref.name().to_string(),
            });
        }

        self.unlink_pin(pin_ref);
        if let Some(direction) = direction {
            if direction.reads() {
                signal_ref.readers.fetch_add(1, Ordering::AcqRel);
            }
            if direction.writes() {
                signal_ref.writers.fetch_add(1, Ordering::AcqRel);
            }
        }
        pin_ref.signal.store(signal);

        debug!(pin = %pin_ref.name(), signal = %signal_ref.name(), "Linked pin");
        Ok(())
    }

    /// Drop a pin's link and its share of the signal's reader/writer counts
    fn unlink_pin(&self, pin: &Pin) {
        let Some(signal) = pin.signal() else {
            return;
        };
        pin.signal.store(Offset::NULL);
        let Ok(signal_ref) = self.arena.locate_node::<Signal>(signal, Kind::Signal) else {
            warn!(pin = %pin.name(), signal = %signal, "Pin was linked to a dead signal");
            return;
        };
        if let Some(direction) = pin.direction() {
            if direction.reads() {
                decrement(&signal_ref.readers);
            }
            if direction.writes() {
                decrement(&signal_ref.writers);
            }
        }
        debug!(pin = %pin.name(), signal = %signal_ref.name(), "Unlinked pin");
    }

    /// Unlink every pin linked to the signal at `signal`
    fn unlink_signal(&self, signal: Offset) -> RegistryResult<()> {
        iter::walk::<Pin, _, _>(
            &self.arena,
            Kind::Pin,
            None,
            Some(|pin: &Pin| {
                if pin.signal() == Some(signal) {
                    self.unlink_pin(pin);
                }
            }),
        )?;
        Ok(())
    }
}

/// Saturating decrement of a link count
fn decrement(count: &AtomicU32) {
    let _ = count.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
}

impl Drop for Registry {
    fn drop(&mut self) {
        if !self.creator {
            return;
        }
        if let Some(name) = self.arena.name() {
            remove_registry_files(name);
            info!(name, "Removed registry segment");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::{Function, Parameter, Thread, ValueType};

    fn registry() -> Registry {
        Registry::anonymous(64 * 1024).unwrap()
    }

    fn add_pin(registry: &Registry, guard: &mut ConfigGuard<'_>, name: &str, owner: Offset) -> Offset {
        add_typed_pin(registry, guard, name, owner, ValueType::Float, PinDirection::In)
    }

    fn add_typed_pin(
        registry: &Registry,
        guard: &mut ConfigGuard<'_>,
        name: &str,
        owner: Offset,
        value_type: ValueType,
        direction: PinDirection,
    ) -> Offset {
        registry
            .create_object::<Pin, _>(guard, name, owner, |pin| {
                pin.value_type.store(value_type as u32, Ordering::Relaxed);
                pin.direction.store(direction as u32, Ordering::Relaxed);
            })
            .unwrap()
    }

    fn add_signal(registry: &Registry, guard: &mut ConfigGuard<'_>, name: &str, value_type: ValueType) -> Offset {
        registry
            .create_object::<Signal, _>(guard, name, Offset::NULL, |sig| {
                sig.value_type.store(value_type as u32, Ordering::Relaxed);
            })
            .unwrap()
    }

    fn counts(registry: &Registry, guard: &ConfigGuard<'_>, signal: Offset) -> (u32, u32) {
        let sig = registry.resolve::<Signal, _>(guard, signal).unwrap();
        (
            sig.readers.load(Ordering::Relaxed),
            sig.writers.load(Ordering::Relaxed),
        )
    }

    #[test]
    fn test_create_find_and_count() {
        let registry = registry();
        let mut guard = registry.acquire_config().unwrap();
        let comp = registry
            .create_object::<Component, _>(&mut guard, "motion", Offset::NULL, |comp| comp.mark_ready())
            .unwrap();
        add_pin(&registry, &mut guard, "motion.x", comp);
        add_pin(&registry, &mut guard, "motion.y", comp);

        assert_eq!(registry.count::<Pin, _>(&guard, None).unwrap(), 2);
        assert_eq!(registry.count::<Pin, _>(&guard, Some("motion.y")).unwrap(), 1);
        assert_eq!(registry.count::<Signal, _>(&guard, None).unwrap(), 0);

        let pin = registry.find::<Pin, _>(&guard, "motion.y").unwrap().unwrap();
        assert_eq!(pin.name().as_str(), "motion.y");
        assert_eq!(pin.owner(), comp);
        assert_eq!(pin.value_type(), Some(ValueType::Float));
        assert!(registry.find::<Pin, _>(&guard, "motion.z").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_and_invalid_names() {
        let registry = registry();
        let mut guard = registry.acquire_config().unwrap();
        registry
            .create_object::<Signal, _>(&mut guard, "estop", Offset::NULL, |_| {})
            .unwrap();

        assert!(matches!(
            registry.create_object::<Signal, _>(&mut guard, "estop", Offset::NULL, |_| {}),
            Err(RegistryError::DuplicateName { kind: Kind::Signal, .. })
        ));
        // Same name in another kind is fine
        assert!(registry
            .create_object::<Thread, _>(&mut guard, "estop", Offset::NULL, |_| {})
            .is_ok());
        assert!(matches!(
            registry.create_object::<Signal, _>(&mut guard, "", Offset::NULL, |_| {}),
            Err(RegistryError::InvalidName { .. })
        ));
    }

    #[test]
    fn test_owner_must_be_live_component() {
        let registry = registry();
        let mut guard = registry.acquire_config().unwrap();
        let sig = registry
            .create_object::<Signal, _>(&mut guard, "sig", Offset::NULL, |_| {})
            .unwrap();
        assert!(matches!(
            registry.create_object::<Pin, _>(&mut guard, "p", sig, |_| {}),
            Err(RegistryError::StaleObject { .. })
        ));
    }

    #[test]
    fn test_destroy_invalidates_cached_offset_and_reuses_slot() {
        let registry = registry();
        let mut guard = registry.acquire_config().unwrap();
        let sig = registry
            .create_object::<Signal, _>(&mut guard, "spindle-on", Offset::NULL, |_| {})
            .unwrap();
        assert!(registry.resolve::<Signal, _>(&guard, sig).is_ok());

        registry.destroy_object::<Signal>(&mut guard, sig).unwrap();
        assert!(matches!(
            registry.resolve::<Signal, _>(&guard, sig),
            Err(RegistryError::StaleObject { .. })
        ));
        assert!(registry.destroy_object::<Signal>(&mut guard, sig).is_err());

        let again = registry
            .create_object::<Signal, _>(&mut guard, "coolant", Offset::NULL, |_| {})
            .unwrap();
        assert_eq!(again, sig);
        let signal = registry.resolve::<Signal, _>(&guard, again).unwrap();
        assert_eq!(signal.name().as_str(), "coolant");
        assert_eq!(signal.readers.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_component_destroy_cascades() {
        let registry = registry();
        let mut guard = registry.acquire_config().unwrap();
        let a = registry
            .create_object::<Component, _>(&mut guard, "a", Offset::NULL, |_| {})
            .unwrap();
        let b = registry
            .create_object::<Component, _>(&mut guard, "b", Offset::NULL, |_| {})
            .unwrap();
        add_pin(&registry, &mut guard, "a.in", a);
        add_pin(&registry, &mut guard, "b.in", b);
        registry
            .create_object::<Function, _>(&mut guard, "a.update", a, |_| {})
            .unwrap();

        registry.destroy_object::<Component>(&mut guard, a).unwrap();

        assert_eq!(registry.count::<Component, _>(&guard, None).unwrap(), 1);
        assert_eq!(registry.count::<Pin, _>(&guard, None).unwrap(), 1);
        assert_eq!(registry.count::<Pin, _>(&guard, Some("b.in")).unwrap(), 1);
        assert_eq!(registry.count::<Function, _>(&guard, None).unwrap(), 0);
    }

    #[test]
    fn test_lock_level_refuses_mutation() {
        let registry = registry();
        let mut guard = registry.acquire_config().unwrap();
        registry.set_lock_level(&mut guard, LockClass::LOAD).unwrap();
        assert_eq!(registry.lock_level(), LockClass::LOAD);

        assert!(matches!(
            registry.create_object::<Component, _>(&mut guard, "late", Offset::NULL, |_| {}),
            Err(RegistryError::Locked { .. })
        ));
        assert!(registry
            .create_object::<Signal, _>(&mut guard, "still-ok", Offset::NULL, |_| {})
            .is_ok());

        registry.set_lock_level(&mut guard, LockClass::CONFIG).unwrap();
        assert!(matches!(
            registry.create_object::<Signal, _>(&mut guard, "refused", Offset::NULL, |_| {}),
            Err(RegistryError::Locked { .. })
        ));
    }

    #[test]
    fn test_allocate_for_realtime_data() {
        let registry = registry();
        let mut guard = registry.acquire_config().unwrap();
        let data = registry.allocate(&mut guard, 8).unwrap();
        let pin = add_pin(&registry, &mut guard, "p", Offset::NULL);
        registry.resolve::<Pin, _>(&guard, pin).unwrap().data.store(data);

        let value: &std::sync::atomic::AtomicU64 = registry.arena().resolve(data).unwrap();
        value.store(42f64.to_bits(), Ordering::Relaxed);
        let stored = registry.resolve::<Pin, _>(&guard, pin).unwrap().data.load();
        let again: &std::sync::atomic::AtomicU64 = registry.arena().resolve(stored).unwrap();
        assert_eq!(f64::from_bits(again.load(Ordering::Relaxed)), 42.0);
    }

    #[test]
    fn test_stats_track_objects() {
        let registry = registry();
        let mut guard = registry.acquire_config().unwrap();
        let before = registry.stats(&guard).unwrap();
        assert_eq!(before.total_objects(), 0);

        add_pin(&registry, &mut guard, "p1", Offset::NULL);
        add_pin(&registry, &mut guard, "p2", Offset::NULL);
        let after = registry.stats(&guard).unwrap();
        assert_eq!(after.objects(Kind::Pin), 2);
        assert_eq!(after.total_objects(), 2);
        assert_eq!(after.size, 64 * 1024);
        assert!(after.available < before.available);
        assert_eq!(after.used + after.available, after.size);
    }

    #[test]
    fn test_reads_require_the_lock() {
        let registry = registry();
        assert!(!registry.is_config_held());
        assert!(matches!(
            registry.observe_config(),
            Err(RegistryError::LockNotHeld)
        ));

        let guard = registry.acquire_config().unwrap();
        assert!(registry.is_config_held());
        let view = registry.observe_config().unwrap();
        assert_eq!(registry.count::<Pin, _>(&view, None).unwrap(), 0);
        drop(guard);

        assert!(matches!(
            registry.count::<Pin, _>(&view, None),
            Err(RegistryError::LockNotHeld)
        ));
    }

    #[test]
    fn test_guard_of_other_registry_is_refused() {
        let first = registry();
        let second = registry();
        let mut guard = first.acquire_config().unwrap();
        let _second_guard = second.acquire_config().unwrap();

        assert!(matches!(
            second.count::<Pin, _>(&guard, None),
            Err(RegistryError::LockNotHeld)
        ));
        assert!(matches!(
            second.create_object::<Pin, _>(&mut guard, "p", Offset::NULL, |_| {}),
            Err(RegistryError::LockNotHeld)
        ));
    }

    #[test]
    fn test_name_copy_outlives_destroy_and_reuse() {
        let registry = registry();
        let mut guard = registry.acquire_config().unwrap();
        let sig = add_signal(&registry, &mut guard, "spindle-on", ValueType::Bit);
        let name = registry.resolve::<Signal, _>(&guard, sig).unwrap().name();

        registry.destroy_object::<Signal>(&mut guard, sig).unwrap();
        let reused = add_signal(&registry, &mut guard, "coolant", ValueType::Bit);
        assert_eq!(reused, sig);

        assert_eq!(name.as_str(), "spindle-on");
        let current = registry.resolve::<Signal, _>(&guard, reused).unwrap();
        assert_eq!(current.name().as_str(), "coolant");
    }

    #[test]
    fn test_resolve_requires_the_lock() {
        let registry = registry();
        let sig = {
            let mut guard = registry.acquire_config().unwrap();
            add_signal(&registry, &mut guard, "estop", ValueType::Bit)
        };
        let other = Registry::anonymous(64 * 1024).unwrap();
        let foreign = other.acquire_config().unwrap();
        assert!(matches!(
            registry.resolve::<Signal, _>(&foreign, sig),
            Err(RegistryError::LockNotHeld)
        ));
    }

    #[test]
    fn test_link_counts_readers_and_writers() {
        let registry = registry();
        let mut guard = registry.acquire_config().unwrap();
        let sig = add_signal(&registry, &mut guard, "x-pos", ValueType::Float);
        let out = add_typed_pin(&registry, &mut guard, "enc.pos", Offset::NULL, ValueType::Float, PinDirection::Out);
        let a = add_typed_pin(&registry, &mut guard, "pid.fb", Offset::NULL, ValueType::Float, PinDirection::In);
        let b = add_typed_pin(&registry, &mut guard, "scope.ch0", Offset::NULL, ValueType::Float, PinDirection::Io);

        registry.link(&mut guard, out, Some(sig)).unwrap();
        registry.link(&mut guard, a, Some(sig)).unwrap();
        registry.link(&mut guard, b, Some(sig)).unwrap();
        assert_eq!(counts(&registry, &guard, sig), (2, 2));
        assert_eq!(registry.resolve::<Pin, _>(&guard, a).unwrap().signal(), Some(sig));

        // Relinking to the same signal changes nothing
        registry.link(&mut guard, a, Some(sig)).unwrap();
        assert_eq!(counts(&registry, &guard, sig), (2, 2));

        registry.link(&mut guard, a, None).unwrap();
        assert_eq!(counts(&registry, &guard, sig), (1, 2));
        assert_eq!(registry.resolve::<Pin, _>(&guard, a).unwrap().signal(), None);
    }

    #[test]
    fn test_link_refuses_type_mismatch_and_second_writer() {
        let registry = registry();
        let mut guard = registry.acquire_config().unwrap();
        let sig = add_signal(&registry, &mut guard, "enable", ValueType::Bit);
        let float_pin = add_typed_pin(&registry, &mut guard, "amp.cmd", Offset::NULL, ValueType::Float, PinDirection::In);
        let first = add_typed_pin(&registry, &mut guard, "a.out", Offset::NULL, ValueType::Bit, PinDirection::Out);
        let second = add_typed_pin(&registry, &mut guard, "b.out", Offset::NULL, ValueType::Bit, PinDirection::Out);

        assert!(matches!(
            registry.link(&mut guard, float_pin, Some(sig)),
            Err(RegistryError::TypeMismatch { .. })
        ));
        registry.link(&mut guard, first, Some(sig)).unwrap();
        assert!(matches!(
            registry.link(&mut guard, second, Some(sig)),
            Err(RegistryError::SignalHasWriter { .. })
        ));
        assert_eq!(counts(&registry, &guard, sig), (0, 1));
        assert_eq!(registry.resolve::<Pin, _>(&guard, second).unwrap().signal(), None);

        // A signal offset in the pin slot is refused
        assert!(matches!(
            registry.link(&mut guard, sig, Some(sig)),
            Err(RegistryError::StaleObject { expected: Kind::Pin, .. })
        ));
    }

    #[test]
    fn test_moving_a_pin_updates_both_signals() {
        let registry = registry();
        let mut guard = registry.acquire_config().unwrap();
        let first = add_signal(&registry, &mut guard, "s1", ValueType::S32);
        let second = add_signal(&registry, &mut guard, "s2", ValueType::S32);
        let pin = add_typed_pin(&registry, &mut guard, "count.out", Offset::NULL, ValueType::S32, PinDirection::Out);

        registry.link(&mut guard, pin, Some(first)).unwrap();
        registry.link(&mut guard, pin, Some(second)).unwrap();
        assert_eq!(counts(&registry, &guard, first), (0, 0));
        assert_eq!(counts(&registry, &guard, second), (0, 1));
    }

    #[test]
    fn test_destroying_a_signal_unlinks_its_pins() {
        let registry = registry();
        let mut guard = registry.acquire_config().unwrap();
        let sig = add_signal(&registry, &mut guard, "spindle-speed", ValueType::Float);
        let keep = add_signal(&registry, &mut guard, "feed", ValueType::Float);
        let a = add_pin(&registry, &mut guard, "vfd.speed", Offset::NULL);
        let b = add_pin(&registry, &mut guard, "gui.speed", Offset::NULL);
        let c = add_pin(&registry, &mut guard, "gui.feed", Offset::NULL);
        registry.link(&mut guard, a, Some(sig)).unwrap();
        registry.link(&mut guard, b, Some(sig)).unwrap();
        registry.link(&mut guard, c, Some(keep)).unwrap();

        registry.destroy_object::<Signal>(&mut guard, sig).unwrap();

        assert_eq!(registry.resolve::<Pin, _>(&guard, a).unwrap().signal(), None);
        assert_eq!(registry.resolve::<Pin, _>(&guard, b).unwrap().signal(), None);
        assert_eq!(registry.resolve::<Pin, _>(&guard, c).unwrap().signal(), Some(keep));
        assert_eq!(counts(&registry, &guard, keep), (1, 0));
    }

    #[test]
    fn test_destroying_a_linked_pin_releases_its_share() {
        let registry = registry();
        let mut guard = registry.acquire_config().unwrap();
        let comp = registry
            .create_object::<Component, _>(&mut guard, "encoder", Offset::NULL, |_| {})
            .unwrap();
        let sig = add_signal(&registry, &mut guard, "pos", ValueType::Float);
        let out = add_typed_pin(&registry, &mut guard, "encoder.pos", comp, ValueType::Float, PinDirection::Out);
        let input = add_pin(&registry, &mut guard, "pid.fb", Offset::NULL);
        registry.link(&mut guard, out, Some(sig)).unwrap();
        registry.link(&mut guard, input, Some(sig)).unwrap();

        registry.destroy_object::<Pin>(&mut guard, input).unwrap();
        assert_eq!(counts(&registry, &guard, sig), (0, 1));

        // The owner's cascade unlinks its pins too
        registry.destroy_object::<Component>(&mut guard, comp).unwrap();
        assert_eq!(counts(&registry, &guard, sig), (0, 0));
    }

    #[test]
    fn test_link_refused_while_config_locked() {
        let registry = registry();
        let mut guard = registry.acquire_config().unwrap();
        let sig = add_signal(&registry, &mut guard, "s", ValueType::Float);
        let pin = add_pin(&registry, &mut guard, "p", Offset::NULL);
        registry.set_lock_level(&mut guard, LockClass::CONFIG).unwrap();
        assert!(matches!(
            registry.link(&mut guard, pin, Some(sig)),
            Err(RegistryError::Locked { .. })
        ));
    }

    #[test]
    fn test_queries_by_owner_and_signal() {
        let registry = registry();
        let mut guard = registry.acquire_config().unwrap();
        let motion = registry
            .create_object::<Component, _>(&mut guard, "motion", Offset::NULL, |_| {})
            .unwrap();
        let other = registry
            .create_object::<Component, _>(&mut guard, "iocontrol", Offset::NULL, |_| {})
            .unwrap();
        add_pin(&registry, &mut guard, "motion.x", motion);
        add_pin(&registry, &mut guard, "iocontrol.estop", other);
        add_pin(&registry, &mut guard, "motion.y", motion);
        registry
            .create_object::<Parameter, _>(&mut guard, "motion.debug", motion, |_| {})
            .unwrap();

        let mut owned = Vec::new();
        let visited = registry
            .for_each_owned_by(&guard, motion, |pin: &Pin| owned.push(pin.name().to_string()))
            .unwrap();
        assert_eq!(visited, 2);
        assert_eq!(owned, ["motion.x", "motion.y"]);
        assert_eq!(
            registry
                .for_each_owned_by(&guard, motion, |_: &Parameter| Visit::Continue)
                .unwrap(),
            1
        );

        // Early stop counts only what was visited
        assert_eq!(
            registry
                .for_each_owned_by(&guard, motion, |_: &Pin| Visit::Stop)
                .unwrap(),
            1
        );

        let sig = add_signal(&registry, &mut guard, "estop-loop", ValueType::Float);
        let linked = registry.find::<Pin, _>(&guard, "motion.y").unwrap().unwrap();
        let linked = registry.offset_of(linked).unwrap();
        registry.link(&mut guard, linked, Some(sig)).unwrap();

        let mut pins = Vec::new();
        let visited = registry
            .for_each_linked_pin(&guard, sig, |pin: &Pin| pins.push(pin.name().to_string()))
            .unwrap();
        assert_eq!(visited, 1);
        assert_eq!(pins, ["motion.y"]);
        assert!(matches!(
            registry.for_each_linked_pin(&guard, sig, |_: &Pin| -3),
            Err(RegistryError::Callback { code: -3 })
        ));
    }
}
