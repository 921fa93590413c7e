//! Generic traversal of the per-kind lists
//!
//! One walk serves all nine kinds. It optionally filters by exact name and
//! drives a callback whose return value steers the walk (see [`Visit`]).
//! Without a callback the walk is a pure count.
//!
//! The walk never blocks, allocates or logs, so it is callable from the
//! realtime process. Its length is bounded by the number of headers that
//! fit in the arena.
//!
//! The walk itself is crate-private. Callers go through
//! [`crate::Registry::for_each`], which ties the payload type to its kind:
//!
//! ```compile_fail
//! use evo_registry::{Kind, ObjectHeader, Registry};
//!
//! let registry = Registry::anonymous(64 * 1024).unwrap();
//! let guard = registry.acquire_config().unwrap();
//! evo_registry::iter::for_each(
//!     registry.arena(),
//!     &guard,
//!     Kind::Component,
//!     None,
//!     Some(|_: &ObjectHeader| 0),
//! );
//! ```

use crate::arena::Arena;
use crate::error::{RegistryError, RegistryResult};
use crate::lock::{self, ConfigHold};
use crate::object::{Kind, ListNode};

/// What a traversal callback asks the walk to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Go on to the next match
    Continue,
    /// Stop now and report the matches visited so far
    Stop,
    /// Stop now and fail with `RegistryError::Callback { code }`
    Abort(i32),
}

/// Sign convention: negative aborts with the value, positive stops, zero
/// continues
impl From<i32> for Visit {
    #[inline]
    fn from(code: i32) -> Self {
        match code {
            c if c < 0 => Visit::Abort(c),
            0 => Visit::Continue,
            _ => Visit::Stop,
        }
    }
}

impl From<()> for Visit {
    #[inline]
    fn from(_: ()) -> Self {
        Visit::Continue
    }
}

/// Check readiness and the lock, then walk
///
/// Both preconditions are checked before the first node is touched, so a
/// refused call never invokes the callback. `T` must be the payload type of
/// `kind`, or [`crate::ObjectHeader`].
pub(crate) fn for_each<'a, T, H, F, R>(
    arena: &'a Arena,
    hold: &H,
    kind: Kind,
    name: Option<&str>,
    callback: Option<F>,
) -> RegistryResult<usize>
where
    T: ListNode + 'a,
    H: ConfigHold + ?Sized,
    F: FnMut(&'a T) -> R,
    R: Into<Visit>,
{
    arena.ensure_ready()?;
    lock::verify(arena.root(), hold)?;
    walk(arena, kind, name, callback)
}

/// Walk `kind`'s list with the preconditions already established
pub(crate) fn walk<'a, T, F, R>(
    arena: &'a Arena,
    kind: Kind,
    name: Option<&str>,
    mut callback: Option<F>,
) -> RegistryResult<usize>
where
    T: ListNode + 'a,
    F: FnMut(&'a T) -> R,
    R: Into<Visit>,
{
    let limit = arena.max_nodes();
    let mut visited = 0usize;
    let mut steps = 0usize;
    let mut cursor = arena.root().head(kind);

    while let Some(offset) = cursor.non_null() {
        steps += 1;
        if steps > limit {
            return Err(RegistryError::CorruptList { kind });
        }

        let node: &'a T = arena.locate_node(offset, kind)?;
        let header = node.header();

        if name.is_none_or(|wanted| header.name_matches(wanted)) {
            visited += 1;
            if let Some(callback) = callback.as_mut() {
                match callback(node).into() {
                    Visit::Continue => {}
                    Visit::Stop => return Ok(visited),
                    Visit::Abort(code) => return Err(RegistryError::Callback { code }),
                }
            }
        }

        cursor = header.next_ref();
    }

    Ok(visited)
}

/// Count matches without a callback
#[inline]
pub(crate) fn count<T: ListNode>(arena: &Arena, kind: Kind, name: Option<&str>) -> RegistryResult<usize> {
    walk::<T, fn(&T) -> Visit, Visit>(arena, kind, name, None)
}
