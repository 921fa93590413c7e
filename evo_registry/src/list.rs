//! Link maintenance for the per-kind lists and free lists
//!
//! Called only with the config lock held. Every walk is bounded by
//! [`Arena::max_nodes`] so a corrupted link cannot hang the caller.

use crate::arena::Arena;
use crate::error::{RegistryError, RegistryResult};
use crate::object::{Kind, ObjectHeader};
use crate::offset::{AtomicOffset, Offset};

/// Link `node` at the tail of `kind`'s list. The node must be fully
/// initialized: the store into the predecessor's link publishes it.
pub(crate) fn append(arena: &Arena, kind: Kind, node: Offset) -> RegistryResult<()> {
    let mut slot: &AtomicOffset = arena.root().head_slot(kind);
    let mut steps = 0usize;

    while let Some(current) = slot.load().non_null() {
        steps += 1;
        if steps > arena.max_nodes() {
            return Err(RegistryError::CorruptList { kind });
        }
        let header: &ObjectHeader = arena.locate_node(current, kind)?;
        slot = header.link_slot();
    }

    slot.store(node);
    Ok(())
}

/// Unlink `node` from `kind`'s list. Returns false if it was not linked.
pub(crate) fn unlink(arena: &Arena, kind: Kind, node: Offset) -> RegistryResult<bool> {
    let mut slot: &AtomicOffset = arena.root().head_slot(kind);
    let mut steps = 0usize;

    while let Some(current) = slot.load().non_null() {
        steps += 1;
        if steps > arena.max_nodes() {
            return Err(RegistryError::CorruptList { kind });
        }
        let header: &ObjectHeader = arena.locate_node(current, kind)?;
        if current == node {
            // Readers already past this slot still see the old successor
            slot.store(header.next_ref());
            return Ok(true);
        }
        slot = header.link_slot();
    }

    Ok(false)
}

/// Push a retired header on `kind`'s free list
pub(crate) fn push_free(arena: &Arena, kind: Kind, node: Offset) -> RegistryResult<()> {
    let header: &ObjectHeader = arena.locate(node)?;
    let free = arena.root().free_slot(kind);
    header.set_next(free.load());
    free.store(node);
    Ok(())
}

/// Pop a retired header from `kind`'s free list
pub(crate) fn pop_free(arena: &Arena, kind: Kind) -> RegistryResult<Option<Offset>> {
    let free = arena.root().free_slot(kind);
    let Some(node) = free.load().non_null() else {
        return Ok(None);
    };
    let header: &ObjectHeader = arena.locate(node)?;
    if !header.is_free() {
        return Err(RegistryError::CorruptList { kind });
    }
    free.store(header.next_ref());
    Ok(Some(node))
}
