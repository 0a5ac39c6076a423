//! Per-open-handle state.
//!
//! Every successful `open` registers one entry keyed by the handle value
//! returned to the kernel: the real file descriptor for passthrough files, or
//! the capture pipe's read end for virtual ones. Both come from the process fd
//! namespace, so two live entries never share a handle value.

use std::fs::File;
use std::os::fd::OwnedFd;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::buffer::CaptureBuffer;

/// What an open handle reads from.
#[derive(Debug)]
pub enum HandleState {
    /// Reads go to the real file.
    Passthrough(File),
    /// Reads are served from output captured at open time. `pipe` is the
    /// read end the handle value was taken from; it closes with the entry.
    Virtual { buffer: CaptureBuffer, pipe: OwnedFd },
}

impl HandleState {
    pub fn is_virtual(&self) -> bool {
        matches!(self, HandleState::Virtual { .. })
    }

    /// Captured bytes, for virtual handles.
    pub fn capture(&self) -> Option<&CaptureBuffer> {
        match self {
            HandleState::Passthrough(_) => None,
            HandleState::Virtual { buffer, .. } => Some(buffer),
        }
    }
}

#[derive(Debug)]
struct Slot<T> {
    handle: u64,
    state: Arc<T>,
}

/// Slot table mapping handle values to their state.
///
/// Lookups scan linearly; the number of files open at once through a single
/// mount is small. Freed slots are reused before the table grows, and growth
/// doubles the slot count. Entries are handed out as `Arc`s, so a `retire`
/// racing with a `read` only drops the table's reference: the reader keeps
/// the state (and its descriptor) alive until it is done.
#[derive(Debug)]
pub struct HandleRegistry<T = HandleState> {
    slots: Mutex<Vec<Option<Slot<T>>>>,
}

impl<T> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleRegistry<T> {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(1);
        slots.push(None);
        Self {
            slots: Mutex::new(slots),
        }
    }

    // Every critical section leaves the table consistent, so a panic while
    // holding the lock cannot corrupt it.
    fn slots(&self) -> MutexGuard<'_, Vec<Option<Slot<T>>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish `state` under `handle` and return a reference to it.
    ///
    /// A live entry already holding `handle` is replaced.
    pub fn register(&self, handle: u64, state: T) -> Arc<T> {
        let state = Arc::new(state);
        let mut slots = self.slots();

        let index = match find(&slots, handle) {
            Some(i) => {
                warn!("handle {handle} registered while still live, replacing");
                i
            }
            None => match slots.iter().position(Option::is_none) {
                Some(i) => i,
                None => {
                    let old_len = slots.len();
                    slots.resize_with(old_len * 2, || None);
                    debug!("handle table grown from {old_len} to {} slots", slots.len());
                    old_len
                }
            },
        };

        slots[index] = Some(Slot {
            handle,
            state: Arc::clone(&state),
        });
        state
    }

    /// Free the slot holding `handle`. Unknown handles are ignored.
    ///
    /// Returns the retired state so the caller can observe when it is
    /// released; dropping it (and any outstanding lookups) closes whatever
    /// the state owns.
    pub fn retire(&self, handle: u64) -> Option<Arc<T>> {
        let mut slots = self.slots();
        let index = find(&slots, handle)?;
        slots[index].take().map(|slot| slot.state)
    }

    pub fn lookup(&self, handle: u64) -> Option<Arc<T>> {
        let slots = self.slots();
        find(&slots, handle).and_then(|i| slots[i].as_ref().map(|slot| Arc::clone(&slot.state)))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.slots().iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of slots, live or free.
    pub fn capacity(&self) -> usize {
        self.slots().len()
    }
}

fn find<T>(slots: &[Option<Slot<T>>], handle: u64) -> Option<usize> {
    slots
        .iter()
        .position(|s| s.as_ref().is_some_and(|slot| slot.handle == handle))
}
