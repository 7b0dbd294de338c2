//! Undo/redo history and the subject's preserved snapshots.
//!
//! Two kinds of "earlier state" exist for a subject:
//!
//! - **History** ([`History`]): in-memory snapshots of the pending edit and
//!   its transform flags. Linear with a cursor; a new snapshot after an undo
//!   discards the redo tail. Cursor `-1` is the state the session opened
//!   with. A commit re-bases the history so that state stays reachable.
//! - **Baselines** ([`Baselines`]): rasters kept in the store. The
//!   original (`{id}_orig`) is written once, before the first transform ever
//!   touches the subject. The crop baseline (`{id}_cropBase`) is rewritten
//!   before every crop or fit.

use crate::keys::{crop_base_key, display_key, legacy_key, original_key};
use crate::store::{BinaryStore, StoreError};
use crate::types::{SubjectRecord, TransformFlags};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Marks a pending raster that descends from a newly proposed picture
/// rather than from the committed one.
///
/// Proposing such a raster invalidates the subject's baselines; the
/// proposed raster is what gets preserved as the new original.
#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    /// The proposed picture in display form, before any transform.
    pub base: Arc<Vec<u8>>,
    /// Full-resolution bytes of the proposed picture, when it was ingested.
    pub full: Option<Arc<Vec<u8>>>,
}

/// One undo step.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// The pending raster at this step, `None` when the committed raster is shown.
    pub pending: Option<Arc<Vec<u8>>>,
    pub flags: TransformFlags,
    pub replacement: Option<Replacement>,
    pub timestamp: SystemTime,
}

impl Snapshot {
    pub fn new(pending: Option<Arc<Vec<u8>>>, flags: TransformFlags) -> Self {
        Self {
            pending,
            flags,
            replacement: None,
            timestamp: SystemTime::now(),
        }
    }

    pub fn replacing(mut self, replacement: Option<Replacement>) -> Self {
        self.replacement = replacement;
        self
    }
}

/// Where an undo landed.
#[derive(Debug, Clone, PartialEq)]
pub enum Step<'h> {
    /// A recorded snapshot.
    Snapshot(&'h Snapshot),
    /// Before the first snapshot: the state the session opened with.
    Start,
    /// Nothing to move to.
    None,
}

/// Linear snapshot list with a cursor.
///
/// Invariant: `-1 <= cursor < len`.
///
/// After a commit, `committed_at` is the cursor whose state is the committed
/// raster and `start` holds what cursor `-1` showed before. A commit over an
/// empty subject seals the history instead: there is nothing before it.
#[derive(Debug, Clone)]
pub struct History {
    entries: Vec<Snapshot>,
    cursor: isize,
    start: Option<Snapshot>,
    committed_at: Option<isize>,
    sealed: bool,
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl History {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            cursor: -1,
            start: None,
            committed_at: Some(-1),
            sealed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> isize {
        self.cursor
    }

    pub fn current(&self) -> Option<&Snapshot> {
        usize::try_from(self.cursor)
            .ok()
            .and_then(|i| self.entries.get(i))
    }

    /// The state at cursor `-1`, once a commit has moved past it.
    pub fn start(&self) -> Option<&Snapshot> {
        self.start.as_ref()
    }

    /// Record a snapshot after the cursor, dropping any redo tail.
    pub fn push(&mut self, snapshot: Snapshot) {
        if self.committed_at.is_some_and(|at| at > self.cursor) {
            self.committed_at = None;
        }
        self.entries.truncate((self.cursor + 1) as usize);
        self.entries.push(snapshot);
        self.cursor = self.entries.len() as isize - 1;
    }

    /// Move the cursor to `index`, clamped into the recorded range.
    pub fn goto_index(&mut self, index: isize) -> Option<&Snapshot> {
        if self.entries.is_empty() {
            return None;
        }
        let last = self.entries.len() as isize - 1;
        self.cursor = index.clamp(0, last);
        self.entries.get(self.cursor as usize)
    }

    /// Step back one snapshot.
    pub fn back(&mut self) -> Step<'_> {
        match self.cursor {
            c if c > 0 => match self.goto_index(c - 1) {
                Some(snapshot) => Step::Snapshot(snapshot),
                None => Step::None,
            },
            0 if self.sealed => Step::None,
            0 => {
                self.cursor = -1;
                Step::Start
            }
            _ => Step::None,
        }
    }

    /// Step forward one snapshot.
    pub fn forward(&mut self) -> Option<&Snapshot> {
        if self.cursor + 1 < self.entries.len() as isize {
            self.goto_index(self.cursor + 1)
        } else {
            None
        }
    }

    /// Point back at the committed state without discarding snapshots.
    ///
    /// When the committed step was cut off by a later push the cursor stays put.
    pub fn rewind(&mut self) {
        if let Some(at) = self.committed_at {
            self.cursor = at;
        }
    }

    /// The current step has just been committed over `outgoing`.
    ///
    /// Steps recorded as "nothing pending" showed `outgoing`, so they now
    /// carry it explicitly. The first commit also keeps `outgoing` as the
    /// start state, or seals the history when there was no raster at all.
    pub fn rebase(&mut self, outgoing: Option<Arc<Vec<u8>>>, outgoing_flags: TransformFlags) {
        if let Some(raster) = &outgoing {
            for entry in self.entries.iter_mut().filter(|e| e.pending.is_none()) {
                entry.pending = Some(Arc::clone(raster));
            }
        }
        if self.start.is_none() && !self.sealed {
            match outgoing {
                Some(raster) => self.start = Some(Snapshot::new(Some(raster), outgoing_flags)),
                None => self.sealed = true,
            }
        }
        self.committed_at = Some(self.cursor);
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0 || (self.cursor == 0 && !self.sealed)
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len() as isize
    }
}

/// What [`Baselines::ensure_original_once`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginalStatus {
    /// The record already says the original is preserved.
    AlreadyFlagged,
    /// A valid original was found in the store; the flag now mirrors it.
    AlreadyStored,
    /// The untouched raster was copied to the original slot.
    Preserved,
    /// Nothing committed yet, so there is nothing to preserve.
    NothingCommitted,
    /// The write reported success but reading back did not match.
    Unverified,
}

/// Store-backed baselines of one subject.
pub struct Baselines<'s> {
    store: &'s dyn BinaryStore,
}

impl<'s> Baselines<'s> {
    pub fn new(store: &'s dyn BinaryStore) -> Self {
        Self { store }
    }

    /// The committed raster, falling back to the legacy location when the
    /// canonical key is absent.
    pub fn read_committed(&self, record: &SubjectRecord) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(bytes) = self.store.get(&display_key(&record.id))? {
            return Ok(Some(bytes));
        }
        match legacy_key(record) {
            Some(key) => {
                let found = self.store.get(&key)?;
                if found.is_some() {
                    debug!(subject = %record.id, key, "read committed raster from legacy location");
                }
                Ok(found)
            }
            None => Ok(None),
        }
    }

    /// Copy the subject's untouched raster to the original slot, once per subject.
    ///
    /// The untouched raster is `proposed` when a new picture is pending, the
    /// committed raster otherwise. The record's flag is checked first, then
    /// the store; the copy happens only when neither shows a preserved
    /// original, and the flag is set only after the copy reads back intact.
    pub fn ensure_original_once(
        &self,
        record: &mut SubjectRecord,
        proposed: Option<&[u8]>,
    ) -> Result<OriginalStatus, StoreError> {
        if record.has_original {
            return Ok(OriginalStatus::AlreadyFlagged);
        }
        let key = original_key(&record.id);
        let stored = self.store.get(&key)?;
        if stored.is_some_and(|bytes| image::guess_format(&bytes).is_ok()) {
            record.has_original = true;
            return Ok(OriginalStatus::AlreadyStored);
        }
        let source = match proposed {
            Some(bytes) => bytes.to_vec(),
            None => match self.read_committed(record)? {
                Some(bytes) => bytes,
                None => return Ok(OriginalStatus::NothingCommitted),
            },
        };
        self.store.put(&key, &source)?;
        if self.store.get(&key)?.as_deref() == Some(source.as_slice()) {
            record.has_original = true;
            info!(subject = %record.id, "preserved original");
            Ok(OriginalStatus::Preserved)
        } else {
            warn!(subject = %record.id, "original did not read back after write");
            Ok(OriginalStatus::Unverified)
        }
    }

    /// Overwrite the crop baseline with `raster`.
    pub fn save_crop_baseline(
        &self,
        record: &mut SubjectRecord,
        raster: &[u8],
    ) -> Result<(), StoreError> {
        self.store.put(&crop_base_key(&record.id), raster)?;
        record.has_crop_base = true;
        debug!(subject = %record.id, size = raster.len(), "saved crop baseline");
        Ok(())
    }

    /// Forget both baselines. Used when a different picture replaces the subject's photo.
    ///
    /// Flags are cleared even if a store delete fails; the failure is logged.
    pub fn invalidate(&self, record: &mut SubjectRecord) {
        for key in [original_key(&record.id), crop_base_key(&record.id)] {
            if let Err(e) = self.store.clear(&key) {
                warn!(key, error = %e, "could not clear baseline");
            }
        }
        record.has_original = false;
        record.has_crop_base = false;
        info!(subject = %record.id, "invalidated baselines");
    }
}
