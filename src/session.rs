//! The editing session: one subject's photo at a time.
//!
//! ```text
//!            open                 propose / transform
//!   Idle ──────────────▶ Open ─────────────────────────▶ Editing
//!     ▲                   ▲  ◀───── commit / reset ───────┘  │
//!     └───── close ───────┴──────── open (other subject) ◀───┘
//! ```
//!
//! A [`Session`] is shared by reference (`&self` everywhere) and may be
//! driven from several threads. Three mechanisms keep it consistent:
//!
//! - **Busy gate.** Every command except `open`/`close` first claims an
//!   atomic busy flag. A command arriving while another runs is rejected
//!   with [`Outcome::Busy`]; nothing is queued.
//! - **Cancel scope.** Opening another subject cancels the running
//!   command's scope and releases the busy flag. The cancelled command
//!   finishes its I/O but discards its result ([`Outcome::Cancelled`]).
//! - **Short state lock.** Decoding, encoding, fingerprinting and store I/O
//!   run without holding the state mutex; results are applied under it
//!   only if the scope is still live.
//!
//! State changes are published as [`SessionEvent`]s on every subscribed
//! channel.
//!
//! ## Rotation chain
//!
//! Successive rotations and flips are not applied to each other's output.
//! The session keeps the raster they started from plus the accumulated
//! flips and angle, and renders every step from that base in one pass, so
//! ten small turns cost one resampling, not ten. Returning to the identity
//! restores the base bytes untouched.

use crate::classify::{ChangeClass, Classifier};
use crate::config::EditorConfig;
use crate::history::{Baselines, History, Replacement, Snapshot, Step};
use crate::imaging::calculations::region_is_valid;
use crate::imaging::{
    HashEngine, OutputParams, ResourceTracker, TransformEngine, TransformError, TransformOp,
};
use crate::keys::{ArtifactKind, all_keys, artifact_key, display_key, full_key, original_key};
use crate::store::{BinaryStore, StoreError, lock};
use crate::types::{
    Axis, Direction, Region, SubjectId, SubjectRecord, TransformFlags, normalize_degrees,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no subject is open")]
    NoSubject,
    #[error("subject {0} has no photo")]
    NoPhoto(SubjectId),
    #[error("{0} is not in the store")]
    MissingArtifact(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("transform error: {0}")]
    Transform(#[from] TransformError),
}

impl SessionError {
    /// Short reason suitable for showing to the person editing.
    pub fn user_reason(&self) -> &'static str {
        match self {
            Self::NoSubject => "Choose a person first.",
            Self::NoPhoto(_) => "This person has no photo yet.",
            Self::MissingArtifact(_) => "There is no earlier version to go back to.",
            Self::Store(e) => e.user_reason(),
            Self::Transform(e) => e.user_reason(),
        }
    }
}

/// How a command ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The command changed the session.
    Applied,
    /// The proposal is the picture already shown.
    Unchanged,
    /// The proposal is the preserved original; restoring it is the better move.
    MatchesOriginal,
    /// Another command is running.
    Busy,
    /// The subject was switched while the command ran.
    Cancelled,
    /// Nothing to undo, redo, reset or commit.
    NothingToDo,
}

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No subject open.
    Idle,
    /// A subject is open with no pending edit.
    Open,
    /// A subject is open with a pending edit.
    Editing,
}

/// Everything a session can be asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Open(SubjectRecord),
    Close,
    /// Newly acquired photo bytes, orientation still as the camera wrote it.
    Ingest(Vec<u8>),
    /// A candidate raster from elsewhere in the app.
    ProposeEdit(Vec<u8>),
    Rotate90(Direction),
    Rotate(f32),
    Flip(Axis),
    Crop(Region),
    Fit(Region),
    Undo,
    Redo,
    Reset,
    Commit,
    Remove,
    RestoreOriginal,
    RestoreCropBaseline,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open(_) => "open",
            Self::Close => "close",
            Self::Ingest(_) => "ingest",
            Self::ProposeEdit(_) => "propose",
            Self::Rotate90(_) => "rotate90",
            Self::Rotate(_) => "rotate",
            Self::Flip(_) => "flip",
            Self::Crop(_) => "crop",
            Self::Fit(_) => "fit",
            Self::Undo => "undo",
            Self::Redo => "redo",
            Self::Reset => "reset",
            Self::Commit => "commit",
            Self::Remove => "remove",
            Self::RestoreOriginal => "restore-original",
            Self::RestoreCropBaseline => "restore-crop",
        }
    }
}

/// Published on every state change.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    BusyChanged(bool),
    PendingChanged {
        subject: SubjectId,
        pending: bool,
        flags: TransformFlags,
    },
    CommittedChanged {
        subject: SubjectId,
    },
    /// The subject record changed and should be persisted by its owner.
    RecordChanged(SubjectRecord),
}

#[derive(Debug, Default)]
struct EventBus {
    subscribers: Mutex<Vec<Sender<SessionEvent>>>,
}

impl EventBus {
    fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel();
        lock(&self.subscribers).push(tx);
        rx
    }

    /// Send to every live subscriber, dropping the ones that hung up.
    fn emit(&self, event: SessionEvent) {
        lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn extend(&self, event: Option<SessionEvent>) {
        if let Some(event) = event {
            self.emit(event);
        }
    }
}

#[derive(Debug, Clone, Default)]
struct CancelScope {
    generation: u64,
    cancelled: Arc<AtomicBool>,
}

impl CancelScope {
    fn next(&self) -> Self {
        Self {
            generation: self.generation + 1,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Held for the duration of a gated command.
struct BusyGuard<'s> {
    session: &'s Session,
    scope: CancelScope,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let scope = lock(&self.session.scope);
        // a subject switch already released the gate, possibly to someone else
        if self.scope.is_cancelled() {
            return;
        }
        self.session.busy.store(false, Ordering::SeqCst);
        drop(scope);
        self.session.events.emit(SessionEvent::BusyChanged(false));
    }
}

/// Accumulated flips and rotation over a fixed base raster.
#[derive(Debug, Clone)]
struct RotationChain {
    base: Arc<Vec<u8>>,
    /// The base is the committed raster, so identity means "no pending edit".
    base_is_committed: bool,
    flip_x: bool,
    flip_y: bool,
    degrees: f32,
}

impl RotationChain {
    fn start(base: Arc<Vec<u8>>, base_is_committed: bool) -> Self {
        Self {
            base,
            base_is_committed,
            flip_x: false,
            flip_y: false,
            degrees: 0.0,
        }
    }

    fn is_identity(&self) -> bool {
        !self.flip_x && !self.flip_y && self.degrees == 0.0
    }

    fn op(&self) -> TransformOp {
        TransformOp::Composite {
            flip_x: self.flip_x,
            flip_y: self.flip_y,
            degrees: self.degrees,
        }
    }
}

/// One rotation-chain step.
#[derive(Debug, Clone, Copy)]
enum Turn {
    Rotate(f32),
    Flip(Axis),
}

impl Turn {
    /// Advance both the chain and the subject's flags.
    ///
    /// Flips render before rotation, so a flip after a rotation mirrors the
    /// angle as well.
    fn apply(self, chain: &mut RotationChain, flags: &mut TransformFlags) {
        match self {
            Turn::Rotate(delta) => {
                chain.degrees = normalize_degrees(chain.degrees + delta);
                flags.rotate_deg = normalize_degrees(flags.rotate_deg + delta);
            }
            Turn::Flip(axis) => {
                match axis {
                    Axis::X => {
                        chain.flip_x = !chain.flip_x;
                        flags.flip_x = !flags.flip_x;
                    }
                    Axis::Y => {
                        chain.flip_y = !chain.flip_y;
                        flags.flip_y = !flags.flip_y;
                    }
                }
                chain.degrees = normalize_degrees(-chain.degrees);
                flags.rotate_deg = normalize_degrees(-flags.rotate_deg);
            }
        }
        flags.rotated = flags.rotate_deg != 0.0;
    }
}

#[derive(Debug, Default)]
struct Inner {
    record: Option<SubjectRecord>,
    committed: Option<Arc<Vec<u8>>>,
    pending: Option<Arc<Vec<u8>>>,
    replacement: Option<Replacement>,
    flags: TransformFlags,
    chain: Option<RotationChain>,
    history: History,
}

impl Inner {
    fn current(&self) -> Option<Arc<Vec<u8>>> {
        self.pending.clone().or_else(|| self.committed.clone())
    }

    fn push_history(&mut self) {
        let snapshot =
            Snapshot::new(self.pending.clone(), self.flags).replacing(self.replacement.clone());
        self.history.push(snapshot);
    }

    fn pending_event(&self) -> Option<SessionEvent> {
        self.record.as_ref().map(|record| SessionEvent::PendingChanged {
            subject: record.id.clone(),
            pending: self.pending.is_some(),
            flags: self.flags,
        })
    }
}

/// What a command reads before doing its heavy work.
struct Working {
    record: SubjectRecord,
    current: Option<Arc<Vec<u8>>>,
    has_pending: bool,
    flags: TransformFlags,
    chain: Option<RotationChain>,
    replacement: Option<Replacement>,
}

impl Working {
    /// The untouched raster of a newly proposed picture, if one is pending.
    fn proposed(&self) -> Option<Arc<Vec<u8>>> {
        self.replacement.as_ref().map(|r| Arc::clone(&r.base))
    }
}

/// A photo editing session over a [`BinaryStore`].
pub struct Session {
    store: Arc<dyn BinaryStore>,
    tracker: Arc<ResourceTracker>,
    engine: TransformEngine,
    hasher: HashEngine,
    busy: AtomicBool,
    scope: Mutex<CancelScope>,
    inner: Mutex<Inner>,
    events: EventBus,
}

impl Session {
    pub fn new(store: Arc<dyn BinaryStore>, config: &EditorConfig) -> Self {
        let tracker = Arc::new(ResourceTracker::new());
        Self {
            store,
            engine: TransformEngine::new(
                Arc::clone(&tracker),
                OutputParams::from_config(&config.output),
            ),
            hasher: HashEngine::new(Arc::clone(&tracker), config.similarity.clone()),
            tracker,
            busy: AtomicBool::new(false),
            scope: Mutex::new(CancelScope::default()),
            inner: Mutex::new(Inner::default()),
            events: EventBus::default(),
        }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn dispatch(&self, command: Command) -> Result<Outcome, SessionError> {
        debug!(command = command.name(), "dispatch");
        match command {
            Command::Open(record) => self.open(record),
            Command::Close => Ok(self.close()),
            Command::Ingest(bytes) => self.ingest(&bytes),
            Command::ProposeEdit(bytes) => self.propose_edit(&bytes),
            Command::Rotate90(direction) => self.rotate90(direction),
            Command::Rotate(degrees) => self.rotate(degrees),
            Command::Flip(axis) => self.flip(axis),
            Command::Crop(region) => self.crop(region),
            Command::Fit(region) => self.fit(region),
            Command::Undo => self.undo(),
            Command::Redo => self.redo(),
            Command::Reset => self.reset(),
            Command::Commit => self.commit(),
            Command::Remove => self.remove(),
            Command::RestoreOriginal => self.restore_original(),
            Command::RestoreCropBaseline => self.restore_crop_baseline(),
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn state(&self) -> SessionState {
        let inner = lock(&self.inner);
        match (&inner.record, &inner.pending) {
            (None, _) => SessionState::Idle,
            (Some(_), None) => SessionState::Open,
            (Some(_), Some(_)) => SessionState::Editing,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn record(&self) -> Option<SubjectRecord> {
        lock(&self.inner).record.clone()
    }

    /// Flags of the raster currently shown (pending if any, else committed).
    pub fn flags(&self) -> TransformFlags {
        lock(&self.inner).flags
    }

    pub fn pending(&self) -> Option<Arc<Vec<u8>>> {
        lock(&self.inner).pending.clone()
    }

    pub fn committed(&self) -> Option<Arc<Vec<u8>>> {
        lock(&self.inner).committed.clone()
    }

    /// `(cursor, len)` of the undo history.
    pub fn history_position(&self) -> (isize, usize) {
        let inner = lock(&self.inner);
        (inner.history.cursor(), inner.history.len())
    }

    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    pub fn hasher(&self) -> &HashEngine {
        &self.hasher
    }

    // ========================================================================
    // Subject lifecycle
    // ========================================================================

    /// Switch to `record`, abandoning whatever the previous subject had in flight.
    pub fn open(&self, record: SubjectRecord) -> Result<Outcome, SessionError> {
        let scope = self.switch_scope();
        *lock(&self.inner) = Inner::default();

        let committed = Baselines::new(self.store.as_ref()).read_committed(&record)?;
        let mut inner = lock(&self.inner);
        if scope.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }
        info!(subject = %record.id, has_photo = committed.is_some(), "opened subject");
        inner.flags = record.flags;
        inner.committed = committed.map(Arc::new);
        inner.record = Some(record);
        let event = inner.pending_event();
        drop(inner);
        self.events.extend(event);
        Ok(Outcome::Applied)
    }

    /// Return to idle, abandoning any pending edit.
    pub fn close(&self) -> Outcome {
        self.switch_scope();
        *lock(&self.inner) = Inner::default();
        debug!("closed session");
        Outcome::Applied
    }

    /// Cancel the running command, release the gate and every decoded image.
    fn switch_scope(&self) -> CancelScope {
        let mut scope = lock(&self.scope);
        scope.cancel();
        *scope = scope.next();
        let fresh = scope.clone();
        let was_busy = self.busy.swap(false, Ordering::SeqCst);
        drop(scope);
        self.tracker.release_all();
        if was_busy {
            debug!(generation = fresh.generation, "cancelled running command");
            self.events.emit(SessionEvent::BusyChanged(false));
        }
        fresh
    }

    fn begin(&self) -> Option<BusyGuard<'_>> {
        let scope = lock(&self.scope);
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("rejected command while busy");
            return None;
        }
        let guard = BusyGuard {
            session: self,
            scope: scope.clone(),
        };
        drop(scope);
        self.events.emit(SessionEvent::BusyChanged(true));
        Some(guard)
    }

    fn working(&self) -> Result<Working, SessionError> {
        let inner = lock(&self.inner);
        let record = inner.record.clone().ok_or(SessionError::NoSubject)?;
        Ok(Working {
            record,
            current: inner.current(),
            has_pending: inner.pending.is_some(),
            flags: inner.flags,
            chain: inner.chain.clone(),
            replacement: inner.replacement.clone(),
        })
    }

    /// Re-take the state lock to apply a result, unless the subject was
    /// switched while the command ran.
    fn settle(&self, guard: &BusyGuard<'_>) -> Option<MutexGuard<'_, Inner>> {
        let inner = lock(&self.inner);
        if guard.scope.is_cancelled() {
            debug!(generation = guard.scope.generation, "discarding result of cancelled command");
            return None;
        }
        Some(inner)
    }

    /// Install `record` and publish what changed.
    fn finish(
        &self,
        mut inner: MutexGuard<'_, Inner>,
        record: SubjectRecord,
        committed_changed: bool,
    ) -> Outcome {
        let record_changed = inner.record.as_ref() != Some(&record);
        let subject = record.id.clone();
        inner.record = Some(record.clone());
        let pending = inner.pending_event();
        drop(inner);
        if committed_changed {
            self.events.emit(SessionEvent::CommittedChanged { subject });
        }
        if record_changed {
            self.events.emit(SessionEvent::RecordChanged(record));
        }
        self.events.extend(pending);
        Outcome::Applied
    }

    // ========================================================================
    // Proposals
    // ========================================================================

    /// Accept newly acquired photo bytes: correct orientation, then propose.
    ///
    /// The untouched bytes are kept as the full-resolution backup, written
    /// when the proposal is committed.
    pub fn ingest(&self, source: &[u8]) -> Result<Outcome, SessionError> {
        let Some(guard) = self.begin() else {
            return Ok(Outcome::Busy);
        };
        let working = self.working()?;
        let (display, orientation) = self.engine.ingest(source)?;
        info!(
            subject = %working.record.id,
            orientation = orientation.code(),
            size = source.len(),
            "ingested photo"
        );
        self.propose_display(&guard, working, display, Some(source.to_vec()))
    }

    /// Offer a candidate raster as the subject's new picture.
    pub fn propose_edit(&self, candidate: &[u8]) -> Result<Outcome, SessionError> {
        let Some(guard) = self.begin() else {
            return Ok(Outcome::Busy);
        };
        let working = self.working()?;
        let display = self.display_form(candidate)?;
        self.propose_display(&guard, working, display, None)
    }

    fn propose_display(
        &self,
        guard: &BusyGuard<'_>,
        mut working: Working,
        display: Vec<u8>,
        full: Option<Vec<u8>>,
    ) -> Result<Outcome, SessionError> {
        let original = if working.record.has_original {
            self.store.get(&original_key(&working.record.id))?
        } else {
            None
        };
        let classification = Classifier::new(&self.hasher).classify(
            &display,
            working.current.as_deref().map(Vec::as_slice),
            original.as_deref(),
        );
        match classification.class {
            ChangeClass::SameAsCurrent => return Ok(Outcome::Unchanged),
            ChangeClass::SameAsOriginal => return Ok(Outcome::MatchesOriginal),
            ChangeClass::Different => {}
        }
        Baselines::new(self.store.as_ref()).invalidate(&mut working.record);

        let Some(mut inner) = self.settle(guard) else {
            return Ok(Outcome::Cancelled);
        };
        let display = Arc::new(display);
        inner.pending = Some(Arc::clone(&display));
        inner.replacement = Some(Replacement {
            base: display,
            full: full.map(Arc::new),
        });
        inner.flags = TransformFlags::default();
        inner.chain = None;
        inner.push_history();
        Ok(self.finish(inner, working.record, false))
    }

    /// The candidate as stored: already-conforming rasters pass through
    /// byte for byte.
    fn display_form(&self, bytes: &[u8]) -> Result<Vec<u8>, TransformError> {
        if self.engine.conforms(bytes) {
            Ok(bytes.to_vec())
        } else {
            self.engine.apply(bytes, &TransformOp::Normalize)
        }
    }

    // ========================================================================
    // Transforms
    // ========================================================================

    pub fn rotate90(&self, direction: Direction) -> Result<Outcome, SessionError> {
        self.turn(Turn::Rotate(direction.degrees()))
    }

    /// Rotate clockwise by `degrees`.
    pub fn rotate(&self, degrees: f32) -> Result<Outcome, SessionError> {
        if !degrees.is_finite() {
            return Err(TransformError::Degenerate.into());
        }
        self.turn(Turn::Rotate(degrees))
    }

    pub fn flip(&self, axis: Axis) -> Result<Outcome, SessionError> {
        self.turn(Turn::Flip(axis))
    }

    fn turn(&self, turn: Turn) -> Result<Outcome, SessionError> {
        let Some(guard) = self.begin() else {
            return Ok(Outcome::Busy);
        };
        let mut working = self.working()?;
        let Some(current) = working.current.clone() else {
            return Err(SessionError::NoPhoto(working.record.id));
        };
        let proposed = working.proposed();
        Baselines::new(self.store.as_ref())
            .ensure_original_once(&mut working.record, proposed.as_deref().map(Vec::as_slice))?;

        let mut chain = working
            .chain
            .take()
            .unwrap_or_else(|| RotationChain::start(current, !working.has_pending));
        let mut flags = working.flags;
        turn.apply(&mut chain, &mut flags);

        let pending = if chain.is_identity() {
            (!chain.base_is_committed).then(|| Arc::clone(&chain.base))
        } else {
            Some(Arc::new(self.engine.apply(&chain.base, &chain.op())?))
        };
        debug!(
            ?turn,
            degrees = chain.degrees,
            flip_x = chain.flip_x,
            flip_y = chain.flip_y,
            "turned"
        );

        let Some(mut inner) = self.settle(&guard) else {
            return Ok(Outcome::Cancelled);
        };
        if pending.is_none() {
            inner.replacement = None;
        }
        inner.pending = pending;
        inner.flags = flags;
        inner.chain = Some(chain);
        inner.push_history();
        Ok(self.finish(inner, working.record, false))
    }

    /// Keep `region` of the current raster, clamped inside it.
    pub fn crop(&self, region: Region) -> Result<Outcome, SessionError> {
        self.reframe(TransformOp::Crop(region), region)
    }

    /// Show `region` of the current raster; area past the edge is filled.
    pub fn fit(&self, region: Region) -> Result<Outcome, SessionError> {
        self.reframe(TransformOp::Fit(region), region)
    }

    fn reframe(&self, op: TransformOp, region: Region) -> Result<Outcome, SessionError> {
        if !region_is_valid(&region) {
            return Err(TransformError::InvalidRegion(format!(
                "x={} y={} size={}",
                region.x, region.y, region.size
            ))
            .into());
        }
        let Some(guard) = self.begin() else {
            return Ok(Outcome::Busy);
        };
        let mut working = self.working()?;
        let Some(current) = working.current.clone() else {
            return Err(SessionError::NoPhoto(working.record.id));
        };
        let baselines = Baselines::new(self.store.as_ref());
        let proposed = working.proposed();
        baselines
            .ensure_original_once(&mut working.record, proposed.as_deref().map(Vec::as_slice))?;
        baselines.save_crop_baseline(&mut working.record, &current)?;
        let result = self.engine.apply(&current, &op)?;

        let Some(mut inner) = self.settle(&guard) else {
            return Ok(Outcome::Cancelled);
        };
        inner.pending = Some(Arc::new(result));
        match op {
            TransformOp::Fit(_) => inner.flags.fitted = true,
            _ => inner.flags.cropped = true,
        }
        inner.chain = None;
        inner.push_history();
        Ok(self.finish(inner, working.record, false))
    }

    // ========================================================================
    // History
    // ========================================================================

    pub fn undo(&self) -> Result<Outcome, SessionError> {
        let Some(guard) = self.begin() else {
            return Ok(Outcome::Busy);
        };
        let Some(mut inner) = self.settle(&guard) else {
            return Ok(Outcome::Cancelled);
        };
        let committed_flags = inner.record.as_ref().ok_or(SessionError::NoSubject)?.flags;
        let target = match inner.history.back() {
            Step::Snapshot(snapshot) => Some(snapshot.clone()),
            Step::Start => None,
            Step::None => return Ok(Outcome::NothingToDo),
        };
        match target.or_else(|| inner.history.start().cloned()) {
            Some(snapshot) => restore_snapshot(&mut inner, snapshot),
            None => {
                inner.pending = None;
                inner.replacement = None;
                inner.flags = committed_flags;
                inner.chain = None;
            }
        }
        let event = inner.pending_event();
        drop(inner);
        self.events.extend(event);
        Ok(Outcome::Applied)
    }

    pub fn redo(&self) -> Result<Outcome, SessionError> {
        let Some(guard) = self.begin() else {
            return Ok(Outcome::Busy);
        };
        let Some(mut inner) = self.settle(&guard) else {
            return Ok(Outcome::Cancelled);
        };
        if inner.record.is_none() {
            return Err(SessionError::NoSubject);
        }
        let Some(snapshot) = inner.history.forward().cloned() else {
            return Ok(Outcome::NothingToDo);
        };
        restore_snapshot(&mut inner, snapshot);
        let event = inner.pending_event();
        drop(inner);
        self.events.extend(event);
        Ok(Outcome::Applied)
    }

    /// Drop the pending edit and show the committed state again.
    ///
    /// Snapshots are kept; the cursor returns to the committed step.
    pub fn reset(&self) -> Result<Outcome, SessionError> {
        let Some(guard) = self.begin() else {
            return Ok(Outcome::Busy);
        };
        let Some(mut inner) = self.settle(&guard) else {
            return Ok(Outcome::Cancelled);
        };
        let committed_flags = inner.record.as_ref().ok_or(SessionError::NoSubject)?.flags;
        if inner.pending.is_none() && inner.flags == committed_flags && inner.chain.is_none() {
            return Ok(Outcome::NothingToDo);
        }
        inner.pending = None;
        inner.replacement = None;
        inner.flags = committed_flags;
        inner.chain = None;
        inner.history.rewind();
        let event = inner.pending_event();
        drop(inner);
        self.events.extend(event);
        Ok(Outcome::Applied)
    }

    // ========================================================================
    // Store-changing commands
    // ========================================================================

    /// Make the pending edit the committed raster.
    ///
    /// A refused write leaves the pending edit in place. When the pending
    /// raster descends from an ingested picture, its bytes become the
    /// full-resolution backup. History is re-based so undo still reaches the
    /// raster this commit replaced.
    pub fn commit(&self) -> Result<Outcome, SessionError> {
        let Some(guard) = self.begin() else {
            return Ok(Outcome::Busy);
        };
        let working = self.working()?;
        let Some(pending) = working.current.filter(|_| working.has_pending) else {
            return Ok(Outcome::NothingToDo);
        };
        if guard.scope.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }
        let mut record = working.record;
        self.store.put(&display_key(&record.id), &pending)?;

        if let Some(full) = working.replacement.as_ref().and_then(|r| r.full.as_ref()) {
            if let Err(e) = self.store.put(&full_key(&record.id), full) {
                warn!(subject = %record.id, error = %e, "full-resolution backup not kept");
            }
        }
        record.flags = working.flags;
        info!(subject = %record.id, size = pending.len(), "committed photo");

        let Some(mut inner) = self.settle(&guard) else {
            return Ok(Outcome::Cancelled);
        };
        let outgoing = inner.committed.replace(pending);
        let outgoing_flags = inner.record.as_ref().map(|r| r.flags).unwrap_or_default();
        inner.history.rebase(outgoing, outgoing_flags);
        inner.pending = None;
        inner.replacement = None;
        if let Some(chain) = inner.chain.as_mut() {
            chain.base_is_committed = false;
        }
        Ok(self.finish(inner, record, true))
    }

    /// Delete every artifact of the subject.
    pub fn remove(&self) -> Result<Outcome, SessionError> {
        let Some(guard) = self.begin() else {
            return Ok(Outcome::Busy);
        };
        let mut record = self.working()?.record;
        for key in all_keys(&record) {
            self.store.clear(&key)?;
        }
        record.has_original = false;
        record.has_crop_base = false;
        record.flags = TransformFlags::default();
        info!(subject = %record.id, "removed photo");

        let Some(mut inner) = self.settle(&guard) else {
            return Ok(Outcome::Cancelled);
        };
        inner.committed = None;
        inner.pending = None;
        inner.replacement = None;
        inner.flags = TransformFlags::default();
        inner.chain = None;
        inner.history.clear();
        Ok(self.finish(inner, record, true))
    }

    /// Replace the committed raster with the preserved original.
    pub fn restore_original(&self) -> Result<Outcome, SessionError> {
        self.restore(ArtifactKind::Original)
    }

    /// Replace the committed raster with the raster from before the last crop or fit.
    pub fn restore_crop_baseline(&self) -> Result<Outcome, SessionError> {
        self.restore(ArtifactKind::CropBase)
    }

    fn restore(&self, kind: ArtifactKind) -> Result<Outcome, SessionError> {
        let Some(guard) = self.begin() else {
            return Ok(Outcome::Busy);
        };
        let mut record = self.working()?.record;
        let key = artifact_key(&record.id, kind);
        let Some(bytes) = self.store.get(&key)? else {
            return Err(SessionError::MissingArtifact(key));
        };
        let display = self.display_form(&bytes)?;
        self.store.put(&display_key(&record.id), &display)?;
        match kind {
            ArtifactKind::CropBase => record.flags.clear_crop(),
            _ => record.flags = TransformFlags::default(),
        }
        info!(subject = %record.id, key, "restored photo");

        let Some(mut inner) = self.settle(&guard) else {
            return Ok(Outcome::Cancelled);
        };
        inner.committed = Some(Arc::new(display));
        inner.pending = None;
        inner.replacement = None;
        inner.flags = record.flags;
        inner.chain = None;
        inner.history.clear();
        Ok(self.finish(inner, record, true))
    }
}

/// Show `snapshot`. A snapshot of the committed raster leaves nothing pending.
fn restore_snapshot(inner: &mut Inner, snapshot: Snapshot) {
    let shows_committed = match (&snapshot.pending, &inner.committed) {
        (Some(pending), Some(committed)) => Arc::ptr_eq(pending, committed),
        _ => false,
    };
    if shows_committed {
        inner.pending = None;
        inner.replacement = None;
    } else {
        inner.pending = snapshot.pending;
        inner.replacement = snapshot.replacement;
    }
    inner.flags = snapshot.flags;
    inner.chain = None;
}
