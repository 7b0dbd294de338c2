//! Decide what a proposed photo means for the subject.
//!
//! Before a new raster is accepted as a pending edit it is compared, by
//! perceptual fingerprint, with the current raster and (when one has been
//! preserved) the original:
//!
//! | Result | Meaning | Session reaction |
//! |---|---|---|
//! | [`ChangeClass::SameAsCurrent`] | nothing visible changed | no-op |
//! | [`ChangeClass::SameAsOriginal`] | the proposal is the untouched original | offer restore |
//! | [`ChangeClass::Different`] | a new picture | accept, reset transforms |
//!
//! The current comparison wins ties: a proposal matching both is
//! `SameAsCurrent`. Fingerprints are computed in parallel with `rayon::join`.

use crate::imaging::phash::{Fingerprint, HashEngine, distance};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeClass {
    SameAsCurrent,
    SameAsOriginal,
    Different,
}

/// A classification plus the distances that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub class: ChangeClass,
    /// Distance to the current raster; `u32::MAX` when there is none.
    pub to_current: u32,
    /// Distance to the preserved original, when it was consulted.
    pub to_original: Option<u32>,
}

/// Compares proposals against the subject's rasters.
#[derive(Debug, Clone, Copy)]
pub struct Classifier<'h> {
    hasher: &'h HashEngine,
}

impl<'h> Classifier<'h> {
    pub fn new(hasher: &'h HashEngine) -> Self {
        Self { hasher }
    }

    /// Classify `candidate` against `current` and, if given, `original`.
    ///
    /// Pass `original` only when the subject's original-preserved flag is
    /// set; an unflagged original is never consulted.
    pub fn classify(
        &self,
        candidate: &[u8],
        current: Option<&[u8]>,
        original: Option<&[u8]>,
    ) -> Classification {
        let fingerprint = |bytes: Option<&[u8]>| bytes.map(|b| self.hasher.fingerprint(b));
        let (candidate_fp, (current_fp, original_fp)) = rayon::join(
            || self.hasher.fingerprint(candidate),
            || rayon::join(|| fingerprint(current), || fingerprint(original)),
        );

        let to_current = measure(&candidate_fp, current_fp.as_ref());
        let to_original = original_fp.as_ref().map(|fp| distance(&candidate_fp, fp));
        let threshold = self.hasher.threshold();

        let class = if to_current <= threshold {
            ChangeClass::SameAsCurrent
        } else if to_original.is_some_and(|d| d <= threshold) {
            ChangeClass::SameAsOriginal
        } else {
            ChangeClass::Different
        };
        debug!(?class, to_current, ?to_original, "classified proposal");
        Classification {
            class,
            to_current,
            to_original,
        }
    }
}

fn measure(candidate: &Fingerprint, other: Option<&Fingerprint>) -> u32 {
    other.map_or(u32::MAX, |fp| distance(candidate, fp))
}
