//! # Portrait Kit
//!
//! The photo lifecycle behind a per-person portrait: take a camera photo,
//! make it upright and square, let the user rotate, flip, crop and fit it,
//! and keep enough history that nothing they committed is ever lost.
//!
//! # Architecture: One Subject, One Session
//!
//! Everything hangs off a [`session::Session`] editing one subject at a time.
//! Commands flow down through pure imaging code into a key-addressed store:
//!
//! ```text
//!  CLI / embedder ──▶ Session ──▶ Classifier ──▶ HashEngine
//!                        │                          │
//!                        ├──▶ TransformEngine ◀─────┤ (ResourceTracker)
//!                        │
//!                        ├──▶ History / Baselines
//!                        ▼
//!                    BinaryStore  ({id}, {id}_full, {id}_orig, {id}_cropBase)
//! ```
//!
//! Imaging functions are pure: bytes in, bytes out. The session owns all
//! state and all store I/O, so the imaging layer can be tested without a
//! store and the session can be tested with an in-memory one.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`types`] | Subject ids, records, transform flags, crop regions |
//! | [`keys`] | Store key naming for every artifact of a subject |
//! | [`store`] | The `BinaryStore` seam, an in-memory store, and a content-addressed file store |
//! | [`imaging`] | Orientation decoder, transform engine, perceptual hash, resource tracking |
//! | [`classify`] | Decides whether a proposed photo is new, unchanged, or the original |
//! | [`history`] | Undo/redo snapshots and the original/crop-baseline artifacts |
//! | [`session`] | Busy gate, cancellation, and every user-facing command |
//! | [`config`] | `portrait-kit.toml` loading, merging over stock defaults, validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Square JPEG Everywhere
//!
//! Every raster the session writes is square, at most
//! [`config::OutputConfig::max_dimension`] pixels on a side, and JPEG. One
//! shape and one format means every consumer (avatars, cards, print) can
//! take the committed bytes as they are.
//!
//! ## Keep the First Photo
//!
//! The first commit over an existing photo copies that photo to
//! `{id}_orig`, once. The copy is verified by reading it back before the
//! record's flag is set, so a failed write never claims an original exists.
//!
//! ## Perceptual, Not Byte, Equality
//!
//! Re-encoding changes bytes without changing the picture. Proposals are
//! compared by an average hash, so re-saving a photo is recognised as "the
//! same" and re-proposing the original offers a restore instead of a new
//! edit.
//!
//! ## No Queues
//!
//! A command that arrives while another is running is turned away with
//! [`session::Outcome::Busy`]. Switching subject cancels the running command
//! instead of waiting for it.

pub mod classify;
pub mod config;
pub mod history;
pub mod imaging;
pub mod keys;
pub mod output;
pub mod session;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
