//! CLI output formatting.
//!
//! # Subject-First Display
//!
//! Every block leads with the subject id; store keys, fingerprints and
//! distances follow as indented context lines. The same helpers render a
//! record after any command, so `rotate`, `crop` and `restore-original`
//! output look alike for the same subject.
//!
//! # Output Format
//!
//! ## Commands
//!
//! ```text
//! p-17: rotate applied
//!     Original: preserved
//!     Crop baseline: none
//!     Transforms: rotated 90°
//! ```
//!
//! ## Events (with `--verbose`)
//!
//! ```text
//!     busy
//!     pending edit for p-17: rotated 90°
//!     committed p-17
//!     idle
//! ```
//!
//! ## Similarity
//!
//! ```text
//! portrait.jpg
//!     Orientation: 6 (rotate 90° clockwise)
//!     Fingerprint: f0f0f0f0f0f0f0f0
//!
//! a.jpg ↔ b.jpg
//!     Distance: 2 of 64 bits
//!     Verdict: same picture (threshold 4)
//! ```
//!
//! # Architecture
//!
//! Each display has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format functions
//! are pure: no I/O, no side effects.

use crate::imaging::Orientation;
use crate::imaging::phash::Fingerprint;
use crate::session::{Outcome, SessionEvent};
use crate::types::{SubjectRecord, TransformFlags};
use std::path::Path;

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Human description of transform flags, `"none"` for the identity.
///
/// ```text
/// rotated 90°, flipped horizontally, cropped
/// ```
pub fn format_flags(flags: &TransformFlags) -> String {
    let mut parts = Vec::new();
    if flags.rotated {
        parts.push(format!("rotated {}°", flags.rotate_deg));
    }
    if flags.flip_x {
        parts.push("flipped horizontally".to_string());
    }
    if flags.flip_y {
        parts.push("flipped vertically".to_string());
    }
    if flags.cropped {
        parts.push("cropped".to_string());
    }
    if flags.fitted {
        parts.push("fitted".to_string());
    }
    if parts.is_empty() {
        "none".to_string()
    } else {
        parts.join(", ")
    }
}

/// One-word-ish description of how a command ended.
pub fn outcome_label(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Applied => "applied",
        Outcome::Unchanged => "unchanged, same picture as now",
        Outcome::MatchesOriginal => "matches the preserved original, use restore-original",
        Outcome::Busy => "busy, another edit is still running",
        Outcome::Cancelled => "cancelled, the subject was switched",
        Outcome::NothingToDo => "nothing to do",
    }
}

// ============================================================================
// Records
// ============================================================================

/// Format a subject record: id header plus baseline and transform lines.
pub fn format_record(record: &SubjectRecord) -> Vec<String> {
    let mut lines = vec![record.id.to_string()];
    push_record_context(&mut lines, record);
    lines
}

fn push_record_context(lines: &mut Vec<String>, record: &SubjectRecord) {
    let original = if record.has_original {
        "preserved"
    } else {
        "none"
    };
    let crop_base = if record.has_crop_base {
        "saved"
    } else {
        "none"
    };
    lines.push(format!("{}Original: {}", indent(1), original));
    lines.push(format!("{}Crop baseline: {}", indent(1), crop_base));
    lines.push(format!(
        "{}Transforms: {}",
        indent(1),
        format_flags(&record.flags)
    ));
    if let (Some(family), Some(path)) = (&record.family, &record.path) {
        lines.push(format!("{}Legacy: {}/{}", indent(1), family, path));
    }
}

/// Format the result of one CLI command on a subject.
pub fn format_command_result(
    record: &SubjectRecord,
    command: &str,
    outcome: &Outcome,
) -> Vec<String> {
    let mut lines = vec![format!(
        "{}: {} {}",
        record.id,
        command,
        outcome_label(outcome)
    )];
    push_record_context(&mut lines, record);
    lines
}

pub fn print_command_result(record: &SubjectRecord, command: &str, outcome: &Outcome) {
    for line in format_command_result(record, command, outcome) {
        println!("{}", line);
    }
}

// ============================================================================
// Events
// ============================================================================

/// Format a session event as display lines.
pub fn format_event(event: &SessionEvent) -> Vec<String> {
    let line = match event {
        SessionEvent::BusyChanged(true) => "busy".to_string(),
        SessionEvent::BusyChanged(false) => "idle".to_string(),
        SessionEvent::PendingChanged {
            subject,
            pending: true,
            flags,
        } => format!("pending edit for {}: {}", subject, format_flags(flags)),
        SessionEvent::PendingChanged {
            subject,
            pending: false,
            ..
        } => format!("no pending edit for {}", subject),
        SessionEvent::CommittedChanged { subject } => format!("committed {}", subject),
        SessionEvent::RecordChanged(record) => format!("record {} updated", record.id),
    };
    vec![format!("{}{}", indent(1), line)]
}

// ============================================================================
// Similarity
// ============================================================================

fn orientation_label(orientation: Orientation) -> &'static str {
    match orientation {
        Orientation::Identity => "upright",
        Orientation::FlipH => "mirror horizontally",
        Orientation::Rotate180 => "rotate 180°",
        Orientation::FlipV => "mirror vertically",
        Orientation::Transpose => "reflect across main diagonal",
        Orientation::Rotate90 => "rotate 90° clockwise",
        Orientation::Transverse => "reflect across anti-diagonal",
        Orientation::Rotate270 => "rotate 90° counter-clockwise",
    }
}

pub fn format_orientation(path: &Path, orientation: Orientation) -> Vec<String> {
    vec![
        file_label(path),
        format!(
            "{}Orientation: {} ({})",
            indent(1),
            orientation.code(),
            orientation_label(orientation)
        ),
    ]
}

pub fn print_orientation(path: &Path, orientation: Orientation) {
    for line in format_orientation(path, orientation) {
        println!("{}", line);
    }
}

/// Format a fingerprint report for one file.
pub fn format_fingerprint(
    path: &Path,
    orientation: Orientation,
    fingerprint: &Fingerprint,
) -> Vec<String> {
    let mut lines = format_orientation(path, orientation);
    if fingerprint.is_empty() {
        lines.push(format!("{}Fingerprint: unreadable", indent(1)));
    } else {
        lines.push(format!(
            "{}Fingerprint: {}",
            indent(1),
            fingerprint.to_hex()
        ));
    }
    lines
}

pub fn print_fingerprint(path: &Path, orientation: Orientation, fingerprint: &Fingerprint) {
    for line in format_fingerprint(path, orientation, fingerprint) {
        println!("{}", line);
    }
}

/// Format the comparison of two files' fingerprints.
pub fn format_comparison(
    a: &Path,
    b: &Path,
    distance: u32,
    bits: usize,
    threshold: u32,
) -> Vec<String> {
    let header = format!("{} \u{2194} {}", file_label(a), file_label(b));
    if distance == u32::MAX {
        return vec![
            header,
            format!("{}Distance: not comparable", indent(1)),
            format!("{}Verdict: different pictures", indent(1)),
        ];
    }
    let verdict = if distance <= threshold {
        "same picture"
    } else {
        "different pictures"
    };
    vec![
        header,
        format!("{}Distance: {} of {} bits", indent(1), distance, bits),
        format!(
            "{}Verdict: {} (threshold {})",
            indent(1),
            verdict,
            threshold
        ),
    ]
}

pub fn print_comparison(a: &Path, b: &Path, distance: u32, bits: usize, threshold: u32) {
    for line in format_comparison(a, b, distance, bits, threshold) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SubjectId;

    #[test]
    fn indent_levels() {
        assert_eq!(indent(0), "");
        assert_eq!(indent(2), "        ");
    }

    #[test]
    fn flags_identity_is_none() {
        assert_eq!(format_flags(&TransformFlags::default()), "none");
    }

    #[test]
    fn flags_list_in_fixed_order() {
        let flags = TransformFlags {
            rotated: true,
            rotate_deg: 90.0,
            flip_x: true,
            cropped: true,
            ..Default::default()
        };
        assert_eq!(
            format_flags(&flags),
            "rotated 90°, flipped horizontally, cropped"
        );
    }

    #[test]
    fn record_block() {
        let mut record = SubjectRecord::new("p-17");
        record.has_original = true;
        let lines = format_record(&record);
        assert_eq!(
            lines,
            vec![
                "p-17",
                "    Original: preserved",
                "    Crop baseline: none",
                "    Transforms: none",
            ]
        );
    }

    #[test]
    fn legacy_record_shows_location() {
        let record = SubjectRecord::legacy("p-1", "fam", "a/b.jpg");
        let lines = format_record(&record);
        assert_eq!(lines.last().unwrap(), "    Legacy: fam/a/b.jpg");
    }

    #[test]
    fn command_result_header() {
        let record = SubjectRecord::new("p-3");
        let lines = format_command_result(&record, "rotate", &Outcome::Busy);
        assert_eq!(lines[0], "p-3: rotate busy, another edit is still running");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn events_render_one_line_each() {
        let subject = SubjectId::new("p-9");
        assert_eq!(
            format_event(&SessionEvent::BusyChanged(true)),
            vec!["    busy"]
        );
        assert_eq!(
            format_event(&SessionEvent::PendingChanged {
                subject: subject.clone(),
                pending: true,
                flags: TransformFlags {
                    flip_y: true,
                    ..Default::default()
                },
            }),
            vec!["    pending edit for p-9: flipped vertically"]
        );
        assert_eq!(
            format_event(&SessionEvent::CommittedChanged { subject }),
            vec!["    committed p-9"]
        );
    }

    #[test]
    fn orientation_line() {
        let lines = format_orientation(Path::new("/tmp/x/portrait.jpg"), Orientation::Rotate90);
        assert_eq!(
            lines,
            vec!["portrait.jpg", "    Orientation: 6 (rotate 90° clockwise)"]
        );
    }

    #[test]
    fn fingerprint_report() {
        let fp = Fingerprint::from_bits(vec![true, true, true, true, false, false, false, false]);
        let lines = format_fingerprint(Path::new("a.jpg"), Orientation::Identity, &fp);
        assert_eq!(lines[2], "    Fingerprint: f0");

        let lines = format_fingerprint(
            Path::new("a.jpg"),
            Orientation::Identity,
            &Fingerprint::empty(),
        );
        assert_eq!(lines[2], "    Fingerprint: unreadable");
    }

    #[test]
    fn comparison_verdicts() {
        let same = format_comparison(Path::new("a.jpg"), Path::new("b.jpg"), 2, 64, 4);
        assert_eq!(same[0], "a.jpg \u{2194} b.jpg");
        assert_eq!(same[1], "    Distance: 2 of 64 bits");
        assert_eq!(same[2], "    Verdict: same picture (threshold 4)");

        let different = format_comparison(Path::new("a.jpg"), Path::new("b.jpg"), 30, 64, 4);
        assert_eq!(different[2], "    Verdict: different pictures (threshold 4)");

        let broken = format_comparison(Path::new("a.jpg"), Path::new("b.jpg"), u32::MAX, 0, 4);
        assert_eq!(broken[1], "    Distance: not comparable");
    }
}
