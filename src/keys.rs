//! Store key derivation for a subject's photo artifacts.
//!
//! Every artifact lives under a key derived from the subject id:
//!
//! | Key | Artifact |
//! |---|---|
//! | `{id}` | committed display raster |
//! | `{id}_full` | full-resolution backup of the ingested bytes |
//! | `{id}_orig` | original snapshot (first raster ever recorded) |
//! | `{id}_cropBase` | crop baseline (raster before the latest crop) |
//! | `legacy:{family}/{path}` | display raster of a record migrated from the path-keyed layout |
//!
//! Keys are plain strings so any key-addressed binary store can hold them.

use crate::types::{SubjectId, SubjectRecord};

const FULL_SUFFIX: &str = "_full";
const ORIGINAL_SUFFIX: &str = "_orig";
const CROP_BASE_SUFFIX: &str = "_cropBase";
const LEGACY_PREFIX: &str = "legacy:";

/// Which artifact of a subject a key addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Display,
    Full,
    Original,
    CropBase,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Display,
        ArtifactKind::Full,
        ArtifactKind::Original,
        ArtifactKind::CropBase,
    ];

    fn suffix(self) -> &'static str {
        match self {
            Self::Display => "",
            Self::Full => FULL_SUFFIX,
            Self::Original => ORIGINAL_SUFFIX,
            Self::CropBase => CROP_BASE_SUFFIX,
        }
    }
}

/// Derive the key of one artifact.
pub fn artifact_key(id: &SubjectId, kind: ArtifactKind) -> String {
    format!("{}{}", id.as_str(), kind.suffix())
}

pub fn display_key(id: &SubjectId) -> String {
    artifact_key(id, ArtifactKind::Display)
}

pub fn full_key(id: &SubjectId) -> String {
    artifact_key(id, ArtifactKind::Full)
}

pub fn original_key(id: &SubjectId) -> String {
    artifact_key(id, ArtifactKind::Original)
}

pub fn crop_base_key(id: &SubjectId) -> String {
    artifact_key(id, ArtifactKind::CropBase)
}

/// Legacy key for records migrated from the family+path layout.
///
/// Returns `None` unless the record carries both a family and a path.
pub fn legacy_key(record: &SubjectRecord) -> Option<String> {
    let family = record.family.as_deref().filter(|f| !f.is_empty())?;
    let path = record.path.as_deref().filter(|p| !p.is_empty())?;
    Some(format!("{LEGACY_PREFIX}{family}/{path}"))
}

/// Every key that may hold an artifact of this subject, legacy included.
pub fn all_keys(record: &SubjectRecord) -> Vec<String> {
    let mut keys: Vec<String> = ArtifactKind::ALL
        .iter()
        .map(|&kind| artifact_key(&record.id, kind))
        .collect();
    keys.extend(legacy_key(record));
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_suffixed_keys() {
        let id = SubjectId::new("p-42");
        assert_eq!(display_key(&id), "p-42");
        assert_eq!(full_key(&id), "p-42_full");
        assert_eq!(original_key(&id), "p-42_orig");
        assert_eq!(crop_base_key(&id), "p-42_cropBase");
    }

    #[test]
    fn legacy_key_requires_family_and_path() {
        assert_eq!(legacy_key(&SubjectRecord::new("p-1")), None);

        let mut record = SubjectRecord::legacy("p-1", "smith", "0/2");
        assert_eq!(legacy_key(&record).as_deref(), Some("legacy:smith/0/2"));

        record.path = Some(String::new());
        assert_eq!(legacy_key(&record), None);
    }

    #[test]
    fn all_keys_includes_legacy_when_present() {
        let keys = all_keys(&SubjectRecord::legacy("p-1", "smith", "0"));
        assert_eq!(
            keys,
            vec![
                "p-1",
                "p-1_full",
                "p-1_orig",
                "p-1_cropBase",
                "legacy:smith/0"
            ]
        );
        assert_eq!(all_keys(&SubjectRecord::new("p-1")).len(), 4);
    }
}
