//! Key layout and classification.
//!
//! Every replica stores four entity families under fixed prefixes. Raw
//! content lives under `blobs/` addressed by its composite checksum;
//! files, bundles, and collections are JSON manifests addressed by
//! `{uuid}.{version}`.

/// Prefix for raw blob content.
pub const BLOB_PREFIX: &str = "blobs/";
/// Prefix for file manifests.
pub const FILE_PREFIX: &str = "files/";
/// Prefix for bundle manifests.
pub const BUNDLE_PREFIX: &str = "bundles/";
/// Prefix for collection manifests.
pub const COLLECTION_PREFIX: &str = "collections/";

/// Entity family a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    /// Raw blob content (`blobs/{blob_key}`).
    Blob,
    /// File manifest (`files/{uuid}.{version}`).
    File,
    /// Bundle manifest (`bundles/{uuid}.{version}`).
    Bundle,
    /// Collection manifest (`collections/{uuid}.{version}`).
    Collection,
    /// Anything else (internal bookkeeping, unknown layouts).
    Other,
}

impl KeyClass {
    /// Classify a key by its entity prefix.
    pub fn of(key: &str) -> Self {
        if key.starts_with(BLOB_PREFIX) {
            KeyClass::Blob
        } else if key.starts_with(FILE_PREFIX) {
            KeyClass::File
        } else if key.starts_with(BUNDLE_PREFIX) {
            KeyClass::Bundle
        } else if key.starts_with(COLLECTION_PREFIX) {
            KeyClass::Collection
        } else {
            KeyClass::Other
        }
    }

    /// True for manifest families whose references must exist at the
    /// destination before the manifest itself is copied.
    pub fn has_dependencies(&self) -> bool {
        matches!(self, KeyClass::File | KeyClass::Bundle | KeyClass::Collection)
    }
}

/// Full key for a blob addressed by `blob_key`.
pub fn blob_key_for(blob_key: &str) -> String {
    format!("{}{}", BLOB_PREFIX, blob_key)
}

/// Full key for the manifest of file `uuid` at `version`.
pub fn file_key_for(uuid: &str, version: &str) -> String {
    format!("{}{}.{}", FILE_PREFIX, uuid, version)
}

/// Full key for the manifest of bundle `uuid` at `version`.
pub fn bundle_key_for(uuid: &str, version: &str) -> String {
    format!("{}{}.{}", BUNDLE_PREFIX, uuid, version)
}

/// Full key for the manifest of collection `uuid` at `version`.
pub fn collection_key_for(uuid: &str, version: &str) -> String {
    format!("{}{}.{}", COLLECTION_PREFIX, uuid, version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(KeyClass::of("blobs/aa.bb.cc.dd"), KeyClass::Blob);
        assert_eq!(KeyClass::of("files/uuid.2026-01-01T000000Z"), KeyClass::File);
        assert_eq!(KeyClass::of("bundles/uuid.v1"), KeyClass::Bundle);
        assert_eq!(KeyClass::of("collections/uuid.v1"), KeyClass::Collection);
        assert_eq!(KeyClass::of("checkout/session/x"), KeyClass::Other);
    }

    #[test]
    fn test_dependency_classes() {
        assert!(!KeyClass::Blob.has_dependencies());
        assert!(KeyClass::File.has_dependencies());
        assert!(KeyClass::Bundle.has_dependencies());
        assert!(KeyClass::Collection.has_dependencies());
    }

    #[test]
    fn test_key_builders() {
        assert_eq!(blob_key_for("a.b.c.d"), "blobs/a.b.c.d");
        assert_eq!(file_key_for("u", "v"), "files/u.v");
        assert_eq!(bundle_key_for("u", "v"), "bundles/u.v");
        assert_eq!(collection_key_for("u", "v"), "collections/u.v");
    }
}
