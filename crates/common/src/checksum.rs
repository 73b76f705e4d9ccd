//! Checksum utilities.
//!
//! Blob content is addressed by the concatenation of four checksums, and
//! multipart copies are verified end-to-end with an S3-style composite ETag:
//! the MD5 of the concatenated raw part digests, suffixed with `-{count}`.

use serde::{Deserialize, Serialize};

use crate::error::ChecksumError;

/// The four mandatory checksums recorded for every file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumSet {
    /// SHA-256 hex digest.
    pub sha256: String,
    /// SHA-1 hex digest.
    pub sha1: String,
    /// Provider ETag (MD5 hex, or composite MD5 for multipart uploads).
    #[serde(rename = "s3-etag")]
    pub s3_etag: String,
    /// CRC32C hex digest.
    pub crc32c: String,
}

impl ChecksumSet {
    /// Derive the content-address for this checksum set.
    ///
    /// Two files with identical content resolve to the same blob key, so
    /// blob storage is deduplicated across files and bundles.
    ///
    /// # Returns
    /// `"{sha256}.{sha1}.{s3_etag}.{crc32c}"`, lower-cased.
    pub fn blob_key(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.sha256, self.sha1, self.s3_etag, self.crc32c
        )
        .to_lowercase()
    }

    /// Parse a blob key back into its four checksums.
    ///
    /// # Errors
    /// Returns `ChecksumError::InvalidBlobKey` if the key does not have
    /// exactly four dot-separated components.
    pub fn from_blob_key(key: &str) -> Result<Self, ChecksumError> {
        let fields: Vec<&str> = key.split('.').collect();
        match fields.as_slice() {
            [sha256, sha1, s3_etag, crc32c]
                if fields.iter().all(|f| !f.is_empty()) =>
            {
                Ok(Self {
                    sha256: sha256.to_lowercase(),
                    sha1: sha1.to_lowercase(),
                    s3_etag: s3_etag.to_lowercase(),
                    crc32c: crc32c.to_lowercase(),
                })
            }
            _ => Err(ChecksumError::InvalidBlobKey {
                key: key.to_string(),
            }),
        }
    }
}

/// Strip surrounding quotes from a provider ETag.
///
/// S3 returns ETags wrapped in double quotes; comparisons and digest
/// decoding work on the bare value.
pub fn normalize_etag(etag: &str) -> &str {
    etag.trim_matches('"')
}

/// Compute the S3-style composite ETag over an ordered list of part ETags.
///
/// Each part ETag is decoded from hex to its raw 128-bit digest, the
/// digests are concatenated in part order, the concatenation is MD5'd, and
/// the part count is appended: `"{md5hex}-{count}"`.
///
/// # Errors
/// Returns `ChecksumError::InvalidEtag` for a part ETag that is not a
/// 32-character hex digest, or `ChecksumError::NoParts` for an empty list.
pub fn compute_composite_etag<S: AsRef<str>>(part_etags: &[S]) -> Result<String, ChecksumError> {
    if part_etags.is_empty() {
        return Err(ChecksumError::NoParts);
    }

    let mut concatenated: Vec<u8> = Vec::with_capacity(part_etags.len() * 16);
    for etag in part_etags {
        let bare: &str = normalize_etag(etag.as_ref());
        concatenated.extend_from_slice(&decode_md5_hex(bare)?);
    }

    let digest = md5::compute(&concatenated);
    Ok(format!("{:x}-{}", digest, part_etags.len()))
}

/// Part count encoded in a composite multipart ETag.
///
/// # Returns
/// `Some(count)` for `"{md5hex}-{count}"` forms, `None` for plain
/// single-put ETags.
pub fn multipart_part_count(etag: &str) -> Option<u64> {
    let bare: &str = normalize_etag(etag);
    let (_, suffix) = bare.split_once('-')?;
    suffix.parse().ok()
}

/// Decode a 32-character hex MD5 digest into its 16 raw bytes.
fn decode_md5_hex(hex: &str) -> Result<[u8; 16], ChecksumError> {
    if hex.len() != 32 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ChecksumError::InvalidEtag {
            etag: hex.to_string(),
        });
    }

    let mut bytes = [0u8; 16];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| {
            ChecksumError::InvalidEtag {
                etag: hex.to_string(),
            }
        })?;
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_key_is_lowercase_concatenation() {
        let set = ChecksumSet {
            sha256: "AABB".into(),
            sha1: "ccdd".into(),
            s3_etag: "EEFF".into(),
            crc32c: "0011".into(),
        };
        assert_eq!(set.blob_key(), "aabb.ccdd.eeff.0011");
    }

    #[test]
    fn test_blob_key_round_trip() {
        let set = ChecksumSet {
            sha256: "aabb".into(),
            sha1: "ccdd".into(),
            s3_etag: "eeff".into(),
            crc32c: "0011".into(),
        };
        let parsed = ChecksumSet::from_blob_key(&set.blob_key()).unwrap();
        assert_eq!(parsed, set);
    }

    #[test]
    fn test_from_blob_key_rejects_malformed() {
        assert!(ChecksumSet::from_blob_key("only.three.fields").is_err());
        assert!(ChecksumSet::from_blob_key("a.b.c.d.e").is_err());
        assert!(ChecksumSet::from_blob_key("a..c.d").is_err());
    }

    #[test]
    fn test_normalize_etag() {
        assert_eq!(normalize_etag("\"abc123\""), "abc123");
        assert_eq!(normalize_etag("abc123"), "abc123");
    }

    #[test]
    fn test_composite_etag_single_part() {
        // MD5 of the raw digest of MD5("") is a fixed value.
        let empty_md5: String = format!("{:x}", md5::compute(b""));
        let composite: String = compute_composite_etag(&[empty_md5.clone()]).unwrap();
        assert!(composite.ends_with("-1"));

        // Recompute by hand.
        let raw: Vec<u8> = md5::compute(b"").0.to_vec();
        let expected = format!("{:x}-1", md5::compute(&raw));
        assert_eq!(composite, expected);
    }

    #[test]
    fn test_composite_etag_is_order_sensitive() {
        let a = format!("{:x}", md5::compute(b"part-a"));
        let b = format!("{:x}", md5::compute(b"part-b"));
        let ab = compute_composite_etag(&[a.clone(), b.clone()]).unwrap();
        let ba = compute_composite_etag(&[b, a]).unwrap();
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_composite_etag_accepts_quoted_parts() {
        let a = format!("{:x}", md5::compute(b"part-a"));
        let quoted = format!("\"{}\"", a);
        assert_eq!(
            compute_composite_etag(&[a]).unwrap(),
            compute_composite_etag(&[quoted]).unwrap()
        );
    }

    #[test]
    fn test_multipart_part_count() {
        assert_eq!(multipart_part_count("abc-12"), Some(12));
        assert_eq!(multipart_part_count("\"abc-3\""), Some(3));
        assert_eq!(multipart_part_count("abc"), None);
        assert_eq!(multipart_part_count("abc-"), None);
    }

    #[test]
    fn test_composite_etag_rejects_bad_input() {
        assert_eq!(
            compute_composite_etag::<&str>(&[]),
            Err(ChecksumError::NoParts)
        );
        assert!(compute_composite_etag(&["not-hex"]).is_err());
        assert!(compute_composite_etag(&["abcd"]).is_err());
    }
}
