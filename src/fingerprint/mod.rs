//! Request fingerprinting.
//!
//! Derives a deterministic SHA-256 signature from the semantic fields of an
//! advice request so that logically identical requests collapse to the same
//! cache key regardless of letter case, whitespace, punctuation noise, or
//! constraint ordering.
//!
//! Verification of a client-supplied signature uses constant-time
//! comparison via the `subtle` crate to avoid timing side channels.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Separator between canonicalized fields. Fields themselves can never
/// contain it because normalization collapses all whitespace to spaces.
const FIELD_SEPARATOR: char = '\n';

/// Separator between normalized list items.
const LIST_SEPARATOR: char = '|';

/// Delimiter used by clients for the constraints list field.
const LIST_DELIMITER: char = ',';

// \p{P} alone misses symbol-class characters like `|` and `+` that POSIX
// punct covers, so both classes are stripped.
static PUNCT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{P}\p{S}]+").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// The semantic fields of one advice request, in canonical order.
///
/// `constraints` is a raw client-delimited list (comma-separated); the other
/// fields are free text. Optional fields are empty strings, never sentinel
/// markers, so signatures stay stable across client library versions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintInput {
    /// Opaque profile identifier supplied by the identity layer.
    pub profile_id: String,
    /// What the user is facing right now.
    pub situation: String,
    /// What they want to achieve.
    pub goal: String,
    /// Steps already taken or planned (free text).
    #[serde(default)]
    pub steps: String,
    /// Comma-delimited constraint list (`"time,money"`).
    #[serde(default)]
    pub constraints: String,
}

/// Normalize free text: lowercase, strip punctuation, collapse whitespace.
///
/// Two inputs differing only in case, surrounding/internal whitespace, or
/// punctuation noise normalize to the same string.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = PUNCT_RE.replace_all(&lowered, " ");
    WHITESPACE_RE.replace_all(&stripped, " ").trim().to_string()
}

/// Normalize a raw delimited list: split, normalize each item, drop empties
/// and duplicates, sort lexicographically.
///
/// Sorting is what makes item order irrelevant to the signature.
pub fn normalize_list(raw: &str) -> Vec<String> {
    let mut items: Vec<String> = raw
        .split(LIST_DELIMITER)
        .map(normalize)
        .filter(|item| !item.is_empty())
        .collect();
    items.sort();
    items.dedup();
    items
}

/// Produce the single deterministic canonical string for a request.
///
/// Scalar fields are joined in fixed order with `\n`; the constraints list
/// uses its own `|` separator so a constraint can never masquerade as a
/// neighboring field.
pub fn canonicalize(input: &FingerprintInput) -> String {
    let fields = [
        normalize(&input.profile_id),
        normalize(&input.situation),
        normalize(&input.goal),
        normalize(&input.steps),
        normalize_list(&input.constraints).join(&LIST_SEPARATOR.to_string()),
    ];
    fields.join(&FIELD_SEPARATOR.to_string())
}

/// SHA-256 hex signature (64 lowercase hex chars) of the canonical form.
pub fn sign(input: &FingerprintInput) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonicalize(input).as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify a client-presented signature against the server-derived one.
///
/// Length-checked, constant-time byte comparison. Malformed or wrong-length
/// presented values fail closed (return `false`) rather than panicking.
/// The presented value is trimmed and lowercased first: hex digests are
/// conventionally case-insensitive, and clients routinely send padded or
/// uppercase copies of a signature they stored.
pub fn verify(input: &FingerprintInput, presented: &str) -> bool {
    let expected = sign(input);
    let presented = presented.trim().to_lowercase();
    let expected_bytes = expected.as_bytes();
    let presented_bytes = presented.as_bytes();
    // ct_eq requires equal lengths, and the length of a valid signature is
    // public information anyway.
    expected_bytes.len() == presented_bytes.len()
        && bool::from(expected_bytes.ct_eq(presented_bytes))
}
