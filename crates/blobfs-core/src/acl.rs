//! Conversion between POSIX permission bits and the 9-character ACL string
//! used by the hierarchical namespace (`rwxr-x---`).
//!
//! The string is read as three `rwx` triplets (owner, group, other). Any
//! character other than `-` counts as a set bit, except the uppercase
//! setuid/sticky markers `S` and `T`, which mean the execute bit is clear.
//! Lowercase `s` and `t` mean execute is set.

use thiserror::Error;
use tracing::warn;

/// The permission bits an ACL string can express.
pub const PERMISSION_MASK: u32 = 0o777;

/// Length of a well-formed ACL string.
pub const ACL_STRING_LEN: usize = 9;

const ACL_TEMPLATE: [u8; ACL_STRING_LEN] = *b"rwxrwxrwx";

/// Reasons an ACL string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AclParseError {
    #[error("ACL string is empty")]
    Empty,

    #[error("ACL string must be {ACL_STRING_LEN} characters, got {0}")]
    InvalidLength(usize),
}

/// Renders the permission bits of `mode` as an ACL string.
///
/// Bits outside [`PERMISSION_MASK`] (file type, setuid, sticky) are ignored.
///
/// ```
/// use blobfs_core::acl::mode_to_acl_string;
///
/// assert_eq!(mode_to_acl_string(0o750), "rwxr-x---");
/// assert_eq!(mode_to_acl_string(0o100644), "rw-r--r--");
/// ```
pub fn mode_to_acl_string(mode: u32) -> String {
    ACL_TEMPLATE
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let bit = 1 << (ACL_STRING_LEN - 1 - i);
            if mode & bit != 0 { char::from(c) } else { '-' }
        })
        .collect()
}

/// Parses an ACL string back into permission bits.
///
/// ```
/// use blobfs_core::acl::{acl_string_to_mode, AclParseError};
///
/// assert_eq!(acl_string_to_mode("rwxr-x---"), Ok(0o750));
/// assert_eq!(acl_string_to_mode(""), Err(AclParseError::Empty));
/// ```
pub fn acl_string_to_mode(acl: &str) -> Result<u32, AclParseError> {
    if acl.is_empty() {
        return Err(AclParseError::Empty);
    }
    let len = acl.chars().count();
    if len != ACL_STRING_LEN {
        return Err(AclParseError::InvalidLength(len));
    }
    Ok(acl
        .chars()
        .fold(0, |mode, c| (mode << 1) | u32::from(!matches!(c, '-' | 'S' | 'T'))))
}

/// Parses an ACL string, falling back to mode 0 on malformed input.
///
/// Used on listing and property paths, where one corrupt entry must not fail
/// the whole operation.
pub fn acl_string_to_mode_or_zero(path: &str, acl: &str) -> u32 {
    match acl_string_to_mode(acl) {
        Ok(mode) => mode,
        Err(e) => {
            warn!(path, acl, error = %e, "malformed ACL string, using mode 0");
            0
        }
    }
}
