//! User-data payload handed to every launched instance.
//!
//! EC2 expects user data as base64 text. The file is read as raw bytes and
//! must be valid UTF-8; a script beginning with an interpreter line is run
//! as root at first boot by stock images.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use camino::Utf8Path;
use thiserror::Error;

use crate::files;

/// Errors raised while preparing user data. Always fatal and always raised
/// before anything is submitted.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum EncodingError {
    /// Raised when the user-data file is missing or unreadable.
    #[error("user data file '{path}' could not be read: {message}")]
    Unreadable {
        /// Path of the user-data file.
        path: String,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the payload is not UTF-8 text.
    #[error("user data in '{origin}' is not valid UTF-8 text: {message}")]
    NotText {
        /// Where the payload came from.
        origin: String,
        /// Decoder error message.
        message: String,
    },
}

/// Base64-encoded user data ready for the provider payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UserData {
    encoded: String,
    raw_len: usize,
}

impl UserData {
    /// Reads and encodes the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::Unreadable`] when the file cannot be read and
    /// [`EncodingError::NotText`] when it is not UTF-8.
    pub fn load(path: &Utf8Path) -> Result<Self, EncodingError> {
        let bytes = files::read_bytes(path).map_err(|err| EncodingError::Unreadable {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        Self::from_bytes(path.as_str(), &bytes)
    }

    /// Encodes an in-memory payload. `origin` names the source in errors.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::NotText`] when `bytes` is not UTF-8.
    pub fn from_bytes(origin: &str, bytes: &[u8]) -> Result<Self, EncodingError> {
        let text = std::str::from_utf8(bytes).map_err(|err| EncodingError::NotText {
            origin: origin.to_owned(),
            message: err.to_string(),
        })?;
        Ok(Self {
            encoded: STANDARD.encode(text.as_bytes()),
            raw_len: bytes.len(),
        })
    }

    /// Returns the base64 form sent to the provider.
    #[must_use]
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// Returns the size of the payload before encoding.
    #[must_use]
    pub const fn raw_len(&self) -> usize {
        self.raw_len
    }

    /// Whether the payload exceeds `limit` bytes, a size known to leave spot
    /// requests stuck without an error.
    #[must_use]
    pub fn exceeds(&self, limit: u64) -> bool {
        u64::try_from(self.raw_len).map_or(true, |len| len > limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    fn encodes_text_as_base64() {
        let data = UserData::from_bytes("inline", b"#!/bin/bash\necho hi\n").expect("text");
        assert_eq!(data.encoded(), "IyEvYmluL2Jhc2gKZWNobyBoaQo=");
        assert_eq!(data.raw_len(), 20);
    }

    #[rstest]
    fn rejects_binary_payloads() {
        let err = UserData::from_bytes("blob", &[0xff, 0xfe, 0x00]).expect_err("not text");
        assert!(matches!(err, EncodingError::NotText { ref origin, .. } if origin == "blob"));
    }

    #[rstest]
    fn missing_file_is_unreadable() {
        let tmp = TempDir::new().expect("tempdir");
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("bootstrap"))
            .unwrap_or_else(|path| panic!("non-utf8 path: {}", path.display()));
        let err = UserData::load(&path).expect_err("file is absent");
        assert!(matches!(err, EncodingError::Unreadable { .. }));
    }

    #[rstest]
    #[case(16, 16, false)]
    #[case(17, 16, true)]
    fn size_warning_threshold(#[case] len: usize, #[case] limit: u64, #[case] expected: bool) {
        let data = UserData::from_bytes("inline", &vec![b'a'; len]).expect("text");
        assert_eq!(data.exceeds(limit), expected);
    }
}
