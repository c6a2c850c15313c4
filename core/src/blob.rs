//! Opaque binary object with an associated media type.

use bytes::{Bytes, BytesMut};

/// One part of a `Blob` under construction.
#[derive(Debug, Clone)]
pub enum BlobPart {
    Text(String),
    Bytes(Bytes),
    Blob(Blob),
}

impl From<&str> for BlobPart {
    fn from(s: &str) -> Self {
        BlobPart::Text(s.to_string())
    }
}

impl From<String> for BlobPart {
    fn from(s: String) -> Self {
        BlobPart::Text(s)
    }
}

impl From<Bytes> for BlobPart {
    fn from(b: Bytes) -> Self {
        BlobPart::Bytes(b)
    }
}

impl From<Vec<u8>> for BlobPart {
    fn from(b: Vec<u8>) -> Self {
        BlobPart::Bytes(Bytes::from(b))
    }
}

impl From<Blob> for BlobPart {
    fn from(b: Blob) -> Self {
        BlobPart::Blob(b)
    }
}

/// Immutable bytes tagged with a media type. Cloning shares the buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blob {
    data: Bytes,
    media_type: String,
}

impl Blob {
    pub fn new<I, P>(parts: I, media_type: &str) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<BlobPart>,
    {
        let mut buf = BytesMut::new();
        for part in parts {
            match part.into() {
                BlobPart::Text(s) => buf.extend_from_slice(s.as_bytes()),
                BlobPart::Bytes(b) => buf.extend_from_slice(&b),
                BlobPart::Blob(b) => buf.extend_from_slice(&b.data),
            }
        }
        Self {
            data: buf.freeze(),
            media_type: media_type.to_ascii_lowercase(),
        }
    }

    pub fn from_bytes(data: Bytes, media_type: &str) -> Self {
        Self {
            data,
            media_type: media_type.to_ascii_lowercase(),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Media type, empty when none was given.
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn text(&self) -> String {
        decode_utf8(&self.data)
    }
}

/// UTF-8 decode with replacement characters for malformed sequences.
pub(crate) fn decode_utf8(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}
