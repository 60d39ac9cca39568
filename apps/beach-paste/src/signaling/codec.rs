//! Copy/paste encoding for negotiation descriptions.
//!
//! A description travels between the two terminals as a single line of
//! standard base64 wrapping a gzip stream of the JSON form
//! `{"type":"offer","sdp":"v=0..."}`.

use std::fmt;
use std::io::{self, Read, Write};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on the inflated JSON accepted from a pasted line.
pub const MAX_DESCRIPTION_BYTES: u64 = 1 << 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionKind {
    Offer,
    Answer,
}

impl DescriptionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DescriptionKind::Offer => "offer",
            DescriptionKind::Answer => "answer",
        }
    }
}

impl fmt::Display for DescriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side's session description as handed out by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationDescription {
    #[serde(rename = "type")]
    pub kind: DescriptionKind,
    pub sdp: String,
}

impl NegotiationDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Answer,
            sdp: sdp.into(),
        }
    }

    /// Candidate lines (`a=candidate:...`) embedded in the SDP body.
    pub fn embedded_candidates(&self) -> impl Iterator<Item = &str> {
        self.sdp
            .lines()
            .map(str::trim)
            .filter_map(|line| line.strip_prefix("a="))
            .filter(|attr| attr.starts_with("candidate:"))
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to serialize description: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to compress description: {0}")]
    Compress(#[source] io::Error),
    #[error("description text is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("description payload is not a valid gzip stream: {0}")]
    Decompress(#[source] io::Error),
    #[error("description payload is not a valid session description: {0}")]
    Parse(#[source] serde_json::Error),
}

impl CodecError {
    /// Pipeline stage that rejected the input, for diagnostics.
    pub fn stage(&self) -> &'static str {
        match self {
            CodecError::Serialize(_) => "serialize",
            CodecError::Compress(_) => "compress",
            CodecError::Base64(_) => "base64",
            CodecError::Decompress(_) => "decompress",
            CodecError::Parse(_) => "parse",
        }
    }
}

pub fn encode(description: &NegotiationDescription) -> Result<String, CodecError> {
    let json = serde_json::to_vec(description).map_err(CodecError::Serialize)?;

    // flate2 writes a zero mtime into the header, so equal input gives equal text.
    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 2), Compression::best());
    encoder.write_all(&json).map_err(CodecError::Compress)?;
    let compressed = encoder.finish().map_err(CodecError::Compress)?;

    Ok(STANDARD.encode(compressed))
}

pub fn decode(text: &str) -> Result<NegotiationDescription, CodecError> {
    let compressed = STANDARD.decode(text.trim())?;

    let mut json = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .take(MAX_DESCRIPTION_BYTES + 1)
        .read_to_end(&mut json)
        .map_err(CodecError::Decompress)?;
    if json.len() as u64 > MAX_DESCRIPTION_BYTES {
        return Err(CodecError::Decompress(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("decompressed description exceeds {MAX_DESCRIPTION_BYTES} bytes"),
        )));
    }

    serde_json::from_slice(&json).map_err(CodecError::Parse)
}

/// Runs the whole decode pipeline and discards the result.
pub fn validate(text: &str) -> Result<(), CodecError> {
    decode(text).map(|_| ())
}
