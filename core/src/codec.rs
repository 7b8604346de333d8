use rkyv::api::high::{HighDeserializer, HighSerializer, HighValidator};
use rkyv::bytecheck::CheckBytes;
use rkyv::rancor::Error;
use rkyv::ser::allocator::ArenaHandle;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Leading bytes of every framed file written by the session store.
pub const FRAME_MAGIC: [u8; 4] = *b"KRNK";

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("archive encode failed: {0}")]
    Encode(String),
    #[error("missing {} header", String::from_utf8_lossy(&FRAME_MAGIC))]
    Header,
    #[error("archive rejected: {0}")]
    Archive(String),
}

pub fn encode<T>(value: &T) -> Option<Vec<u8>>
where
    T: for<'a> Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, Error>>,
{
    encode_checked(value).ok()
}

pub fn encode_checked<T>(value: &T) -> Result<Vec<u8>, CodecError>
where
    T: for<'a> Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, Error>>,
{
    rkyv::to_bytes::<Error>(value)
        .map(|bytes| bytes.into_vec())
        .map_err(|err| CodecError::Encode(err.to_string()))
}

/// Truncated or altered bytes yield `None`.
pub fn decode<T>(bytes: &[u8]) -> Option<T>
where
    T: Archive,
    T::Archived:
        for<'a> CheckBytes<HighValidator<'a, Error>> + Deserialize<T, HighDeserializer<Error>>,
{
    decode_checked(bytes).ok()
}

/// Validates the archive before deserializing. The input is copied into an
/// aligned buffer, so slices read straight from disk are fine.
pub fn decode_checked<T>(bytes: &[u8]) -> Result<T, CodecError>
where
    T: Archive,
    T::Archived:
        for<'a> CheckBytes<HighValidator<'a, Error>> + Deserialize<T, HighDeserializer<Error>>,
{
    let mut aligned = AlignedVec::<16>::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    rkyv::from_bytes::<T, Error>(&aligned).map_err(|err| CodecError::Archive(err.to_string()))
}

/// `FRAME_MAGIC` followed by the archive.
pub fn encode_framed<T>(value: &T) -> Result<Vec<u8>, CodecError>
where
    T: for<'a> Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, Error>>,
{
    let archive = encode_checked(value)?;
    let mut out = Vec::with_capacity(FRAME_MAGIC.len() + archive.len());
    out.extend_from_slice(&FRAME_MAGIC);
    out.extend_from_slice(&archive);
    Ok(out)
}

pub fn decode_framed<T>(bytes: &[u8]) -> Result<T, CodecError>
where
    T: Archive,
    T::Archived:
        for<'a> CheckBytes<HighValidator<'a, Error>> + Deserialize<T, HighDeserializer<Error>>,
{
    let archive = bytes.strip_prefix(&FRAME_MAGIC).ok_or(CodecError::Header)?;
    decode_checked(archive)
}
