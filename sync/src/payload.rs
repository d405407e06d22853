//! Delta payloads: gzip-compressed JSON.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shipwright_engine::PartPosition;
use shipwright_types::{ChatId, SessionId};

use crate::SyncError;

/// One upload: everything past the persisted watermark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncDelta {
    pub chat_id: ChatId,
    pub session_id: SessionId,
    /// Last part covered by `messages`; the watermark on success.
    pub position: Option<PartPosition>,
    pub subchat_index: u32,
    /// File counter the snapshot reflects.
    pub file_counter: u64,
    pub messages: Option<Vec<u8>>,
    pub snapshot: Option<Vec<u8>>,
}

impl SyncDelta {
    /// Message rank on the wire; `-1` before any message exists.
    #[must_use]
    pub fn last_message_rank(&self) -> i64 {
        self.position
            .map_or(-1, |p| i64::try_from(p.message_index).unwrap_or(i64::MAX))
    }

    #[must_use]
    pub fn part_index(&self) -> i64 {
        self.position
            .map_or(-1, |p| i64::try_from(p.part_index).unwrap_or(i64::MAX))
    }
}

pub fn gzip_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, SyncError> {
    let json = serde_json::to_vec(value)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

pub fn gunzip_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SyncError> {
    let mut json = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipwright_types::{FileCache, Message, MessageId};
    use std::time::SystemTime;

    #[test]
    fn compresses_messages_and_snapshots() {
        let messages = vec![Message::user(
            MessageId::new("u"),
            "build me a todo app ".repeat(50),
            SystemTime::UNIX_EPOCH,
        )];
        let bytes = gzip_json(&messages).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
        assert!(bytes.len() < serde_json::to_vec(&messages).unwrap().len());
        let decoded: Vec<Message> = gunzip_json(&bytes).unwrap();
        assert_eq!(decoded, messages);

        let mut files = FileCache::new();
        files.write_file("/src/App.tsx", "export {}");
        let decoded: FileCache = gunzip_json(&gzip_json(&files).unwrap()).unwrap();
        assert_eq!(decoded, files);
    }

    #[test]
    fn garbage_is_a_compression_error() {
        assert!(matches!(
            gunzip_json::<Vec<Message>>(b"not gzip"),
            Err(SyncError::Compression(_))
        ));
    }

    #[test]
    fn wire_ranks_default_to_minus_one() {
        let delta = SyncDelta {
            chat_id: ChatId::new("c"),
            session_id: SessionId::new("s"),
            position: None,
            subchat_index: 0,
            file_counter: 0,
            messages: None,
            snapshot: None,
        };
        assert_eq!((delta.last_message_rank(), delta.part_index()), (-1, -1));
        let delta = SyncDelta {
            position: Some(PartPosition::new(4, 2)),
            ..delta
        };
        assert_eq!((delta.last_message_rank(), delta.part_index()), (4, 2));
    }
}
