//! Self-framed encoding of [`MetadataRecord`].
//!
//! A record is stored as a standalone blob, so the encoding carries its own
//! framing:
//!
//! ```text
//! +-------+---------+-------------+---------------------+
//! | magic | version | payload len | payload (JSON)      |
//! | 4B    | 1B      | u32 BE      | len bytes           |
//! +-------+---------+-------------+---------------------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::record::{HeaderFields, MetadataRecord};

pub const MAGIC: &[u8; 4] = b"HCMR";
pub const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = MAGIC.len() + 1 + 4;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("metadata truncated: need {expected} bytes, have {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("metadata has {0} unexpected trailing bytes")]
    TrailingBytes(usize),
    #[error("metadata does not start with the record magic")]
    BadMagic,
    #[error("unsupported metadata format version {0}")]
    UnsupportedVersion(u8),
    #[error("invalid metadata payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("invalid status code {0} in metadata")]
    InvalidStatus(u16),
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedRecord {
    status: u16,
    headers: Vec<(String, Vec<String>)>,
}

pub fn encode(record: &MetadataRecord) -> Bytes {
    let persisted = PersistedRecord {
        status: record.status.as_u16(),
        headers: record.headers.clone().into_inner(),
    };
    // Serializing plain strings and integers cannot fail.
    let payload = serde_json::to_vec(&persisted).unwrap_or_default();

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_slice(MAGIC);
    buf.put_u8(FORMAT_VERSION);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(&payload);
    buf.freeze()
}

pub fn decode(data: &[u8]) -> Result<MetadataRecord, DecodeError> {
    if data.len() < HEADER_LEN {
        return Err(DecodeError::Truncated {
            expected: HEADER_LEN,
            actual: data.len(),
        });
    }
    let mut buf = data;
    if &buf[..MAGIC.len()] != MAGIC {
        return Err(DecodeError::BadMagic);
    }
    buf.advance(MAGIC.len());
    let version = buf.get_u8();
    if version != FORMAT_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let payload_len = buf.get_u32() as usize;
    if buf.remaining() < payload_len {
        return Err(DecodeError::Truncated {
            expected: HEADER_LEN + payload_len,
            actual: data.len(),
        });
    }
    if buf.remaining() > payload_len {
        return Err(DecodeError::TrailingBytes(buf.remaining() - payload_len));
    }

    let persisted: PersistedRecord = serde_json::from_slice(buf)?;
    let status = StatusCode::from_u16(persisted.status)
        .map_err(|_| DecodeError::InvalidStatus(persisted.status))?;
    Ok(MetadataRecord {
        status,
        headers: HeaderFields::from(persisted.headers),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> MetadataRecord {
        let mut headers = HeaderFields::new();
        headers.append("Content-Type", "text/html");
        headers.append("Set-Cookie", "a=1");
        headers.append("Set-Cookie", "b=2");
        headers.push_field("X-Empty", Vec::new());
        MetadataRecord::new(StatusCode::OK, headers)
    }

    #[test]
    fn roundtrip_keeps_order_and_repeated_values() -> Result<(), DecodeError> {
        let record = sample();
        let decoded = decode(&encode(&record))?;
        assert_eq!(decoded, record);
        let names: Vec<_> = decoded.headers.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["Content-Type", "Set-Cookie", "X-Empty"]);
        assert_eq!(decoded.headers.get("x-empty").map(<[String]>::len), Some(0));
        Ok(())
    }

    #[test]
    fn frame_starts_with_magic_version_and_length() {
        let encoded = encode(&sample());
        assert_eq!(&encoded[..4], MAGIC);
        assert_eq!(encoded[4], FORMAT_VERSION);
        let len = u32::from_be_bytes([encoded[5], encoded[6], encoded[7], encoded[8]]) as usize;
        assert_eq!(len, encoded.len() - HEADER_LEN);
    }

    #[test]
    fn rejects_truncated_frames() {
        let encoded = encode(&sample());
        for cut in [0, 3, HEADER_LEN - 1, HEADER_LEN, encoded.len() - 1] {
            let err = decode(&encoded[..cut]).unwrap_err();
            assert!(
                matches!(err, DecodeError::Truncated { .. }),
                "cut at {cut}: {err}"
            );
        }
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut data = encode(&sample()).to_vec();
        data.extend_from_slice(b"xx");
        assert!(matches!(decode(&data), Err(DecodeError::TrailingBytes(2))));
    }

    #[test]
    fn rejects_wrong_magic_and_version() {
        let mut data = encode(&sample()).to_vec();
        data[0] = b'X';
        assert!(matches!(decode(&data), Err(DecodeError::BadMagic)));

        let mut data = encode(&sample()).to_vec();
        data[4] = 9;
        assert!(matches!(
            decode(&data),
            Err(DecodeError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn rejects_invalid_payloads() {
        let frame = |payload: &[u8]| {
            let mut data = Vec::new();
            data.extend_from_slice(MAGIC);
            data.push(FORMAT_VERSION);
            data.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            data.extend_from_slice(payload);
            data
        };
        assert!(matches!(
            decode(&frame(b"{not json")),
            Err(DecodeError::Payload(_))
        ));
        assert!(matches!(
            decode(&frame(br#"{"status":42,"headers":[]}"#)),
            Err(DecodeError::InvalidStatus(42))
        ));
    }

    fn header_fields() -> impl Strategy<Value = HeaderFields> {
        prop::collection::vec(
            ("[A-Za-z-]{1,16}", prop::collection::vec(".{0,24}", 0..4)),
            0..8,
        )
        .prop_map(HeaderFields::from)
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(status in 100u16..1000, headers in header_fields()) {
            let record = MetadataRecord::new(StatusCode::from_u16(status).unwrap(), headers);
            let decoded = decode(&encode(&record)).unwrap();
            prop_assert_eq!(decoded, record);
        }

        #[test]
        fn decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode(&data);
        }
    }
}
