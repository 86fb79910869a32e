// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.


//! LiFi link protocol constants and the text envelope codec
//!
//! A text message travels as one BSON document:
//!
//! | field         | type    | meaning                               |
//! |---------------|---------|---------------------------------------|
//! | `message`     | string  | message body                          |
//! | `timestamp`   | double  | send time, seconds since the epoch    |
//! | `messageSize` | integer | size declared by the sender           |
//!
//! Images are written to the link raw, without any framing.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Header row of the transfer log
pub const LOG_HEADER: &str = "Byte_Size,Transmission_time";

/// Default transfer log written by the text receiver
pub const DEFAULT_LOG_FILE: &str = "log.csv";

/// Received images are saved as `<stem>.<format extension>`
pub const IMAGE_FILE_STEM: &str = "receivedImage";

/// Pause between repeats of a text message
pub const REPEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Read timeout used by receivers unless the link config says otherwise
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("cannot encode envelope: {0}")]
    Encode(#[from] bson::ser::Error),
    #[error("malformed envelope: {0}")]
    Decode(#[from] bson::de::Error),
}

// ============================================================================
// Envelope
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message: String,
    #[serde(rename = "timestamp")]
    pub sent_at: f64,
    /// Reported by the sender and never re-derived on receipt. Legacy peers
    /// put an in-memory object size here rather than the UTF-8 length, so it
    /// may disagree with `message.len()`.
    #[serde(rename = "messageSize")]
    pub declared_size: i64,
}

impl Envelope {
    pub fn new(message: impl Into<String>, sent_at: f64) -> Self {
        let message = message.into();
        let declared_size = message.len() as i64;
        Envelope { message, sent_at, declared_size }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(bson::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(bson::from_slice(bytes)?)
    }
}

pub fn encode(message: &str, sent_at: f64) -> Result<Vec<u8>, EnvelopeError> {
    Envelope::new(message, sent_at).encode()
}

pub fn decode(bytes: &[u8]) -> Result<Envelope, EnvelopeError> {
    Envelope::decode(bytes)
}

/// Wall-clock time in fractional seconds since the Unix epoch
pub fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn raw(document: bson::Document) -> Vec<u8> {
        let mut buf = Vec::new();
        document.to_writer(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_encode_decode_hello() {
        let bytes = encode("hello", 1000.0).unwrap();
        let envelope = decode(&bytes).unwrap();

        assert_eq!(envelope.message, "hello");
        assert_eq!(envelope.sent_at, 1000.0);
        assert_eq!(envelope.declared_size, 5);
    }

    #[test]
    fn test_round_trip_preserves_all_fields() {
        for (message, sent_at) in [("", 0.0), ("multi\nline\ttext", 1.5), ("Grüße 🌍", 1_760_000_000.123)] {
            let original = Envelope::new(message, sent_at);
            let decoded = Envelope::decode(&original.encode().unwrap()).unwrap();
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn test_declared_size_is_utf8_length_at_encode() {
        // "é" takes two bytes, so this is 6 and not the character count
        assert_eq!(Envelope::new("héllo", 0.0).declared_size, 6);
        assert_eq!(Envelope::new("", 0.0).declared_size, 0);
    }

    #[test]
    fn test_declared_size_taken_from_frame() {
        // Legacy senders report an object size (54 for "hello")
        let bytes = raw(doc! { "message": "hello", "timestamp": 12.5, "messageSize": 54_i32 });
        let envelope = decode(&bytes).unwrap();

        assert_eq!(envelope.message, "hello");
        assert_eq!(envelope.declared_size, 54);
    }

    #[test]
    fn test_wire_field_names() {
        let bytes = encode("ping", 2.0).unwrap();
        let document = bson::Document::from_reader(&mut bytes.as_slice()).unwrap();

        assert_eq!(document.get_str("message").unwrap(), "ping");
        assert_eq!(document.get_f64("timestamp").unwrap(), 2.0);
        assert_eq!(document.get_i64("messageSize").unwrap(), 4);
    }

    #[test]
    fn test_decode_missing_field() {
        let bytes = raw(doc! { "message": "hello", "timestamp": 12.5 });
        assert!(matches!(decode(&bytes), Err(EnvelopeError::Decode(_))));
    }

    #[test]
    fn test_decode_wrong_type() {
        let bytes = raw(doc! { "message": 7_i32, "timestamp": 12.5, "messageSize": 1_i32 });
        assert!(matches!(decode(&bytes), Err(EnvelopeError::Decode(_))));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(decode(b"").is_err());
        assert!(decode(b"not a bson document").is_err());
        assert!(decode(&[0xFF; 3]).is_err());
    }
}
