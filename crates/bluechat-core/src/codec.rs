//! Wire codec for chat frames
//!
//! A frame is `<sender>#<body>` encoded as UTF-8. There is no length prefix,
//! escaping or checksum: one read off the stream is one frame. Fields that
//! contain `#` do not survive a round trip.

use crate::types::Message;

/// Separator between the sender label and the body
pub const DELIMITER: char = '#';

/// Encode a message into a wire frame
pub fn encode(message: &Message) -> Vec<u8> {
    let mut frame = String::with_capacity(message.sender.len() + 1 + message.body.len());
    frame.push_str(&message.sender);
    frame.push(DELIMITER);
    frame.push_str(&message.body);
    frame.into_bytes()
}

/// Decode the first `length` bytes of `buffer` into a message
///
/// Bytes past `length` are leftovers from a reused read buffer and are
/// ignored. The text is split on the first delimiter; when there is none the
/// whole text becomes the body and the sender is empty.
pub fn decode(buffer: &[u8], length: usize, local: bool) -> Message {
    let valid = &buffer[..length.min(buffer.len())];
    let text = String::from_utf8_lossy(valid);

    let (sender, body) = text.split_once(DELIMITER).unwrap_or(("", text.as_ref()));

    Message::new(body, sender, local)
}
