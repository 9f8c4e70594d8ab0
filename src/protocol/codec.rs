//! Command codec
//!
//! ### Payload by Command Type
//! - SET: key_len (4 bytes) + key + value
//! - DEL: key

use bytes::{Buf, BufMut};

use crate::error::{Result, StoreError};

use super::{Command, CommandType};

/// Header size: 1 byte command type + 4 bytes payload length
pub const HEADER_SIZE: usize = 5;

// =============================================================================
// Encoding
// =============================================================================

/// Encode a command to bytes
///
/// Format: cmd_type (1) + payload_len (4) + payload
pub fn encode_command(command: &Command) -> Vec<u8> {
    let payload_len = match command {
        Command::Set { key, value } => 4 + key.len() + value.len(),
        Command::Del { key } => key.len(),
    };

    let mut message = Vec::with_capacity(HEADER_SIZE + payload_len);
    message.put_u8(command.command_type() as u8);
    message.put_u32_le(payload_len as u32);
    match command {
        Command::Set { key, value } => {
            message.put_u32_le(key.len() as u32);
            message.put_slice(key);
            message.put_slice(value);
        }
        Command::Del { key } => message.put_slice(key),
    }
    message
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode one command occupying all of `bytes`
pub fn decode_command(bytes: &[u8]) -> Result<Command> {
    if bytes.len() < HEADER_SIZE {
        return Err(StoreError::BadValue(format!(
            "incomplete command header: expected {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let mut header = &bytes[..HEADER_SIZE];
    let cmd_type = header.get_u8();
    let payload_len = header.get_u32_le() as usize;

    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != payload_len {
        return Err(StoreError::BadValue(format!(
            "command payload is {} bytes, header says {}",
            payload.len(),
            payload_len
        )));
    }

    match CommandType::from_u8(cmd_type) {
        Some(CommandType::Set) => decode_set(payload),
        Some(CommandType::Del) => Ok(Command::Del {
            key: payload.to_vec(),
        }),
        None => Err(StoreError::BadValue(format!(
            "unknown command type: 0x{:02x}",
            cmd_type
        ))),
    }
}

fn decode_set(mut payload: &[u8]) -> Result<Command> {
    if payload.len() < 4 {
        return Err(StoreError::BadValue(
            "SET command: missing key length".to_string(),
        ));
    }

    let key_len = payload.get_u32_le() as usize;
    if payload.len() < key_len {
        return Err(StoreError::BadValue(format!(
            "SET command: incomplete key (expected {}, got {})",
            key_len,
            payload.len()
        )));
    }

    let (key, value) = payload.split_at(key_len);
    Ok(Command::Set {
        key: key.to_vec(),
        value: value.to_vec(),
    })
}
