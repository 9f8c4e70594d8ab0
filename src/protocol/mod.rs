//! Protocol Module
//!
//! Binary format of the commands carried in `Normal` log entries and applied
//! to the store once committed.
//!
//! ## Command Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Cmd (1)  │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//! `Len` is little-endian, like every other integer on disk.
//!
//! ### Commands
//! - 0x01: SET - Payload: key_len (4) + key + value
//! - 0x02: DEL - Payload: key

mod codec;
mod command;

pub use codec::{decode_command, encode_command, HEADER_SIZE};
pub use command::{Command, CommandType};
