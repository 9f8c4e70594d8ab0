//! Command definitions
//!
//! Mutations proposed through consensus and applied to the store.

/// Command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandType {
    Set = 0x01,
    Del = 0x02,
}

impl CommandType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(CommandType::Set),
            0x02 => Some(CommandType::Del),
            _ => None,
        }
    }
}

/// A decoded command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Insert or overwrite a key
    Set { key: Vec<u8>, value: Vec<u8> },

    /// Remove a key
    Del { key: Vec<u8> },
}

impl Command {
    pub fn set(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Command::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn del(key: impl Into<Vec<u8>>) -> Self {
        Command::Del { key: key.into() }
    }

    /// Get the command type
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Set { .. } => CommandType::Set,
            Command::Del { .. } => CommandType::Del,
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            Command::Set { key, .. } | Command::Del { key } => key,
        }
    }
}
