//! Wire protocol: the fixed-length command record.
//!
//! Every datagram, and every accepted stream connection, carries exactly
//! one record of [`MESSAGE_LEN`] bytes:
//!
//! ```text
//!  0        1                 5          6         7
//!  +--------+-----------------+----------+---------+
//!  | table  | IPv4 address    | prefix   | command |
//!  | u8     | network order   | u8       | u8      |
//!  +--------+-----------------+----------+---------+
//! ```
//!
//! A prefix length of 0 means a host entry (/32). Commands are 1 = add,
//! 2 = delete, 3 = flush; flush ignores the address and prefix fields.
//! Nothing is ever sent back to the peer.

use std::fmt;
use std::net::Ipv4Addr;

use crate::adapter::TableEntry;

/// Size of one wire record in bytes.
pub const MESSAGE_LEN: usize = 7;

/// Longest valid IPv4 prefix.
pub const MAX_PREFIX: u8 = 32;

/// Errors produced while decoding a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("record is {actual} bytes, expected {expected}")]
    Length { expected: usize, actual: usize },

    #[error("table {table} out of range (tables available: {max_tables})")]
    TableOutOfRange { table: u8, max_tables: u32 },

    #[error("prefix length {0} exceeds /32")]
    InvalidPrefix(u8),

    #[error("unknown command {0}")]
    UnknownCommand(u8),

    #[error("invalid address {0:?}")]
    InvalidAddress(String),
}

/// Table operation requested by a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Insert (or refresh) an entry.
    Add = 1,
    /// Remove an entry.
    Delete = 2,
    /// Remove every entry from the table.
    Flush = 3,
}

impl TryFrom<u8> for Command {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Command::Add),
            2 => Ok(Command::Delete),
            3 => Ok(Command::Flush),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Add => f.write_str("add"),
            Command::Delete => f.write_str("delete"),
            Command::Flush => f.write_str("flush"),
        }
    }
}

/// A decoded, validated command record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub table: u8,
    pub addr: Ipv4Addr,
    /// Prefix length, already normalised (never 0).
    pub prefix: u8,
    pub command: Command,
}

impl Message {
    /// Add `addr/prefix` to `table`.
    pub fn add(table: u8, addr: Ipv4Addr, prefix: u8) -> Self {
        Self::new(table, addr, prefix, Command::Add)
    }

    /// Delete `addr/prefix` from `table`.
    pub fn delete(table: u8, addr: Ipv4Addr, prefix: u8) -> Self {
        Self::new(table, addr, prefix, Command::Delete)
    }

    /// Flush `table`.
    pub fn flush(table: u8) -> Self {
        Self::new(table, Ipv4Addr::UNSPECIFIED, MAX_PREFIX, Command::Flush)
    }

    fn new(table: u8, addr: Ipv4Addr, prefix: u8, command: Command) -> Self {
        Self {
            table,
            addr,
            prefix: normalize_prefix(prefix),
            command,
        }
    }

    /// The table entry this message refers to.
    pub fn entry(&self) -> TableEntry {
        TableEntry::new(self.table, self.addr, self.prefix)
    }

    /// Encode into a wire record.
    pub fn encode(&self) -> [u8; MESSAGE_LEN] {
        let mut buf = [0u8; MESSAGE_LEN];
        buf[0] = self.table;
        buf[1..5].copy_from_slice(&self.addr.octets());
        buf[5] = self.prefix;
        buf[6] = self.command as u8;
        buf
    }

    /// Decode and validate a wire record.
    ///
    /// `max_tables` is the number of tables the firewall provides; table
    /// ids at or above it are rejected.
    pub fn decode(buf: &[u8], max_tables: u32) -> Result<Self, ProtocolError> {
        let record: &[u8; MESSAGE_LEN] =
            buf.try_into().map_err(|_| ProtocolError::Length {
                expected: MESSAGE_LEN,
                actual: buf.len(),
            })?;

        let command = Command::try_from(record[6])?;
        let table = record[0];
        if u32::from(table) >= max_tables {
            return Err(ProtocolError::TableOutOfRange { table, max_tables });
        }

        let addr = Ipv4Addr::new(record[1], record[2], record[3], record[4]);
        let prefix = record[5];
        if command != Command::Flush && prefix > MAX_PREFIX {
            return Err(ProtocolError::InvalidPrefix(prefix));
        }

        Ok(Self {
            table,
            addr,
            prefix: normalize_prefix(prefix),
            command,
        })
    }
}

fn normalize_prefix(prefix: u8) -> u8 {
    if prefix == 0 { MAX_PREFIX } else { prefix }
}

/// Parse `a.b.c.d[/prefix]` into an address and normalised prefix.
pub fn parse_cidr(s: &str) -> Result<(Ipv4Addr, u8), ProtocolError> {
    let invalid = || ProtocolError::InvalidAddress(s.to_string());
    let (addr, prefix) = match s.split_once('/') {
        Some((addr, prefix)) => (addr, prefix.parse::<u8>().map_err(|_| invalid())?),
        None => (s, MAX_PREFIX),
    };
    let addr = addr.parse::<Ipv4Addr>().map_err(|_| invalid())?;
    if prefix > MAX_PREFIX {
        return Err(ProtocolError::InvalidPrefix(prefix));
    }
    Ok((addr, normalize_prefix(prefix)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ADDR: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 7);

    #[test]
    fn test_wire_layout() {
        let bytes = Message::add(4, ADDR, 24).encode();
        assert_eq!(bytes, [4, 203, 0, 113, 7, 24, 1]);
    }

    #[test]
    fn test_decode_add() {
        let msg = Message::decode(&[0, 203, 0, 113, 7, 32, 1], 128).unwrap();
        assert_eq!(msg, Message::add(0, ADDR, 32));
        assert_eq!(msg.entry(), TableEntry::new(0, ADDR, 32));
    }

    #[test]
    fn test_zero_prefix_means_host() {
        for command in [1u8, 2, 3] {
            let zero = Message::decode(&[1, 203, 0, 113, 7, 0, command], 128).unwrap();
            let host = Message::decode(&[1, 203, 0, 113, 7, 32, command], 128).unwrap();
            assert_eq!(zero, host);
            assert_eq!(zero.prefix, 32);
        }
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        assert_eq!(
            Message::decode(&[0, 1, 2], 128),
            Err(ProtocolError::Length {
                expected: MESSAGE_LEN,
                actual: 3
            })
        );
        assert!(Message::decode(&[0; MESSAGE_LEN + 1], 128).is_err());
    }

    #[test]
    fn test_decode_rejects_table_out_of_range() {
        assert_eq!(
            Message::decode(&[8, 10, 0, 0, 1, 32, 1], 8),
            Err(ProtocolError::TableOutOfRange {
                table: 8,
                max_tables: 8
            })
        );
        assert!(Message::decode(&[7, 10, 0, 0, 1, 32, 1], 8).is_ok());
    }

    #[test]
    fn test_decode_rejects_unknown_command() {
        assert_eq!(
            Message::decode(&[0, 10, 0, 0, 1, 32, 9], 128),
            Err(ProtocolError::UnknownCommand(9))
        );
        assert_eq!(
            Message::decode(&[0, 10, 0, 0, 1, 32, 0], 128),
            Err(ProtocolError::UnknownCommand(0))
        );
    }

    #[test]
    fn test_decode_rejects_long_prefix_except_flush() {
        assert_eq!(
            Message::decode(&[0, 10, 0, 0, 1, 33, 1], 128),
            Err(ProtocolError::InvalidPrefix(33))
        );
        let flush = Message::decode(&[0, 10, 0, 0, 1, 200, 3], 128).unwrap();
        assert_eq!(flush.command, Command::Flush);
    }

    #[test]
    fn test_parse_cidr() {
        assert_eq!(parse_cidr("203.0.113.7").unwrap(), (ADDR, 32));
        assert_eq!(parse_cidr("203.0.113.0/24").unwrap(), (Ipv4Addr::new(203, 0, 113, 0), 24));
        assert_eq!(parse_cidr("203.0.113.7/0").unwrap(), (ADDR, 32));
        assert!(parse_cidr("203.0.113.7/33").is_err());
        assert!(parse_cidr("not-an-address").is_err());
        assert!(parse_cidr("::1/128").is_err());
    }
}
