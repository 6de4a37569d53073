//! Control and ping messages.
//!
//! Everything on the wire is space separated ASCII. Messages are parsed into
//! [`Message`] as soon as they are read and formatted back only when written,
//! so no other module touches raw tokens.

use crate::chord::types::{FileId, PeerId, Slot};
use crate::error::MessageError;
use std::fmt;
use std::str::FromStr;

pub const PING_TAG: &str = "PG";
pub const FILE_REQUEST_TAG: &str = "FR";
pub const GRACEFUL_QUIT_TAG: &str = "GQ";
pub const DEAD_PEER_TAG: &str = "DP";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Message {
    /// `PG <sender_id> <slot_flag>`
    Ping { sender: PeerId, slot: Slot },
    /// `FR <requester_id> <file_key> <has_file_flag> <query_flag>`
    ///
    /// In a response `requester` carries the id of the peer that owns the file.
    FileRequest {
        requester: PeerId,
        file: FileId,
        has_file: bool,
        query: bool,
    },
    /// `GQ <departing_id> <new_succ1> <new_succ2> <query_flag>`
    GracefulQuit {
        departing: PeerId,
        first_successor: PeerId,
        second_successor: PeerId,
        query: bool,
    },
    /// `DP <sender_id> <query_flag> <successor_id>`, successor is `-1` in a query
    DeadPeerRepair {
        sender: PeerId,
        query: bool,
        successor: Option<PeerId>,
    },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Ping { .. } => PING_TAG,
            Message::FileRequest { .. } => FILE_REQUEST_TAG,
            Message::GracefulQuit { .. } => GRACEFUL_QUIT_TAG,
            Message::DeadPeerRepair { .. } => DEAD_PEER_TAG,
        }
    }

    /// Parse a message from raw bytes, tolerating trailing whitespace and NUL padding
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        let text = std::str::from_utf8(bytes).map_err(|_| MessageError::NotText)?;
        text.trim_matches(|c: char| c.is_whitespace() || c == '\0')
            .parse()
    }

    /// Wire form of a control message, newline-terminated
    pub fn to_line(&self) -> String {
        format!("{}\n", self)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Ping { sender, slot } => {
                write!(f, "{} {} {}", PING_TAG, sender, flag(slot.as_flag()))
            }
            Message::FileRequest {
                requester,
                file,
                has_file,
                query,
            } => write!(
                f,
                "{} {} {} {} {}",
                FILE_REQUEST_TAG,
                requester,
                file.0,
                flag(*has_file),
                flag(*query)
            ),
            Message::GracefulQuit {
                departing,
                first_successor,
                second_successor,
                query,
            } => write!(
                f,
                "{} {} {} {} {}",
                GRACEFUL_QUIT_TAG,
                departing,
                first_successor,
                second_successor,
                flag(*query)
            ),
            Message::DeadPeerRepair {
                sender,
                query,
                successor,
            } => match successor {
                Some(successor) => write!(
                    f,
                    "{} {} {} {}",
                    DEAD_PEER_TAG,
                    sender,
                    flag(*query),
                    successor
                ),
                None => write!(f, "{} {} {} -1", DEAD_PEER_TAG, sender, flag(*query)),
            },
        }
    }
}

impl FromStr for Message {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tokens = s.split_whitespace();
        let tag = tokens.next().ok_or(MessageError::Empty)?;
        let fields: Vec<&str> = tokens.collect();

        match tag {
            PING_TAG => {
                expect_fields("ping", &fields, 2)?;
                Ok(Message::Ping {
                    sender: peer("sender_id", fields[0])?,
                    slot: Slot::from_flag(parse_flag("slot_flag", fields[1])?),
                })
            }
            FILE_REQUEST_TAG => {
                expect_fields("file request", &fields, 4)?;
                Ok(Message::FileRequest {
                    requester: peer("requester_id", fields[0])?,
                    file: FileId(number("file_key", fields[1])?),
                    has_file: parse_flag("has_file_flag", fields[2])?,
                    query: parse_flag("query_flag", fields[3])?,
                })
            }
            GRACEFUL_QUIT_TAG => {
                expect_fields("graceful quit", &fields, 4)?;
                Ok(Message::GracefulQuit {
                    departing: peer("departing_id", fields[0])?,
                    first_successor: peer("new_succ1", fields[1])?,
                    second_successor: peer("new_succ2", fields[2])?,
                    query: parse_flag("query_flag", fields[3])?,
                })
            }
            DEAD_PEER_TAG => {
                expect_fields("dead peer repair", &fields, 3)?;
                let query = parse_flag("query_flag", fields[1])?;
                let successor = match fields[2] {
                    "-1" if query => None,
                    value => Some(peer("successor_id", value)?),
                };
                Ok(Message::DeadPeerRepair {
                    sender: peer("sender_id", fields[0])?,
                    query,
                    successor,
                })
            }
            other => Err(MessageError::UnknownType(other.to_string())),
        }
    }
}

fn flag(value: bool) -> u8 {
    u8::from(value)
}

fn expect_fields(kind: &'static str, fields: &[&str], expected: usize) -> Result<(), MessageError> {
    if fields.len() != expected {
        return Err(MessageError::FieldCount {
            kind,
            expected,
            got: fields.len(),
        });
    }
    Ok(())
}

pub(crate) fn number<T: FromStr>(field: &'static str, value: &str) -> Result<T, MessageError> {
    value.parse().map_err(|_| MessageError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

fn peer(field: &'static str, value: &str) -> Result<PeerId, MessageError> {
    number(field, value).map(PeerId)
}

pub(crate) fn parse_flag(field: &'static str, value: &str) -> Result<bool, MessageError> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(MessageError::InvalidFlag {
            field,
            value: value.to_string(),
        }),
    }
}

/// The ping reply is just the responder's id in decimal
pub fn ping_reply(id: PeerId) -> String {
    id.to_string()
}

pub fn parse_ping_reply(bytes: &[u8]) -> Option<PeerId> {
    std::str::from_utf8(bytes)
        .ok()?
        .trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .parse()
        .ok()
        .map(PeerId)
}
