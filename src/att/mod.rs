//! Implementation of the Attribute Protocol (ATT) client side.
//!
//! ATT always runs over L2CAP channel `0x0004`, which is connected by default as soon as the
//! Link-Layer connection is established.
//!
//! ATT is used by GATT, the *Generic Attribute Profile*, which introduces the concept of
//! *Services* and *Characteristics* which can all be accessed and discovered over the Attribute
//! Protocol.
//!
//! This module contains the ATT-level vocabulary types (handles, error codes, opcodes) and the
//! server-to-client PDU decoder in [`pdus`].
//!
//! [`pdus`]: pdus/index.html

mod handle;
pub mod pdus;
mod uuid;

pub use self::handle::AttHandle;

/// The longest attribute value permitted by the ATT protocol, in Bytes.
pub const MAX_ATTR_VALUE_LEN: usize = 512;
pub use self::pdus::{ErrorCode, Opcode};
pub use self::uuid::AttUuid;
