//! Packets and types used in the ATT protocol.
//!
//! The GATT client only ever *decodes* ATT PDUs: outgoing requests are issued through the
//! platform's [`AttClient`] interface, which builds its own packets. This module therefore
//! contains the server-to-client half of the protocol, decoded zero-copy from the receive
//! buffer.
//!
//! [`AttClient`]: ../../pal/trait.AttClient.html

use super::{AttHandle, AttUuid};
use crate::{bytes::*, utils::HexSlice, Error};

enum_with_unknown! {
    /// Error codes that can be sent from the ATT server to the client in response to a request.
    ///
    /// Used as the payload of `ErrorRsp` PDUs.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub enum ErrorCode(u8) {
        /// Attempted to use an `AttHandle` that isn't valid on this server.
        InvalidHandle = 0x01,
        /// Attribute isn't readable.
        ReadNotPermitted = 0x02,
        /// Attribute isn't writable.
        WriteNotPermitted = 0x03,
        /// Attribute PDU is invalid.
        InvalidPdu = 0x04,
        /// Authentication needed before attribute can be read/written.
        InsufficientAuthentication = 0x05,
        /// Server doesn't support this operation.
        RequestNotSupported = 0x06,
        /// Offset was past the end of the attribute.
        InvalidOffset = 0x07,
        /// Authorization needed before attribute can be read/written.
        InsufficientAuthorization = 0x08,
        /// Too many "prepare write" requests have been queued.
        PrepareQueueFull = 0x09,
        /// No attribute found within the specified attribute handle range.
        AttributeNotFound = 0x0A,
        /// Attribute can't be read/written using *Read Blob* request.
        AttributeNotLong = 0x0B,
        /// The encryption key in use is too weak to access an attribute.
        InsufficientEncryptionKeySize = 0x0C,
        /// Attribute value has an incorrect length for the operation.
        InvalidAttributeValueLength = 0x0D,
        /// Request has encountered an "unlikely" error and could not be completed.
        UnlikelyError = 0x0E,
        /// Attribute cannot be read/written without an encrypted connection.
        InsufficientEncryption = 0x0F,
        /// Attribute type is an invalid grouping attribute according to a higher-layer spec.
        UnsupportedGroupType = 0x10,
        /// Server didn't have enough resources to complete a request.
        InsufficientResources = 0x11,
    }
}

enum_with_unknown! {
    /// Specifies an ATT operation to perform.
    ///
    /// The byte values assigned to opcodes are chosen so that the most significant 2 bits indicate
    /// additional information that can be useful in some cases:
    ///
    /// ```notrust
    /// MSb                            LSb
    /// +-----------+---------+----------+
    /// | Signature | Command |  Method  |
    /// |   1 bit   |  1 bit  |  6 bits  |
    /// +-----------+---------+----------+
    /// ```
    ///
    /// * **`Signature`** is set to 1 to indicate that the Attribute Opcode and Parameters are
    ///   followed by an Authentication Signature. This is only allowed for the *Write Command*,
    ///   resulting in the `SignedWriteCommand`.
    /// * **`Command`** is set to 1 when the PDU is a command. Unlike *Requests*, Commands are not
    ///   followed by a server response.
    /// * **`Method`** defines which operation to perform.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub enum Opcode(u8) {
        ErrorRsp = 0x01,
        ExchangeMtuReq = 0x02,
        ExchangeMtuRsp = 0x03,
        FindInformationReq = 0x04,
        FindInformationRsp = 0x05,
        FindByTypeValueReq = 0x06,
        FindByTypeValueRsp = 0x07,
        ReadByTypeReq = 0x08,
        ReadByTypeRsp = 0x09,
        ReadReq = 0x0A,
        ReadRsp = 0x0B,
        ReadBlobReq = 0x0C,
        ReadBlobRsp = 0x0D,
        ReadMultipleReq = 0x0E,
        ReadMultipleRsp = 0x0F,
        ReadByGroupReq = 0x10,
        ReadByGroupRsp = 0x11,
        WriteReq = 0x12,
        WriteRsp = 0x13,
        WriteCommand = 0x52,
        SignedWriteCommand = 0xD2,
        PrepareWriteReq = 0x16,
        PrepareWriteRsp = 0x17,
        ExecuteWriteReq = 0x18,
        ExecuteWriteRsp = 0x19,
        HandleValueNotification = 0x1B,
        HandleValueIndication = 0x1D,
        HandleValueConfirmation = 0x1E,
    }
}

impl Opcode {
    /// Returns the raw byte corresponding to the opcode `self`.
    pub fn raw(&self) -> u8 {
        u8::from(*self)
    }
}

/// Iterator over the entries of a *Find Information Response*.
///
/// Yields attribute handles and the attribute's type. Depending on the format byte of the
/// response, the types are either 16-bit aliases or full 128-bit UUIDs, never a mix of both.
#[derive(Debug, Copy, Clone)]
pub struct FindInformationIter<'a> {
    entry_size: usize,
    data: &'a [u8],
}

impl<'a> FromBytes<'a> for FindInformationIter<'a> {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        let entry_size = match bytes.read_u8()? {
            0x01 => 4,  // handle + 16-bit UUID
            0x02 => 18, // handle + 128-bit UUID
            _ => return Err(Error::InvalidValue),
        };
        let data = bytes.read_rest();
        if data.is_empty() || data.len() % entry_size != 0 {
            return Err(Error::InvalidLength);
        }
        Ok(Self { entry_size, data })
    }
}

impl<'a> Iterator for FindInformationIter<'a> {
    type Item = (AttHandle, AttUuid);

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        let (entry, rest) = self.data.split_at(self.entry_size);
        self.data = rest;

        // Entry sizes were validated during decoding, so these cannot fail.
        let mut bytes = ByteReader::new(entry);
        let handle = AttHandle::from_bytes(&mut bytes).ok()?;
        let uuid = AttUuid::from_bytes(&mut bytes).ok()?;
        Some((handle, uuid))
    }
}

/// Iterator over the handle ranges of a *Find By Type Value Response*.
///
/// Yields `(found_handle, group_end_handle)` pairs.
#[derive(Debug, Copy, Clone)]
pub struct HandleRangeIter<'a> {
    data: &'a [u8],
}

impl<'a> FromBytes<'a> for HandleRangeIter<'a> {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        let data = bytes.read_rest();
        if data.is_empty() || data.len() % 4 != 0 {
            return Err(Error::InvalidLength);
        }
        Ok(Self { data })
    }
}

impl<'a> Iterator for HandleRangeIter<'a> {
    type Item = (AttHandle, AttHandle);

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        let (entry, rest) = self.data.split_at(4);
        self.data = rest;
        let mut bytes = ByteReader::new(entry);
        let start = AttHandle::from_bytes(&mut bytes).ok()?;
        let end = AttHandle::from_bytes(&mut bytes).ok()?;
        Some((start, end))
    }
}

/// Iterator over the attribute data of a *Read By Type Response*.
///
/// Yields `(handle, value)` pairs. All values in one response have the same length.
#[derive(Debug, Copy, Clone)]
pub struct ByTypeIter<'a> {
    entry_size: usize,
    data: &'a [u8],
}

impl<'a> FromBytes<'a> for ByTypeIter<'a> {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        // The length byte covers the 2-byte handle as well as the value.
        let entry_size = usize::from(bytes.read_u8()?);
        let data = bytes.read_rest();
        if entry_size <= 2 {
            return Err(Error::InvalidValue);
        }
        if data.is_empty() || data.len() % entry_size != 0 {
            return Err(Error::InvalidLength);
        }
        Ok(Self { entry_size, data })
    }
}

impl<'a> Iterator for ByTypeIter<'a> {
    type Item = (AttHandle, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        let (entry, rest) = self.data.split_at(self.entry_size);
        self.data = rest;
        let mut bytes = ByteReader::new(entry);
        let handle = AttHandle::from_bytes(&mut bytes).ok()?;
        Some((handle, bytes.read_rest()))
    }
}

/// Iterator over the attribute data of a *Read By Group Type Response*.
///
/// Yields `(group_start, group_end, value)` triples.
#[derive(Debug, Copy, Clone)]
pub struct ByGroupIter<'a> {
    entry_size: usize,
    data: &'a [u8],
}

impl<'a> FromBytes<'a> for ByGroupIter<'a> {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        // The length byte covers both 2-byte handles as well as the value.
        let entry_size = usize::from(bytes.read_u8()?);
        let data = bytes.read_rest();
        if entry_size <= 4 {
            return Err(Error::InvalidValue);
        }
        if data.is_empty() || data.len() % entry_size != 0 {
            return Err(Error::InvalidLength);
        }
        Ok(Self { entry_size, data })
    }
}

impl<'a> Iterator for ByGroupIter<'a> {
    type Item = (AttHandle, AttHandle, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        let (entry, rest) = self.data.split_at(self.entry_size);
        self.data = rest;
        let mut bytes = ByteReader::new(entry);
        let start = AttHandle::from_bytes(&mut bytes).ok()?;
        let end = AttHandle::from_bytes(&mut bytes).ok()?;
        Some((start, end, bytes.read_rest()))
    }
}

/// Structured representation of an ATT message sent by the server.
///
/// List-shaped responses are represented as iterators over the raw receive buffer instead of
/// being copied out.
#[derive(Debug, Copy, Clone)]
pub enum AttServerMessage<'a> {
    /// Request could not be completed due to an error.
    ErrorRsp {
        /// The opcode of the request that caused the error.
        req_opcode: Opcode,
        /// The attribute handle on which the operation failed.
        handle: AttHandle,
        /// An error code describing the kind of error that occurred.
        error_code: ErrorCode,
    },
    ExchangeMtuRsp {
        mtu: u16,
    },
    FindInformationRsp(FindInformationIter<'a>),
    FindByTypeValueRsp(HandleRangeIter<'a>),
    ReadByTypeRsp(ByTypeIter<'a>),
    ReadRsp {
        value: &'a [u8],
    },
    ReadBlobRsp {
        value: &'a [u8],
    },
    /// Concatenated values of the requested attributes. Only the caller knows where one value
    /// ends and the next begins.
    ReadMultipleRsp {
        values: &'a [u8],
    },
    ReadByGroupRsp(ByGroupIter<'a>),
    WriteRsp,
    PrepareWriteRsp {
        handle: AttHandle,
        offset: u16,
        /// The part of the attribute value echoed back by the server.
        value: &'a [u8],
    },
    ExecuteWriteRsp,
    HandleValueNotification {
        handle: AttHandle,
        value: &'a [u8],
    },
    HandleValueIndication {
        handle: AttHandle,
        value: &'a [u8],
    },
    /// A PDU this client doesn't know about (eg. a request sent in the wrong direction).
    Unknown {
        opcode: Opcode,
        params: HexSlice<&'a [u8]>,
    },
}

impl<'a> FromBytes<'a> for AttServerMessage<'a> {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        let opcode = Opcode::from(bytes.read_u8()?);
        Ok(match opcode {
            Opcode::ErrorRsp => AttServerMessage::ErrorRsp {
                req_opcode: Opcode::from(bytes.read_u8()?),
                handle: AttHandle::from_bytes(bytes)?,
                error_code: ErrorCode::from(bytes.read_u8()?),
            },
            Opcode::ExchangeMtuRsp => AttServerMessage::ExchangeMtuRsp {
                mtu: bytes.read_u16_le()?,
            },
            Opcode::FindInformationRsp => {
                AttServerMessage::FindInformationRsp(FindInformationIter::from_bytes(bytes)?)
            }
            Opcode::FindByTypeValueRsp => {
                AttServerMessage::FindByTypeValueRsp(HandleRangeIter::from_bytes(bytes)?)
            }
            Opcode::ReadByTypeRsp => AttServerMessage::ReadByTypeRsp(ByTypeIter::from_bytes(bytes)?),
            Opcode::ReadRsp => AttServerMessage::ReadRsp {
                value: bytes.read_rest(),
            },
            Opcode::ReadBlobRsp => AttServerMessage::ReadBlobRsp {
                value: bytes.read_rest(),
            },
            Opcode::ReadMultipleRsp => AttServerMessage::ReadMultipleRsp {
                values: bytes.read_rest(),
            },
            Opcode::ReadByGroupRsp => {
                AttServerMessage::ReadByGroupRsp(ByGroupIter::from_bytes(bytes)?)
            }
            Opcode::WriteRsp => AttServerMessage::WriteRsp,
            Opcode::PrepareWriteRsp => AttServerMessage::PrepareWriteRsp {
                handle: AttHandle::from_bytes(bytes)?,
                offset: bytes.read_u16_le()?,
                value: bytes.read_rest(),
            },
            Opcode::ExecuteWriteRsp => AttServerMessage::ExecuteWriteRsp,
            Opcode::HandleValueNotification => AttServerMessage::HandleValueNotification {
                handle: AttHandle::from_bytes(bytes)?,
                value: bytes.read_rest(),
            },
            Opcode::HandleValueIndication => AttServerMessage::HandleValueIndication {
                handle: AttHandle::from_bytes(bytes)?,
                value: bytes.read_rest(),
            },
            _ => AttServerMessage::Unknown {
                opcode,
                params: HexSlice(bytes.read_rest()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uuid::Uuid16;

    fn decode(raw: &[u8]) -> AttServerMessage<'_> {
        AttServerMessage::from_bytes(&mut ByteReader::new(raw)).unwrap()
    }

    #[test]
    fn error_rsp() {
        let msg = decode(&[0x01, 0x08, 0x34, 0x12, 0x0A]);
        match msg {
            AttServerMessage::ErrorRsp {
                req_opcode,
                handle,
                error_code,
            } => {
                assert_eq!(req_opcode, Opcode::ReadByTypeReq);
                assert_eq!(handle, AttHandle::from_raw(0x1234));
                assert_eq!(error_code, ErrorCode::AttributeNotFound);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn read_by_group_rsp() {
        // Two 16-bit-UUID service entries, 6 bytes each.
        let msg = decode(&[
            0x11, 0x06, /**/ 0x01, 0x00, 0x05, 0x00, 0x00, 0x18, /**/ 0x06, 0x00, 0x09,
            0x00, 0x01, 0x18,
        ]);
        let mut it = match msg {
            AttServerMessage::ReadByGroupRsp(it) => it,
            other => panic!("unexpected message: {:?}", other),
        };
        let (start, end, value) = it.next().unwrap();
        assert_eq!(start, AttHandle::from_raw(0x0001));
        assert_eq!(end, AttHandle::from_raw(0x0005));
        assert_eq!(value, &[0x00, 0x18]);
        let (start, end, _) = it.next().unwrap();
        assert_eq!(start, AttHandle::from_raw(0x0006));
        assert_eq!(end, AttHandle::from_raw(0x0009));
        assert!(it.next().is_none());
    }

    #[test]
    fn find_information_rsp_16bit() {
        let msg = decode(&[0x05, 0x01, /**/ 0x0D, 0x00, 0x02, 0x29]);
        let mut it = match msg {
            AttServerMessage::FindInformationRsp(it) => it,
            other => panic!("unexpected message: {:?}", other),
        };
        let (handle, uuid) = it.next().unwrap();
        assert_eq!(handle, AttHandle::from_raw(0x000D));
        assert_eq!(uuid, AttUuid::from(Uuid16(0x2902)));
        assert!(it.next().is_none());
    }

    #[test]
    fn find_information_rsp_bad_format() {
        let res = AttServerMessage::from_bytes(&mut ByteReader::new(&[
            0x05, 0x03, 0x0D, 0x00, 0x02, 0x29,
        ]));
        assert_eq!(res.unwrap_err(), Error::InvalidValue);
    }

    #[test]
    fn by_type_rsp_ragged_length() {
        // Entry size 7, but only 6 bytes of data follow.
        let res = AttServerMessage::from_bytes(&mut ByteReader::new(&[
            0x09, 0x07, 0x02, 0x00, 0x02, 0x03, 0x00, 0x00,
        ]));
        assert_eq!(res.unwrap_err(), Error::InvalidLength);
    }

    #[test]
    fn read_multiple_rsp() {
        let msg = decode(&[0x0F, 0x01, 0x02, 0x03]);
        match msg {
            AttServerMessage::ReadMultipleRsp { values } => {
                assert_eq!(values, &[0x01, 0x02, 0x03]);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn unknown_pdu() {
        let msg = decode(&[0x02, 0x17, 0x00]);
        match msg {
            AttServerMessage::Unknown { opcode, params } => {
                assert_eq!(opcode, Opcode::ExchangeMtuReq);
                assert_eq!(params.as_ref(), &[0x17, 0x00]);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
