//! Attribute reads, including long-read reassembly.
//!
//! A *Read Response* carries at most `MTU - 1` Bytes of value. A full response therefore means
//! the value may continue, and the remainder is fetched with *Read Blob* requests until a
//! response arrives that doesn't fill the PDU (possibly with zero Bytes, when the value length
//! is an exact multiple of `MTU - 1`).

use crate::att::pdus::AttServerMessage;
use crate::att::{AttHandle, Opcode, MAX_ATTR_VALUE_LEN};
use crate::gatt::client::Disposition;
use crate::gatt::{EventHandler, GattError, ReadEvent};
use crate::pal::{AttClient, ConnHandle};
use heapless::Vec;

pub(crate) struct ReadProcedure {
    handle: AttHandle,
    /// Value offset the read starts at. Nonzero reads go straight to *Read Blob*.
    offset: u16,
    /// Reassembly buffer. Stays empty for single-fragment reads, which are delivered straight
    /// out of the receive buffer.
    buf: Vec<u8, MAX_ATTR_VALUE_LEN>,
}

impl ReadProcedure {
    pub(crate) fn new(handle: AttHandle, offset: u16) -> Self {
        Self {
            handle,
            offset,
            buf: Vec::new(),
        }
    }

    pub(crate) fn begin(
        &mut self,
        pal: &mut dyn AttClient,
        conn: ConnHandle,
    ) -> Result<(), crate::Error> {
        if self.offset == 0 {
            pal.read_attribute(conn, self.handle)
        } else {
            pal.read_attribute_blob(conn, self.handle, self.offset)
        }
    }

    pub(crate) fn handle(
        &mut self,
        pal: &mut dyn AttClient,
        events: &mut dyn EventHandler,
        conn: ConnHandle,
        msg: &AttServerMessage<'_>,
    ) -> Disposition {
        match msg {
            AttServerMessage::ReadRsp { value } | AttServerMessage::ReadBlobRsp { value } => {
                self.advance(pal, events, conn, value)
            }
            AttServerMessage::ErrorRsp {
                req_opcode,
                error_code,
                ..
            } if matches!(req_opcode, Opcode::ReadReq | Opcode::ReadBlobReq) => {
                self.finish(events, conn, &[], Err(GattError::from_att(*error_code)))
            }
            _ => {
                debug!("read: unexpected {:?}", msg);
                self.finish(events, conn, &[], Err(GattError::Unspecified))
            }
        }
    }

    fn advance(
        &mut self,
        pal: &mut dyn AttClient,
        events: &mut dyn EventHandler,
        conn: ConnHandle,
        value: &[u8],
    ) -> Disposition {
        let mtu = usize::from(pal.att_mtu(conn));
        if value.len() + 1 < mtu {
            // Final fragment. Single-fragment values skip the reassembly buffer entirely.
            if self.buf.is_empty() {
                return self.finish(events, conn, value, Ok(()));
            }
            if self.buf.extend_from_slice(value).is_err() {
                return self.finish(events, conn, &[], Err(GattError::NoMemory));
            }
            events.data_read(
                conn,
                &ReadEvent {
                    handle: self.handle,
                    offset: self.offset,
                    data: &self.buf,
                    status: Ok(()),
                },
            );
            Disposition::Terminated
        } else {
            // The PDU is full, so the value may continue past it.
            if self.buf.extend_from_slice(value).is_err() {
                return self.finish(events, conn, &[], Err(GattError::NoMemory));
            }
            let offset = self.offset + self.buf.len() as u16;
            match pal.read_attribute_blob(conn, self.handle, offset) {
                Ok(()) => Disposition::Continue,
                Err(_) => self.finish(events, conn, &[], Err(GattError::Unspecified)),
            }
        }
    }

    fn finish(
        &self,
        events: &mut dyn EventHandler,
        conn: ConnHandle,
        data: &[u8],
        status: Result<(), GattError>,
    ) -> Disposition {
        events.data_read(
            conn,
            &ReadEvent {
                handle: self.handle,
                offset: self.offset,
                data,
                status,
            },
        );
        Disposition::Terminated
    }

    pub(crate) fn fail(&self, events: &mut dyn EventHandler, conn: ConnHandle, err: GattError) {
        events.data_read(
            conn,
            &ReadEvent {
                handle: self.handle,
                offset: self.offset,
                data: &[],
                status: Err(err),
            },
        );
    }
}
