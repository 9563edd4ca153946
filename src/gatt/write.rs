//! Acknowledged writes, including long writes through the server's prepare queue.
//!
//! Values that fit a single *Write Request* are written directly. Longer values are split into
//! `MTU - 5` Byte chunks (a *Prepare Write Request* carries the handle and offset in addition to
//! the opcode), queued on the server one chunk at a time, and committed with *Execute Write*.
//!
//! When the server rejects a chunk, the queue is discarded with `Execute Write (cancel)` and the
//! failure is reported once the cancellation is acknowledged, so the procedure still produces
//! exactly one terminating event.

use crate::att::pdus::AttServerMessage;
use crate::att::{AttHandle, ErrorCode, Opcode, MAX_ATTR_VALUE_LEN};
use crate::gatt::client::Disposition;
use crate::gatt::{EventHandler, GattError, WriteEvent};
use crate::pal::{AttClient, ConnHandle};
use heapless::Vec;

pub(crate) struct WriteProcedure {
    handle: AttHandle,
    buf: Vec<u8, MAX_ATTR_VALUE_LEN>,
    /// The ATT MTU captured when the procedure started; determines the chunk size.
    mtu: u16,
    /// Offset of the next chunk to queue.
    offset: u16,
    long: bool,
    /// Failure recorded while queueing, reported when the queue cancellation is acknowledged.
    outcome: Option<(GattError, ErrorCode)>,
}

impl WriteProcedure {
    pub(crate) fn new(handle: AttHandle, value: &[u8], mtu: u16) -> Result<Self, GattError> {
        let mut buf = Vec::new();
        if buf.extend_from_slice(value).is_err() {
            return Err(GattError::NoMemory);
        }
        Ok(Self {
            handle,
            buf,
            mtu,
            offset: 0,
            long: value.len() > usize::from(mtu) - 3,
            outcome: None,
        })
    }

    pub(crate) fn begin(
        &mut self,
        pal: &mut dyn AttClient,
        conn: ConnHandle,
    ) -> Result<(), crate::Error> {
        if self.long {
            self.queue_next_chunk(pal, conn)
        } else {
            pal.write_attribute(conn, self.handle, &self.buf)
        }
    }

    fn queue_next_chunk(
        &mut self,
        pal: &mut dyn AttClient,
        conn: ConnHandle,
    ) -> Result<(), crate::Error> {
        let start = usize::from(self.offset);
        let len = (usize::from(self.mtu) - 5).min(self.buf.len() - start);
        pal.queue_prepare_write(conn, self.handle, self.offset, &self.buf[start..start + len])
    }

    pub(crate) fn handle(
        &mut self,
        pal: &mut dyn AttClient,
        events: &mut dyn EventHandler,
        conn: ConnHandle,
        msg: &AttServerMessage<'_>,
    ) -> Disposition {
        match msg {
            AttServerMessage::WriteRsp => self.finish(events, conn, Ok(()), None),

            AttServerMessage::PrepareWriteRsp { value, .. } => {
                // Advance by what the server actually queued.
                self.offset += value.len() as u16;
                if usize::from(self.offset) >= self.buf.len() {
                    match pal.execute_write_queue(conn, true) {
                        Ok(()) => Disposition::Continue,
                        Err(_) => self.finish(events, conn, Err(GattError::Unspecified), None),
                    }
                } else {
                    match self.queue_next_chunk(pal, conn) {
                        Ok(()) => Disposition::Continue,
                        Err(_) => {
                            // Don't leave half a value in the server's queue.
                            let _ = pal.execute_write_queue(conn, false);
                            self.finish(events, conn, Err(GattError::Unspecified), None)
                        }
                    }
                }
            }

            AttServerMessage::ExecuteWriteRsp => match self.outcome.take() {
                Some((err, code)) => self.finish(events, conn, Err(err), Some(code)),
                None => self.finish(events, conn, Ok(()), None),
            },

            AttServerMessage::ErrorRsp {
                req_opcode: Opcode::WriteReq,
                error_code,
                ..
            } => self.finish(
                events,
                conn,
                Err(GattError::from_att(*error_code)),
                Some(*error_code),
            ),

            AttServerMessage::ErrorRsp {
                req_opcode: Opcode::PrepareWriteReq,
                error_code,
                ..
            } => {
                self.outcome = Some((GattError::from_att(*error_code), *error_code));
                match pal.execute_write_queue(conn, false) {
                    Ok(()) => Disposition::Continue,
                    Err(_) => {
                        let (err, code) = self.outcome.take().unwrap_or_else(|| {
                            (GattError::Unspecified, ErrorCode::UnlikelyError)
                        });
                        self.finish(events, conn, Err(err), Some(code))
                    }
                }
            }

            AttServerMessage::ErrorRsp {
                req_opcode: Opcode::ExecuteWriteReq,
                error_code,
                ..
            } => match self.outcome.take() {
                // A failed chunk already decided the outcome; the cancellation failing on top
                // of it doesn't change the report.
                Some((err, code)) => self.finish(events, conn, Err(err), Some(code)),
                None => self.finish(
                    events,
                    conn,
                    Err(GattError::from_att(*error_code)),
                    Some(*error_code),
                ),
            },

            _ => {
                debug!("write: unexpected {:?}", msg);
                self.finish(events, conn, Err(GattError::Unspecified), None)
            }
        }
    }

    fn finish(
        &self,
        events: &mut dyn EventHandler,
        conn: ConnHandle,
        status: Result<(), GattError>,
        error_code: Option<ErrorCode>,
    ) -> Disposition {
        events.data_written(
            conn,
            &WriteEvent {
                handle: self.handle,
                status,
                error_code,
            },
        );
        Disposition::Terminated
    }

    pub(crate) fn fail(&self, events: &mut dyn EventHandler, conn: ConnHandle, err: GattError) {
        events.data_written(
            conn,
            &WriteEvent {
                handle: self.handle,
                status: Err(err),
                error_code: None,
            },
        );
    }
}
