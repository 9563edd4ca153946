//! The procedure engine.

use crate::att::pdus::AttServerMessage;
use crate::att::{AttHandle, AttUuid, MAX_ATTR_VALUE_LEN};
use crate::bytes::{ByteReader, FromBytes};
use crate::gatt::descriptors::DescriptorProcedure;
use crate::gatt::discovery::DiscoveryProcedure;
use crate::gatt::read::ReadProcedure;
use crate::gatt::write::WriteProcedure;
use crate::gatt::{
    Discover, DiscoveredCharacteristic, EventHandler, GattError, Hvx, HvxKind, WriteOp,
};
use crate::pal::{AttClient, ConnHandle};
use crate::utils::HexSlice;
use crate::Error;
use heapless::Vec;

/// Whether a procedure wants to keep its registry slot.
pub(crate) enum Disposition {
    /// The procedure is waiting for further server responses.
    Continue,
    /// The procedure delivered its terminating event and can be dropped.
    Terminated,
}

/// State of one in-flight procedure, tagged with the connection it runs on.
struct Slot<const MS: usize> {
    conn: ConnHandle,
    procedure: Procedure<MS>,
}

enum Procedure<const MS: usize> {
    Discovery(DiscoveryProcedure<MS>),
    Read(ReadProcedure),
    Write(WriteProcedure),
    Descriptors(DescriptorProcedure),
}

impl<const MS: usize> Procedure<MS> {
    /// Issues the procedure's first request.
    ///
    /// Called right after the procedure was registered, so that an `AttClient` completing the
    /// request synchronously finds the procedure state in place.
    fn begin(&mut self, pal: &mut dyn AttClient, conn: ConnHandle) -> Result<(), Error> {
        match self {
            Procedure::Discovery(p) => p.begin(pal, conn),
            Procedure::Read(p) => p.begin(pal, conn),
            Procedure::Write(p) => p.begin(pal, conn),
            Procedure::Descriptors(p) => p.begin(pal, conn),
        }
    }

    fn handle(
        &mut self,
        pal: &mut dyn AttClient,
        events: &mut dyn EventHandler,
        conn: ConnHandle,
        msg: &AttServerMessage<'_>,
    ) -> Disposition {
        match self {
            Procedure::Discovery(p) => p.handle(pal, events, conn, msg),
            Procedure::Read(p) => p.handle(pal, events, conn, msg),
            Procedure::Write(p) => p.handle(pal, events, conn, msg),
            Procedure::Descriptors(p) => p.handle(pal, events, conn, msg),
        }
    }

    /// Delivers the procedure's terminating event with an error status.
    fn fail(&self, events: &mut dyn EventHandler, conn: ConnHandle, err: GattError) {
        match self {
            Procedure::Discovery(p) => p.fail(events, conn, err),
            Procedure::Read(p) => p.fail(events, conn, err),
            Procedure::Write(p) => p.fail(events, conn, err),
            Procedure::Descriptors(p) => p.fail(events, conn, err),
        }
    }
}

/// A GATT client running procedures against remote servers.
///
/// The engine runs at most one procedure per connection (`MAX_PROCEDURES` connections in
/// parallel); starting a second one on the same connection fails with
/// [`GattError::InvalidState`]. `MAX_SERVICES` bounds the number of services a single discovery
/// procedure can queue for characteristic scanning.
///
/// Every method that can produce events takes the [`EventHandler`] as an argument, so the
/// handler can freely borrow from the caller's environment.
///
/// [`GattError::InvalidState`]: enum.GattError.html#variant.InvalidState
/// [`EventHandler`]: trait.EventHandler.html
pub struct GattClient<T: AttClient, const MAX_PROCEDURES: usize = 1, const MAX_SERVICES: usize = 8>
{
    pal: T,
    registry: Vec<Slot<MAX_SERVICES>, MAX_PROCEDURES>,
}

impl<T: AttClient, const MP: usize, const MS: usize> GattClient<T, MP, MS> {
    /// Creates a client on top of the given transport and initializes the transport.
    pub fn new(mut pal: T) -> Result<Self, Error> {
        pal.initialize()?;
        Ok(Self {
            pal,
            registry: Vec::new(),
        })
    }

    /// Returns a reference to the underlying transport.
    pub fn pal(&self) -> &T {
        &self.pal
    }

    /// Returns a mutable reference to the underlying transport.
    pub fn pal_mut(&mut self) -> &mut T {
        &mut self.pal
    }

    /// Returns whether a procedure is currently running on `conn`.
    pub fn procedure_pending(&self, conn: ConnHandle) -> bool {
        self.registry.iter().any(|slot| slot.conn == conn)
    }

    /// Starts a service/characteristic discovery procedure on `conn`.
    ///
    /// `what` selects which entities are reported; see [`Discover`] for how it also affects
    /// service reporting order. With `service` set, only services with that UUID are scanned.
    /// With `characteristic` set, only matching characteristics are reported (but all of them
    /// are still scanned, since the scan has to walk every declaration anyway).
    ///
    /// An empty `what` completes immediately without talking to the server.
    ///
    /// [`Discover`]: struct.Discover.html
    pub fn start_discovery(
        &mut self,
        events: &mut dyn EventHandler,
        conn: ConnHandle,
        what: Discover,
        service: Option<AttUuid>,
        characteristic: Option<AttUuid>,
    ) -> Result<(), GattError> {
        if what.is_empty() {
            events.discovery_complete(conn, Ok(()));
            return Ok(());
        }
        self.register(
            conn,
            Procedure::Discovery(DiscoveryProcedure::new(what, service, characteristic)),
        )?;
        self.kick_off(conn)
    }

    /// Starts a read procedure for the attribute at `handle`, beginning at byte `offset` of the
    /// attribute value.
    ///
    /// Values longer than a single response are reassembled via *Read Blob* requests and
    /// delivered in one piece.
    pub fn read(
        &mut self,
        events: &mut dyn EventHandler,
        conn: ConnHandle,
        handle: AttHandle,
        offset: u16,
    ) -> Result<(), GattError> {
        let _ = events;
        if handle == AttHandle::NULL {
            return Err(GattError::InvalidParam);
        }
        // No attribute value extends past the 512-Byte ATT bound.
        if usize::from(offset) >= MAX_ATTR_VALUE_LEN {
            return Err(GattError::ParamOutOfRange);
        }
        self.register(conn, Procedure::Read(ReadProcedure::new(handle, offset)))?;
        self.kick_off(conn)
    }

    /// Starts a write procedure for the attribute at `handle`.
    ///
    /// Commands don't occupy the connection's procedure slot and are not confirmed by the
    /// server; the `Ok` return means the command was handed to the transport, and no event
    /// follows. Requests are acknowledged by the server; values that don't fit a single request
    /// are transferred through the server's prepare queue and committed with *Execute Write*.
    pub fn write(
        &mut self,
        events: &mut dyn EventHandler,
        conn: ConnHandle,
        op: WriteOp,
        handle: AttHandle,
        value: &[u8],
    ) -> Result<(), GattError> {
        if handle == AttHandle::NULL {
            return Err(GattError::InvalidParam);
        }
        let mtu = usize::from(self.pal.att_mtu(conn));
        match op {
            WriteOp::Command => {
                if value.len() > mtu - 3 {
                    return Err(GattError::ParamOutOfRange);
                }
                self.pal
                    .write_without_response(conn, handle, value)
                    .map_err(|_| GattError::Unspecified)?;
            }
            WriteOp::SignedCommand => {
                if self.pal.link_encrypted(conn) {
                    // The link already authenticates the data, fall back to a plain command.
                    if value.len() > mtu - 3 {
                        return Err(GattError::ParamOutOfRange);
                    }
                    self.pal
                        .write_without_response(conn, handle, value)
                        .map_err(|_| GattError::Unspecified)?;
                } else {
                    // 12 Bytes of signature follow the value.
                    if value.len() > mtu - 15 {
                        return Err(GattError::ParamOutOfRange);
                    }
                    self.pal
                        .signed_write_without_response(conn, handle, value)
                        .map_err(|_| GattError::Unspecified)?;
                    events.signed_write_command_sent(conn, handle);
                }
            }
            WriteOp::Request => {
                let procedure = WriteProcedure::new(handle, value, self.pal.att_mtu(conn))?;
                self.register(conn, Procedure::Write(procedure))?;
                return self.kick_off(conn);
            }
        }
        Ok(())
    }

    /// Starts descriptor discovery for the given characteristic.
    ///
    /// Completes immediately when the characteristic's handle range can't contain descriptors.
    pub fn discover_descriptors(
        &mut self,
        events: &mut dyn EventHandler,
        conn: ConnHandle,
        characteristic: &DiscoveredCharacteristic,
    ) -> Result<(), GattError> {
        if characteristic.value_handle > characteristic.end_handle {
            return Err(GattError::InvalidParam);
        }
        if characteristic.value_handle == characteristic.end_handle {
            events.descriptor_discovery_complete(conn, characteristic, Ok(()));
            return Ok(());
        }
        self.register(
            conn,
            Procedure::Descriptors(DescriptorProcedure::new(*characteristic)),
        )?;
        self.kick_off(conn)
    }

    /// Requests an ATT MTU of `mtu` on `conn`.
    ///
    /// MTU exchange doesn't occupy the connection's procedure slot; the result is reported via
    /// [`EventHandler::att_mtu_exchanged`] once the server's response is processed.
    ///
    /// [`EventHandler::att_mtu_exchanged`]: trait.EventHandler.html#method.att_mtu_exchanged
    pub fn exchange_mtu(&mut self, conn: ConnHandle, mtu: u16) -> Result<(), GattError> {
        if mtu < crate::pal::DEFAULT_ATT_MTU {
            return Err(GattError::ParamOutOfRange);
        }
        self.pal
            .exchange_mtu(conn, mtu)
            .map_err(|_| GattError::Unspecified)
    }

    /// Processes the payload of an ATT packet received on `conn`.
    ///
    /// This advances the procedure running on `conn` (if any) and delivers resulting events.
    /// Malformed packets, packets for connections without a running procedure, and PDU types the
    /// client has no use for are logged and dropped. A response the running procedure didn't ask
    /// for terminates it with [`GattError::Unspecified`].
    ///
    /// [`GattError::Unspecified`]: enum.GattError.html#variant.Unspecified
    pub fn process_att_pdu(
        &mut self,
        events: &mut dyn EventHandler,
        conn: ConnHandle,
        payload: &[u8],
    ) {
        let msg = match AttServerMessage::from_bytes(&mut ByteReader::new(payload)) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(
                    "malformed ATT PDU on {:?}: {:?} ({})",
                    conn,
                    HexSlice(payload),
                    e
                );
                return;
            }
        };

        // HVX and MTU exchange are connection-level, not tied to a procedure.
        match msg {
            AttServerMessage::HandleValueNotification { handle, value } => {
                events.hvx(
                    conn,
                    &Hvx {
                        kind: HvxKind::Notification,
                        handle,
                        data: HexSlice(value),
                    },
                );
                return;
            }
            AttServerMessage::HandleValueIndication { handle, value } => {
                events.hvx(
                    conn,
                    &Hvx {
                        kind: HvxKind::Indication,
                        handle,
                        data: HexSlice(value),
                    },
                );
                return;
            }
            AttServerMessage::ExchangeMtuRsp { .. } => {
                // The transport tracks the negotiated value; report what's now in effect.
                events.att_mtu_exchanged(conn, self.pal.att_mtu(conn));
                return;
            }
            AttServerMessage::Unknown { opcode, params } => {
                trace!("ignoring PDU {:?} {:?} on {:?}", opcode, params, conn);
                return;
            }
            _ => {}
        }

        let Self { pal, registry } = self;
        let idx = match registry.iter().position(|slot| slot.conn == conn) {
            Some(idx) => idx,
            None => {
                debug!("no procedure on {:?}, dropping {:?}", conn, msg);
                return;
            }
        };
        match registry[idx].procedure.handle(pal, events, conn, &msg) {
            Disposition::Continue => {}
            Disposition::Terminated => {
                registry.swap_remove(idx);
            }
        }
    }

    /// Aborts the procedure running on `conn`.
    ///
    /// The procedure's terminating event is delivered with [`GattError::InvalidState`] before
    /// this returns. Fails with `InvalidState` when nothing is running on `conn`.
    ///
    /// [`GattError::InvalidState`]: enum.GattError.html#variant.InvalidState
    pub fn abort(
        &mut self,
        events: &mut dyn EventHandler,
        conn: ConnHandle,
    ) -> Result<(), GattError> {
        match self.take_slot(conn) {
            Some(slot) => {
                slot.procedure.fail(events, conn, GattError::InvalidState);
                Ok(())
            }
            None => Err(GattError::InvalidState),
        }
    }

    /// Handles an ATT transaction timeout on `conn`.
    ///
    /// The procedure running on `conn` is terminated with [`GattError::Unspecified`]. Stale
    /// timeouts (no procedure running, because it already completed) are ignored.
    ///
    /// [`GattError::Unspecified`]: enum.GattError.html#variant.Unspecified
    pub fn timeout(&mut self, events: &mut dyn EventHandler, conn: ConnHandle) {
        match self.take_slot(conn) {
            Some(slot) => slot.procedure.fail(events, conn, GattError::Unspecified),
            None => trace!("stale timeout on {:?}", conn),
        }
    }

    /// Shuts the engine down.
    ///
    /// Emits [`EventHandler::shutdown`], then terminates every running procedure with
    /// [`GattError::InvalidState`] and finally tears down the transport.
    ///
    /// [`EventHandler::shutdown`]: trait.EventHandler.html#method.shutdown
    /// [`GattError::InvalidState`]: enum.GattError.html#variant.InvalidState
    pub fn reset(&mut self, events: &mut dyn EventHandler) {
        events.shutdown();
        while let Some(slot) = self.registry.pop() {
            slot.procedure.fail(events, slot.conn, GattError::InvalidState);
        }
        self.pal.terminate();
    }

    fn take_slot(&mut self, conn: ConnHandle) -> Option<Slot<MS>> {
        let idx = self.registry.iter().position(|slot| slot.conn == conn)?;
        Some(self.registry.swap_remove(idx))
    }

    /// Claims the procedure slot for `conn`.
    fn register(&mut self, conn: ConnHandle, procedure: Procedure<MS>) -> Result<(), GattError> {
        if self.registry.iter().any(|slot| slot.conn == conn) {
            return Err(GattError::InvalidState);
        }
        self.registry
            .push(Slot { conn, procedure })
            .map_err(|_| GattError::NoMemory)
    }

    /// Issues the first request of the just-registered procedure, unregistering it again when
    /// the transport refuses.
    fn kick_off(&mut self, conn: ConnHandle) -> Result<(), GattError> {
        let Self { pal, registry } = self;
        let idx = registry.len() - 1;
        debug_assert!(registry[idx].conn == conn);
        match registry[idx].procedure.begin(pal, conn) {
            Ok(()) => Ok(()),
            Err(_) => {
                registry.swap_remove(idx);
                Err(GattError::Unspecified)
            }
        }
    }
}
