//! A client implementation of the Generic Attribute Profile (GATT).
//!
//! GATT describes a service framework that uses the Attribute Protocol for discovery and
//! interaction. This module contains the procedure engine ([`GattClient`]) that runs discovery,
//! read and write procedures against a remote GATT server, plus the vocabulary types those
//! procedures produce.
//!
//! Results are delivered through the [`EventHandler`] trait, which the caller passes into every
//! engine method. Each started procedure produces exactly one terminating event.
//!
//! [`GattClient`]: struct.GattClient.html
//! [`EventHandler`]: trait.EventHandler.html

mod client;
mod descriptors;
mod discovery;
#[cfg(test)]
mod mock;
mod read;
mod write;

pub use self::client::GattClient;

use crate::att::{AttHandle, AttUuid, ErrorCode};
use crate::pal::ConnHandle;
use crate::utils::HexSlice;
use bitflags::bitflags;
use core::fmt;

bitflags! {
    /// Characteristic properties, as contained in a characteristic declaration.
    pub struct Properties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RSP = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
    }
}

// bitflags 1.x can't pass the derive through, so spell the impl out.
#[cfg(feature = "defmt")]
impl defmt::Format for Properties {
    fn format(&self, f: defmt::Formatter<'_>) {
        defmt::write!(f, "Properties({=u8:b})", self.bits())
    }
}

bitflags! {
    /// Selects what a discovery procedure reports.
    ///
    /// The selection also controls *when* services are reported: with `SERVICES` alone, each
    /// service is reported as soon as its group entry arrives. When `CHARACTERISTICS` is also
    /// set, a service is reported right before its first characteristic, after the service scan
    /// has finished.
    pub struct Discover: u8 {
        const SERVICES = 0x01;
        const CHARACTERISTICS = 0x02;
    }
}

/// A primary service found during discovery.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoveredService {
    /// The service UUID, or `None` when the procedure filtered by UUID (the server does not echo
    /// it back in that case).
    pub uuid: Option<AttUuid>,
    /// Handle of the service declaration.
    pub start: AttHandle,
    /// Last attribute handle belonging to this service.
    pub end: AttHandle,
}

/// A characteristic found during discovery.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoveredCharacteristic {
    /// The connection the characteristic was discovered on.
    pub connection: ConnHandle,
    pub uuid: AttUuid,
    pub properties: Properties,
    /// Handle of the characteristic declaration.
    pub decl_handle: AttHandle,
    /// Handle of the characteristic value attribute.
    pub value_handle: AttHandle,
    /// Last attribute handle belonging to this characteristic. Descriptors live in
    /// `value_handle + 1 ..= end_handle`.
    pub end_handle: AttHandle,
}

/// A descriptor found during descriptor discovery.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoveredDescriptor {
    pub handle: AttHandle,
    pub uuid: AttUuid,
}

/// The kind of write procedure to run.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteOp {
    /// *Write Command*. Not acknowledged, completes as soon as it is sent.
    Command,
    /// *Signed Write Command*. Falls back to a plain `Command` on encrypted links.
    SignedCommand,
    /// *Write Request*, acknowledged by the server. Values that don't fit in a single request
    /// are transferred via the server's prepare queue.
    Request,
}

/// Whether an HVX packet was a notification or an indication.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HvxKind {
    Notification,
    /// The platform is expected to confirm indications on its own.
    Indication,
}

/// Procedure status codes reported in terminating events.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GattError {
    /// The procedure was aborted, or couldn't be started because another one is already running
    /// on the connection.
    InvalidState,
    /// A buffer (local or on the server) was too small for the attribute value.
    NoMemory,
    /// A parameter (usually a value offset) was outside the valid range.
    ParamOutOfRange,
    /// A handle or attribute value was rejected by the server.
    InvalidParam,
    /// The server doesn't permit the operation on this attribute.
    OperationNotPermitted,
    /// Any other failure.
    Unspecified,
}

impl GattError {
    /// Maps an ATT error code reported by the server to the status of the affected procedure.
    pub fn from_att(code: ErrorCode) -> Self {
        match code {
            ErrorCode::InvalidHandle | ErrorCode::InvalidAttributeValueLength => {
                GattError::InvalidParam
            }
            ErrorCode::ReadNotPermitted | ErrorCode::WriteNotPermitted => {
                GattError::OperationNotPermitted
            }
            ErrorCode::InvalidOffset => GattError::ParamOutOfRange,
            ErrorCode::InsufficientResources => GattError::NoMemory,
            _ => GattError::Unspecified,
        }
    }
}

impl fmt::Display for GattError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GattError::InvalidState => "procedure already running or aborted",
            GattError::NoMemory => "out of buffer space",
            GattError::ParamOutOfRange => "parameter out of range",
            GattError::InvalidParam => "invalid parameter",
            GattError::OperationNotPermitted => "operation not permitted",
            GattError::Unspecified => "unspecified error",
        })
    }
}

/// Tells the engine whether to keep a procedure running.
///
/// Returned by the per-item [`EventHandler`] callbacks.
///
/// [`EventHandler`]: trait.EventHandler.html
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[must_use]
pub enum Control {
    /// Keep going.
    Continue,
    /// Stop the procedure early. Its terminating event is still delivered.
    Stop,
}

/// A completed (or failed) read, delivered via [`EventHandler::data_read`].
///
/// [`EventHandler::data_read`]: trait.EventHandler.html#method.data_read
#[derive(Debug, Copy, Clone)]
pub struct ReadEvent<'a> {
    /// The attribute that was read.
    pub handle: AttHandle,
    /// Offset of `data` within the attribute value, as requested by the caller. Reassembled
    /// long reads are delivered in one piece.
    pub offset: u16,
    /// The attribute value. Empty if the read failed.
    pub data: &'a [u8],
    pub status: Result<(), GattError>,
}

/// A completed (or failed) write, delivered via [`EventHandler::data_written`].
///
/// [`EventHandler::data_written`]: trait.EventHandler.html#method.data_written
#[derive(Debug, Copy, Clone)]
pub struct WriteEvent {
    /// The attribute that was written.
    pub handle: AttHandle,
    pub status: Result<(), GattError>,
    /// The raw ATT error code, when the server rejected the write.
    pub error_code: Option<ErrorCode>,
}

/// A *Handle Value Notification* or *Indication* received from the server.
#[derive(Debug, Copy, Clone)]
pub struct Hvx<'a> {
    pub kind: HvxKind,
    pub handle: AttHandle,
    pub data: HexSlice<&'a [u8]>,
}

/// Receives the results of GATT procedures.
///
/// An implementation of this trait is passed into every [`GattClient`] method; events produced by
/// that call (and by responses processed by it) are delivered before the method returns. All
/// methods default to ignoring the event, so implementors only write out the ones they care
/// about.
///
/// [`GattClient`]: struct.GattClient.html
pub trait EventHandler {
    /// A primary service was found.
    ///
    /// Returning [`Control::Stop`] ends the discovery procedure; the terminating
    /// [`discovery_complete`] event still follows.
    ///
    /// [`Control::Stop`]: enum.Control.html#variant.Stop
    /// [`discovery_complete`]: #method.discovery_complete
    fn service_discovered(&mut self, conn: ConnHandle, service: &DiscoveredService) -> Control {
        let _ = (conn, service);
        Control::Continue
    }

    /// A characteristic was found.
    fn characteristic_discovered(&mut self, characteristic: &DiscoveredCharacteristic) -> Control {
        let _ = characteristic;
        Control::Continue
    }

    /// A service/characteristic discovery procedure finished.
    fn discovery_complete(&mut self, conn: ConnHandle, status: Result<(), GattError>) {
        let _ = (conn, status);
    }

    /// A descriptor was found.
    fn descriptor_discovered(&mut self, conn: ConnHandle, descriptor: &DiscoveredDescriptor) -> Control {
        let _ = (conn, descriptor);
        Control::Continue
    }

    /// A descriptor discovery procedure finished for the given characteristic.
    fn descriptor_discovery_complete(
        &mut self,
        conn: ConnHandle,
        characteristic: &DiscoveredCharacteristic,
        status: Result<(), GattError>,
    ) {
        let _ = (conn, characteristic, status);
    }

    /// A read procedure finished.
    fn data_read(&mut self, conn: ConnHandle, event: &ReadEvent<'_>) {
        let _ = (conn, event);
    }

    /// A write procedure finished.
    fn data_written(&mut self, conn: ConnHandle, event: &WriteEvent) {
        let _ = (conn, event);
    }

    /// A notification or indication arrived.
    fn hvx(&mut self, conn: ConnHandle, hvx: &Hvx<'_>) {
        let _ = (conn, hvx);
    }

    /// An *Exchange MTU* procedure finished and `mtu` is now in effect on `conn`.
    fn att_mtu_exchanged(&mut self, conn: ConnHandle, mtu: u16) {
        let _ = (conn, mtu);
    }

    /// A *Signed Write Command* left the device.
    fn signed_write_command_sent(&mut self, conn: ConnHandle, handle: AttHandle) {
        let _ = (conn, handle);
    }

    /// The engine is shutting down. Emitted once by [`GattClient::reset`], before the aborted
    /// procedures report [`GattError::InvalidState`].
    ///
    /// [`GattClient::reset`]: struct.GattClient.html#method.reset
    /// [`GattError::InvalidState`]: enum.GattError.html#variant.InvalidState
    fn shutdown(&mut self) {}
}
