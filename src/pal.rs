//! Platform access layer.
//!
//! The GATT client itself never touches a radio. All outgoing ATT requests are issued through the
//! [`AttClient`] trait, implemented once per platform (vendor SoftDevice, HCI transport, a mock in
//! tests). Incoming PDUs travel the other way: the platform feeds the raw payload of every ATT
//! packet into [`GattClient::process_att_pdu`].
//!
//! The engine registers its procedure state *before* calling into an `AttClient` method, so
//! implementations are free to complete a request synchronously, from the same call stack.
//!
//! [`AttClient`]: trait.AttClient.html
//! [`GattClient::process_att_pdu`]: ../gatt/struct.GattClient.html#method.process_att_pdu

use crate::att::{AttHandle, AttUuid};
use crate::Error;
use core::fmt;

/// The ATT MTU in effect on a connection before an *Exchange MTU* procedure ran.
pub const DEFAULT_ATT_MTU: u16 = 23;

/// A 16-bit handle identifying a Link-Layer connection.
///
/// The values are assigned by the platform; the engine only uses them to tell connections apart.
#[derive(Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnHandle(u16);

impl ConnHandle {
    pub fn from_raw(raw: u16) -> Self {
        ConnHandle(raw)
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Debug for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06X}", self.0)
    }
}

/// Interface to the platform's ATT transport.
///
/// Every method that issues a request returns `Ok(())` as soon as the request has been handed to
/// the stack. The eventual server response (or HVX packet) must be fed back into the engine via
/// `process_att_pdu`. A method may also complete synchronously before it returns.
///
/// On failure, implementations return [`Error::Transport`] and must not deliver a response for
/// the failed request later.
///
/// [`Error::Transport`]: ../enum.Error.html#variant.Transport
pub trait AttClient {
    /// Called once when the engine is set up, before any request is issued.
    fn initialize(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Called when the engine shuts down. No requests will be issued afterwards.
    fn terminate(&mut self) {}

    /// Returns the ATT MTU in effect on `conn`.
    fn att_mtu(&self, conn: ConnHandle) -> u16 {
        let _ = conn;
        DEFAULT_ATT_MTU
    }

    /// Returns whether the link `conn` is currently encrypted.
    ///
    /// Signed writes are only meaningful on unencrypted links; on an encrypted link the engine
    /// sends a plain *Write Command* instead.
    fn link_encrypted(&self, conn: ConnHandle) -> bool {
        let _ = conn;
        false
    }

    /// Issues an *Exchange MTU Request* proposing `mtu` as the client's receive MTU.
    fn exchange_mtu(&mut self, conn: ConnHandle, mtu: u16) -> Result<(), Error>;

    /// Issues a *Read By Group Type Request* for primary services, starting at `start` and
    /// extending to the end of the handle space.
    fn discover_primary_services(&mut self, conn: ConnHandle, start: AttHandle)
        -> Result<(), Error>;

    /// Issues a *Find By Type Value Request* for primary services with the given service UUID,
    /// starting at `start` and extending to the end of the handle space.
    fn discover_primary_services_by_uuid(
        &mut self,
        conn: ConnHandle,
        start: AttHandle,
        uuid: AttUuid,
    ) -> Result<(), Error>;

    /// Issues a *Read By Type Request* for characteristic declarations within the given handle
    /// range.
    fn discover_characteristics(
        &mut self,
        conn: ConnHandle,
        start: AttHandle,
        end: AttHandle,
    ) -> Result<(), Error>;

    /// Issues a *Find Information Request* for the given handle range.
    fn discover_descriptors(
        &mut self,
        conn: ConnHandle,
        start: AttHandle,
        end: AttHandle,
    ) -> Result<(), Error>;

    /// Issues a *Read Request* for the attribute at `handle`.
    fn read_attribute(&mut self, conn: ConnHandle, handle: AttHandle) -> Result<(), Error>;

    /// Issues a *Read Blob Request* for the attribute at `handle`, starting at byte `offset` of
    /// the attribute value.
    fn read_attribute_blob(
        &mut self,
        conn: ConnHandle,
        handle: AttHandle,
        offset: u16,
    ) -> Result<(), Error>;

    /// Sends a *Write Command*. No response is generated.
    fn write_without_response(
        &mut self,
        conn: ConnHandle,
        handle: AttHandle,
        value: &[u8],
    ) -> Result<(), Error>;

    /// Sends a *Signed Write Command*. The implementation computes and appends the authentication
    /// signature. No response is generated.
    fn signed_write_without_response(
        &mut self,
        conn: ConnHandle,
        handle: AttHandle,
        value: &[u8],
    ) -> Result<(), Error>;

    /// Issues a *Write Request* for the attribute at `handle`.
    fn write_attribute(
        &mut self,
        conn: ConnHandle,
        handle: AttHandle,
        value: &[u8],
    ) -> Result<(), Error>;

    /// Issues a *Prepare Write Request*, queueing `value` at byte `offset` of the attribute at
    /// `handle` on the server.
    fn queue_prepare_write(
        &mut self,
        conn: ConnHandle,
        handle: AttHandle,
        offset: u16,
        value: &[u8],
    ) -> Result<(), Error>;

    /// Issues an *Execute Write Request*, committing (`execute == true`) or discarding the
    /// server's prepare queue.
    fn execute_write_queue(&mut self, conn: ConnHandle, execute: bool) -> Result<(), Error>;
}
