//! Service and characteristic discovery.
//!
//! Discovery runs in two phases. The first phase walks the whole handle space with *Read By
//! Group Type* requests (or *Find By Type Value* when filtering by service UUID) and collects
//! the primary services. The second phase walks each collected service with *Read By Type*
//! requests for the characteristic declarations it contains.
//!
//! A characteristic's end handle isn't part of its declaration; it only becomes known when the
//! *next* declaration (or the end of the service) is seen. Reporting therefore lags one
//! declaration behind the scan.

use crate::att::pdus::AttServerMessage;
use crate::att::{AttHandle, AttUuid, ErrorCode, Opcode};
use crate::bytes::{ByteReader, FromBytes};
use crate::gatt::client::Disposition;
use crate::gatt::{
    Control, Discover, DiscoveredCharacteristic, DiscoveredService, EventHandler, GattError,
    Properties,
};
use crate::pal::{AttClient, ConnHandle};
use heapless::Vec;

enum Phase {
    Services,
    Characteristics,
}

pub(crate) struct DiscoveryProcedure<const MS: usize> {
    what: Discover,
    service_filter: Option<AttUuid>,
    characteristic_filter: Option<AttUuid>,
    phase: Phase,
    /// Services queued for the characteristic phase.
    services: Vec<DiscoveredService, MS>,
    /// Index into `services` of the service currently being scanned.
    current: usize,
    /// Last characteristic seen, waiting for its end handle to become known.
    pending: Option<DiscoveredCharacteristic>,
}

impl<const MS: usize> DiscoveryProcedure<MS> {
    pub(crate) fn new(
        what: Discover,
        service_filter: Option<AttUuid>,
        characteristic_filter: Option<AttUuid>,
    ) -> Self {
        Self {
            what,
            service_filter,
            characteristic_filter,
            phase: Phase::Services,
            services: Vec::new(),
            current: 0,
            pending: None,
        }
    }

    pub(crate) fn begin(&mut self, pal: &mut dyn AttClient, conn: ConnHandle) -> Result<(), crate::Error> {
        self.request_services(pal, conn, AttHandle::from_raw(0x0001))
    }

    fn request_services(
        &mut self,
        pal: &mut dyn AttClient,
        conn: ConnHandle,
        start: AttHandle,
    ) -> Result<(), crate::Error> {
        match self.service_filter {
            Some(uuid) => pal.discover_primary_services_by_uuid(conn, start, uuid),
            None => pal.discover_primary_services(conn, start),
        }
    }

    /// The request opcode this procedure is currently waiting for a response to.
    fn expected_req(&self) -> Opcode {
        match self.phase {
            Phase::Services => {
                if self.service_filter.is_some() {
                    Opcode::FindByTypeValueReq
                } else {
                    Opcode::ReadByGroupReq
                }
            }
            Phase::Characteristics => Opcode::ReadByTypeReq,
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
            AttServerMessage::ReadByGroupRsp(it)
                if matches!(self.phase, Phase::Services) && self.service_filter.is_none() =>
            {
                let mut last_end = AttHandle::NULL;
                for (start, end, value) in *it {
                    let uuid = match AttUuid::from_bytes(&mut ByteReader::new(value)) {
                        Ok(uuid) => uuid,
                        Err(e) => {
                            warn!("malformed service UUID in group entry: {:?}", e);
                            return self.finish(events, conn, Err(GattError::Unspecified));
                        }
                    };
                    let service = DiscoveredService {
                        uuid: Some(uuid),
                        start,
                        end,
                    };
                    match self.record_service(events, conn, service) {
                        Ok(Control::Continue) => {}
                        Ok(Control::Stop) => return self.finish(events, conn, Ok(())),
                        Err(e) => return self.finish(events, conn, Err(e)),
                    }
                    last_end = end;
                }
                self.continue_services(pal, events, conn, last_end)
            }

            AttServerMessage::FindByTypeValueRsp(it)
                if matches!(self.phase, Phase::Services) && self.service_filter.is_some() =>
            {
                let mut last_end = AttHandle::NULL;
                for (start, end) in *it {
                    // The server doesn't echo the UUID we searched for.
                    let service = DiscoveredService {
                        uuid: None,
                        start,
                        end,
                    };
                    match self.record_service(events, conn, service) {
                        Ok(Control::Continue) => {}
                        Ok(Control::Stop) => return self.finish(events, conn, Ok(())),
                        Err(e) => return self.finish(events, conn, Err(e)),
                    }
                    last_end = end;
                }
                self.continue_services(pal, events, conn, last_end)
            }

            AttServerMessage::ReadByTypeRsp(it) if matches!(self.phase, Phase::Characteristics) => {
                let service = match self.services.get(self.current) {
                    Some(service) => *service,
                    None => return self.finish(events, conn, Err(GattError::Unspecified)),
                };
                let mut last_value_handle = AttHandle::NULL;
                for (decl_handle, value) in *it {
                    let characteristic =
                        match parse_declaration_value(conn, decl_handle, value, service.end) {
                            Ok(c) => c,
                            Err(e) => {
                                warn!("malformed characteristic declaration: {:?}", e);
                                return self.finish(events, conn, Err(GattError::Unspecified));
                            }
                        };
                    if let Some(prev) = self.pending.take() {
                        let prev = DiscoveredCharacteristic {
                            end_handle: AttHandle::from_raw(decl_handle.as_u16().saturating_sub(1)),
                            ..prev
                        };
                        if let Control::Stop = self.emit_characteristic(events, &prev) {
                            return self.finish(events, conn, Ok(()));
                        }
                    }
                    last_value_handle = characteristic.value_handle;
                    self.pending = Some(characteristic);
                }
                if last_value_handle >= service.end {
                    self.advance_service(pal, events, conn)
                } else {
                    let next = AttHandle::from_raw(last_value_handle.as_u16() + 1);
                    match pal.discover_characteristics(conn, next, service.end) {
                        Ok(()) => Disposition::Continue,
                        Err(_) => self.finish(events, conn, Err(GattError::Unspecified)),
                    }
                }
            }

            AttServerMessage::ErrorRsp {
                req_opcode,
                error_code,
                ..
            } => {
                if *req_opcode != self.expected_req() {
                    // An error for a request the current phase never issued.
                    return self.finish(events, conn, Err(GattError::Unspecified));
                }
                if *error_code == ErrorCode::AttributeNotFound {
                    // The scan ran off the end of the handle space / service.
                    match self.phase {
                        Phase::Services => self.enter_characteristic_phase(pal, events, conn),
                        Phase::Characteristics => self.advance_service(pal, events, conn),
                    }
                } else {
                    self.finish(events, conn, Err(GattError::from_att(*error_code)))
                }
            }

            _ => {
                debug!("discovery: unexpected {:?}", msg);
                self.finish(events, conn, Err(GattError::Unspecified))
            }
        }
    }

    /// Queues or reports a freshly discovered service, depending on what was asked for.
    fn record_service(
        &mut self,
        events: &mut dyn EventHandler,
        conn: ConnHandle,
        service: DiscoveredService,
    ) -> Result<Control, GattError> {
        if self.what.contains(Discover::CHARACTERISTICS) {
            if self.services.push(service).is_err() {
                return Err(GattError::NoMemory);
            }
            Ok(Control::Continue)
        } else {
            Ok(events.service_discovered(conn, &service))
        }
    }

    fn continue_services(
        &mut self,
        pal: &mut dyn AttClient,
        events: &mut dyn EventHandler,
        conn: ConnHandle,
        last_end: AttHandle,
    ) -> Disposition {
        if last_end == AttHandle::MAX {
            return self.enter_characteristic_phase(pal, events, conn);
        }
        let next = AttHandle::from_raw(last_end.as_u16() + 1);
        match self.request_services(pal, conn, next) {
            Ok(()) => Disposition::Continue,
            Err(_) => self.finish(events, conn, Err(GattError::Unspecified)),
        }
    }

    fn enter_characteristic_phase(
        &mut self,
        pal: &mut dyn AttClient,
        events: &mut dyn EventHandler,
        conn: ConnHandle,
    ) -> Disposition {
        if !self.what.contains(Discover::CHARACTERISTICS) {
            return self.finish(events, conn, Ok(()));
        }
        self.phase = Phase::Characteristics;
        self.current = 0;
        self.scan_current_service(pal, events, conn)
    }

    /// Reports the current service (when asked for) and requests its characteristic
    /// declarations. Ends the procedure when all services are done.
    fn scan_current_service(
        &mut self,
        pal: &mut dyn AttClient,
        events: &mut dyn EventHandler,
        conn: ConnHandle,
    ) -> Disposition {
        let service = match self.services.get(self.current) {
            Some(service) => *service,
            None => return self.finish(events, conn, Ok(())),
        };
        if self.what.contains(Discover::SERVICES) {
            if let Control::Stop = events.service_discovered(conn, &service) {
                return self.finish(events, conn, Ok(()));
            }
        }
        match pal.discover_characteristics(conn, service.start, service.end) {
            Ok(()) => Disposition::Continue,
            Err(_) => self.finish(events, conn, Err(GattError::Unspecified)),
        }
    }

    /// Flushes the pending characteristic and moves on to the next queued service.
    fn advance_service(
        &mut self,
        pal: &mut dyn AttClient,
        events: &mut dyn EventHandler,
        conn: ConnHandle,
    ) -> Disposition {
        if let Some(prev) = self.pending.take() {
            if let Control::Stop = self.emit_characteristic(events, &prev) {
                return self.finish(events, conn, Ok(()));
            }
        }
        self.current += 1;
        self.scan_current_service(pal, events, conn)
    }

    fn emit_characteristic(
        &self,
        events: &mut dyn EventHandler,
        characteristic: &DiscoveredCharacteristic,
    ) -> Control {
        if let Some(filter) = self.characteristic_filter {
            if characteristic.uuid != filter {
                return Control::Continue;
            }
        }
        events.characteristic_discovered(characteristic)
    }

    fn finish(
        &self,
        events: &mut dyn EventHandler,
        conn: ConnHandle,
        status: Result<(), GattError>,
    ) -> Disposition {
        events.discovery_complete(conn, status);
        Disposition::Terminated
    }

    pub(crate) fn fail(&self, events: &mut dyn EventHandler, conn: ConnHandle, err: GattError) {
        events.discovery_complete(conn, Err(err));
    }
}

/// Decodes a characteristic declaration value: properties, value handle, and UUID.
fn parse_declaration_value(
    conn: ConnHandle,
    decl_handle: AttHandle,
    value: &[u8],
    service_end: AttHandle,
) -> Result<DiscoveredCharacteristic, crate::Error> {
    let mut bytes = ByteReader::new(value);
    let properties = Properties::from_bits_truncate(bytes.read_u8()?);
    let value_handle = AttHandle::from_bytes(&mut bytes)?;
    let uuid = AttUuid::from_bytes(&mut bytes)?;
    Ok(DiscoveredCharacteristic {
        connection: conn,
        uuid,
        properties,
        decl_handle,
        value_handle,
        // Corrected once the next declaration is seen.
        end_handle: service_end,
    })
}
