//! Descriptor discovery.
//!
//! Descriptors occupy the handles between a characteristic's value attribute and the
//! characteristic's end handle. They are enumerated with *Find Information* requests, which
//! return every attribute in the range along with its type.

use crate::att::pdus::AttServerMessage;
use crate::att::{AttHandle, ErrorCode, Opcode};
use crate::gatt::client::Disposition;
use crate::gatt::{Control, DiscoveredCharacteristic, DiscoveredDescriptor, EventHandler, GattError};
use crate::pal::{AttClient, ConnHandle};

pub(crate) struct DescriptorProcedure {
    characteristic: DiscoveredCharacteristic,
}

impl DescriptorProcedure {
    pub(crate) fn new(characteristic: DiscoveredCharacteristic) -> Self {
        Self { characteristic }
    }

    pub(crate) fn begin(
        &mut self,
        pal: &mut dyn AttClient,
        conn: ConnHandle,
    ) -> Result<(), crate::Error> {
        // The caller checked that at least one handle follows the value attribute.
        let start = AttHandle::from_raw(self.characteristic.value_handle.as_u16() + 1);
        pal.discover_descriptors(conn, start, self.characteristic.end_handle)
    }

    pub(crate) fn handle(
        &mut self,
        pal: &mut dyn AttClient,
        events: &mut dyn EventHandler,
        conn: ConnHandle,
        msg: &AttServerMessage<'_>,
    ) -> Disposition {
        match msg {
            AttServerMessage::FindInformationRsp(it) => {
                let mut last = AttHandle::NULL;
                for (handle, uuid) in *it {
                    let descriptor = DiscoveredDescriptor { handle, uuid };
                    if let Control::Stop = events.descriptor_discovered(conn, &descriptor) {
                        return self.finish(events, conn, Ok(()));
                    }
                    last = handle;
                }
                if last >= self.characteristic.end_handle {
                    return self.finish(events, conn, Ok(()));
                }
                let next = AttHandle::from_raw(last.as_u16() + 1);
                match pal.discover_descriptors(conn, next, self.characteristic.end_handle) {
                    Ok(()) => Disposition::Continue,
                    Err(_) => self.finish(events, conn, Err(GattError::Unspecified)),
                }
            }

            AttServerMessage::ErrorRsp {
                req_opcode: Opcode::FindInformationReq,
                error_code,
                ..
            } => {
                if *error_code == ErrorCode::AttributeNotFound {
                    // The range contained attributes we already saw, or none at all.
                    self.finish(events, conn, Ok(()))
                } else {
                    self.finish(events, conn, Err(GattError::from_att(*error_code)))
                }
            }

            _ => {
                debug!("descriptor discovery: unexpected {:?}", msg);
                self.finish(events, conn, Err(GattError::Unspecified))
            }
        }
    }

    fn finish(
        &self,
        events: &mut dyn EventHandler,
        conn: ConnHandle,
        status: Result<(), GattError>,
    ) -> Disposition {
        events.descriptor_discovery_complete(conn, &self.characteristic, status);
        Disposition::Terminated
    }

    pub(crate) fn fail(&self, events: &mut dyn EventHandler, conn: ConnHandle, err: GattError) {
        events.descriptor_discovery_complete(conn, &self.characteristic, Err(err));
    }
}

#[cfg(test)]
mod tests {
    use super::super::mock::{Event, Issued, MockPal, Recorder};
    use super::super::GattClient;
    use crate::att::AttHandle;
    use crate::gatt::{DiscoveredCharacteristic, GattError, Properties};
    use crate::pal::ConnHandle;
    use crate::uuid::Uuid16;

    fn conn() -> ConnHandle {
        ConnHandle::from_raw(1)
    }

    fn client() -> (GattClient<MockPal>, Recorder) {
        (GattClient::new(MockPal::new()).unwrap(), Recorder::new())
    }

    fn characteristic(value: u16, end: u16) -> DiscoveredCharacteristic {
        DiscoveredCharacteristic {
            connection: conn(),
            uuid: Uuid16(0x2A19).into(),
            properties: Properties::READ | Properties::NOTIFY,
            decl_handle: AttHandle::from_raw(value - 1),
            value_handle: AttHandle::from_raw(value),
            end_handle: AttHandle::from_raw(end),
        }
    }

    #[test]
    fn descriptors_in_range() {
        let (mut client, mut events) = client();
        client
            .discover_descriptors(&mut events, conn(), &characteristic(3, 5))
            .unwrap();
        assert_eq!(
            client.pal_mut().take(),
            vec![Issued::DiscoverDescriptors { start: 4, end: 5 }]
        );

        client.process_att_pdu(
            &mut events,
            conn(),
            &[0x05, 0x01, 0x04, 0x00, 0x02, 0x29, 0x05, 0x00, 0x01, 0x29],
        );
        assert_eq!(
            events.take(),
            vec![
                Event::Descriptor {
                    handle: 4,
                    uuid: Uuid16(0x2902).into(),
                },
                Event::Descriptor {
                    handle: 5,
                    uuid: Uuid16(0x2901).into(),
                },
                Event::DescriptorsComplete {
                    characteristic: 3,
                    status: Ok(()),
                },
            ]
        );
        assert_eq!(client.pal_mut().take(), vec![]);
    }

    #[test]
    fn empty_range_completes_without_request() {
        let (mut client, mut events) = client();
        client
            .discover_descriptors(&mut events, conn(), &characteristic(3, 3))
            .unwrap();
        assert_eq!(client.pal_mut().take(), vec![]);
        assert_eq!(
            events.take(),
            vec![Event::DescriptorsComplete {
                characteristic: 3,
                status: Ok(()),
            }]
        );
        // The slot was never claimed.
        client
            .discover_descriptors(&mut events, conn(), &characteristic(3, 5))
            .unwrap();
    }

    #[test]
    fn paginates_until_end_of_range() {
        let (mut client, mut events) = client();
        client
            .discover_descriptors(&mut events, conn(), &characteristic(3, 6))
            .unwrap();
        client.pal_mut().take();

        client.process_att_pdu(&mut events, conn(), &[0x05, 0x01, 0x04, 0x00, 0x02, 0x29]);
        assert_eq!(
            client.pal_mut().take(),
            vec![Issued::DiscoverDescriptors { start: 5, end: 6 }]
        );

        // Nothing in the rest of the range.
        client.process_att_pdu(&mut events, conn(), &[0x01, 0x04, 0x05, 0x00, 0x0A]);
        assert_eq!(
            events.take(),
            vec![
                Event::Descriptor {
                    handle: 4,
                    uuid: Uuid16(0x2902).into(),
                },
                Event::DescriptorsComplete {
                    characteristic: 3,
                    status: Ok(()),
                },
            ]
        );
    }

    #[test]
    fn stop_after_first_descriptor() {
        let (mut client, mut events) = client();
        events.descriptor_budget = Some(1);
        client
            .discover_descriptors(&mut events, conn(), &characteristic(3, 5))
            .unwrap();
        client.pal_mut().take();

        client.process_att_pdu(
            &mut events,
            conn(),
            &[0x05, 0x01, 0x04, 0x00, 0x02, 0x29, 0x05, 0x00, 0x01, 0x29],
        );
        assert_eq!(
            events.take(),
            vec![
                Event::Descriptor {
                    handle: 4,
                    uuid: Uuid16(0x2902).into(),
                },
                Event::DescriptorsComplete {
                    characteristic: 3,
                    status: Ok(()),
                },
            ]
        );
        assert_eq!(client.pal_mut().take(), vec![]);
    }

    #[test]
    fn server_error_terminates() {
        let (mut client, mut events) = client();
        client
            .discover_descriptors(&mut events, conn(), &characteristic(3, 5))
            .unwrap();
        client.process_att_pdu(&mut events, conn(), &[0x01, 0x04, 0x04, 0x00, 0x0E]);
        assert_eq!(
            events.take(),
            vec![Event::DescriptorsComplete {
                characteristic: 3,
                status: Err(GattError::Unspecified),
            }]
        );
    }

    #[test]
    fn unexpected_response_terminates() {
        let (mut client, mut events) = client();
        client
            .discover_descriptors(&mut events, conn(), &characteristic(3, 5))
            .unwrap();
        client.pal_mut().take();

        // A Read Response can't belong to descriptor discovery.
        client.process_att_pdu(&mut events, conn(), &[0x0B, 0x01]);
        assert_eq!(
            events.take(),
            vec![Event::DescriptorsComplete {
                characteristic: 3,
                status: Err(GattError::Unspecified),
            }]
        );
    }

    #[test]
    fn inverted_range_rejected() {
        let (mut client, mut events) = client();
        let mut bad = characteristic(3, 5);
        bad.end_handle = AttHandle::from_raw(2);
        assert_eq!(
            client.discover_descriptors(&mut events, conn(), &bad),
            Err(GattError::InvalidParam)
        );
    }
}
