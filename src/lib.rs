//! A transport-agnostic BLE GATT client.
//!
//! This crate implements the client side of the *Generic Attribute Profile*: discovery of
//! services, characteristics and descriptors, short and long reads, the various flavors of
//! writes, and delivery of notifications and indications.
//!
//! It is runtime and hardware-agnostic: the actual ATT transport (a vendor stack, an HCI link,
//! or a mock in tests) is plugged in via the [`AttClient`] trait, and results are delivered
//! through the [`EventHandler`] trait. The engine itself never blocks and never allocates; all
//! procedure state lives inside the [`GattClient`] value.
//!
//! Raw ATT packets received from the server are fed into
//! [`GattClient::process_att_pdu`], which advances whatever procedure is running on that
//! connection.
//!
//! [`AttClient`]: pal/trait.AttClient.html
//! [`EventHandler`]: gatt/trait.EventHandler.html
//! [`GattClient`]: gatt/struct.GattClient.html
//! [`GattClient::process_att_pdu`]: gatt/struct.GattClient.html#method.process_att_pdu

// We're `#[no_std]`, except when we're testing
#![cfg_attr(not(test), no_std)]
// Deny a few warnings in doctests, since rustdoc `allow`s many warnings by default
#![doc(test(attr(deny(unused_imports, unused_must_use))))]
#![warn(rust_2018_idioms)]
// The claims of this lint are dubious, disable it
#![allow(clippy::trivially_copy_pass_by_ref)]

#[macro_use]
mod log;
#[macro_use]
mod utils;
pub mod att;
pub mod bytes;
mod error;
pub mod gatt;
pub mod pal;
pub mod uuid;

pub use self::error::Error;
pub use self::utils::HexSlice;
