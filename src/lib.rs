//! Generic Access Profile core.
//!
//! The policy layer of a Bluetooth host stack that sits above the Host
//! Controller Interface transport and below application-facing profiles: the
//! peer cache, the LE connection manager, and the BR/EDR Secure Simple
//! Pairing state machine. Wire-level HCI packet layout, the L2CAP channel
//! manager, GATT client/server, and SMP cryptographic primitives are
//! external collaborators, represented here as narrow trait objects.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod addr;
pub(crate) mod adv;
pub mod bredr;
pub mod config;
pub(crate) mod consts;
pub mod error;
pub mod hci;
pub mod le;
pub mod peer;
pub mod security;
pub mod uuid;

type SyncMutex<T> = parking_lot::Mutex<T>;
