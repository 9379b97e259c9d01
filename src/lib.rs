//! GSM/GPRS Um-side protocol core.
//!
//! This crate implements the transport-independent heart of a mobile-station
//! / base-station toolkit: message buffers with headroom and layer pointers,
//! the GSM TLV information-element codec family, the NS and BSSGP sublayers
//! of the Gb interface, the SMS connection-management (CP) and relay (RP)
//! state machines, and a frame-number-indexed TDMA burst scheduler.
//!
//! Everything is instance-scoped: a [`stack::ProtocolStack`] owns the
//! protocol entities, the timer wheel and the I/O selector, and runs them
//! from a single-threaded, cooperative event loop.  Peripheral concerns
//! (operator consoles, audio paths, radio firmware) live outside this crate
//! and talk to it through the interfaces in [`prim`], [`ipa`] and [`ctrl`].

#![warn(rust_2018_idioms)]
#![allow(clippy::upper_case_acronyms)]

#[macro_use]
extern crate log;

pub mod config;
pub mod ctrl;
pub mod gb;
pub mod gsm48;
pub mod ipa;
pub mod msgb;
pub mod prim;
pub mod sched;
pub mod select;
pub mod sms;
pub mod stack;
pub mod timer;
pub mod tlv;

pub use msgb::Msgb;
