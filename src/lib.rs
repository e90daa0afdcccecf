//! Reader and tag-simulator state machines for the Hitag-S family of
//! 125 kHz transponders.
//!
//! This crate implements the protocol core only: framing selection,
//! the keystream cipher, the bit-level frame codec, the memory/access-control
//! model, and the two peer state machines (reader driver and tag responder).
//! The analog front end (FPGA bitstream, edge-detect capture, bit slicer),
//! the host command dispatcher, and persistent storage of a captured tag
//! image are all external collaborators, reached through the narrow traits
//! in [`io`].
//!
//! ## Layout
//!
//! - [`framing`] — SOF length / line code selection (C1).
//! - [`cipher`] — 48-bit nonlinear-filter keystream (C2).
//! - [`codec`] — bit-level frame packing and the Hitag-1 CRC-8 (C3).
//! - [`memory`] — page array, configuration view, access control (C4).
//! - [`tag`] — tag responder state machine (C5).
//! - [`reader`] — reader driver: select/authenticate/read/write (C6).
//! - [`io`] — transceiver/trace/field-control traits (C8).
//! - [`host`] — request/reply shapes for the external command surface.
//! - [`config`] — timing constants and behaviour flags for a reader session.
//! - [`error`] — status/reason codes shared by every top-level entry point.
//!
//! ## Example
//!
//! ```
//! use hitag_s::memory::TagImage;
//! use hitag_s::tag::TagResponder;
//!
//! let mut responder = TagResponder::new(TagImage::demo());
//! assert_eq!(responder.image().uid(), [0x5F, 0xC2, 0x11, 0x84]);
//! ```
// rustc lints.
#![warn(
    bare_trait_objects,
    missing_copy_implementations,
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications
)]

#[macro_use]
mod macros;

pub mod error;
pub mod framing;
pub mod codec;
pub mod memory;
pub mod cipher;
pub mod io;
pub mod tag;
pub mod reader;
pub mod host;
pub mod config;

pub use error::{HitagError, HitagResult, Reason, Status};
