//! Self-describing binary wire protocol for the loam world engine.
//!
//! Everything that crosses the network boundary goes through this
//! crate: a type-tagged value codec ([`Encoder`]/[`Decoder`]), a
//! length-prefixed frame assembler ([`FrameAssembler`]), and a
//! numeric-ID packet registry ([`PacketRegistry`]).
//!
//! # Wire format
//!
//! Frames are `[u16 LE packet type][u32 LE payload length][payload]`.
//! Within a payload, every value is preceded by a tag byte from a
//! fixed table (see [`tag`]), which supports type validation without
//! an external schema. All numbers are little-endian regardless of
//! host order.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod frame;
pub mod packet;
pub mod value;

pub use error::{HandleError, WireError};
pub use frame::{encode_frame, Frame, FrameAssembler, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use packet::{Packet, PacketFactory, PacketRegistry};
pub use value::{tag, Decoder, Encoder};
