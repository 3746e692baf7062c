//! Length-prefixed frame assembly.
//!
//! A frame is `[u16 LE packet type][u32 LE payload length][payload]`.
//! [`FrameAssembler`] is fed raw socket bytes in arbitrary slices and
//! emits complete frames; a partial header or payload stays buffered
//! for the next push. A declared payload length above
//! [`MAX_PAYLOAD_SIZE`] aborts the connection rather than allocating
//! unbounded memory.

use loam_core::PacketId;

use crate::error::WireError;

/// Bytes in the frame header: u16 packet type + u32 payload length.
pub const HEADER_SIZE: usize = 6;

/// Maximum accepted payload length in bytes.
pub const MAX_PAYLOAD_SIZE: usize = 1 << 24;

/// One complete frame as received off the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// The packet type from the header.
    pub packet_id: PacketId,
    /// The payload bytes, exactly as declared.
    pub payload: Vec<u8>,
}

/// Header parse state between pushes.
#[derive(Clone, Copy, Debug)]
enum AssemblerState {
    /// Waiting for a complete 6-byte header.
    Header,
    /// Header parsed; waiting for `length` payload bytes.
    Payload {
        packet_id: PacketId,
        length: usize,
    },
}

/// Incremental frame parser for one connection.
///
/// After any error the assembler is poisoned and the connection must
/// be dropped; no partial frame is ever emitted.
#[derive(Debug)]
pub struct FrameAssembler {
    buf: Vec<u8>,
    state: AssemblerState,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAssembler {
    /// A fresh assembler with nothing buffered.
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            state: AssemblerState::Header,
        }
    }

    /// Bytes currently buffered and not yet emitted as frames.
    pub fn buffered(&self) -> usize {
        self.buf.len()
            + match self.state {
                AssemblerState::Header => 0,
                // The consumed header counts as buffered progress.
                AssemblerState::Payload { .. } => HEADER_SIZE,
            }
    }

    /// Feed received bytes, returning every frame completed by them.
    ///
    /// # Errors
    ///
    /// [`WireError::PayloadTooLarge`] when a header declares a payload
    /// above [`MAX_PAYLOAD_SIZE`]. The caller must close the
    /// connection; the assembler's contents are unspecified afterward.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, WireError> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            match self.state {
                AssemblerState::Header => {
                    if self.buf.len() < HEADER_SIZE {
                        break;
                    }
                    let packet_id =
                        PacketId(u16::from_le_bytes([self.buf[0], self.buf[1]]));
                    let length = u32::from_le_bytes([
                        self.buf[2], self.buf[3], self.buf[4], self.buf[5],
                    ]) as usize;
                    if length > MAX_PAYLOAD_SIZE {
                        return Err(WireError::PayloadTooLarge {
                            declared: length,
                            max: MAX_PAYLOAD_SIZE,
                        });
                    }
                    self.buf.drain(..HEADER_SIZE);
                    self.state = AssemblerState::Payload { packet_id, length };
                }
                AssemblerState::Payload { packet_id, length } => {
                    if self.buf.len() < length {
                        break;
                    }
                    let payload: Vec<u8> = self.buf.drain(..length).collect();
                    self.state = AssemblerState::Header;
                    frames.push(Frame { packet_id, payload });
                }
            }
        }

        Ok(frames)
    }
}

/// Encode one outgoing frame: header plus payload.
///
/// # Errors
///
/// [`WireError::PayloadTooLarge`] when the payload exceeds
/// [`MAX_PAYLOAD_SIZE`]; such a frame would be rejected by every
/// conforming receiver.
pub fn encode_frame(packet_id: PacketId, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(WireError::PayloadTooLarge {
            declared: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&packet_id.0.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}
