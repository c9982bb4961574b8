//! Fragmentation of buffers larger than one CAN FD frame.
//!
//! ## Fragment frame layout
//!
//! ```text
//! +-------+-------+-----+---------+---------+-------+-----------+----------
//! | magic (LE)    | seq | frag_idx| frag_cnt| flags | total_len | payload..
//! +-------+-------+-----+---------+---------+-------+-----------+----------
//!     2B             1B      1B        1B      1B        2B (LE)
//! ```
//!
//! Every fragment is sent as a fixed-size frame (64 bytes by default), the
//! last one zero-padded. The receiver derives the per-fragment payload
//! capacity from the first fragment it sees, so the wire length must be an
//! exact CAN FD size.

use crate::error::{CanBusError, Result};
use crate::types::MAX_FD_PAYLOAD;
use bitflags::bitflags;

/// Marks a frame as a fragment ('S' 'D')
pub const FRAG_MAGIC: u16 = 0x5344;

/// Fragment frames are always sent with this payload size unless configured
pub const DEFAULT_FRAG_WIRE_LEN: usize = 64;

/// `total_len` is a 16-bit field
pub const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

/// `frag_idx` and `frag_cnt` are 8-bit fields
pub const MAX_FRAGMENTS: usize = u8::MAX as usize;

bitflags! {
    /// Fragment position markers, informational only
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FragmentFlags: u8 {
        const FIRST = 1 << 0;
        const LAST = 1 << 1;
    }
}

/// Header prefixed to every fragment's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    /// Message sequence number, shared by all fragments of a message
    pub seq: u8,
    /// Zero-based fragment index
    pub frag_idx: u8,
    /// Total fragments in the message
    pub frag_cnt: u8,
    pub flags: FragmentFlags,
    /// Reassembled message length in bytes
    pub total_len: u16,
}

impl FragmentHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Creates the header for fragment `frag_idx` of `frag_cnt`
    pub fn new(seq: u8, frag_idx: u8, frag_cnt: u8, total_len: u16) -> Self {
        let mut flags = FragmentFlags::empty();
        if frag_idx == 0 {
            flags |= FragmentFlags::FIRST;
        }
        if frag_idx == frag_cnt.wrapping_sub(1) {
            flags |= FragmentFlags::LAST;
        }
        Self {
            seq,
            frag_idx,
            frag_cnt,
            flags,
            total_len,
        }
    }

    /// Encodes the header into the start of `buf`.
    ///
    /// # Returns
    ///
    /// Number of bytes written (always 8)
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < Self::SIZE {
            return Err(CanBusError::InvalidArgument);
        }

        buf[0..2].copy_from_slice(&FRAG_MAGIC.to_le_bytes());
        buf[2] = self.seq;
        buf[3] = self.frag_idx;
        buf[4] = self.frag_cnt;
        buf[5] = self.flags.bits();
        buf[6..8].copy_from_slice(&self.total_len.to_le_bytes());

        Ok(Self::SIZE)
    }

    /// Decodes a header from the start of `buf`.
    ///
    /// Returns `None` if `buf` is too short or does not start with
    /// [`FRAG_MAGIC`]; such a frame is an ordinary single-frame message.
    /// Field values are not validated here.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        if u16::from_le_bytes([buf[0], buf[1]]) != FRAG_MAGIC {
            return None;
        }

        Some(Self {
            seq: buf[2],
            frag_idx: buf[3],
            frag_cnt: buf[4],
            flags: FragmentFlags::from_bits_retain(buf[5]),
            total_len: u16::from_le_bytes([buf[6], buf[7]]),
        })
    }
}

/// Payload bytes carried by a fragment frame of `wire_len` bytes
pub fn data_capacity(wire_len: usize) -> Result<usize> {
    if wire_len > MAX_FD_PAYLOAD {
        return Err(CanBusError::InvalidArgument);
    }
    match wire_len.saturating_sub(FragmentHeader::SIZE) {
        0 => Err(CanBusError::InvalidArgument),
        cap => Ok(cap),
    }
}

/// Number of fragments needed for `len` bytes at `data_cap` bytes each
pub fn fragment_count(len: usize, data_cap: usize) -> Result<u8> {
    if len == 0 || len > MAX_MESSAGE_LEN || data_cap == 0 {
        return Err(CanBusError::InvalidArgument);
    }
    let count = len.div_ceil(data_cap);
    u8::try_from(count).map_err(|_| CanBusError::CapacityExceeded)
}

/// Splits `payload` into fragment frames of `wire_len` bytes and hands each
/// one, in index order, to `send`.
///
/// Everything that can be rejected is rejected before the first frame goes
/// out. A failure from `send` aborts immediately and is returned as is;
/// frames already handed over stay sent.
pub fn encode_fragments<F>(payload: &[u8], seq: u8, wire_len: usize, mut send: F) -> Result<()>
where
    F: FnMut(&[u8]) -> Result<()>,
{
    let data_cap = data_capacity(wire_len)?;
    let frag_cnt = fragment_count(payload.len(), data_cap)?;
    let total_len = payload.len() as u16;

    for (idx, chunk) in payload.chunks(data_cap).enumerate() {
        let mut frame = [0u8; MAX_FD_PAYLOAD];
        let header = FragmentHeader::new(seq, idx as u8, frag_cnt, total_len);
        let offset = header.encode(&mut frame)?;
        frame[offset..offset + chunk.len()].copy_from_slice(chunk);

        send(&frame[..wire_len])?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(payload: &[u8], seq: u8, wire_len: usize) -> Result<Vec<Vec<u8>>> {
        let mut frames = Vec::new();
        encode_fragments(payload, seq, wire_len, |frame| {
            frames.push(frame.to_vec());
            Ok(())
        })?;
        Ok(frames)
    }

    #[test]
    fn test_header_wire_layout() {
        let header = FragmentHeader::new(0x11, 2, 3, 0x0102);
        let mut buf = [0u8; 8];
        assert_eq!(header.encode(&mut buf), Ok(8));
        assert_eq!(buf, [0x44, 0x53, 0x11, 0x02, 0x03, 0x02, 0x02, 0x01]);
        assert_eq!(FragmentHeader::decode(&buf), Some(header));
    }

    #[test]
    fn test_header_flags() {
        assert_eq!(
            FragmentHeader::new(0, 0, 1, 5).flags,
            FragmentFlags::FIRST | FragmentFlags::LAST
        );
        assert_eq!(FragmentHeader::new(0, 0, 3, 5).flags, FragmentFlags::FIRST);
        assert_eq!(FragmentHeader::new(0, 1, 3, 5).flags, FragmentFlags::empty());
        assert_eq!(FragmentHeader::new(0, 2, 3, 5).flags, FragmentFlags::LAST);
    }

    #[test]
    fn test_decode_rejects_short_or_foreign() {
        assert_eq!(FragmentHeader::decode(&[0x44, 0x53, 0, 0, 1, 0, 1]), None);
        assert_eq!(FragmentHeader::decode(&[0x53, 0x44, 0, 0, 1, 0, 1, 0]), None);
        assert_eq!(FragmentHeader::decode(&[0u8; 64]), None);
    }

    #[test]
    fn test_encode_buffer_too_small() {
        let header = FragmentHeader::new(0, 0, 1, 1);
        assert_eq!(
            header.encode(&mut [0u8; 4]),
            Err(CanBusError::InvalidArgument)
        );
    }

    #[test]
    fn test_fragment_count() {
        assert_eq!(fragment_count(1, 56), Ok(1));
        assert_eq!(fragment_count(56, 56), Ok(1));
        assert_eq!(fragment_count(57, 56), Ok(2));
        assert_eq!(fragment_count(255 * 56, 56), Ok(255));
        assert_eq!(
            fragment_count(255 * 56 + 1, 56),
            Err(CanBusError::CapacityExceeded)
        );
        assert_eq!(fragment_count(0, 56), Err(CanBusError::InvalidArgument));
        assert_eq!(
            fragment_count(MAX_MESSAGE_LEN + 1, 56),
            Err(CanBusError::InvalidArgument)
        );
    }

    #[test]
    fn test_data_capacity() {
        assert_eq!(data_capacity(64), Ok(56));
        assert_eq!(data_capacity(12), Ok(4));
        assert_eq!(data_capacity(8), Err(CanBusError::InvalidArgument));
        assert_eq!(data_capacity(65), Err(CanBusError::InvalidArgument));
    }

    #[test]
    fn test_frames_are_fixed_size_and_padded() {
        let payload: Vec<u8> = (0..130u8).collect();
        let frames = collect(&payload, 7, 64).unwrap();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() == 64));

        for (idx, frame) in frames.iter().enumerate() {
            let header = FragmentHeader::decode(frame).unwrap();
            assert_eq!(header.seq, 7);
            assert_eq!(header.frag_idx as usize, idx);
            assert_eq!(header.frag_cnt, 3);
            assert_eq!(header.total_len, 130);
        }

        assert_eq!(&frames[0][8..], &payload[..56]);
        assert_eq!(&frames[1][8..], &payload[56..112]);
        assert_eq!(&frames[2][8..26], &payload[112..]);
        assert!(frames[2][26..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_rejects_before_sending() {
        let too_many = vec![0u8; 255 * 56 + 1];
        let mut sent = 0;
        let result = encode_fragments(&too_many, 0, 64, |_| {
            sent += 1;
            Ok(())
        });
        assert_eq!(result, Err(CanBusError::CapacityExceeded));
        assert_eq!(sent, 0);

        assert_eq!(collect(&[], 0, 64), Err(CanBusError::InvalidArgument));
        assert_eq!(collect(&[1], 0, 8), Err(CanBusError::InvalidArgument));
    }

    #[test]
    fn test_send_failure_aborts() {
        let payload = vec![0x55u8; 200];
        let mut sent = 0;
        let result = encode_fragments(&payload, 0, 64, |_| {
            sent += 1;
            if sent == 2 {
                Err(CanBusError::HardwareFailure(3))
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Err(CanBusError::HardwareFailure(3)));
        assert_eq!(sent, 2);
    }
}
