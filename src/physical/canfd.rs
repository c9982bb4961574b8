//! CAN FD length codec.
//!
//! A CAN FD controller describes payload size with a 4-bit DLC code. Codes
//! 0..=8 map linearly to byte counts, codes 9..=15 map to the non-linear
//! sizes 12, 16, 20, 24, 32, 48 and 64.

use crate::error::{CanBusError, Result};
use crate::types::MAX_FD_PAYLOAD;

/// Payload byte count for each DLC code
pub const DLC_TO_LEN: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

/// Maps a DLC code to a payload byte count.
///
/// Only the low 4 bits of `dlc` are considered.
pub fn dlc_to_len(dlc: u8) -> usize {
    DLC_TO_LEN[(dlc & 0x0F) as usize] as usize
}

/// Maps an exact payload byte count to its DLC code
pub fn len_to_dlc(len: usize) -> Result<u8> {
    DLC_TO_LEN
        .iter()
        .position(|&size| size as usize == len)
        .map(|code| code as u8)
        .ok_or(CanBusError::InvalidLength)
}

/// Rounds a byte count up to the next valid CAN FD payload size.
///
/// Anything above 64 clamps to 64.
pub fn round_up_fd_len(len: usize) -> usize {
    match len {
        0..=8 => len,
        9..=12 => 12,
        13..=16 => 16,
        17..=20 => 20,
        21..=24 => 24,
        25..=32 => 32,
        33..=48 => 48,
        _ => MAX_FD_PAYLOAD,
    }
}

/// True if `len` is one of the 16 payload sizes a CAN FD frame can carry
pub fn is_valid_fd_len(len: usize) -> bool {
    len_to_dlc(len).is_ok()
}
