//! Fixed-width integer buffer helpers
//!
//! Two families, with distinct jobs:
//!
//! - **Big-endian** writers/readers are used for key prefixes (shard id,
//!   table id, sequence numbers) where byte-wise comparison must equal
//!   numeric comparison.
//! - **Little-endian** writers/readers are used for row payloads. The wire
//!   format is canonical little-endian regardless of host architecture;
//!   `to_le_bytes`/`from_le_bytes` perform the swap on big-endian hosts.

use bytes::BufMut;

use crate::error::{CoreError, Result};

/// Whether the build target is little-endian. The codecs do not branch on
/// this; it exists so deployments can assert the expected architecture.
pub const IS_LITTLE_ENDIAN: bool = cfg!(target_endian = "little");

pub fn append_u64_be(buf: &mut impl BufMut, v: u64) {
    buf.put_slice(&v.to_be_bytes());
}

pub fn append_u32_be(buf: &mut impl BufMut, v: u32) {
    buf.put_slice(&v.to_be_bytes());
}

pub fn append_u64_le(buf: &mut impl BufMut, v: u64) {
    buf.put_slice(&v.to_le_bytes());
}

pub fn append_u32_le(buf: &mut impl BufMut, v: u32) {
    buf.put_slice(&v.to_le_bytes());
}

pub fn read_u64_be(buf: &[u8], offset: usize) -> Result<u64> {
    let bytes = get_fixed::<8>(buf, offset)?;
    Ok(u64::from_be_bytes(bytes))
}

pub fn read_u32_be(buf: &[u8], offset: usize) -> Result<u32> {
    let bytes = get_fixed::<4>(buf, offset)?;
    Ok(u32::from_be_bytes(bytes))
}

pub fn read_u16_be(buf: &[u8], offset: usize) -> Result<u16> {
    let bytes = get_fixed::<2>(buf, offset)?;
    Ok(u16::from_be_bytes(bytes))
}

pub fn read_f32_be(buf: &[u8], offset: usize) -> Result<f32> {
    let bytes = get_fixed::<4>(buf, offset)?;
    Ok(f32::from_be_bytes(bytes))
}

pub fn read_f64_be(buf: &[u8], offset: usize) -> Result<f64> {
    let bytes = get_fixed::<8>(buf, offset)?;
    Ok(f64::from_be_bytes(bytes))
}

pub fn read_u64_le(buf: &[u8], offset: usize) -> Result<u64> {
    let bytes = get_fixed::<8>(buf, offset)?;
    Ok(u64::from_le_bytes(bytes))
}

pub fn read_u32_le(buf: &[u8], offset: usize) -> Result<u32> {
    let bytes = get_fixed::<4>(buf, offset)?;
    Ok(u32::from_le_bytes(bytes))
}

fn get_fixed<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N]> {
    let end = offset
        .checked_add(N)
        .ok_or_else(|| CoreError::Corrupt("buffer offset overflow".to_string()))?;
    let slice = buf
        .get(offset..end)
        .ok_or_else(|| CoreError::Corrupt(format!("buffer too short: need {end}, have {}", buf.len())))?;
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(slice);
    Ok(bytes)
}
