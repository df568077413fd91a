//! Fixed, versioned, little-endian wire types plus the element codec.
//!
//! Control records (counts, RMA put headers) are `Pod` structs cast straight
//! to bytes. Field elements are arbitrary serde types and travel as bincode
//! payloads appended after the control record.

use bytemuck::{Pod, Zeroable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::mem::{align_of, size_of};

use crate::algs::communicator::CommError;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Kind tags carried in [`WirePut::kind_le`].
pub const KIND_PUT: u16 = 1;

/// All multi-byte integers in these structs are **little-endian** on the wire.
/// We store them pre-LE with `.to_le()` and decode with `.from_le()`.

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }

    /// Decode a count message received from `peer`.
    pub fn decode(peer: usize, data: &[u8]) -> Result<usize, CommError> {
        expect_exact_len(data.len(), size_of::<WireCount>())
            .map_err(|e| CommError::new(peer, format!("size header: {e}")))?;
        let mut cnt = WireCount::zeroed();
        cast_slice_mut(std::slice::from_mut(&mut cnt)).copy_from_slice(data);
        Ok(cnt.get())
    }
}

/// Header of a one-sided put: `count` elements written at `offset` of
/// window `window` on the receiving rank.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WirePut {
    pub version_le: u16,
    pub kind_le: u16,
    pub window_le: u32,
    pub offset_le: u64,
    pub count_le: u64,
}

impl WirePut {
    pub const SIZE: usize = 24; // 2 + 2 + 4 + 8 + 8

    pub fn new(window: usize, offset: usize, count: usize) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: KIND_PUT.to_le(),
            window_le: (window as u32).to_le(),
            offset_le: (offset as u64).to_le(),
            count_le: (count as u64).to_le(),
        }
    }

    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn window(&self) -> usize {
        u32::from_le(self.window_le) as usize
    }
    pub fn offset(&self) -> usize {
        u64::from_le(self.offset_le) as usize
    }
    pub fn count(&self) -> usize {
        u64::from_le(self.count_le) as usize
    }

    /// Split a put message into its header and element payload.
    pub fn split(peer: usize, msg: &[u8]) -> Result<(WirePut, &[u8]), CommError> {
        if msg.len() < Self::SIZE {
            return Err(CommError::new(
                peer,
                format!("put message of {} bytes is shorter than its header", msg.len()),
            ));
        }
        let mut hdr = WirePut::zeroed();
        cast_slice_mut(std::slice::from_mut(&mut hdr)).copy_from_slice(&msg[..Self::SIZE]);
        if hdr.version() != WIRE_VERSION || hdr.kind() != KIND_PUT {
            return Err(CommError::new(
                peer,
                format!("unexpected put header v{} kind {}", hdr.version(), hdr.kind()),
            ));
        }
        Ok((hdr, &msg[Self::SIZE..]))
    }
}

// ===== Compile-time sanity checks =========================================

const _: () = {
    assert!(size_of::<WireCount>() == 4);
    assert!(size_of::<WirePut>() == WirePut::SIZE);
    assert!(align_of::<WirePut>() == 8);
};

// ===== Element codec =======================================================

/// Encode a value (usually a slice of field elements) as bincode.
pub fn encode<T: Serialize + ?Sized>(peer: usize, value: &T) -> Result<Vec<u8>, CommError> {
    bincode::serialize(value).map_err(|e| CommError::new(peer, format!("encode: {e}")))
}

/// Decode a bincode payload received from `peer`.
pub fn decode<T: DeserializeOwned>(peer: usize, bytes: &[u8]) -> Result<T, CommError> {
    bincode::deserialize(bytes).map_err(|e| CommError::new(peer, format!("decode: {e}")))
}

/// `WirePut` header followed by the encoded values.
pub fn encode_put<T: Serialize>(
    peer: usize,
    window: usize,
    offset: usize,
    values: &[T],
) -> Result<Vec<u8>, CommError> {
    let hdr = WirePut::new(window, offset, values.len());
    let mut msg = cast_slice(std::slice::from_ref(&hdr)).to_vec();
    let body = encode(peer, values)?;
    msg.extend_from_slice(&body);
    Ok(msg)
}
