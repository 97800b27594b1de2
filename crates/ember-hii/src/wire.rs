//! Export wire format. Each list serializes as a 20-byte header (16-byte
//! GUID, then a `u32` covering the whole list including the header),
//! followed by its packages. A package header is one little-endian `u32`
//! packing the length in bits 0..24 and the type code in bits 24..32, the
//! length counting the header itself. An end package closes every list, so
//! a parser never needs the outer length to find the last package.

use ember_platform::Guid;

use crate::error::{HiiError, Result};
use crate::package::{Package, PackageKind, PackageList, KIND_END};

pub(crate) const LIST_HEADER_LEN: usize = 20;
pub(crate) const PACKAGE_HEADER_LEN: usize = 4;

/// Largest body a package header can describe.
pub(crate) const PACKAGE_DATA_MAX: usize = 0x00ff_ffff - PACKAGE_HEADER_LEN;

fn package_header(len: usize, kind: u8) -> [u8; 4] {
    (len as u32 | u32::from(kind) << 24).to_le_bytes()
}

/// Appends one list. Callers guarantee every package body fits
/// [`PACKAGE_DATA_MAX`]; the database enforces that at insert time.
pub(crate) fn export_list(list: &PackageList, out: &mut Vec<u8>) {
    let start = out.len();
    out.extend_from_slice(&list.guid.to_bytes());
    out.extend_from_slice(&[0; 4]);
    for package in &list.packages {
        let total = package.data.len() + PACKAGE_HEADER_LEN;
        out.extend_from_slice(&package_header(total, package.kind.raw()));
        out.extend_from_slice(&package.data);
    }
    out.extend_from_slice(&package_header(PACKAGE_HEADER_LEN, KIND_END));

    let list_len = (out.len() - start) as u32;
    out[start + 16..start + LIST_HEADER_LEN].copy_from_slice(&list_len.to_le_bytes());
}

/// Parses a buffer of concatenated lists, the inverse of repeated
/// [`export_list`] calls.
pub fn parse(bytes: &[u8]) -> Result<Vec<PackageList>> {
    let mut lists = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        let (list, consumed) = parse_list(rest)?;
        lists.push(list);
        rest = &rest[consumed..];
    }
    Ok(lists)
}

fn parse_list(bytes: &[u8]) -> Result<(PackageList, usize)> {
    if bytes.len() < LIST_HEADER_LEN {
        return Err(HiiError::Malformed("truncated list header"));
    }
    let mut guid_bytes = [0u8; 16];
    guid_bytes.copy_from_slice(&bytes[..16]);
    let declared = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]) as usize;
    if declared < LIST_HEADER_LEN + PACKAGE_HEADER_LEN || declared > bytes.len() {
        return Err(HiiError::Malformed("list length out of range"));
    }

    let mut list = PackageList::new(Guid::from_bytes(guid_bytes));
    let mut offset = LIST_HEADER_LEN;
    loop {
        if offset + PACKAGE_HEADER_LEN > declared {
            return Err(HiiError::Malformed("list not closed by an end package"));
        }
        let header = u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]);
        let length = (header & 0x00ff_ffff) as usize;
        let kind = (header >> 24) as u8;
        if length < PACKAGE_HEADER_LEN || offset + length > declared {
            return Err(HiiError::Malformed("package length out of range"));
        }
        if kind == KIND_END {
            if length != PACKAGE_HEADER_LEN {
                return Err(HiiError::Malformed("end package carries a body"));
            }
            if offset + length != declared {
                return Err(HiiError::Malformed("data after the end package"));
            }
            return Ok((list, declared));
        }
        list.packages.push(Package {
            kind: PackageKind::from_raw(kind),
            data: bytes[offset + PACKAGE_HEADER_LEN..offset + length].to_vec(),
        });
        offset += length;
    }
}
