// Tue Oct 13 2026 - Alex

use crate::memory::{Address, MemoryError, MemoryRegion};

/// Read-only view of a loaded image.
///
/// Every method must be safe to call with any address: unmapped or truncated reads
/// come back as `Err`, predicates come back `false`, lookups come back empty.
pub trait ImageAccessor: Send + Sync {
    /// Pointer width in bytes (4 or 8).
    fn pointer_size(&self) -> usize;

    fn is_little_endian(&self) -> bool {
        true
    }

    fn read_bytes(&self, addr: Address, len: usize) -> Result<Vec<u8>, MemoryError>;

    /// All locations holding a pointer-sized value equal to `target`.
    fn find_references_to(&self, target: Address) -> Vec<Address>;

    fn is_executable(&self, addr: Address) -> bool;

    fn is_mapped(&self, addr: Address) -> bool;

    fn resolve_symbol(&self, name: &str) -> Option<Address>;

    /// Byte size recorded for a named object, when the image keeps one.
    fn symbol_size(&self, _name: &str) -> Option<u64> {
        None
    }

    /// Code pointers go through function descriptors (ppc64 ELFv1 `.opd`).
    fn uses_function_descriptors(&self) -> bool {
        false
    }

    fn regions(&self) -> Vec<MemoryRegion>;

    fn read_pointer(&self, addr: Address) -> Result<Address, MemoryError> {
        let size = self.pointer_size();
        let bytes = self.read_bytes(addr, size)?;
        decode_unsigned(&bytes, self.is_little_endian()).map(Address::new)
    }

    /// Reads a pointer-width signed integer (`ptrdiff_t` / `long`).
    fn read_signed(&self, addr: Address) -> Result<i64, MemoryError> {
        let size = self.pointer_size();
        let bytes = self.read_bytes(addr, size)?;
        let raw = decode_unsigned(&bytes, self.is_little_endian())?;
        Ok(sign_extend(raw, size))
    }

    fn read_u32(&self, addr: Address) -> Result<u32, MemoryError> {
        let bytes = self.read_bytes(addr, 4)?;
        let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
        Ok(if self.is_little_endian() {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    }

    fn read_c_string(&self, addr: Address, max_len: usize) -> Result<String, MemoryError> {
        let mut bytes = Vec::new();
        let mut current = addr;
        while bytes.len() < max_len {
            let chunk = (max_len - bytes.len()).min(64);
            let data = match self.read_bytes(current, chunk) {
                Ok(data) => data,
                // chunk crossed the end of a region, fall back to single bytes
                Err(_) if chunk > 1 => self.read_bytes(current, 1)?,
                Err(e) => return Err(e),
            };
            if let Some(nul) = data.iter().position(|&b| b == 0) {
                bytes.extend_from_slice(&data[..nul]);
                return String::from_utf8(bytes).map_err(|e| {
                    MemoryError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
                });
            }
            current = current + data.len() as u64;
            bytes.extend_from_slice(&data);
        }
        Err(MemoryError::UnterminatedString(addr.as_u64(), max_len))
    }
}

/// Mutable side used while laying out synthetic images.
pub trait MemoryWriter {
    fn write_bytes(&mut self, addr: Address, data: &[u8]) -> Result<(), MemoryError>;
    fn write_u32(&mut self, addr: Address, value: u32) -> Result<(), MemoryError>;
    fn write_pointer(&mut self, addr: Address, value: Address) -> Result<(), MemoryError>;
    fn write_signed(&mut self, addr: Address, value: i64) -> Result<(), MemoryError>;
}

/// Source of named symbols for the image.
pub trait SymbolSource: Send + Sync {
    /// Every `(name, address)` whose name starts with `prefix`.
    fn symbols_with_prefix(&self, prefix: &str) -> Vec<(String, Address)>;
}

pub(crate) fn decode_unsigned(bytes: &[u8], little_endian: bool) -> Result<u64, MemoryError> {
    match bytes.len() {
        4 => {
            let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
            Ok(if little_endian {
                u32::from_le_bytes(raw) as u64
            } else {
                u32::from_be_bytes(raw) as u64
            })
        }
        8 => {
            let raw = [
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ];
            Ok(if little_endian {
                u64::from_le_bytes(raw)
            } else {
                u64::from_be_bytes(raw)
            })
        }
        other => Err(MemoryError::UnsupportedPointerSize(other)),
    }
}

pub(crate) fn encode_unsigned(value: u64, size: usize, little_endian: bool) -> Vec<u8> {
    match (size, little_endian) {
        (4, true) => (value as u32).to_le_bytes().to_vec(),
        (4, false) => (value as u32).to_be_bytes().to_vec(),
        (_, true) => value.to_le_bytes().to_vec(),
        (_, false) => value.to_be_bytes().to_vec(),
    }
}

pub(crate) fn sign_extend(raw: u64, size: usize) -> i64 {
    if size == 4 {
        raw as u32 as i32 as i64
    } else {
        raw as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_round_trip_widths() {
        let le = encode_unsigned(0xdead_beef, 4, true);
        assert_eq!(decode_unsigned(&le, true).unwrap(), 0xdead_beef);
        let be = encode_unsigned(0x1122_3344_5566_7788, 8, false);
        assert_eq!(be[0], 0x11);
        assert_eq!(decode_unsigned(&be, false).unwrap(), 0x1122_3344_5566_7788);
        assert!(decode_unsigned(&[0u8; 3], true).is_err());
    }

    #[test]
    fn test_sign_extend_narrow_pointer() {
        assert_eq!(sign_extend(0xffff_fff0, 4), -16);
        assert_eq!(sign_extend(0xffff_ffff_ffff_fff0, 8), -16);
        assert_eq!(sign_extend(0x10, 4), 16);
    }
}
