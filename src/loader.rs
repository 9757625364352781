//! Firmware image loader: parses the ESP32 flash-style segment layout
//! described in `SPEC_FULL.md` §4.3/§6 and copies each segment's payload
//! into the address space.

use std::path::Path;

use crate::error::SessionError;
use crate::memory::AddressSpace;

/// The project's own container magic, accepted in addition to the standard
/// ESP32 flash image magic byte (DESIGN.md Open Question 1).
const CONTAINER_MAGIC: &[u8; 4] = b"SURV";
/// Standard ESP32 flash image magic (offset 0, single byte).
const ESP32_FLASH_MAGIC: u8 = 0xE9;

/// Outcome of a successful image load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadResult {
    pub segment_count: usize,
    pub entry_point: u32,
}

/// One `{load_addr, size, payload}` segment read out of the image header.
struct Segment {
    load_addr: u32,
    payload: Vec<u8>,
}

/// Loads a firmware image from `path` into `mem`, returning the segment
/// count and entry point (the first segment's load address, matching
/// `SPEC_FULL.md` §4.3 in the absence of an explicit entry-point field).
pub fn load_firmware(path: &Path, mem: &mut AddressSpace) -> Result<LoadResult, SessionError> {
    let bytes = std::fs::read(path).map_err(|source| SessionError::FirmwareIo { path: path.to_path_buf(), source })?;
    let segments = parse_image(&bytes)?;
    if segments.is_empty() {
        return Err(SessionError::ImageTruncated);
    }
    let entry_point = segments[0].load_addr;
    for (index, segment) in segments.iter().enumerate() {
        if !mem.load_segment(segment.load_addr, &segment.payload) {
            return Err(SessionError::SegmentUnmapped {
                index,
                load_addr: segment.load_addr,
                size: segment.payload.len(),
            });
        }
    }
    Ok(LoadResult { segment_count: segments.len(), entry_point })
}

/// Parses the container's header and segment table. Accepts either the
/// `SURV` container magic or the ESP32 flash magic byte; does not require
/// both to be present (DESIGN.md Open Question 1).
fn parse_image(bytes: &[u8]) -> Result<Vec<Segment>, SessionError> {
    if bytes.len() < 4 {
        return Err(SessionError::ImageTruncated);
    }
    let is_container = &bytes[0..4] == CONTAINER_MAGIC;
    let is_esp32_flash = bytes[0] == ESP32_FLASH_MAGIC;
    if !is_container && !is_esp32_flash {
        return Err(SessionError::BadImageMagic);
    }

    let mut segments = Vec::new();
    let mut cursor = 4usize;
    while cursor + 8 <= bytes.len() {
        let load_addr = read_u32_le(bytes, cursor);
        let size = read_u32_le(bytes, cursor + 4) as usize;
        cursor += 8;
        if cursor + size > bytes.len() {
            return Err(SessionError::ImageTruncated);
        }
        segments.push(Segment { load_addr, payload: bytes[cursor..cursor + size].to_vec() });
        cursor += size;
    }
    Ok(segments)
}

fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{DRAM_BASE, IRAM_BASE, IROM_BASE};

    fn segment_bytes(load_addr: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&load_addr.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn write_image(path: &Path, magic: &[u8], segments: &[(u32, &[u8])]) {
        let mut bytes = magic.to_vec();
        for (addr, payload) in segments {
            bytes.extend_from_slice(&segment_bytes(*addr, payload));
        }
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_scenario_three_segment_image_via_container_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.bin");
        write_image(
            &path,
            CONTAINER_MAGIC,
            &[(IRAM_BASE, &[0u8; 8]), (DRAM_BASE, b"ABCD"), (IROM_BASE, &[0xAB, 0xCD])],
        );

        let mut mem = AddressSpace::new();
        let result = load_firmware(&path, &mut mem).unwrap();
        assert_eq!(result.segment_count, 3);
        assert_eq!(result.entry_point, IRAM_BASE);
        assert_eq!(mem.read32(DRAM_BASE), 0x4443_4241);
        assert_eq!(mem.read16(IROM_BASE), 0xCDAB);
    }

    #[test]
    fn test_esp32_flash_magic_is_also_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.bin");
        write_image(&path, &[ESP32_FLASH_MAGIC, 0x00, 0x00, 0x00], &[(DRAM_BASE, b"Z")]);

        let mut mem = AddressSpace::new();
        let result = load_firmware(&path, &mut mem).unwrap();
        assert_eq!(result.segment_count, 1);
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.bin");
        write_image(&path, b"NOPE", &[(DRAM_BASE, b"Z")]);

        let mut mem = AddressSpace::new();
        let err = load_firmware(&path, &mut mem).unwrap_err();
        assert!(matches!(err, SessionError::BadImageMagic));
    }

    #[test]
    fn test_segment_outside_any_region_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.bin");
        write_image(&path, CONTAINER_MAGIC, &[(0xFFFF_0000, b"Z")]);

        let mut mem = AddressSpace::new();
        let err = load_firmware(&path, &mut mem).unwrap_err();
        assert!(matches!(err, SessionError::SegmentUnmapped { .. }));
    }

    #[test]
    fn test_truncated_image_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.bin");
        std::fs::write(&path, b"SU").unwrap();

        let mut mem = AddressSpace::new();
        let err = load_firmware(&path, &mut mem).unwrap_err();
        assert!(matches!(err, SessionError::ImageTruncated));
    }
}
