//! ELF32 symbol table parsing for the stub fabric's PC-name resolution
//! (`SPEC_FULL.md` §4.3). Only `.symtab` + `.strtab` are consulted; the ELF
//! file is optional, and its absence is a warning, not an error (the stub
//! fabric simply resolves nothing, and firmware runs uninstrumented).

use std::path::Path;

use crate::error::SessionError;

const EI_NIDENT: usize = 16;
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const SHT_SYMTAB: u32 = 2;
const STT_FUNC: u8 = 2;

/// One resolved symbol: a name bound to an address range.
#[derive(Debug, Clone)]
struct Symbol {
    name: String,
    base: u32,
    size: u32,
}

/// A lookup result: the symbol containing a PC, and the PC's offset into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolHit<'a> {
    pub name: &'a str,
    pub offset: u32,
}

/// Immutable symbol table built once at load time from an ELF32 file.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    /// Parses `.symtab`/`.strtab` out of an ELF32 LSB file, keeping only
    /// symbols with a nonzero size or `STT_FUNC` type.
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let bytes = std::fs::read(path).map_err(|source| SessionError::ElfIo { path: path.to_path_buf(), source })?;
        Self::parse(&bytes).map_err(SessionError::ElfMalformed)
    }

    fn parse(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() < EI_NIDENT + 36 || &bytes[0..4] != b"\x7FELF" {
            return Err("missing ELF magic".to_string());
        }
        if bytes[4] != ELFCLASS32 {
            return Err("only ELF32 is supported".to_string());
        }
        if bytes[5] != ELFDATA2LSB {
            return Err("only little-endian ELF is supported".to_string());
        }

        let e_shoff = read_u32(bytes, 32)? as usize;
        let e_shentsize = read_u16(bytes, 46)? as usize;
        let e_shnum = read_u16(bytes, 48)? as usize;
        let e_shstrndx = read_u16(bytes, 50)? as usize;

        let section_header = |index: usize| -> Result<&[u8], String> {
            let start = e_shoff + index * e_shentsize;
            bytes.get(start..start + e_shentsize).ok_or_else(|| "section header table out of range".to_string())
        };

        let mut symtab: Option<(u32, u32, u32)> = None; // (offset, size, entsize)
        let mut link_to_section: Option<u32> = None;
        for i in 0..e_shnum {
            let header = section_header(i)?;
            let sh_type = read_u32(header, 4)?;
            if sh_type == SHT_SYMTAB {
                let sh_offset = read_u32(header, 16)?;
                let sh_size = read_u32(header, 20)?;
                let sh_link = read_u32(header, 24)?;
                let sh_entsize = read_u32(header, 36)?;
                symtab = Some((sh_offset, sh_size, sh_entsize));
                link_to_section = Some(sh_link);
                break;
            }
        }
        let _ = e_shstrndx;

        let (symtab_off, symtab_size, symtab_entsize) = match symtab {
            Some(v) => v,
            None => return Ok(Self { symbols: Vec::new() }),
        };
        let strtab_index = link_to_section.unwrap_or(0) as usize;
        let strtab_header = section_header(strtab_index)?;
        let strtab_off = read_u32(strtab_header, 16)? as usize;
        let strtab_size = read_u32(strtab_header, 20)? as usize;
        let strtab =
            bytes.get(strtab_off..strtab_off + strtab_size).ok_or_else(|| "string table out of range".to_string())?;

        let entsize = if symtab_entsize == 0 { 16 } else { symtab_entsize as usize };
        let count = symtab_size as usize / entsize;
        let mut symbols = Vec::new();
        for i in 0..count {
            let start = symtab_off as usize + i * entsize;
            let entry = bytes.get(start..start + entsize).ok_or_else(|| "symbol table entry out of range".to_string())?;
            let st_name = read_u32(entry, 0)?;
            let st_value = read_u32(entry, 4)?;
            let st_size = read_u32(entry, 8)?;
            let st_info = entry[12];
            let st_type = st_info & 0xF;

            if st_size == 0 && st_type != STT_FUNC {
                continue;
            }
            if st_value == 0 {
                continue;
            }
            let name = read_cstr(strtab, st_name as usize);
            if name.is_empty() {
                continue;
            }
            symbols.push(Symbol { name, base: st_value, size: st_size.max(1) });
        }
        Ok(Self { symbols })
    }

    /// Looks up the symbol whose `[base, base+size)` range contains `pc`.
    #[must_use]
    pub fn lookup(&self, pc: u32) -> Option<SymbolHit<'_>> {
        self.symbols
            .iter()
            .find(|s| pc >= s.base && pc < s.base.wrapping_add(s.size))
            .map(|s| SymbolHit { name: &s.name, offset: pc - s.base })
    }

    /// Resolves a symbol's entry address by exact name match, used by the
    /// stub fabric to install hooks.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<u32> {
        self.symbols.iter().find(|s| s.name == name).map(|s| s.base)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, String> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| "truncated ELF header field".to_string())
}

fn read_u16(bytes: &[u8], offset: usize) -> Result<u16, String> {
    bytes.get(offset..offset + 2).map(|b| u16::from_le_bytes([b[0], b[1]])).ok_or_else(|| "truncated ELF header field".to_string())
}

fn read_cstr(strtab: &[u8], offset: usize) -> String {
    let Some(slice) = strtab.get(offset..) else { return String::new() };
    let end = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
    String::from_utf8_lossy(&slice[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-assembles a minimal ELF32 LSB file with one `.symtab` and one
    /// `.strtab` section, each containing a single function symbol.
    fn build_minimal_elf(name: &str, value: u32, size: u32) -> Vec<u8> {
        let mut strtab = vec![0u8]; // index 0 is always the empty string
        let name_off = strtab.len() as u32;
        strtab.extend_from_slice(name.as_bytes());
        strtab.push(0);

        let mut symtab = Vec::new();
        // null symbol
        symtab.extend_from_slice(&[0u8; 16]);
        // our symbol: {st_name, st_value, st_size, st_info, st_other, st_shndx}
        symtab.extend_from_slice(&name_off.to_le_bytes());
        symtab.extend_from_slice(&value.to_le_bytes());
        symtab.extend_from_slice(&size.to_le_bytes());
        symtab.push(STT_FUNC);
        symtab.push(0);
        symtab.extend_from_slice(&0u16.to_le_bytes());

        let ehsize = 52usize;
        let shentsize = 40usize;
        // Layout: ELF header, then symtab bytes, then strtab bytes, then 3 section headers.
        let symtab_off = ehsize;
        let strtab_off = symtab_off + symtab.len();
        let shoff = strtab_off + strtab.len();

        let mut bytes = vec![0u8; ehsize];
        bytes[0..4].copy_from_slice(b"\x7FELF");
        bytes[4] = ELFCLASS32;
        bytes[5] = ELFDATA2LSB;
        bytes[32..36].copy_from_slice(&(shoff as u32).to_le_bytes());
        bytes[46..48].copy_from_slice(&(shentsize as u16).to_le_bytes());
        bytes[48..50].copy_from_slice(&3u16.to_le_bytes()); // e_shnum: null, symtab, strtab
        bytes[50..52].copy_from_slice(&2u16.to_le_bytes()); // e_shstrndx (unused by parser)

        bytes.extend_from_slice(&symtab);
        bytes.extend_from_slice(&strtab);

        // Section header 0: null section.
        bytes.extend_from_slice(&[0u8; 40]);
        // Section header 1: SHT_SYMTAB, sh_link -> section 2 (strtab).
        let mut sh_symtab = vec![0u8; 40];
        sh_symtab[4..8].copy_from_slice(&SHT_SYMTAB.to_le_bytes());
        sh_symtab[16..20].copy_from_slice(&(symtab_off as u32).to_le_bytes());
        sh_symtab[20..24].copy_from_slice(&(symtab.len() as u32).to_le_bytes());
        sh_symtab[24..28].copy_from_slice(&2u32.to_le_bytes()); // sh_link
        sh_symtab[36..40].copy_from_slice(&16u32.to_le_bytes()); // sh_entsize
        bytes.extend_from_slice(&sh_symtab);
        // Section header 2: strtab (type doesn't matter to the parser).
        let mut sh_strtab = vec![0u8; 40];
        sh_strtab[16..20].copy_from_slice(&(strtab_off as u32).to_le_bytes());
        sh_strtab[20..24].copy_from_slice(&(strtab.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&sh_strtab);

        bytes
    }

    #[test]
    fn test_parse_and_lookup_function_symbol() {
        let bytes = build_minimal_elf("app_main", 0x400D_1000, 0x40);
        let table = SymbolTable::parse(&bytes).unwrap();
        assert_eq!(table.len(), 1);
        let hit = table.lookup(0x400D_1010).unwrap();
        assert_eq!(hit.name, "app_main");
        assert_eq!(hit.offset, 0x10);
    }

    #[test]
    fn test_resolve_by_name() {
        let bytes = build_minimal_elf("xTaskCreate", 0x400D_2000, 0x20);
        let table = SymbolTable::parse(&bytes).unwrap();
        assert_eq!(table.resolve("xTaskCreate"), Some(0x400D_2000));
        assert_eq!(table.resolve("nonexistent"), None);
    }

    #[test]
    fn test_lookup_outside_any_symbol_range_is_none() {
        let bytes = build_minimal_elf("app_main", 0x400D_1000, 0x10);
        let table = SymbolTable::parse(&bytes).unwrap();
        assert!(table.lookup(0x400D_9999).is_none());
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let err = SymbolTable::parse(b"not an elf file at all").unwrap_err();
        assert!(err.contains("magic"));
    }
}
