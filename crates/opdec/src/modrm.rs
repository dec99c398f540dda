//! ModR/M, SIB and displacement decoding (decode phase 4).

use crate::error::DecodeError;
use crate::prefix::{take, Prefixes};

/// Decoded ModR/M byte. `reg` and `rm` carry the REX/VEX extension bits;
/// the raw three-bit fields used for table dispatch are read separately by
/// the walker.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ModRm {
    /// Mod field (2 bits)
    pub mode: u8,
    /// Reg field (3 bits, extended)
    pub reg: u8,
    /// R/M field (3 bits, extended)
    pub rm: u8,
}

impl ModRm {
    pub fn parse(byte: u8, pfx: &Prefixes) -> Self {
        Self {
            mode: byte >> 6,
            reg: ((byte >> 3) & 0x7) | pfx.rex_r() << 3,
            rm: (byte & 0x7) | pfx.rex_b() << 3,
        }
    }

    /// Returns true if this ModR/M encodes a register operand (mod=11).
    pub fn is_register(&self) -> bool {
        self.mode == 0b11
    }
}

/// Decoded SIB byte.
#[derive(Debug, Clone, Copy)]
struct Sib {
    scale: u8,
    index: u8,
    base: u8,
}

impl Sib {
    fn parse(byte: u8, pfx: &Prefixes) -> Self {
        Self {
            scale: byte >> 6,
            index: ((byte >> 3) & 0x7) | pfx.rex_x() << 3,
            base: (byte & 0x7) | pfx.rex_b() << 3,
        }
    }
}

/// The memory half of a decoded r/m field, before operand construction.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MemParts {
    pub base: Option<u8>,
    /// Base is the instruction pointer (RIP-relative).
    pub rip: bool,
    pub index: Option<u8>,
    pub scale: u8,
    pub disp: i64,
}

/// Decodes the memory form of an r/m operand starting at `cur` (the byte
/// after ModR/M). Returns the parts and the new cursor.
///
/// `asize` is the effective address size in bytes: 2 selects the 16-bit
/// BX+SI addressing table, 4/8 the SIB forms. RIP-relative addressing
/// exists only in 64-bit mode.
pub(crate) fn decode_mem(
    bytes: &[u8],
    mut cur: usize,
    modrm: ModRm,
    pfx: &Prefixes,
    asize: u8,
    mode: u32,
) -> Result<(MemParts, usize), DecodeError> {
    debug_assert!(!modrm.is_register());
    let mut parts = MemParts {
        scale: 1,
        ..MemParts::default()
    };

    if asize == 2 {
        // 16-bit addressing: fixed base/index pairs, no SIB.
        const PAIRS: [(Option<u8>, Option<u8>); 8] = [
            (Some(3), Some(6)), // [bx+si]
            (Some(3), Some(7)), // [bx+di]
            (Some(5), Some(6)), // [bp+si]
            (Some(5), Some(7)), // [bp+di]
            (Some(6), None),    // [si]
            (Some(7), None),    // [di]
            (Some(5), None),    // [bp], or disp16 when mod=00
            (Some(3), None),    // [bx]
        ];
        let rm = modrm.rm & 0x7;
        if modrm.mode == 0b00 && rm == 6 {
            parts.disp = read_disp(bytes, &mut cur, 2)?;
            return Ok((parts, cur));
        }
        let (base, index) = PAIRS[rm as usize];
        parts.base = base;
        parts.index = index;
        match modrm.mode {
            0b01 => parts.disp = read_disp(bytes, &mut cur, 1)?,
            0b10 => parts.disp = read_disp(bytes, &mut cur, 2)?,
            _ => {}
        }
        return Ok((parts, cur));
    }

    // 32/64-bit addressing.
    let mut disp_size = match modrm.mode {
        0b01 => 1,
        0b10 => 4,
        _ => 0,
    };

    if modrm.rm & 0x7 == 0x4 {
        let sib = Sib::parse(take(bytes, cur)?, pfx);
        cur += 1;

        // Index 4 without REX.X encodes "no index".
        if sib.index != 4 {
            parts.index = Some(sib.index);
            parts.scale = 1 << sib.scale;
        }
        if sib.base & 0x7 == 0x5 && modrm.mode == 0b00 {
            // No base, 32-bit displacement.
            disp_size = 4;
        } else {
            parts.base = Some(sib.base);
        }
    } else if modrm.rm & 0x7 == 0x5 && modrm.mode == 0b00 {
        // Absolute disp32 in 32-bit mode; RIP-relative in 64-bit mode.
        disp_size = 4;
        parts.rip = mode == 64;
    } else {
        parts.base = Some(modrm.rm);
    }

    if disp_size != 0 {
        parts.disp = read_disp(bytes, &mut cur, disp_size)?;
    }
    Ok((parts, cur))
}

fn read_disp(bytes: &[u8], cur: &mut usize, size: usize) -> Result<i64, DecodeError> {
    let mut raw = 0u64;
    for i in 0..size {
        raw |= (take(bytes, *cur + i)? as u64) << (8 * i);
    }
    *cur += size;
    Ok(match size {
        1 => raw as u8 as i8 as i64,
        2 => raw as u16 as i16 as i64,
        4 => raw as u32 as i32 as i64,
        _ => raw as i64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pfx() -> Prefixes {
        Prefixes::default()
    }

    fn modrm(byte: u8) -> ModRm {
        ModRm::parse(byte, &Prefixes::default())
    }

    #[test]
    fn register_form() {
        let m = modrm(0xC8);
        assert!(m.is_register());
        assert_eq!(m.reg, 1);
        assert_eq!(m.rm, 0);
    }

    #[test]
    fn base_only() {
        // [rdi]
        let (parts, cur) = decode_mem(&[], 0, modrm(0x07), &pfx(), 8, 64).unwrap();
        assert_eq!(parts.base, Some(7));
        assert_eq!(parts.index, None);
        assert_eq!(cur, 0);
    }

    #[test]
    fn sib_no_base_disp32() {
        // [0x12345678]: mod=00 rm=100, SIB base=101 index=100.
        let (parts, cur) =
            decode_mem(&[0x25, 0x78, 0x56, 0x34, 0x12], 0, modrm(0x04), &pfx(), 8, 64).unwrap();
        assert_eq!(parts.base, None);
        assert_eq!(parts.index, None);
        assert_eq!(parts.disp, 0x12345678);
        assert_eq!(cur, 5);
    }

    #[test]
    fn rip_relative_only_in_64_bit() {
        let bytes = [0x10, 0x00, 0x00, 0x00];
        let (parts, _) = decode_mem(&bytes, 0, modrm(0x05), &pfx(), 8, 64).unwrap();
        assert!(parts.rip);
        assert_eq!(parts.disp, 0x10);
        let (parts, _) = decode_mem(&bytes, 0, modrm(0x05), &pfx(), 4, 32).unwrap();
        assert!(!parts.rip);
        assert_eq!(parts.base, None);
    }

    #[test]
    fn disp8_sign_extends() {
        // [rbp - 8]
        let (parts, cur) = decode_mem(&[0xF8], 0, modrm(0x45), &pfx(), 8, 64).unwrap();
        assert_eq!(parts.base, Some(5));
        assert_eq!(parts.disp, -8);
        assert_eq!(cur, 1);
    }

    #[test]
    fn sixteen_bit_pairs() {
        // mod=00 rm=010: [bp+si]
        let (parts, _) = decode_mem(&[], 0, modrm(0x02), &pfx(), 2, 32).unwrap();
        assert_eq!(parts.base, Some(5));
        assert_eq!(parts.index, Some(6));
        // mod=00 rm=110: disp16, no base.
        let (parts, cur) = decode_mem(&[0x34, 0x12], 0, modrm(0x06), &pfx(), 2, 32).unwrap();
        assert_eq!(parts.base, None);
        assert_eq!(parts.disp, 0x1234);
        assert_eq!(cur, 2);
    }

    #[test]
    fn truncated_displacement() {
        // mod=10 rm=100 needs SIB + disp32; only two displacement bytes.
        assert_eq!(
            decode_mem(&[0x25, 0x78, 0x56], 0, modrm(0x84), &pfx(), 8, 64).unwrap_err(),
            DecodeError::ShortBuffer
        );
    }
}
