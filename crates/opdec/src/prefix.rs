//! Legacy prefix, REX and VEX/XOP recognition (decode phases 1 and 2).

use crate::error::DecodeError;
use crate::instruction::Segment;
use crate::MAX_INSTR_LEN;

/// REX prefix fields.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Rex {
    /// REX.W - 64-bit operand size
    pub w: bool,
    /// REX.R - extends ModR/M reg
    pub r: bool,
    /// REX.X - extends SIB index
    pub x: bool,
    /// REX.B - extends ModR/M r/m, SIB base, or opcode reg
    pub b: bool,
}

impl Rex {
    /// Parse a REX byte.
    pub fn from_byte(byte: u8) -> Self {
        Self {
            w: byte & 0x08 != 0,
            r: byte & 0x04 != 0,
            x: byte & 0x02 != 0,
            b: byte & 0x01 != 0,
        }
    }
}

/// VEX (or XOP) prefix fields, bit-inversions already undone.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Vex {
    pub w: bool,
    pub l: bool,
    pub r: bool,
    pub x: bool,
    pub b: bool,
    pub vvvv: u8,
    /// Implied mandatory prefix: 0 none, 1 66, 2 F3, 3 F2.
    pub pp: u8,
    /// Opcode map: 1 = 0F, 2 = 0F38, 3 = 0F3A.
    pub map: u8,
    /// Recognized via the 8F escape.
    pub xop: bool,
}

/// Accumulated prefix state for one instruction.
#[derive(Debug, Clone, Default)]
pub(crate) struct Prefixes {
    pub lock: bool,
    /// REPNZ (F2) seen.
    pub repnz: bool,
    /// REP/REPZ (F3) seen.
    pub rep: bool,
    /// The later of F2/F3, used for mandatory-prefix selection.
    pub last_rep: Option<u8>,
    pub segment: Option<Segment>,
    pub osize: bool,
    pub asize: bool,
    pub rex: Option<Rex>,
    pub vex: Option<Vex>,
}

impl Prefixes {
    /// Parses legacy prefixes, REX and VEX/XOP from the start of an
    /// instruction. Returns the state and the cursor position of the next
    /// byte (the opcode, or for VEX the byte after the prefix).
    pub fn parse(bytes: &[u8], mode: u32) -> Result<(Self, usize), DecodeError> {
        let mut pfx = Self::default();
        let mut cur = 0usize;

        loop {
            let byte = take(bytes, cur)?;
            match byte {
                // Group 1: LOCK and repeat.
                0xF0 => pfx.lock = true,
                0xF2 => {
                    pfx.repnz = true;
                    pfx.last_rep = Some(0xF2);
                }
                0xF3 => {
                    pfx.rep = true;
                    pfx.last_rep = Some(0xF3);
                }

                // Group 2: segment overrides, last one wins.
                0x26 => pfx.segment = Some(Segment::Es),
                0x2E => pfx.segment = Some(Segment::Cs),
                0x36 => pfx.segment = Some(Segment::Ss),
                0x3E => pfx.segment = Some(Segment::Ds),
                0x64 => pfx.segment = Some(Segment::Fs),
                0x65 => pfx.segment = Some(Segment::Gs),

                // Group 3 and 4: size overrides.
                0x66 => pfx.osize = true,
                0x67 => pfx.asize = true,

                // REX, 64-bit mode only. It must immediately precede the
                // opcode; a later legacy prefix voids it below.
                0x40..=0x4F if mode == 64 => {
                    pfx.rex = Some(Rex::from_byte(byte));
                    cur += 1;
                    continue;
                }

                _ => break,
            }
            // A legacy prefix after REX invalidates the REX.
            pfx.rex = None;
            cur += 1;
        }

        // VEX / XOP recognition.
        let byte = take(bytes, cur)?;
        let vex_form = match byte {
            0xC4 | 0xC5 => {
                let next = take(bytes, cur + 1)?;
                if mode == 64 || next & 0xC0 == 0xC0 {
                    Some(byte)
                } else {
                    None
                }
            }
            0x8F => {
                let next = take(bytes, cur + 1)?;
                if next & 0x1F >= 8 {
                    Some(byte)
                } else {
                    None
                }
            }
            _ => None,
        };

        if let Some(form) = vex_form {
            // Architecturally illegal combinations.
            if pfx.lock || pfx.osize || pfx.rep || pfx.repnz || pfx.rex.is_some() {
                return Err(DecodeError::Invalid);
            }
            let vex = if form == 0xC5 {
                let b1 = take(bytes, cur + 1)?;
                cur += 2;
                Vex {
                    w: false,
                    l: b1 & 0x04 != 0,
                    r: b1 & 0x80 == 0,
                    x: false,
                    b: false,
                    vvvv: (!b1 >> 3) & 0x0F,
                    pp: b1 & 0x03,
                    map: 1,
                    xop: false,
                }
            } else {
                let b1 = take(bytes, cur + 1)?;
                let b2 = take(bytes, cur + 2)?;
                cur += 3;
                let map = b1 & 0x1F;
                if form == 0xC4 && !(1..=3).contains(&map) {
                    return Err(DecodeError::Invalid);
                }
                Vex {
                    w: b2 & 0x80 != 0,
                    l: b2 & 0x04 != 0,
                    r: b1 & 0x80 == 0,
                    x: b1 & 0x40 == 0,
                    b: b1 & 0x20 == 0,
                    vvvv: (!b2 >> 3) & 0x0F,
                    pp: b2 & 0x03,
                    map,
                    xop: form == 0x8F,
                }
            };
            pfx.vex = Some(vex);
        }

        Ok((pfx, cur))
    }

    /// Mandatory-prefix key: 0 none, 1 66, 2 F3, 3 F2. VEX supplies its
    /// own; otherwise the last repeat prefix outranks 66.
    pub fn mandatory_key(&self) -> usize {
        if let Some(vex) = &self.vex {
            return vex.pp as usize;
        }
        match self.last_rep {
            Some(0xF3) => 2,
            Some(0xF2) => 3,
            _ if self.osize => 1,
            _ => 0,
        }
    }

    /// Effective W bit (REX.W or VEX.W).
    pub fn wbit(&self) -> bool {
        match &self.vex {
            Some(vex) => vex.w,
            None => self.rex.map(|r| r.w).unwrap_or(false),
        }
    }

    /// Effective VEX.L bit; zero for legacy encodings.
    pub fn lbit(&self) -> bool {
        self.vex.as_ref().map(|v| v.l).unwrap_or(false)
    }

    /// ModR/M reg extension bit.
    pub fn rex_r(&self) -> u8 {
        let set = match &self.vex {
            Some(vex) => vex.r,
            None => self.rex.map(|r| r.r).unwrap_or(false),
        };
        set as u8
    }

    /// SIB index extension bit.
    pub fn rex_x(&self) -> u8 {
        let set = match &self.vex {
            Some(vex) => vex.x,
            None => self.rex.map(|r| r.x).unwrap_or(false),
        };
        set as u8
    }

    /// r/m, SIB base and opcode-register extension bit.
    pub fn rex_b(&self) -> u8 {
        let set = match &self.vex {
            Some(vex) => vex.b,
            None => self.rex.map(|r| r.b).unwrap_or(false),
        };
        set as u8
    }
}

/// Reads the byte at `at`, enforcing the 15-byte and buffer limits.
#[inline]
pub(crate) fn take(bytes: &[u8], at: usize) -> Result<u8, DecodeError> {
    if at >= MAX_INSTR_LEN {
        return Err(DecodeError::TooLong);
    }
    match bytes.get(at) {
        Some(&b) => Ok(b),
        None => Err(DecodeError::ShortBuffer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rex_must_be_last() {
        // 48 66 89 c0: the 66 voids the REX.
        let (pfx, cur) = Prefixes::parse(&[0x48, 0x66, 0x89, 0xC0], 64).unwrap();
        assert!(pfx.rex.is_none());
        assert!(pfx.osize);
        assert_eq!(cur, 2);
    }

    #[test]
    fn rex_is_inc_in_32_bit_mode() {
        let (pfx, cur) = Prefixes::parse(&[0x48, 0x89], 32).unwrap();
        assert!(pfx.rex.is_none());
        assert_eq!(cur, 0);
    }

    #[test]
    fn two_byte_vex_fields() {
        // C5 F8: R=0, vvvv=0, L=0, pp=0.
        let (pfx, cur) = Prefixes::parse(&[0xC5, 0xF8, 0x77], 64).unwrap();
        let vex = pfx.vex.unwrap();
        assert_eq!(cur, 2);
        assert_eq!(vex.map, 1);
        assert_eq!(vex.vvvv, 0);
        assert!(!vex.l);
        assert_eq!(vex.pp, 0);
    }

    #[test]
    fn vex_not_recognized_in_32_bit_without_mod11() {
        // C5 18 would be LDS in 32-bit mode (top bits of 0x18 are not 11).
        let (pfx, cur) = Prefixes::parse(&[0xC5, 0x18], 32).unwrap();
        assert!(pfx.vex.is_none());
        assert_eq!(cur, 0);
    }

    #[test]
    fn lock_with_vex_is_invalid() {
        assert_eq!(
            Prefixes::parse(&[0xF0, 0xC5, 0xF8, 0x77], 64).unwrap_err(),
            DecodeError::Invalid
        );
    }

    #[test]
    fn last_repeat_prefix_selects_mandatory_key() {
        let (pfx, _) = Prefixes::parse(&[0xF2, 0xF3, 0x90], 64).unwrap();
        assert!(pfx.rep && pfx.repnz);
        assert_eq!(pfx.mandatory_key(), 2);
    }

    #[test]
    fn prefixes_alone_hit_the_length_limit() {
        let bytes = [0x66u8; 16];
        assert_eq!(
            Prefixes::parse(&bytes, 64).unwrap_err(),
            DecodeError::TooLong
        );
    }
}
