//! Instruction formatter.
//!
//! Renders a decoded instruction as Intel-syntax text for debugging. The
//! formatter reads the record only through its accessors and writes into a
//! caller-provided buffer; it never allocates, so it stays usable in the
//! same freestanding contexts as the decoder.

use core::fmt::{self, Write};

use crate::instruction::{Instruction, MemRef, Operand, PrefixFlags, Reg, RegKind, Segment};

static GPR64: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];
static GPR32: [&str; 16] = [
    "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "r8d", "r9d", "r10d", "r11d", "r12d",
    "r13d", "r14d", "r15d",
];
static GPR16: [&str; 16] = [
    "ax", "cx", "dx", "bx", "sp", "bp", "si", "di", "r8w", "r9w", "r10w", "r11w", "r12w", "r13w",
    "r14w", "r15w",
];
static GPR8: [&str; 16] = [
    "al", "cl", "dl", "bl", "spl", "bpl", "sil", "dil", "r8b", "r9b", "r10b", "r11b", "r12b",
    "r13b", "r14b", "r15b",
];
static GPR8_LEGACY: [&str; 8] = ["al", "cl", "dl", "bl", "ah", "ch", "dh", "bh"];
static SEGS: [&str; 6] = ["es", "cs", "ss", "ds", "fs", "gs"];

fn seg_name(seg: Segment) -> &'static str {
    SEGS[seg as usize]
}

/// Canonical register name. Byte registers 4..7 read as AH..BH unless a
/// REX prefix was present on the instruction.
fn reg_name(reg: Reg, rex: bool) -> &'static str {
    let idx = (reg.index & 15) as usize;
    match reg.kind {
        RegKind::Gpr => match reg.size {
            1 => {
                if !rex && (4..8).contains(&idx) {
                    GPR8_LEGACY[idx]
                } else {
                    GPR8[idx]
                }
            }
            2 => GPR16[idx],
            4 => GPR32[idx],
            _ => GPR64[idx],
        },
        RegKind::Xmm => {
            static XMM: [&str; 16] = [
                "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7", "xmm8", "xmm9",
                "xmm10", "xmm11", "xmm12", "xmm13", "xmm14", "xmm15",
            ];
            XMM[idx]
        }
        RegKind::Ymm => {
            static YMM: [&str; 16] = [
                "ymm0", "ymm1", "ymm2", "ymm3", "ymm4", "ymm5", "ymm6", "ymm7", "ymm8", "ymm9",
                "ymm10", "ymm11", "ymm12", "ymm13", "ymm14", "ymm15",
            ];
            YMM[idx]
        }
        RegKind::Mmx => {
            static MMX: [&str; 8] = ["mm0", "mm1", "mm2", "mm3", "mm4", "mm5", "mm6", "mm7"];
            MMX[idx & 7]
        }
        RegKind::Seg => SEGS[idx.min(5)],
        RegKind::Fpu => {
            static ST: [&str; 8] = [
                "st(0)", "st(1)", "st(2)", "st(3)", "st(4)", "st(5)", "st(6)", "st(7)",
            ];
            ST[idx & 7]
        }
        RegKind::Cr => {
            static CR: [&str; 16] = [
                "cr0", "cr1", "cr2", "cr3", "cr4", "cr5", "cr6", "cr7", "cr8", "cr9", "cr10",
                "cr11", "cr12", "cr13", "cr14", "cr15",
            ];
            CR[idx]
        }
        RegKind::Dr => {
            static DR: [&str; 16] = [
                "dr0", "dr1", "dr2", "dr3", "dr4", "dr5", "dr6", "dr7", "dr8", "dr9", "dr10",
                "dr11", "dr12", "dr13", "dr14", "dr15",
            ];
            DR[idx]
        }
        RegKind::Mask => {
            static K: [&str; 8] = ["k0", "k1", "k2", "k3", "k4", "k5", "k6", "k7"];
            K[idx & 7]
        }
        RegKind::Rip => "rip",
    }
}

fn write_signed_hex(f: &mut impl Write, value: i64) -> fmt::Result {
    if value < 0 {
        write!(f, "-{:#x}", value.wrapping_neg())
    } else {
        write!(f, "{:#x}", value)
    }
}

fn write_mem(f: &mut impl Write, instr: &Instruction, mem: &MemRef) -> fmt::Result {
    // Segment prefix only when it is not the plain default.
    if mem.segment != Segment::Ds && mem.segment != Segment::Ss {
        write!(f, "{}:", seg_name(mem.segment))?;
    }
    f.write_char('[')?;
    let rex = instr.prefix_flags().contains(PrefixFlags::REX);
    let mut has_content = false;
    if let Some(base) = mem.base {
        f.write_str(reg_name(base, rex))?;
        has_content = true;
    }
    if let Some(index) = mem.index {
        if has_content {
            f.write_str(" + ")?;
        }
        f.write_str(reg_name(index, rex))?;
        if mem.scale > 1 {
            write!(f, "*{}", mem.scale)?;
        }
        has_content = true;
    }
    let disp = instr.displacement();
    if disp != 0 || !has_content {
        if has_content {
            if disp >= 0 {
                write!(f, " + {:#x}", disp)?;
            } else {
                write!(f, " - {:#x}", disp.wrapping_neg())?;
            }
        } else {
            write!(f, "{:#x}", disp)?;
        }
    }
    f.write_char(']')
}

fn write_operand(f: &mut impl Write, instr: &Instruction, operand: &Operand) -> fmt::Result {
    match operand {
        Operand::None => Ok(()),
        Operand::Reg(reg) => {
            f.write_str(reg_name(*reg, instr.prefix_flags().contains(PrefixFlags::REX)))
        }
        Operand::Mem(mem) => write_mem(f, instr, mem),
        Operand::Imm { slot, .. } => {
            let value = if *slot == 0 {
                instr.immediate()
            } else {
                instr.immediate2()
            };
            write_signed_hex(f, value)
        }
        Operand::Pcrel { target } => write!(f, "{:#x}", target),
    }
}

fn write_instr(f: &mut impl Write, instr: &Instruction) -> fmt::Result {
    if instr.has_lock() {
        f.write_str("lock ")?;
    }
    if instr.has_repnz() {
        f.write_str("repnz ")?;
    } else if instr.has_rep() {
        f.write_str("rep ")?;
    }
    f.write_str(instr.mnemonic().name())?;
    for (i, operand) in instr.operands().iter().enumerate() {
        if matches!(operand, Operand::None) {
            break;
        }
        f.write_str(if i == 0 { " " } else { ", " })?;
        write_operand(f, instr, operand)?;
    }
    Ok(())
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_instr(f, self)
    }
}

/// Byte-buffer writer that truncates instead of failing.
struct Cursor<'a> {
    out: &'a mut [u8],
    len: usize,
}

impl Write for Cursor<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.out.len().saturating_sub(self.len);
        let n = room.min(s.len());
        self.out[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}

/// Renders `instr` into `out` as NUL-terminated text, truncating on
/// overflow. Returns the number of bytes written, excluding the NUL.
pub fn format(instr: &Instruction, out: &mut [u8]) -> usize {
    if out.is_empty() {
        return 0;
    }
    let mut cursor = Cursor { out, len: 0 };
    let _ = write_instr(&mut cursor, instr);
    let len = cursor.len.min(cursor.out.len() - 1);
    cursor.out[len] = 0;
    len
}
