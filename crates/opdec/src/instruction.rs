//! The decoded instruction record and its operand types.
//!
//! The record is fixed-size and `Copy`: four operand slots, two immediate
//! slots and one displacement, no indirection. Callers own the storage;
//! decoding never allocates.

use bitflags::bitflags;

use crate::table::Mnemonic;

bitflags! {
    /// Prefix bits recorded on the instruction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct PrefixFlags: u16 {
        /// LOCK (F0) was present.
        const LOCK = 1 << 0;
        /// REP/REPZ (F3) was present as a plain prefix.
        const REP = 1 << 1;
        /// REPNZ (F2) was present as a plain prefix.
        const REPNZ = 1 << 2;
        /// A segment override prefix was present.
        const SEG = 1 << 3;
        /// Operand-size override (66) was present.
        const OSIZE = 1 << 4;
        /// Address-size override (67) was present.
        const ASIZE = 1 << 5;
        /// A REX prefix was present.
        const REX = 1 << 6;
        /// REX.W was set.
        const REX_W = 1 << 7;
        /// The instruction was VEX-encoded.
        const VEX = 1 << 8;
    }
}

/// Segment registers, in their x86 encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Segment {
    Es,
    Cs,
    Ss,
    Ds,
    Fs,
    Gs,
}

/// Register file of a register operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RegKind {
    Gpr,
    Xmm,
    Ymm,
    Mmx,
    Seg,
    Fpu,
    Cr,
    Dr,
    Mask,
    /// Instruction pointer; appears only as a memory base (RIP-relative).
    Rip,
}

/// A concrete register reference.
///
/// `size` is the operand width in bytes; it is 0 for segment, FPU, control
/// and debug registers, whose width is not meaningful to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reg {
    pub kind: RegKind,
    pub index: u8,
    pub size: u8,
}

impl Reg {
    pub(crate) fn new(kind: RegKind, index: u8, size: u8) -> Self {
        Reg { kind, index, size }
    }
}

/// A memory reference `segment:[base + index*scale + disp]`.
///
/// The displacement itself lives in the instruction record
/// ([`Instruction::displacement`]); `segment` is the effective segment
/// after override resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemRef {
    pub base: Option<Reg>,
    pub index: Option<Reg>,
    pub scale: u8,
    pub segment: Segment,
}

/// An instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Operand {
    #[default]
    None,
    /// Register operand.
    Reg(Reg),
    /// Memory operand.
    Mem(MemRef),
    /// Immediate; `slot` 0 reads [`Instruction::immediate`], 1 reads
    /// [`Instruction::immediate2`].
    Imm { slot: u8, size: u8 },
    /// PC-relative branch target, resolved against the instruction address.
    Pcrel { target: u64 },
}

impl Operand {
    /// Returns true if this is a register operand.
    pub fn is_reg(&self) -> bool {
        matches!(self, Operand::Reg(_))
    }

    /// Returns true if this is a memory operand.
    pub fn is_mem(&self) -> bool {
        matches!(self, Operand::Mem(_))
    }

    /// Returns true if this is an immediate operand.
    pub fn is_imm(&self) -> bool {
        matches!(self, Operand::Imm { .. })
    }
}

/// A decoded instruction.
///
/// Produced by [`crate::decode`]; query it through the accessors so the
/// layout can evolve. Fields are public for callers that accept the
/// coupling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instruction {
    pub mnemonic: Mnemonic,
    pub length: u8,
    pub operand_size: u8,
    pub address_size: u8,
    pub flags: PrefixFlags,
    pub segment: Option<Segment>,
    pub operands: [Operand; 4],
    pub address: u64,
    pub immediate: i64,
    pub immediate2: i64,
    pub displacement: i64,
}

impl Instruction {
    /// The instruction mnemonic.
    pub fn mnemonic(&self) -> Mnemonic {
        self.mnemonic
    }

    /// Bytes consumed from the input, 1..=15.
    pub fn length(&self) -> usize {
        self.length as usize
    }

    /// The virtual address supplied to `decode`.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Operand in slot `idx` (0..4); `Operand::None` past the last one.
    pub fn operand(&self, idx: usize) -> Operand {
        self.operands.get(idx).copied().unwrap_or(Operand::None)
    }

    /// All four operand slots.
    pub fn operands(&self) -> &[Operand; 4] {
        &self.operands
    }

    /// Number of populated operand slots.
    pub fn operand_count(&self) -> usize {
        self.operands
            .iter()
            .take_while(|o| !matches!(o, Operand::None))
            .count()
    }

    /// Effective operand size in bytes; 0 where the size is not reported.
    pub fn operand_size(&self) -> u8 {
        self.operand_size
    }

    /// Effective address size in bytes (2, 4 or 8).
    pub fn address_size(&self) -> u8 {
        self.address_size
    }

    /// Recorded prefix bits.
    pub fn prefix_flags(&self) -> PrefixFlags {
        self.flags
    }

    /// True if the LOCK prefix was present.
    pub fn has_lock(&self) -> bool {
        self.flags.contains(PrefixFlags::LOCK)
    }

    /// True if F3 was present as a plain (REP/REPZ) prefix.
    pub fn has_rep(&self) -> bool {
        self.flags.contains(PrefixFlags::REP)
    }

    /// True if F2 was present as a plain (REPNZ) prefix.
    pub fn has_repnz(&self) -> bool {
        self.flags.contains(PrefixFlags::REPNZ)
    }

    /// True for VEX-encoded instructions.
    pub fn has_vex(&self) -> bool {
        self.flags.contains(PrefixFlags::VEX)
    }

    /// The recorded segment override prefix, if any.
    pub fn segment_override(&self) -> Option<Segment> {
        self.segment
    }

    /// First immediate, sign- or zero-extended per the encoding.
    pub fn immediate(&self) -> i64 {
        self.immediate
    }

    /// Second immediate (ENTER, EXTRQ/INSERTQ, far pointers).
    pub fn immediate2(&self) -> i64 {
        self.immediate2
    }

    /// Memory displacement, branch offset, or absolute moffs.
    pub fn displacement(&self) -> i64 {
        self.displacement
    }

    /// Resolved target of the first PC-relative operand, if any.
    pub fn pcrel_target(&self) -> Option<u64> {
        self.operands.iter().find_map(|o| match o {
            Operand::Pcrel { target } => Some(*target),
            _ => None,
        })
    }
}
