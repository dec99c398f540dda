//! The decode entry point: table walk, operand construction, finalization.

use crate::error::DecodeError;
use crate::instruction::{Instruction, MemRef, Operand, PrefixFlags, Reg, RegKind, Segment};
use crate::modrm::{decode_mem, MemParts, ModRm};
use crate::prefix::{take, Prefixes};
use crate::table::{self, imm_rule, op, tab, tf, InstrTemplate, Mnemonic};

/// Decodes a single instruction.
///
/// * `bytes` - the buffer to decode; at most 15 bytes are ever read.
/// * `mode` - 32 or 64; anything else is [`DecodeError::BadMode`].
/// * `address` - virtual address of the first byte, used only to resolve
///   PC-relative operands.
///
/// On success the returned record's [`Instruction::length`] is the number
/// of bytes consumed. Decoding is a pure function of its arguments: no
/// allocation, no I/O, no shared state.
pub fn decode(bytes: &[u8], mode: u32, address: u64) -> Result<Instruction, DecodeError> {
    if mode != 32 && mode != 64 {
        return Err(DecodeError::BadMode);
    }

    let (pfx, mut cur) = Prefixes::parse(bytes, mode)?;

    // Escape bytes select the opcode map; VEX carries its map inline.
    let (escape, vex) = match &pfx.vex {
        Some(v) => {
            if v.xop {
                // The XOP prefix shape is recognized but no XOP encodings
                // exist in the tables.
                return Err(DecodeError::Invalid);
            }
            (v.map, true)
        }
        None => {
            if take(bytes, cur)? == 0x0F {
                cur += 1;
                match take(bytes, cur)? {
                    0x38 => {
                        cur += 1;
                        (2, false)
                    }
                    0x3A => {
                        cur += 1;
                        (3, false)
                    }
                    _ => (1, false),
                }
            } else {
                (0, false)
            }
        }
    };

    // Phase 3: walk the dispatch tables.
    let root = if mode == 64 {
        table::ROOT_OFFSET_64
    } else {
        table::ROOT_OFFSET_32
    };
    let mut entry = table::DISPATCH[root + escape as usize + ((vex as usize) << 2)];
    let mut opcode = 0u8;
    let mut mandatory: Option<usize> = None;
    loop {
        match table::ref_kind(entry) {
            tab::NONE => return Err(DecodeError::Invalid),
            tab::TERM => break,
            tab::T256 | tab::T128 => {
                opcode = take(bytes, cur)?;
                cur += 1;
                entry = table::child(entry, opcode as usize);
            }
            tab::T8 => {
                // Peek ModR/M; it is consumed in phase 4.
                let m = take(bytes, cur)?;
                entry = table::child(entry, ((m >> 3) & 7) as usize);
            }
            tab::T72 => {
                let m = take(bytes, cur)?;
                let key = if m < 0xC0 {
                    ((m >> 3) & 7) as usize
                } else {
                    8 + (m - 0xC0) as usize
                };
                entry = table::child(entry, key);
            }
            tab::TPFX => {
                let key = pfx.mandatory_key();
                mandatory = Some(key);
                entry = table::child(entry, key);
            }
            _ => {
                // TVEX
                let key = pfx.wbit() as usize | (pfx.lbit() as usize) << 1;
                entry = table::child(entry, key);
            }
        }
    }
    let term = table::ref_offset(entry);
    let mnemonic = Mnemonic::from_id(table::DISPATCH[term]);
    let template = &table::TEMPLATES[table::DISPATCH[term + 1] as usize];

    // Effective sizes (phase 6 inputs, needed for immediates already).
    let wbit = pfx.wbit();
    let osize: u8 = if template.flags & tf::SZ8 != 0 {
        1
    } else if mode == 64 {
        if wbit {
            8
        } else if pfx.osize {
            2
        } else if template.flags & tf::DEF64 != 0 {
            8
        } else {
            4
        }
    } else if pfx.osize {
        2
    } else {
        4
    };
    let vsize: u8 = if pfx.lbit() { 32 } else { 16 };
    let asize: u8 = if mode == 64 {
        if pfx.asize {
            4
        } else {
            8
        }
    } else if pfx.asize {
        2
    } else {
        4
    };

    // Phase 4: ModR/M, SIB, displacement.
    let mut modrm: Option<ModRm> = None;
    let mut mem: Option<MemParts> = None;
    if template.flags & tf::MODRM != 0 {
        let m = ModRm::parse(take(bytes, cur)?, &pfx);
        cur += 1;
        if !m.is_register() && template_wants_mem(template) {
            let (parts, next) = decode_mem(bytes, cur, m, &pfx, asize, mode)?;
            cur = next;
            mem = Some(parts);
        }
        modrm = Some(m);
    }

    // LOCK is only legal on a lockable encoding with a memory destination.
    if pfx.lock
        && (template.flags & tf::LOCKABLE == 0 || mem.is_none())
    {
        return Err(DecodeError::Invalid);
    }

    // VEX.vvvv must be zero unless the encoding consumes it.
    if let Some(v) = &pfx.vex {
        let uses_vvvv = template
            .ops
            .iter()
            .any(|&o| matches!(o & 0x1F, op::VEX_GP | op::VEX_XMM));
        if v.vvvv != 0 && !uses_vvvv {
            return Err(DecodeError::Invalid);
        }
    }

    // Phase 5: immediates.
    let mut immediate: i64 = 0;
    let mut immediate2: i64 = 0;
    let mut displacement: i64 = mem.map(|m| m.disp).unwrap_or(0);
    match template.imm {
        imm_rule::NONE => {}
        imm_rule::U8 => immediate = read_imm(bytes, &mut cur, 1, false)?,
        imm_rule::S8 => immediate = read_imm(bytes, &mut cur, 1, true)?,
        imm_rule::I16 => immediate = read_imm(bytes, &mut cur, 2, false)?,
        imm_rule::IZ => {
            let n = if osize == 2 { 2 } else { 4 };
            immediate = read_imm(bytes, &mut cur, n, true)?;
        }
        imm_rule::IW => {
            immediate = read_imm(bytes, &mut cur, osize as usize, true)?;
        }
        imm_rule::REL8 => displacement = read_imm(bytes, &mut cur, 1, true)?,
        imm_rule::RELZ => {
            let n = if mode == 64 || osize != 2 { 4 } else { 2 };
            displacement = read_imm(bytes, &mut cur, n, true)?;
        }
        imm_rule::MOFFS => {
            displacement = read_imm(bytes, &mut cur, asize as usize, false)?;
        }
        imm_rule::ENTER => {
            immediate = read_imm(bytes, &mut cur, 2, false)?;
            immediate2 = read_imm(bytes, &mut cur, 1, false)?;
        }
        imm_rule::U8X2 => {
            immediate = read_imm(bytes, &mut cur, 1, false)?;
            immediate2 = read_imm(bytes, &mut cur, 1, false)?;
        }
        imm_rule::FAR => {
            let n = if osize == 2 { 2 } else { 4 };
            immediate = read_imm(bytes, &mut cur, n, false)?;
            immediate2 = read_imm(bytes, &mut cur, 2, false)?;
        }
        _ => return Err(DecodeError::Invalid),
    }

    debug_assert!(cur <= crate::MAX_INSTR_LEN);
    let length = cur as u8;

    // Phase 6: finalization.
    let mut flags = PrefixFlags::empty();
    if pfx.lock {
        flags |= PrefixFlags::LOCK;
    }
    if pfx.rep && mandatory != Some(2) {
        flags |= PrefixFlags::REP;
    }
    if pfx.repnz && mandatory != Some(3) {
        flags |= PrefixFlags::REPNZ;
    }
    if pfx.segment.is_some() {
        flags |= PrefixFlags::SEG;
    }
    if pfx.osize {
        flags |= PrefixFlags::OSIZE;
    }
    if pfx.asize {
        flags |= PrefixFlags::ASIZE;
    }
    if let Some(rex) = &pfx.rex {
        flags |= PrefixFlags::REX;
        if rex.w {
            flags |= PrefixFlags::REX_W;
        }
    }
    if pfx.vex.is_some() {
        flags |= PrefixFlags::VEX;
    }

    let uses_vec = template
        .ops
        .iter()
        .any(|&o| o != 0 && o >> 6 == 3);
    let operand_size = if template.flags & tf::SZ0 != 0 {
        0
    } else if uses_vec {
        vsize
    } else {
        osize
    };

    let mut instr = Instruction {
        mnemonic,
        length,
        operand_size,
        address_size: asize,
        flags,
        segment: pfx.segment,
        operands: [Operand::None; 4],
        address,
        immediate,
        immediate2,
        displacement,
    };

    // Fill the operand slots from the template.
    let imm_one = template.ops.iter().any(|&o| o & 0x1F == op::IMM_ONE);
    if imm_one {
        instr.immediate = 1;
    }
    for (i, &packed) in template.ops.iter().enumerate() {
        if packed == 0 {
            break;
        }
        let kind = packed & 0x1F;
        let size = match packed >> 6 {
            0 => template.size_fix1,
            1 => template.size_fix2,
            2 => osize,
            _ => vsize,
        };
        instr.operands[i] = build_operand(
            kind, size, &pfx, modrm, &mem, opcode, mode, asize, address, length, displacement,
        )?;
    }

    Ok(instr)
}

/// Does any operand read memory through ModR/M?
fn template_wants_mem(template: &InstrTemplate) -> bool {
    template.ops.iter().any(|&o| {
        matches!(
            o & 0x1F,
            op::RM_GP | op::RM_XMM | op::RM_MMX | op::RM_MASK | op::MEM
        )
    })
}

#[allow(clippy::too_many_arguments)]
fn build_operand(
    kind: u8,
    size: u8,
    pfx: &Prefixes,
    modrm: Option<ModRm>,
    mem: &Option<MemParts>,
    opcode: u8,
    mode: u32,
    asize: u8,
    address: u64,
    length: u8,
    displacement: i64,
) -> Result<Operand, DecodeError> {
    let vec_kind = |size: u8| if size == 32 { RegKind::Ymm } else { RegKind::Xmm };
    let m = modrm.unwrap_or(ModRm {
        mode: 0,
        reg: 0,
        rm: 0,
    });
    Ok(match kind {
        op::RM_GP => match mem {
            Some(parts) => mem_operand(parts, pfx, mode, asize),
            None => Operand::Reg(Reg::new(RegKind::Gpr, m.rm, size)),
        },
        op::RM_XMM => match mem {
            Some(parts) => mem_operand(parts, pfx, mode, asize),
            None => Operand::Reg(Reg::new(vec_kind(size), m.rm, size)),
        },
        op::RM_MMX => match mem {
            Some(parts) => mem_operand(parts, pfx, mode, asize),
            None => Operand::Reg(Reg::new(RegKind::Mmx, m.rm & 7, 8)),
        },
        op::RM_MASK => match mem {
            Some(parts) => mem_operand(parts, pfx, mode, asize),
            None => Operand::Reg(Reg::new(RegKind::Mask, m.rm & 7, size)),
        },
        op::RM_FPU => Operand::Reg(Reg::new(RegKind::Fpu, m.rm & 7, 0)),
        op::MEM => match mem {
            Some(parts) => mem_operand(parts, pfx, mode, asize),
            // A memory-only operand with mod=3 is not a valid encoding.
            None => return Err(DecodeError::Invalid),
        },
        op::MOFFS => Operand::Mem(MemRef {
            base: None,
            index: None,
            scale: 1,
            segment: effective_segment(pfx, None, mode),
        }),
        op::REG_GP => Operand::Reg(Reg::new(RegKind::Gpr, m.reg, size)),
        op::REG_XMM => Operand::Reg(Reg::new(vec_kind(size), m.reg, size)),
        op::REG_MMX => Operand::Reg(Reg::new(RegKind::Mmx, m.reg & 7, 8)),
        op::REG_SEG => {
            if m.reg & 7 > 5 {
                return Err(DecodeError::Invalid);
            }
            Operand::Reg(Reg::new(RegKind::Seg, m.reg & 7, 0))
        }
        op::REG_CR => Operand::Reg(Reg::new(RegKind::Cr, m.reg, 0)),
        op::REG_DR => Operand::Reg(Reg::new(RegKind::Dr, m.reg, 0)),
        op::REG_MASK => Operand::Reg(Reg::new(RegKind::Mask, m.reg & 7, size)),
        op::VEX_GP => Operand::Reg(Reg::new(
            RegKind::Gpr,
            pfx.vex.as_ref().map(|v| v.vvvv).unwrap_or(0),
            size,
        )),
        op::VEX_XMM => Operand::Reg(Reg::new(
            vec_kind(size),
            pfx.vex.as_ref().map(|v| v.vvvv).unwrap_or(0),
            size,
        )),
        op::OPC_GP => Operand::Reg(Reg::new(
            RegKind::Gpr,
            (opcode & 7) | pfx.rex_b() << 3,
            size,
        )),
        op::IMP_AX => Operand::Reg(Reg::new(RegKind::Gpr, 0, size)),
        op::IMP_CX => Operand::Reg(Reg::new(RegKind::Gpr, 1, size)),
        op::IMP_DX => Operand::Reg(Reg::new(RegKind::Gpr, 2, size)),
        op::IMP_ST0 => Operand::Reg(Reg::new(RegKind::Fpu, 0, 0)),
        op::IMP_ES => Operand::Reg(Reg::new(RegKind::Seg, 0, 0)),
        op::IMP_CS => Operand::Reg(Reg::new(RegKind::Seg, 1, 0)),
        op::IMP_SS => Operand::Reg(Reg::new(RegKind::Seg, 2, 0)),
        op::IMP_DS => Operand::Reg(Reg::new(RegKind::Seg, 3, 0)),
        op::IMP_FS => Operand::Reg(Reg::new(RegKind::Seg, 4, 0)),
        op::IMP_GS => Operand::Reg(Reg::new(RegKind::Seg, 5, 0)),
        op::IMM | op::IMM_ONE => Operand::Imm { slot: 0, size },
        op::IMM2 => Operand::Imm { slot: 1, size },
        op::PCREL => Operand::Pcrel {
            // Wrap-add: defined modulo 2^64.
            target: address
                .wrapping_add(length as u64)
                .wrapping_add(displacement as u64),
        },
        _ => return Err(DecodeError::Invalid),
    })
}

fn mem_operand(parts: &MemParts, pfx: &Prefixes, mode: u32, asize: u8) -> Operand {
    let base = if parts.rip {
        Some(Reg::new(RegKind::Rip, 0, 8))
    } else {
        parts.base.map(|i| Reg::new(RegKind::Gpr, i, asize))
    };
    let index = parts.index.map(|i| Reg::new(RegKind::Gpr, i, asize));
    Operand::Mem(MemRef {
        base,
        index,
        scale: parts.scale,
        segment: effective_segment(pfx, parts.base, mode),
    })
}

/// Segment resolution: FS/GS overrides always win; other overrides only
/// apply in 32-bit mode. The default is SS for SP/BP-based operands.
fn effective_segment(pfx: &Prefixes, base: Option<u8>, mode: u32) -> Segment {
    match pfx.segment {
        Some(seg @ (Segment::Fs | Segment::Gs)) => return seg,
        Some(seg) if mode == 32 => return seg,
        _ => {}
    }
    // SP/BP bases default to SS; their REX extensions (r12/r13) do not.
    match base {
        Some(4) | Some(5) => Segment::Ss,
        _ => Segment::Ds,
    }
}

fn read_imm(
    bytes: &[u8],
    cur: &mut usize,
    size: usize,
    sign_extend: bool,
) -> Result<i64, DecodeError> {
    let mut raw = 0u64;
    for i in 0..size {
        raw |= (take(bytes, *cur + i)? as u64) << (8 * i);
    }
    *cur += size;
    Ok(if sign_extend {
        match size {
            1 => raw as u8 as i8 as i64,
            2 => raw as u16 as i16 as i64,
            4 => raw as u32 as i32 as i64,
            _ => raw as i64,
        }
    } else {
        raw as i64
    })
}
