//! Parser for the line-oriented instruction description file.
//!
//! Each non-blank, non-comment line is one encoding record:
//!
//! ```text
//! <pattern> [modrm] [W0|W1] [L0|L1] [ONLY32|ONLY64]  <MNEMONIC>  <ops|-->  [flags...]
//! ```
//!
//! The pattern is dot-separated: optional `V`/`V128`/`V256` (VEX), optional
//! mandatory prefix (`NP`/`66`/`F2`/`F3`), optional escape (`0F`/`0F38`/
//! `0F3A`), then the opcode byte, optionally suffixed `+` to span eight
//! consecutive opcodes (register-in-opcode forms). The modrm selector is
//! `/r` (ModR/M present, no dispatch), `/0`..`/7` (opcode extension in the
//! reg field), `//0`..`//7` (memory-form slot), `//M` (all memory forms),
//! `//R` (all mod=3 forms), or `//C0`..`//FF` with an optional `+` span
//! (exact mod=3 bytes).

use crate::consts::{imm, op, size, tf};
use crate::error::GenError;

/// ModR/M dispatch selector from the pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModrmSel {
    /// `/r`: ModR/M consumed, not dispatched on.
    Any,
    /// `/N`: opcode extension in the reg field, mod ignored.
    Reg(u8),
    /// `//N`: memory-form slot N (mod != 3).
    Mem(u8),
    /// `//M`: every memory-form slot.
    MemAll,
    /// `//R`: every mod=3 byte.
    RegAll,
    /// `//C0..//FF`: exact mod=3 ModR/M byte, optionally spanning eight.
    Byte(u8, bool),
}

/// Mode gate for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeGate {
    Both,
    Only32,
    Only64,
}

/// Resolved operand size from a template token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpSize {
    Fixed(u8),
    Op,
    Vec,
}

/// One resolved operand: source kind plus size.
#[derive(Debug, Clone, Copy)]
pub struct OpSpec {
    pub kind: u8,
    pub size: OpSize,
}

/// One encoding record.
#[derive(Debug, Clone)]
pub struct Record {
    pub line: usize,
    pub vex: bool,
    pub prefix: Option<u8>,
    pub escape: u8,
    pub opcode: u8,
    pub opcode_span: bool,
    pub modrm: Option<ModrmSel>,
    pub w: Option<bool>,
    pub l: Option<bool>,
    /// Set by the grouping pass when a sibling record pins W or L.
    pub force_wl: bool,
    pub mode: ModeGate,
    pub mnemonic: String,
    pub ops: Vec<OpSpec>,
    pub imm_wide: bool,
    pub sign8: bool,
    pub far: bool,
    pub lock: bool,
    pub def64: bool,
    pub sz8: bool,
    pub sz0: bool,
}

/// Packed operand template, pre-encoding. Deduplicated by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Template {
    pub ops: [u8; 4],
    pub size_fix1: u8,
    pub size_fix2: u8,
    pub imm: u8,
    pub flags: u8,
}

/// Operand kinds sourced from the ModR/M byte.
fn is_modrm_kind(kind: u8) -> bool {
    matches!(
        kind,
        op::RM_GP
            | op::RM_XMM
            | op::RM_MMX
            | op::RM_FPU
            | op::RM_MASK
            | op::MEM
            | op::REG_GP
            | op::REG_XMM
            | op::REG_MMX
            | op::REG_SEG
            | op::REG_CR
            | op::REG_DR
            | op::REG_MASK
    )
}

fn hex_byte(s: &str) -> Option<u8> {
    if s.len() == 2 && s.chars().all(|c| c.is_ascii_hexdigit()) {
        u8::from_str_radix(s, 16).ok()
    } else {
        None
    }
}

/// Parses the dotted pattern token into the record fields.
fn parse_pattern(token: &str, rec: &mut Record) -> Result<(), String> {
    let segments: Vec<&str> = token.split('.').collect();
    let last = segments.len() - 1;
    for (i, seg) in segments.iter().enumerate() {
        if i == last {
            let (hex, span) = match seg.strip_suffix('+') {
                Some(h) => (h, true),
                None => (*seg, false),
            };
            let byte = hex_byte(hex).ok_or_else(|| format!("bad opcode byte `{seg}`"))?;
            if span && byte & 7 != 0 {
                return Err(format!("spanned opcode `{seg}` must be 8-aligned"));
            }
            rec.opcode = byte;
            rec.opcode_span = span;
            continue;
        }
        match *seg {
            "V" => rec.vex = true,
            "V128" => {
                rec.vex = true;
                rec.l = Some(false);
            }
            "V256" => {
                rec.vex = true;
                rec.l = Some(true);
            }
            "NP" => rec.prefix = Some(0),
            "66" => rec.prefix = Some(1),
            "F3" => rec.prefix = Some(2),
            "F2" => rec.prefix = Some(3),
            "0F" => rec.escape = 1,
            "0F38" => rec.escape = 2,
            "0F3A" => rec.escape = 3,
            "W0" => rec.w = Some(false),
            "W1" => rec.w = Some(true),
            "L0" => rec.l = Some(false),
            "L1" => rec.l = Some(true),
            _ => return Err(format!("unknown pattern segment `{seg}`")),
        }
    }
    if rec.vex && rec.prefix.is_none() {
        // VEX always supplies a pp field; default it to "no prefix".
        rec.prefix = Some(0);
    }
    Ok(())
}

/// Parses a `/...` modrm selector token.
fn parse_modrm(token: &str) -> Result<ModrmSel, String> {
    if token == "/r" {
        return Ok(ModrmSel::Any);
    }
    if let Some(rest) = token.strip_prefix("//") {
        if rest == "M" {
            return Ok(ModrmSel::MemAll);
        }
        if rest == "R" {
            return Ok(ModrmSel::RegAll);
        }
        if rest.len() == 1 {
            let n: u8 = rest.parse().map_err(|_| format!("bad selector `{token}`"))?;
            if n > 7 {
                return Err(format!("memory-form slot out of range in `{token}`"));
            }
            return Ok(ModrmSel::Mem(n));
        }
        let (hex, span) = match rest.strip_suffix('+') {
            Some(h) => (h, true),
            None => (rest, false),
        };
        let byte = hex_byte(hex).ok_or_else(|| format!("bad selector `{token}`"))?;
        if byte < 0xC0 {
            return Err(format!("exact ModR/M byte `{token}` must be >= C0"));
        }
        if span && byte & 7 != 0 {
            return Err(format!("spanned selector `{token}` must be 8-aligned"));
        }
        return Ok(ModrmSel::Byte(byte, span));
    }
    if let Some(rest) = token.strip_prefix('/') {
        let n: u8 = rest.parse().map_err(|_| format!("bad selector `{token}`"))?;
        if n > 7 {
            return Err(format!("opcode extension out of range in `{token}`"));
        }
        return Ok(ModrmSel::Reg(n));
    }
    Err(format!("bad selector `{token}`"))
}

/// Maps an operand template token onto a source kind and size.
fn parse_operand(token: &str, rec: &mut Record) -> Result<(), String> {
    use OpSize::{Fixed, Op, Vec};
    let (kind, sz) = match token {
        "RM" => (op::RM_GP, Op),
        "RM8" => (op::RM_GP, Fixed(1)),
        "RM16" => (op::RM_GP, Fixed(2)),
        "RM32" => (op::RM_GP, Fixed(4)),
        "RM64" => (op::RM_GP, Fixed(8)),
        "M" => (op::MEM, Op),
        "M8" => (op::MEM, Fixed(1)),
        "M16" => (op::MEM, Fixed(2)),
        "M32" => (op::MEM, Fixed(4)),
        "M64" => (op::MEM, Fixed(8)),
        "M80" => (op::MEM, Fixed(10)),
        "MOFFS" => (op::MOFFS, Op),
        "R" => (op::REG_GP, Op),
        "R8" => (op::REG_GP, Fixed(1)),
        "R16" => (op::REG_GP, Fixed(2)),
        "R32" => (op::REG_GP, Fixed(4)),
        "R64" => (op::REG_GP, Fixed(8)),
        "RO" => (op::OPC_GP, Op),
        "RO8" => (op::OPC_GP, Fixed(1)),
        "IMM" => (op::IMM, Op),
        "IMMW" => {
            rec.imm_wide = true;
            (op::IMM, Op)
        }
        "IMM8" => (op::IMM, Fixed(1)),
        "SIMM8" => {
            // Distinguished from IMM8 only by sign extension; same slot.
            rec.sign8 = true;
            (op::IMM, Fixed(1))
        }
        "IMM16" => (op::IMM, Fixed(2)),
        "IMM2_8" => (op::IMM2, Fixed(1)),
        "IMM2_16" => (op::IMM2, Fixed(2)),
        "REL8" => (op::PCREL, Fixed(1)),
        "REL" => (op::PCREL, Op),
        "ACC" => (op::IMP_AX, Op),
        "AL" => (op::IMP_AX, Fixed(1)),
        "AX" => (op::IMP_AX, Fixed(2)),
        "CL" => (op::IMP_CX, Fixed(1)),
        "DX" => (op::IMP_DX, Fixed(2)),
        "XMM" => (op::REG_XMM, Vec),
        "XMM_RM" => (op::RM_XMM, Vec),
        "XMM_RM8" => (op::RM_XMM, Fixed(1)),
        "XMM_RM16" => (op::RM_XMM, Fixed(2)),
        "XMM_RM32" => (op::RM_XMM, Fixed(4)),
        "XMM_RM64" => (op::RM_XMM, Fixed(8)),
        "XMM_RM128" => (op::RM_XMM, Fixed(16)),
        "XMM_V" => (op::VEX_XMM, Vec),
        "VGP" => (op::VEX_GP, Op),
        "MMX" => (op::REG_MMX, Fixed(8)),
        "MMX_RM" => (op::RM_MMX, Fixed(8)),
        "SEG" => (op::REG_SEG, Fixed(0)),
        "CR" => (op::REG_CR, Fixed(0)),
        "DR" => (op::REG_DR, Fixed(0)),
        "ST0" => (op::IMP_ST0, Fixed(0)),
        "ST" => (op::RM_FPU, Fixed(0)),
        "ONE" => (op::IMM_ONE, Fixed(1)),
        "ES" => (op::IMP_ES, Fixed(0)),
        "CS" => (op::IMP_CS, Fixed(0)),
        "SS" => (op::IMP_SS, Fixed(0)),
        "DS" => (op::IMP_DS, Fixed(0)),
        "FS" => (op::IMP_FS, Fixed(0)),
        "GS" => (op::IMP_GS, Fixed(0)),
        "FAR" => {
            // Expands to offset + selector immediates.
            rec.far = true;
            rec.ops.push(OpSpec {
                kind: op::IMM,
                size: Op,
            });
            rec.ops.push(OpSpec {
                kind: op::IMM2,
                size: Fixed(2),
            });
            return Ok(());
        }
        _ => return Err(format!("unknown operand `{token}`")),
    };
    rec.ops.push(OpSpec { kind, size: sz });
    Ok(())
}

/// Parses the whole description file.
pub fn parse_file(input: &str) -> Result<Vec<Record>, GenError> {
    let mut records = Vec::new();
    for (idx, raw) in input.lines().enumerate() {
        let line_no = idx + 1;
        let line = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        let mut tokens = line.split_whitespace().peekable();
        let Some(first) = tokens.next() else { continue };

        let mut rec = Record {
            line: line_no,
            vex: false,
            prefix: None,
            escape: 0,
            opcode: 0,
            opcode_span: false,
            modrm: None,
            w: None,
            l: None,
            force_wl: false,
            mode: ModeGate::Both,
            mnemonic: String::new(),
            ops: Vec::new(),
            imm_wide: false,
            sign8: false,
            far: false,
            lock: false,
            def64: false,
            sz8: false,
            sz0: false,
        };
        parse_pattern(first, &mut rec).map_err(|m| GenError::parse(line_no, m))?;

        // Selector / pin / gate tokens, in any order, until the mnemonic.
        while let Some(&tok) = tokens.peek() {
            match tok {
                "W0" => rec.w = Some(false),
                "W1" => rec.w = Some(true),
                "L0" => rec.l = Some(false),
                "L1" => rec.l = Some(true),
                "ONLY32" => rec.mode = ModeGate::Only32,
                "ONLY64" => rec.mode = ModeGate::Only64,
                _ if tok.starts_with('/') => {
                    if rec.modrm.is_some() {
                        return Err(GenError::parse(line_no, "duplicate ModR/M selector"));
                    }
                    rec.modrm = Some(parse_modrm(tok).map_err(|m| GenError::parse(line_no, m))?);
                }
                _ => break,
            }
            tokens.next();
        }

        let mnemonic = tokens
            .next()
            .ok_or_else(|| GenError::parse(line_no, "missing mnemonic"))?;
        if mnemonic.is_empty()
            || !mnemonic
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(GenError::parse(line_no, format!("bad mnemonic `{mnemonic}`")));
        }
        rec.mnemonic = mnemonic.to_string();

        if let Some(ops_tok) = tokens.next() {
            if ops_tok != "-" {
                for part in ops_tok.split(',') {
                    parse_operand(part, &mut rec).map_err(|m| GenError::parse(line_no, m))?;
                }
            }
        }
        if rec.ops.len() > 4 {
            return Err(GenError::parse(line_no, "more than four operands"));
        }

        for flag in tokens {
            match flag {
                "LOCK" => rec.lock = true,
                "DEF64" => rec.def64 = true,
                "SZ8" => rec.sz8 = true,
                "SZ0" => rec.sz0 = true,
                _ => return Err(GenError::parse(line_no, format!("unknown flag `{flag}`"))),
            }
        }

        validate(&rec)?;
        records.push(rec);
    }
    Ok(records)
}

fn validate(rec: &Record) -> Result<(), GenError> {
    let has_modrm_operand = rec.ops.iter().any(|o| is_modrm_kind(o.kind));
    if has_modrm_operand && rec.modrm.is_none() {
        return Err(GenError::parse(
            rec.line,
            "operands require ModR/M but the pattern has no selector",
        ));
    }
    if rec.ops.iter().filter(|o| o.kind == op::IMM).count() > 1
        || rec.ops.iter().filter(|o| o.kind == op::IMM2).count() > 1
    {
        return Err(GenError::parse(rec.line, "duplicate immediate operand"));
    }
    if !rec.vex && rec.l.is_some() {
        return Err(GenError::parse(rec.line, "L pin on a non-VEX record"));
    }
    if rec.vex
        && rec
            .ops
            .iter()
            .any(|o| matches!(o.kind, op::RM_MMX | op::REG_MMX | op::RM_FPU | op::IMP_ST0))
    {
        return Err(GenError::parse(rec.line, "MMX/FPU operand on a VEX record"));
    }
    Ok(())
}

/// Builds the packed operand template for a record.
pub fn build_template(rec: &Record) -> Result<Template, GenError> {
    // Collect the distinct fixed sizes; two slots are available.
    let mut fixed: Vec<u8> = Vec::new();
    for o in &rec.ops {
        if let OpSize::Fixed(n) = o.size {
            if !fixed.contains(&n) {
                fixed.push(n);
            }
        }
    }
    if fixed.len() > 2 {
        return Err(GenError::parse(
            rec.line,
            format!("more than two fixed operand sizes: {fixed:?}"),
        ));
    }
    let size_fix1 = fixed.first().copied().unwrap_or(0);
    let size_fix2 = fixed.get(1).copied().unwrap_or(0);

    let mut ops = [0u8; 4];
    for (i, o) in rec.ops.iter().enumerate() {
        let class = match o.size {
            OpSize::Fixed(n) if n == size_fix1 => size::FIX1,
            OpSize::Fixed(_) => size::FIX2,
            OpSize::Op => size::OP,
            OpSize::Vec => size::VEC,
        };
        ops[i] = o.kind | (class << 6);
    }

    let imm_rule = immediate_rule(rec)?;

    let mut flags = 0u8;
    if rec.modrm.is_some() {
        flags |= tf::MODRM;
    }
    if rec.lock {
        flags |= tf::LOCKABLE;
    }
    if rec.def64 {
        flags |= tf::DEF64;
    }
    if rec.sz8 {
        flags |= tf::SZ8;
    }
    if rec.sz0 {
        flags |= tf::SZ0;
    }

    Ok(Template {
        ops,
        size_fix1,
        size_fix2,
        imm: imm_rule,
        flags,
    })
}

fn immediate_rule(rec: &Record) -> Result<u8, GenError> {
    if rec.far {
        return Ok(imm::FAR);
    }
    let imm1 = rec.ops.iter().find(|o| o.kind == op::IMM);
    let imm2 = rec.ops.iter().find(|o| o.kind == op::IMM2);
    let pcrel = rec.ops.iter().find(|o| o.kind == op::PCREL);
    let moffs = rec.ops.iter().any(|o| o.kind == op::MOFFS);

    if let Some(rel) = pcrel {
        if imm1.is_some() || moffs {
            return Err(GenError::parse(rec.line, "conflicting immediate sources"));
        }
        return Ok(match rel.size {
            OpSize::Fixed(1) => imm::REL8,
            OpSize::Op => imm::RELZ,
            _ => return Err(GenError::parse(rec.line, "bad relative operand size")),
        });
    }
    if moffs {
        if imm1.is_some() {
            return Err(GenError::parse(rec.line, "conflicting immediate sources"));
        }
        return Ok(imm::MOFFS);
    }
    match (imm1, imm2) {
        (None, None) => Ok(imm::NONE),
        (None, Some(_)) => Err(GenError::parse(rec.line, "second immediate without a first")),
        (Some(a), None) => match a.size {
            OpSize::Fixed(1) => Ok(if sign_extended_imm8(rec) {
                imm::S8
            } else {
                imm::U8
            }),
            OpSize::Fixed(2) => Ok(imm::I16),
            OpSize::Op => Ok(if rec.imm_wide { imm::IW } else { imm::IZ }),
            _ => Err(GenError::parse(rec.line, "bad immediate operand size")),
        },
        (Some(a), Some(b)) => match (a.size, b.size) {
            (OpSize::Fixed(2), OpSize::Fixed(1)) => Ok(imm::ENTER),
            (OpSize::Fixed(1), OpSize::Fixed(1)) => Ok(imm::U8X2),
            _ => Err(GenError::parse(rec.line, "unsupported immediate pair")),
        },
    }
}

/// `SIMM8` and `IMM8` both resolve to an 8-bit immediate; the description
/// file spells sign extension with a distinct token, which the parser
/// records by position. A plain `IMM8` is zero-extended.
fn sign_extended_imm8(rec: &Record) -> bool {
    rec.sign8
}
