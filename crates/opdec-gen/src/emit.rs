//! Packed-table layout and Rust source emission.
//!
//! Entries are 2-word aligned; a child reference packs
//! `(word_offset / 2) << 3 | kind`. Sparse 256-entry tables are rewritten
//! into a 256-byte indirection array plus a dense child list when they are
//! under half full; lookup stays two loads.

use std::collections::HashMap;
use std::fmt::Write;

use crate::consts::{tab, MAX_TABLE_WORDS};
use crate::error::GenError;
use crate::spec::Template;
use crate::trie::{self, Node, Trie};

/// Occupancy below which a 256-entry table is emitted sparse.
const SPARSE_THRESHOLD: usize = 128;

struct Layout {
    kind: u16,
    offset: usize,
}

pub fn emit(trie: &Trie, templates: &[Template], mnemonics: &[String]) -> Result<String, GenError> {
    let order = trie.reachable();

    // Pass 1: pick each node's emitted kind and assign aligned offsets.
    let mut layouts: HashMap<usize, Layout> = HashMap::new();
    let mut cursor = 0usize;
    for &id in &order {
        let (kind, width) = match &trie.nodes[id] {
            Node::Term { .. } => (tab::TERM, 2),
            Node::Table { kind, children } => match *kind {
                trie::ROOT => (trie::ROOT, 8),
                tab::T256 => {
                    let occupied = children.iter().flatten().count();
                    if occupied < SPARSE_THRESHOLD {
                        (tab::T128, 128 + occupied)
                    } else {
                        (tab::T256, 256)
                    }
                }
                other => (other, trie::table_len(other)),
            },
        };
        let offset = (cursor + 1) & !1;
        cursor = offset + width;
        layouts.insert(id, Layout { kind, offset });
    }
    if cursor > MAX_TABLE_WORDS {
        return Err(GenError::Overflow {
            words: cursor,
            max: MAX_TABLE_WORDS,
        });
    }
    let total = (cursor + 1) & !1;

    let child_ref = |id: usize| -> u16 {
        let l = &layouts[&id];
        (((l.offset / 2) as u16) << 3) | l.kind
    };

    // Pass 2: fill the word array.
    let mut words = vec![0u16; total];
    for &id in &order {
        let l = &layouts[&id];
        match &trie.nodes[id] {
            Node::Term { mnemonic, template } => {
                words[l.offset] = *mnemonic;
                words[l.offset + 1] = *template;
            }
            Node::Table { children, .. } => match l.kind {
                tab::T128 => {
                    let mut dense = 0u8;
                    for (byte, child) in children.iter().enumerate() {
                        let idx = match child {
                            Some(c) => {
                                let i = dense;
                                words[l.offset + 128 + i as usize] = child_ref(*c);
                                dense += 1;
                                i
                            }
                            None => 0xFF,
                        };
                        let word = &mut words[l.offset + byte / 2];
                        if byte % 2 == 0 {
                            *word |= idx as u16;
                        } else {
                            *word |= (idx as u16) << 8;
                        }
                    }
                }
                _ => {
                    for (i, child) in children.iter().enumerate() {
                        words[l.offset + i] = match child {
                            Some(c) => child_ref(*c),
                            None => 0,
                        };
                    }
                }
            },
        }
    }

    let root32 = layouts[&trie.roots[0]].offset;
    let root64 = layouts[&trie.roots[1]].offset;
    Ok(render(&words, root32, root64, templates, mnemonics))
}

fn render(
    words: &[u16],
    root32: usize,
    root64: usize,
    templates: &[Template],
    mnemonics: &[String],
) -> String {
    let mut s = String::new();
    s.push_str("// Generated by opdec-gen from the instruction description file.\n");
    s.push_str("// Do not edit.\n\n");
    s.push_str("use super::InstrTemplate;\n\n");
    let _ = writeln!(s, "pub const TABLE_VERSION: u16 = 1;");
    let _ = writeln!(s, "pub const ROOT_OFFSET_32: usize = {root32};");
    let _ = writeln!(s, "pub const ROOT_OFFSET_64: usize = {root64};\n");

    let _ = writeln!(s, "pub static DISPATCH: [u16; {}] = [", words.len());
    for chunk in words.chunks(12) {
        s.push_str("    ");
        for w in chunk {
            let _ = write!(s, "{w:#06x}, ");
        }
        s.pop();
        s.push('\n');
    }
    s.push_str("];\n\n");

    let _ = writeln!(
        s,
        "pub static TEMPLATES: [InstrTemplate; {}] = [",
        templates.len()
    );
    for t in templates {
        let _ = writeln!(
            s,
            "    InstrTemplate::new([{:#04x}, {:#04x}, {:#04x}, {:#04x}], {}, {}, {}, {:#04x}),",
            t.ops[0], t.ops[1], t.ops[2], t.ops[3], t.size_fix1, t.size_fix2, t.imm, t.flags
        );
    }
    s.push_str("];\n\n");

    s.push_str("/// Instruction mnemonic, derived from the description file.\n");
    s.push_str("#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]\n");
    s.push_str(
        "#[cfg_attr(feature = \"serde\", derive(serde::Serialize, serde::Deserialize))]\n",
    );
    s.push_str("#[repr(u16)]\n");
    s.push_str("pub enum Mnemonic {\n");
    for name in mnemonics {
        let _ = writeln!(s, "    {},", variant_name(name));
    }
    s.push_str("}\n\n");

    let _ = writeln!(
        s,
        "static MNEMONIC_BY_ID: [Mnemonic; {}] = [",
        mnemonics.len()
    );
    for name in mnemonics {
        let _ = writeln!(s, "    Mnemonic::{},", variant_name(name));
    }
    s.push_str("];\n\n");

    let _ = writeln!(
        s,
        "static MNEMONIC_NAMES: [&str; {}] = [",
        mnemonics.len()
    );
    for chunk in mnemonics.chunks(8) {
        s.push_str("    ");
        for name in chunk {
            let _ = write!(s, "\"{}\", ", name.to_ascii_lowercase());
        }
        s.pop();
        s.push('\n');
    }
    s.push_str("];\n\n");

    s.push_str("impl Mnemonic {\n");
    s.push_str("    /// Lower-case display name.\n");
    s.push_str("    pub fn name(self) -> &'static str {\n");
    s.push_str("        MNEMONIC_NAMES[self as usize]\n");
    s.push_str("    }\n\n");
    s.push_str("    #[inline]\n");
    s.push_str("    pub(crate) fn from_id(id: u16) -> Mnemonic {\n");
    s.push_str("        MNEMONIC_BY_ID[id as usize]\n");
    s.push_str("    }\n");
    s.push_str("}\n");
    s
}

/// `ADD` -> `Add`, `CMPXCHG8B` -> `Cmpxchg8b`, `JCC_NE` -> `JccNe`.
fn variant_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for part in raw.split('_') {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.extend(chars.map(|c| c.to_ascii_lowercase()));
        }
    }
    out
}
