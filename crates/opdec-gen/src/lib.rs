//! # opdec-gen
//!
//! Build-time table generator for the `opdec` x86 decoder. Parses the
//! line-oriented instruction description file into a dispatch trie, merges
//! and compresses it, and emits the packed tables plus the mnemonic
//! enumeration as Rust source.
//!
//! The emitted file is the data contract consumed by `opdec::table`; the
//! decoder's build script drives [`generate`] directly, and the `opdec-gen`
//! binary exposes the same pipeline as a standalone CLI.

pub mod consts;
pub mod emit;
pub mod error;
pub mod spec;
pub mod trie;

use std::collections::{BTreeSet, HashMap};

pub use error::GenError;
use spec::Template;
use trie::Trie;

/// Runs the whole pipeline over the description file contents, returning
/// the generated Rust source.
pub fn generate(input: &str) -> Result<String, GenError> {
    let mut records = spec::parse_file(input)?;
    if records.is_empty() {
        return Err(GenError::Empty);
    }

    // Records sharing a dispatch position must agree on whether a W/L level
    // exists there. If any sibling pins W or L, the unpinned ones span all
    // four slots.
    let mut pinned: BTreeSet<(bool, u8, u8, Option<u8>)> = BTreeSet::new();
    for rec in &records {
        if rec.w.is_some() || rec.l.is_some() {
            pinned.insert((rec.vex, rec.escape, rec.opcode, rec.prefix));
        }
    }
    for rec in &mut records {
        if pinned.contains(&(rec.vex, rec.escape, rec.opcode, rec.prefix)) {
            rec.force_wl = true;
        }
    }

    let mnemonics: Vec<String> = records
        .iter()
        .map(|r| r.mnemonic.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let mnemonic_id: HashMap<&str, u16> = mnemonics
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i as u16))
        .collect();

    let mut templates: Vec<Template> = Vec::new();
    let mut template_id: HashMap<Template, u16> = HashMap::new();
    let mut trie = Trie::new();
    for rec in &records {
        let template = spec::build_template(rec)?;
        let tid = *template_id.entry(template).or_insert_with(|| {
            templates.push(template);
            (templates.len() - 1) as u16
        });
        trie.insert(rec, mnemonic_id[rec.mnemonic.as_str()], tid)?;
    }

    trie.collapse_uniform();
    trie.dedup();
    emit::emit(&trie, &templates, &mnemonics)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINI: &str = "\
# comment line
90                  NOP       -
48+ ONLY32          DEC       RO
01 /r               ADD       RM,R        LOCK
0F.AF /r            IMUL      R,RM
F3.0F.B8 /r         POPCNT    R,RM
E8                  CALL      REL         DEF64
";

    #[test]
    fn mini_spec_generates() {
        let src = generate(MINI).unwrap();
        assert!(src.contains("pub static DISPATCH"));
        assert!(src.contains("Mnemonic"));
        assert!(src.contains("Popcnt"));
        assert!(src.contains("ROOT_OFFSET_64"));
    }

    #[test]
    fn empty_spec_is_an_error() {
        assert!(matches!(generate("# nothing\n"), Err(GenError::Empty)));
    }

    #[test]
    fn duplicate_encoding_is_fatal() {
        let src = "90 NOP -\n90 PAUSE -\n";
        match generate(src) {
            Err(GenError::Duplicate { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected duplicate error, got {other:?}"),
        }
    }

    #[test]
    fn kind_conflict_is_fatal() {
        // One record terminates at the opcode, the other dispatches on reg.
        let src = "F6 /r TEST RM8,IMM8 SZ8\nF6 /2 NOT RM8 SZ8\n";
        assert!(matches!(generate(src), Err(GenError::KindConflict { .. })));
    }

    #[test]
    fn unknown_operand_is_fatal() {
        let src = "90 NOP BOGUS\n";
        match generate(src) {
            Err(GenError::Parse { line, msg }) => {
                assert_eq!(line, 1);
                assert!(msg.contains("BOGUS"));
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
