//! End-to-end generator tests: pipeline output shape and CLI behavior.

use std::fs;
use std::process::Command;

const SPEC: &str = "\
# minimal but multi-feature description
90                  NOP      -
0F.A2               CPUID    -
01 /r               ADD      RM,R         LOCK
80 /0               ADD      RM8,IMM8     SZ8 LOCK
F3.0F.B8 /r         POPCNT   R,RM
66.0F.58 /r         ADDPD    XMM,XMM_RM
V.66.0F.58 /r       VADDPD   XMM,XMM_V,XMM_RM
D9 //0              FLD      M32
D9 //E8             FLD1     -
0F.C7 //1 W0        CMPXCHG8B M           SZ0 LOCK
0F.C7 //1 W1 ONLY64 CMPXCHG16B M          SZ0 LOCK
E8                  CALL     REL          DEF64
";

#[test]
fn generated_source_has_the_expected_shape() {
    let src = opdec_gen::generate(SPEC).unwrap();

    // Header consts and both roots.
    assert!(src.contains("pub const TABLE_VERSION: u16 = 1;"));
    assert!(src.contains("pub const ROOT_OFFSET_32: usize = 0;"));
    assert!(src.contains("pub const ROOT_OFFSET_64: usize = 8;"));

    // The dispatch array and the deduplicated template array.
    assert!(src.contains("pub static DISPATCH: [u16;"));
    assert!(src.contains("pub static TEMPLATES: [InstrTemplate;"));

    // Mnemonics are sorted, camel-cased, and carry lowercase names.
    assert!(src.contains("pub enum Mnemonic {"));
    assert!(src.contains("    Add,"));
    assert!(src.contains("    Cmpxchg16b,"));
    assert!(src.contains("    Vaddpd,"));
    assert!(src.contains("\"popcnt\""));
    let add = src.find("    Add,").unwrap();
    let call = src.find("    Call,").unwrap();
    let nop = src.find("    Nop,").unwrap();
    assert!(add < call && call < nop);
}

#[test]
fn output_is_deterministic() {
    let a = opdec_gen::generate(SPEC).unwrap();
    let b = opdec_gen::generate(SPEC).unwrap();
    assert_eq!(a, b);
}

#[test]
fn identical_leaves_are_shared() {
    // Eight shift variants share one mnemonic+template: the trie must fold
    // their terminals into a single entry.
    let spec = "\
D8 //C0+            FADD     ST0,ST
D8 //C8+            FMUL     ST0,ST
";
    let src = opdec_gen::generate(spec).unwrap();
    let dispatch_len: usize = {
        let start = src.find("DISPATCH: [u16; ").unwrap() + "DISPATCH: [u16; ".len();
        let end = src[start..].find(']').unwrap() + start;
        src[start..end].parse().unwrap()
    };
    // One root pair (16) + one 256-table (sparse: 128 + 1) + one 72-table
    // + two terminals, padded. The unshared worst case keeps sixteen
    // separate terminals and lands near 250 words.
    assert!(dispatch_len < 240, "dispatch is {dispatch_len} words");
}

#[test]
fn cli_writes_output_on_success() {
    let dir = std::env::temp_dir().join("opdec-gen-test-ok");
    fs::create_dir_all(&dir).unwrap();
    let spec_path = dir.join("instrs.txt");
    let out_path = dir.join("tables.rs");
    let _ = fs::remove_file(&out_path);
    fs::write(&spec_path, SPEC).unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_opdec-gen"))
        .arg(&spec_path)
        .arg(&out_path)
        .status()
        .unwrap();
    assert!(status.success());
    assert!(fs::read_to_string(&out_path)
        .unwrap()
        .contains("pub enum Mnemonic"));
}

#[test]
fn cli_fails_cleanly_on_conflicts() {
    let dir = std::env::temp_dir().join("opdec-gen-test-err");
    fs::create_dir_all(&dir).unwrap();
    let spec_path = dir.join("instrs.txt");
    let out_path = dir.join("tables.rs");
    let _ = fs::remove_file(&out_path);
    fs::write(&spec_path, "90 NOP -\n90 PAUSE -\n").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_opdec-gen"))
        .arg(&spec_path)
        .arg(&out_path)
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("line 2"), "diagnostic was: {stderr}");
    // No output file on failure.
    assert!(!out_path.exists());
}
