//! Runs the table generator over the instruction description file and
//! drops the packed tables into OUT_DIR for `src/table.rs` to include.

use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=data/instrs.txt");

    let input = fs::read_to_string("data/instrs.txt")
        .expect("reading data/instrs.txt");
    let source = match opdec_gen::generate(&input) {
        Ok(source) => source,
        Err(err) => panic!("table generation failed: {err}"),
    };

    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));
    fs::write(out.join("tables.rs"), source).expect("writing tables.rs");
}
