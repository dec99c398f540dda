//! Mutable dispatch trie: construction, conflict detection, compression.
//!
//! Records are inserted along their discriminator path in a fixed priority
//! order: opcode byte (under the per-mode escape root), mandatory prefix,
//! W/L bits, then the ModR/M selector. Any two records that disagree about
//! a node's dispatch kind, or that land on the same leaf, are a fatal
//! description-file bug.

use std::collections::HashMap;

use crate::consts::tab;
use crate::error::GenError;
use crate::spec::{ModeGate, ModrmSel, Record};

/// Internal marker for the per-mode root tables (escape | vex << 2).
pub const ROOT: u16 = 8;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node {
    Term { mnemonic: u16, template: u16 },
    Table { kind: u16, children: Vec<Option<usize>> },
}

impl Node {
    fn table(kind: u16) -> Self {
        Node::Table {
            kind,
            children: vec![None; table_len(kind)],
        }
    }
}

pub fn table_len(kind: u16) -> usize {
    match kind {
        tab::T256 => 256,
        tab::T8 => 8,
        tab::T72 => 72,
        tab::TPFX | tab::TVEX => 4,
        ROOT => 8,
        _ => 0,
    }
}

/// One level of a record's discriminator path: the table kind to traverse
/// and the slot indices the record occupies there.
struct Level {
    kind: u16,
    indices: Vec<usize>,
}

pub struct Trie {
    pub nodes: Vec<Node>,
    /// Root node ids: index 0 = 32-bit mode, 1 = 64-bit mode.
    pub roots: [usize; 2],
}

impl Trie {
    pub fn new() -> Self {
        let nodes = vec![Node::table(ROOT), Node::table(ROOT)];
        Trie {
            nodes,
            roots: [0, 1],
        }
    }

    /// Inserts one record, pointing every path it covers at the given
    /// terminal payload.
    pub fn insert(&mut self, rec: &Record, mnemonic: u16, template: u16) -> Result<(), GenError> {
        let levels = levels_for(rec);
        let paths = expand_paths(&levels);
        for (mode, root) in [(ModeGate::Only32, self.roots[0]), (ModeGate::Only64, self.roots[1])] {
            if rec.mode != ModeGate::Both && rec.mode != mode {
                continue;
            }
            for path in &paths {
                self.insert_path(root, path, rec, mnemonic, template)?;
            }
        }
        Ok(())
    }

    fn insert_path(
        &mut self,
        root: usize,
        path: &[(u16, usize)],
        rec: &Record,
        mnemonic: u16,
        template: u16,
    ) -> Result<(), GenError> {
        let mut node = root;
        for step in 0..path.len() {
            let (_, idx) = path[step];
            let last = step + 1 == path.len();
            let existing = match &self.nodes[node] {
                Node::Table { children, .. } => children[idx],
                Node::Term { .. } => {
                    return Err(GenError::KindConflict {
                        line: rec.line,
                        path: path_string(path, step),
                    })
                }
            };
            if last {
                if existing.is_some() {
                    return Err(GenError::Duplicate {
                        line: rec.line,
                        path: path_string(path, path.len()),
                    });
                }
                let leaf = self.push(Node::Term { mnemonic, template });
                self.set_child(node, idx, leaf);
                return Ok(());
            }
            let want_kind = path[step + 1].0;
            match existing {
                Some(next) => {
                    let have = match &self.nodes[next] {
                        Node::Table { kind, .. } => *kind,
                        Node::Term { .. } => tab::TERM,
                    };
                    if have != want_kind {
                        return Err(GenError::KindConflict {
                            line: rec.line,
                            path: path_string(path, step + 1),
                        });
                    }
                    node = next;
                }
                None => {
                    let next = self.push(Node::table(want_kind));
                    self.set_child(node, idx, next);
                    node = next;
                }
            }
        }
        unreachable!("path always ends in a terminal step");
    }

    fn push(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn set_child(&mut self, node: usize, idx: usize, child: usize) {
        if let Node::Table { children, .. } = &mut self.nodes[node] {
            children[idx] = Some(child);
        }
    }

    /// Collapses tables whose children are all present and identical into
    /// that single child. Replaced nodes are remembered so the pass
    /// terminates once no fresh collapse is found; byte-indexed tables
    /// consume their key and are never collapsed.
    pub fn collapse_uniform(&mut self) {
        let mut collapsed: HashMap<usize, usize> = HashMap::new();
        loop {
            let mut fresh = false;
            for (id, node) in self.nodes.iter().enumerate() {
                if self.roots.contains(&id) || collapsed.contains_key(&id) {
                    continue;
                }
                if let Node::Table { kind, children } = node {
                    if *kind == ROOT || *kind == tab::T256 {
                        continue;
                    }
                    let first = children[0];
                    if first.is_some() && children.iter().all(|c| *c == first) {
                        collapsed.insert(id, first.unwrap());
                        fresh = true;
                    }
                }
            }
            if !fresh {
                return;
            }
            let resolve = |mut id: usize| {
                while let Some(&next) = collapsed.get(&id) {
                    id = next;
                }
                id
            };
            for node in &mut self.nodes {
                if let Node::Table { children, .. } = node {
                    for child in children.iter_mut() {
                        if let Some(c) = child {
                            *c = resolve(*c);
                        }
                    }
                }
            }
        }
    }

    /// Merges structurally identical subtrees, bottom-up to a fixpoint.
    /// Merged node ids are remembered (their storage stays behind,
    /// unreferenced) so each pass only looks for fresh synonyms.
    pub fn dedup(&mut self) {
        let mut merged: HashMap<usize, usize> = HashMap::new();
        loop {
            let fresh: HashMap<usize, usize> = {
                let mut seen: HashMap<&Node, usize> = HashMap::new();
                let mut fresh = HashMap::new();
                for (id, node) in self.nodes.iter().enumerate() {
                    if self.roots.contains(&id) || merged.contains_key(&id) {
                        continue;
                    }
                    match seen.get(node) {
                        Some(&first) => {
                            fresh.insert(id, first);
                        }
                        None => {
                            seen.insert(node, id);
                        }
                    }
                }
                fresh
            };
            if fresh.is_empty() {
                return;
            }
            for node in &mut self.nodes {
                if let Node::Table { children, .. } = node {
                    for child in children.iter_mut() {
                        if let Some(c) = child {
                            if let Some(&rep) = fresh.get(c) {
                                *c = rep;
                            }
                        }
                    }
                }
            }
            merged.extend(fresh);
        }
    }

    /// Returns node ids reachable from the roots, roots first, in a stable
    /// breadth-first order.
    pub fn reachable(&self) -> Vec<usize> {
        let mut order = Vec::new();
        let mut seen = vec![false; self.nodes.len()];
        let mut queue: Vec<usize> = Vec::new();
        for &r in &self.roots {
            if !seen[r] {
                seen[r] = true;
                order.push(r);
                queue.push(r);
            }
        }
        let mut head = 0;
        while head < queue.len() {
            let id = queue[head];
            head += 1;
            if let Node::Table { children, .. } = &self.nodes[id] {
                for &child in children.iter().flatten() {
                    if !seen[child] {
                        seen[child] = true;
                        order.push(child);
                        queue.push(child);
                    }
                }
            }
        }
        order
    }
}

/// Builds the discriminator levels for a record, in priority order.
fn levels_for(rec: &Record) -> Vec<Level> {
    let mut levels = Vec::new();
    levels.push(Level {
        kind: ROOT,
        indices: vec![rec.escape as usize | (rec.vex as usize) << 2],
    });
    let opcodes = if rec.opcode_span {
        (rec.opcode..=rec.opcode + 7).map(usize::from).collect()
    } else {
        vec![rec.opcode as usize]
    };
    levels.push(Level {
        kind: tab::T256,
        indices: opcodes,
    });
    if let Some(prefix) = rec.prefix {
        levels.push(Level {
            kind: tab::TPFX,
            indices: vec![prefix as usize],
        });
    }
    if rec.w.is_some() || rec.l.is_some() || rec.force_wl {
        let ws: Vec<usize> = match rec.w {
            Some(w) => vec![w as usize],
            None => vec![0, 1],
        };
        let ls: Vec<usize> = match rec.l {
            Some(l) => vec![l as usize],
            None => vec![0, 1],
        };
        let mut indices = Vec::new();
        for &l in &ls {
            for &w in &ws {
                indices.push(w | l << 1);
            }
        }
        levels.push(Level {
            kind: tab::TVEX,
            indices,
        });
    }
    match rec.modrm {
        None | Some(ModrmSel::Any) => {}
        Some(ModrmSel::Reg(n)) => levels.push(Level {
            kind: tab::T8,
            indices: vec![n as usize],
        }),
        Some(ModrmSel::Mem(n)) => levels.push(Level {
            kind: tab::T72,
            indices: vec![n as usize],
        }),
        Some(ModrmSel::MemAll) => levels.push(Level {
            kind: tab::T72,
            indices: (0..8).collect(),
        }),
        Some(ModrmSel::RegAll) => levels.push(Level {
            kind: tab::T72,
            indices: (8..72).collect(),
        }),
        Some(ModrmSel::Byte(b, span)) => {
            let base = 8 + (b - 0xC0) as usize;
            let indices = if span {
                (base..base + 8).collect()
            } else {
                vec![base]
            };
            levels.push(Level {
                kind: tab::T72,
                indices,
            });
        }
    }
    levels
}

/// Cartesian product of the per-level indices into concrete paths.
fn expand_paths(levels: &[Level]) -> Vec<Vec<(u16, usize)>> {
    let mut paths: Vec<Vec<(u16, usize)>> = vec![Vec::new()];
    for level in levels {
        let mut next = Vec::with_capacity(paths.len() * level.indices.len());
        for path in &paths {
            for &idx in &level.indices {
                let mut p = path.clone();
                p.push((level.kind, idx));
                next.push(p);
            }
        }
        paths = next;
    }
    paths
}

/// Renders the first `len` steps of a path for diagnostics.
fn path_string(path: &[(u16, usize)], len: usize) -> String {
    let mut s = String::new();
    for &(kind, idx) in path.iter().take(len.max(1)) {
        match kind {
            ROOT => {
                if idx & 4 != 0 {
                    s.push_str("VEX.");
                }
                s.push_str(["", "0F.", "0F38.", "0F3A."][idx & 3]);
            }
            tab::T256 => s.push_str(&format!("{idx:02X}")),
            tab::T8 => s.push_str(&format!(" /{idx}")),
            tab::T72 => {
                if idx < 8 {
                    s.push_str(&format!(" //{idx}"));
                } else {
                    s.push_str(&format!(" //{:02X}", idx - 8 + 0xC0));
                }
            }
            tab::TPFX => s.push_str(["+NP", "+66", "+F3", "+F2"][idx & 3]),
            tab::TVEX => s.push_str(&format!(" W{}L{}", idx & 1, idx >> 1)),
            _ => {}
        }
    }
    s
}
