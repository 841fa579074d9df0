/*
Copyright 2025 Connor Nolan

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Instruction list & label allocator (spec.md §4.1, component C1).

use std::collections::HashSet;

use crate::ident::IdentId;
use crate::isa::{Label, Op};

#[derive(Debug, Clone, serde::Serialize)]
pub struct InsnNode {
    pub label: Option<Label>,
    pub op: Op,
    /// Back-pointer to an identifier for late relocation of immediates
    /// referencing externally located symbols (spec.md §3).
    pub reloc: Option<IdentId>,
}

/// An opaque handle to an already-appended instruction, returned by
/// `append*` so the ternary operator (spec.md §4.8) can patch it once its
/// destination register is known (spec.md §9 "late patching").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor(usize);

#[derive(Default)]
pub struct InsnList {
    nodes: Vec<InsnNode>,
    next_label: u32,
}

impl InsnList {
    pub fn new() -> Self {
        InsnList::default()
    }

    pub fn fresh_label(&mut self) -> Label {
        let l = Label(self.next_label);
        self.next_label += 1;
        l
    }

    pub fn append(&mut self, op: Op) -> Cursor {
        self.append_full(None, op, None)
    }

    pub fn append_labelled(&mut self, label: Label, op: Op) -> Cursor {
        self.append_full(Some(label), op, None)
    }

    pub fn append_with_reloc(&mut self, op: Op, reloc: IdentId) -> Cursor {
        self.append_full(None, op, Some(reloc))
    }

    pub fn append_full(&mut self, label: Option<Label>, op: Op, reloc: Option<IdentId>) -> Cursor {
        self.nodes.push(InsnNode { label, op, reloc });
        Cursor(self.nodes.len() - 1)
    }

    /// Overwrite a previously appended instruction's opcode/operands. Used
    /// by the ternary operator to fill in a placeholder move once its
    /// destination register is known.
    pub fn patch(&mut self, cursor: Cursor, op: Op) {
        self.nodes[cursor.0].op = op;
    }

    pub fn get(&self, cursor: Cursor) -> &InsnNode {
        &self.nodes[cursor.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[InsnNode] {
        &self.nodes
    }

    /// Consumes the list, handing the finished sequence to the downstream
    /// assembler (spec.md §4.1 `finalize`).
    pub fn finalize(self) -> Vec<InsnNode> {
        self.nodes
    }

    /// Every label actually materialized on some node. Used by property
    /// tests checking invariant 4 (every branch targets a materialized
    /// label).
    pub fn materialized_labels(&self) -> HashSet<Label> {
        self.nodes.iter().filter_map(|n| n.label).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Reg;

    #[test]
    fn fresh_label_is_monotonic() {
        let mut insns = InsnList::new();
        let a = insns.fresh_label();
        let b = insns.fresh_label();
        assert_ne!(a, b);
    }

    #[test]
    fn patch_overwrites_in_place_without_changing_length() {
        let mut insns = InsnList::new();
        let cursor = insns.append(Op::Nop);
        insns.append(Op::Exit);
        insns.patch(cursor, Op::Alu { op: crate::isa::AluOp::Add, dst: Reg(1), src: Reg(2) });
        assert_eq!(insns.len(), 2);
        assert!(matches!(insns.get(cursor).op, Op::Alu { .. }));
    }

    #[test]
    fn materialized_labels_tracks_only_labelled_nodes() {
        let mut insns = InsnList::new();
        let label = insns.fresh_label();
        insns.append(Op::Nop);
        insns.append_labelled(label, Op::Exit);
        let materialized = insns.materialized_labels();
        assert!(materialized.contains(&label));
        assert_eq!(materialized.len(), 1);
    }

    #[test]
    fn append_with_reloc_is_retrievable_via_get() {
        let mut insns = InsnList::new();
        let id = IdentId(7);
        let cursor = insns.append_with_reloc(Op::Nop, id);
        assert_eq!(insns.get(cursor).reloc, Some(id));
    }
}
