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

//! Immediate loader (spec.md §4.4, component C4).

use crate::cg::insn::InsnList;
use crate::ident::IdentId;
use crate::isa::{Label, Op, Reg};

/// Materialize `x` into `reg`: a single `LoadImm32` if it fits in 32 bits,
/// otherwise the two-word 64-bit immediate load (spec.md §0, §4.4).
pub fn set_imm(list: &mut InsnList, reg: Reg, x: i64) {
    set_imm_labelled(list, reg, x, None, None);
}

/// As `set_imm`, but places `label` on the first emitted word and, if
/// `reloc` is given, attaches it to the last emitted word so the
/// downstream linker can relocate a symbol address (spec.md §4.4).
pub fn set_imm_labelled(
    list: &mut InsnList,
    reg: Reg,
    x: i64,
    label: Option<Label>,
    reloc: Option<IdentId>,
) {
    if let Ok(imm) = i32::try_from(x) {
        list.append_full(label, Op::LoadImm32 { dst: reg, imm }, reloc);
        return;
    }

    let bits = x as u64;
    let low = (bits & 0xFFFF_FFFF) as i32;
    let high = ((bits >> 32) & 0xFFFF_FFFF) as i32;

    list.append_full(label, Op::LoadImm32 { dst: reg, imm: low }, None);
    list.append_full(None, Op::LoadImm64High { imm: high }, reloc);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i32_max_fits_in_a_single_word() {
        let mut list = InsnList::new();
        set_imm(&mut list, Reg(1), i32::MAX as i64);
        assert_eq!(list.len(), 1);
        assert!(matches!(
            list.nodes()[0].op,
            Op::LoadImm32 { imm, .. } if imm == i32::MAX
        ));
    }

    #[test]
    fn one_past_i32_max_spills_to_the_wide_form() {
        let mut list = InsnList::new();
        set_imm(&mut list, Reg(1), i32::MAX as i64 + 1);
        assert_eq!(list.len(), 2);
        assert!(matches!(list.nodes()[0].op, Op::LoadImm32 { .. }));
        assert!(matches!(list.nodes()[1].op, Op::LoadImm64High { imm } if imm == 0));
    }

    #[test]
    fn reloc_attaches_to_the_final_word_of_the_wide_form() {
        let mut list = InsnList::new();
        let id = IdentId(3);
        set_imm_labelled(&mut list, Reg(1), i64::MAX, None, Some(id));
        assert_eq!(list.nodes()[0].reloc, None);
        assert_eq!(list.nodes()[1].reloc, Some(id));
    }
}
