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

//! The code generator core (spec.md §2, §4): a tree-walking visitor over a
//! typed AST that emits a labeled instruction list and a string table.

pub mod expr;
pub mod helper;
pub mod imm;
pub mod insn;
pub mod loadstore;
pub mod regset;
pub mod strtab;
pub mod types;

use crate::ast::ExprNode;
use crate::ctf::CtfProvider;
use crate::errors::CgError;
use crate::ident::IdentTable;
use crate::isa::{Op, CALLER_SAVED_BOUND, FIRST_ARG_REG, R_MAX, STROFF_MAX};
use insn::InsnList;
use regset::RegSet;
use strtab::StrTab;

/// Target-ABI constants, collected so a context can be built once per
/// process and reused across clauses (spec.md §4.2's allocation policy,
/// §4.5's ABI boundary).
#[derive(Debug, Clone, Copy)]
pub struct CgConfig {
    pub caller_saved_bound: u8,
    pub r_max: u8,
    pub first_arg_reg: u8,
    pub stroff_max: u32,
}

impl Default for CgConfig {
    fn default() -> Self {
        CgConfig {
            caller_saved_bound: CALLER_SAVED_BOUND,
            r_max: R_MAX,
            first_arg_reg: FIRST_ARG_REG,
            stroff_max: STROFF_MAX,
        }
    }
}

/// The probe's static-to-actual argument-index mapping for `args[]` reads
/// (spec.md §4.8 "Array/args read").
#[derive(Debug, Clone, Default)]
pub struct ProbeDescriptor {
    pub arg_map: Vec<u32>,
}

impl ProbeDescriptor {
    /// Translate a statically-known `args[i]` index through the probe's
    /// argument mapping. Indices outside the map pass through unchanged —
    /// a probe with no declared signature has no mapping to apply.
    pub fn translate_index(&self, i: u32) -> u32 {
        self.arg_map.get(i as usize).copied().unwrap_or(i)
    }
}

/// Per-clause compilation context (spec.md §3 "Compilation context"):
/// everything a visitor call threads through recursion.
pub struct CompileContext<'a> {
    pub insns: InsnList,
    pub regs: RegSet,
    pub strtab: StrTab,
    pub stack_depth: u32,
    pub config: CgConfig,
    pub probe: ProbeDescriptor,
    pub idents: &'a mut dyn IdentTable,
    pub ctf: &'a dyn CtfProvider,
}

impl<'a> CompileContext<'a> {
    pub fn new(
        config: CgConfig,
        probe: ProbeDescriptor,
        idents: &'a mut dyn IdentTable,
        ctf: &'a dyn CtfProvider,
    ) -> Self {
        CompileContext {
            insns: InsnList::new(),
            regs: RegSet::new(config.r_max),
            strtab: StrTab::new(config.stroff_max),
            stack_depth: 0,
            config,
            probe,
            idents,
            ctf,
        }
    }

    /// Reset per-clause state ahead of a new compilation (spec.md §4.9: the
    /// register set is allocated once per process context, but reset, the
    /// string table destroyed and recreated, and the instruction list
    /// reset, once per clause).
    pub fn reset_for_clause(&mut self) {
        self.insns = InsnList::new();
        self.regs.reset();
        self.strtab = StrTab::new(self.config.stroff_max);
        self.stack_depth = 0;
    }
}

/// The compilation driver (spec.md §4.9, component C9): the single entry
/// point compiling one clause's root expression.
pub fn compile_clause(ctx: &mut CompileContext, root: &mut ExprNode) -> Result<(), CgError> {
    ctx.reset_for_clause();

    if root.is_dynamic() {
        return Err(CgError::Dyn);
    }

    let translator_input = match &root.kind {
        crate::ast::ExprKind::TranslatorBody { translator, .. } => Some(*translator),
        _ => None,
    };

    if let Some(translator_id) = translator_input {
        let record = ctx
            .idents
            .translator(translator_id)
            .ok_or(CgError::Unknown("translator identifier has no translator record"))?;
        let input_ident = record.input_ident;
        let input_reg = ctx.regs.alloc()?;
        ctx.idents.set_cgreg(input_ident, Some(input_reg));
    }

    let result = expr::emit(ctx, root, expr::Mode::Value);

    if let Some(translator_id) = translator_input {
        let input_ident = ctx
            .idents
            .translator(translator_id)
            .expect("translator record vanished mid-compilation")
            .input_ident;
        if let Some(r) = ctx.idents.cgreg(input_ident) {
            ctx.regs.free(r);
        }
        ctx.idents.set_cgreg(input_ident, None);
    }

    let root_reg = result?;
    ctx.regs.free(root_reg);
    ctx.insns.append(Op::Exit);
    Ok(())
}
