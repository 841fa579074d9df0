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

//! Tree-walking code generator: compiles a typed probe-clause AST into a
//! labeled virtual-machine instruction list and a string table (see
//! `SPEC_FULL.md`). Lexing, parsing, type checking, and the downstream
//! assembler/linker are external collaborators; this crate only defines
//! their contracts (`ident::IdentTable`, `ctf::CtfProvider`) plus a minimal
//! in-memory implementation of each for its own tests and demos.

pub mod ast;
pub mod cg;
pub mod ctf;
pub mod errors;
pub mod ident;
pub mod isa;

use ast::ExprNode;
use cg::{CgConfig, CompileContext, ProbeDescriptor};
use ctf::CtfProvider;
use errors::CgError;
use ident::IdentTable;

/// Compile one clause's root expression under a fresh per-clause context.
/// Thin convenience wrapper around `cg::compile_clause` for callers that
/// don't need to reuse a `CompileContext` across clauses.
pub fn compile(
    config: CgConfig,
    probe: ProbeDescriptor,
    idents: &mut dyn IdentTable,
    ctf: &dyn CtfProvider,
    root: &mut ExprNode,
) -> Result<Vec<cg::insn::InsnNode>, CgError> {
    let mut ctx = CompileContext::new(config, probe, idents, ctf);
    cg::compile_clause(&mut ctx, root)?;
    Ok(ctx.insns.finalize())
}
