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

//! The identifier-table contract (spec.md §6). Real identifier tables,
//! scoping, and symbol resolution live upstream of this crate; we only need
//! enough of a contract to resolve an id to a descriptor and to record the
//! read/write/register-resident flags the code generator itself sets.

use bitflags::bitflags;

use crate::ctf::CtfRef;
use crate::errors::CgError;
use crate::isa::Reg;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct IdentId(pub u32);

bitflags! {
    /// Scope flags on an identifier descriptor (spec.md §3). Neither bit
    /// set means file-scope global.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ScopeFlags: u8 {
        const LOCAL = 0b01;
        const TLS   = 0b10;
    }
}

impl ScopeFlags {
    pub fn scope(self) -> Scope {
        if self.contains(ScopeFlags::LOCAL) {
            Scope::Local
        } else if self.contains(ScopeFlags::TLS) {
            Scope::Thread
        } else {
            Scope::Global
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    Thread,
    Local,
}

bitflags! {
    /// Read/write/register-resident flags the CG sets on an identifier as
    /// it visits references to it (spec.md §3, §6: `IDFLG_DIFR`,
    /// `IDFLG_DIFW`, and the `CGREG` bit that records "this identifier's
    /// value is currently stashed in a register").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IdentFlags: u8 {
        const DIFR  = 0b001;
        const DIFW  = 0b010;
        const CGREG = 0b100;
    }
}

/// What kind of thing an identifier names (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentKind {
    ScalarVar,
    ArrayVar { associative: bool },
    Function,
    TranslatorOutput,
    Symbol,
    Inline,
    /// The built-in `args[]` translated-argument pseudo-array.
    Args,
}

/// A single member of a translator: a destination field name paired with
/// the expression that computes it from the translator's input.
#[derive(Debug, Clone)]
pub struct TranslatorMember {
    pub name: String,
    pub expr: crate::ast::ExprNode,
    pub member_ctf: CtfRef,
}

/// A translator record (spec.md §3): a mapping from a source CTF type to a
/// destination CTF type via per-member expressions, plus the identifier
/// whose register is published as each member expression's implicit input.
#[derive(Debug, Clone)]
pub struct TranslatorRecord {
    pub src_ctf: CtfRef,
    pub dst_ctf: CtfRef,
    pub members: Vec<TranslatorMember>,
    pub input_ident: IdentId,
}

/// An inline (spec.md §3/glossary): a parameterized expression substituted
/// at its use site. `formals` are the identifiers bound to the actual
/// argument subtrees during substitution (spec.md §4.8 "Inline variable").
#[derive(Debug, Clone)]
pub struct InlineRecord {
    pub formals: Vec<IdentId>,
    pub root: crate::ast::ExprNode,
    pub declared_ctf: CtfRef,
    /// `true` for an array-subscripted inline (`foo[a, b]`) vs. a bare
    /// scalar inline substitution.
    pub is_array: bool,
}

#[derive(Debug, Clone)]
pub struct IdentDescriptor {
    pub id: IdentId,
    pub kind: IdentKind,
    pub scope: ScopeFlags,
    pub ctf: CtfRef,
    pub name: String,
}

/// The identifier-table contract. A real implementation backs this with a
/// scope-aware symbol table; `InMemoryIdentTable` below is a flat map used
/// by this crate's own tests.
pub trait IdentTable {
    fn resolve(&self, id: IdentId) -> Result<IdentDescriptor, CgError>;
    fn mark_read(&mut self, id: IdentId);
    fn mark_write(&mut self, id: IdentId);
    fn flags(&self, id: IdentId) -> IdentFlags;

    /// Stash (or clear, with `None`) the register currently holding this
    /// identifier's value, toggling `CGREG` accordingly.
    fn set_cgreg(&mut self, id: IdentId, reg: Option<Reg>);
    fn cgreg(&self, id: IdentId) -> Option<Reg>;

    fn translator(&self, id: IdentId) -> Option<&TranslatorRecord>;
    fn inline(&self, id: IdentId) -> Option<&InlineRecord>;
}

use std::collections::HashMap;

/// A flat, in-memory identifier table. Grounded in the teacher's
/// `file_reader::MockFileReader`: a minimal stand-in for the real
/// collaborator, built only so this crate's own tests can drive the
/// generator without a real front end behind it.
#[derive(Default)]
pub struct InMemoryIdentTable {
    descriptors: HashMap<IdentId, IdentDescriptor>,
    flags: HashMap<IdentId, IdentFlags>,
    cgreg: HashMap<IdentId, Reg>,
    translators: HashMap<IdentId, TranslatorRecord>,
    inlines: HashMap<IdentId, InlineRecord>,
}

impl InMemoryIdentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, descriptor: IdentDescriptor) {
        self.descriptors.insert(descriptor.id, descriptor);
    }

    pub fn declare_translator(&mut self, id: IdentId, record: TranslatorRecord) {
        self.translators.insert(id, record);
    }

    pub fn declare_inline(&mut self, id: IdentId, record: InlineRecord) {
        self.inlines.insert(id, record);
    }
}

impl IdentTable for InMemoryIdentTable {
    fn resolve(&self, id: IdentId) -> Result<IdentDescriptor, CgError> {
        self.descriptors
            .get(&id)
            .cloned()
            .ok_or_else(|| CgError::Ctf(format!("unresolved identifier id {}", id.0)))
    }

    fn mark_read(&mut self, id: IdentId) {
        *self.flags.entry(id).or_insert(IdentFlags::empty()) |= IdentFlags::DIFR;
    }

    fn mark_write(&mut self, id: IdentId) {
        *self.flags.entry(id).or_insert(IdentFlags::empty()) |= IdentFlags::DIFW;
    }

    fn flags(&self, id: IdentId) -> IdentFlags {
        self.flags.get(&id).copied().unwrap_or(IdentFlags::empty())
    }

    fn set_cgreg(&mut self, id: IdentId, reg: Option<Reg>) {
        match reg {
            Some(r) => {
                self.cgreg.insert(id, r);
                *self.flags.entry(id).or_insert(IdentFlags::empty()) |= IdentFlags::CGREG;
            }
            None => {
                self.cgreg.remove(&id);
                if let Some(f) = self.flags.get_mut(&id) {
                    f.remove(IdentFlags::CGREG);
                }
            }
        }
    }

    fn cgreg(&self, id: IdentId) -> Option<Reg> {
        self.cgreg.get(&id).copied()
    }

    fn translator(&self, id: IdentId) -> Option<&TranslatorRecord> {
        self.translators.get(&id)
    }

    fn inline(&self, id: IdentId) -> Option<&InlineRecord> {
        self.inlines.get(&id)
    }
}
