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

//! The CTF (compact type format) contract (spec.md §6). Real type metadata
//! lives in an external debug-type library; this module only defines the
//! handle types and the trait the type machinery (`cg::types`) calls
//! through, plus a minimal in-memory implementation for this crate's own
//! tests.

use std::collections::HashMap;

use crate::errors::CgError;

/// A CTF file handle. `type_resolve` can return a different file than it
/// was given (spec.md §4.7: "returns the possibly-changed CTF handle so
/// the caller can continue using member-sourced types in the right file").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CtfFile(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CtfTypeId(pub u32);

/// A (file, type) pair — the CTF type handle carried on every AST node
/// (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CtfRef {
    pub file: CtfFile,
    pub ty: CtfTypeId,
}

impl CtfRef {
    /// The placeholder used by synthetic nodes (integer literals before a
    /// type is assigned, etc.) that carry no real CTF handle.
    pub const NONE: CtfRef = CtfRef {
        file: CtfFile(0),
        ty: CtfTypeId(0),
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Integer,
    Pointer,
    Array,
    Struct,
    Union,
    Forward,
    Typedef,
    Function,
}

/// Bit width and bit offset for a scalar or bit-field encoding (spec.md §6
/// `type_encoding`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeEncoding {
    pub signed: bool,
    pub bits: u32,
    pub bit_offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayInfo {
    pub element_ty: CtfRef,
    pub element_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberInfo {
    pub name: String,
    pub ty: CtfRef,
    pub byte_offset: u32,
    pub bit_offset: u32,
    pub bit_width: Option<u32>,
}

/// The CTF contract (spec.md §6): `type_resolve`, `type_kind`,
/// `type_reference`, `type_size`, `type_encoding`, `array_info`,
/// `member_info`, `type_name`, `type_lookup`.
pub trait CtfProvider {
    /// Follow forward declarations and typedefs one step; repeated calls
    /// by `cg::types::membinfo` converge on a concrete struct/union/array
    /// kind (or fail if no improvement is possible).
    fn type_resolve(&self, t: CtfRef) -> Result<CtfRef, CgError>;
    fn type_kind(&self, t: CtfRef) -> Result<TypeKind, CgError>;
    /// The pointee/element type for a pointer or typedef.
    fn type_reference(&self, t: CtfRef) -> Result<CtfRef, CgError>;
    fn type_size(&self, t: CtfRef) -> Result<u32, CgError>;
    fn type_encoding(&self, t: CtfRef) -> Result<TypeEncoding, CgError>;
    fn array_info(&self, t: CtfRef) -> Result<ArrayInfo, CgError>;
    fn member_info(&self, t: CtfRef, name: &str) -> Result<MemberInfo, CgError>;
    fn type_name(&self, t: CtfRef) -> Result<String, CgError>;
    /// Global type-name lookup, used to resolve forward declarations
    /// across files.
    fn type_lookup(&self, name: &str) -> Result<CtfRef, CgError>;
}

#[derive(Debug, Clone)]
struct TypeRecord {
    kind: TypeKind,
    name: String,
    size: u32,
    encoding: Option<TypeEncoding>,
    reference: Option<CtfRef>,
    array: Option<ArrayInfo>,
    members: Vec<MemberInfo>,
    /// For `Forward`/`Typedef`: the type this one resolves to, once known.
    resolves_to: Option<CtfRef>,
}

/// A flat in-memory CTF provider, built by hand for tests. Grounded in the
/// teacher's `file_reader::MockFileReader`/`FileData` pattern: a stand-in
/// for the real collaborator with no I/O behind it.
#[derive(Default)]
pub struct InMemoryCtf {
    types: HashMap<CtfTypeId, TypeRecord>,
    names: HashMap<String, CtfRef>,
    next_id: u32,
    file: CtfFile,
}

impl InMemoryCtf {
    pub fn new(file: CtfFile) -> Self {
        InMemoryCtf {
            types: HashMap::new(),
            names: HashMap::new(),
            next_id: 1,
            file,
        }
    }

    fn alloc_id(&mut self) -> CtfTypeId {
        let id = CtfTypeId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn add_integer(&mut self, name: &str, size: u32, signed: bool) -> CtfRef {
        let id = self.alloc_id();
        self.types.insert(
            id,
            TypeRecord {
                kind: TypeKind::Integer,
                name: name.to_string(),
                size,
                encoding: Some(TypeEncoding {
                    signed,
                    bits: size * 8,
                    bit_offset: 0,
                }),
                reference: None,
                array: None,
                members: Vec::new(),
                resolves_to: None,
            },
        );
        let r = CtfRef {
            file: self.file,
            ty: id,
        };
        self.names.insert(name.to_string(), r);
        r
    }

    pub fn add_pointer(&mut self, name: &str, pointee: CtfRef) -> CtfRef {
        let id = self.alloc_id();
        self.types.insert(
            id,
            TypeRecord {
                kind: TypeKind::Pointer,
                name: name.to_string(),
                size: 8,
                encoding: None,
                reference: Some(pointee),
                array: None,
                members: Vec::new(),
                resolves_to: None,
            },
        );
        let r = CtfRef {
            file: self.file,
            ty: id,
        };
        self.names.insert(name.to_string(), r);
        r
    }

    pub fn add_array(&mut self, name: &str, element_ty: CtfRef, element_count: u32, elem_size: u32) -> CtfRef {
        let id = self.alloc_id();
        self.types.insert(
            id,
            TypeRecord {
                kind: TypeKind::Array,
                name: name.to_string(),
                size: elem_size * element_count,
                encoding: None,
                reference: Some(element_ty),
                array: Some(ArrayInfo {
                    element_ty,
                    element_count,
                }),
                members: Vec::new(),
                resolves_to: None,
            },
        );
        let r = CtfRef {
            file: self.file,
            ty: id,
        };
        self.names.insert(name.to_string(), r);
        r
    }

    pub fn add_struct(&mut self, name: &str, size: u32, members: Vec<MemberInfo>) -> CtfRef {
        let id = self.alloc_id();
        self.types.insert(
            id,
            TypeRecord {
                kind: TypeKind::Struct,
                name: name.to_string(),
                size,
                encoding: None,
                reference: None,
                array: None,
                members,
                resolves_to: None,
            },
        );
        let r = CtfRef {
            file: self.file,
            ty: id,
        };
        self.names.insert(name.to_string(), r);
        r
    }

    pub fn add_forward(&mut self, name: &str) -> CtfRef {
        let id = self.alloc_id();
        self.types.insert(
            id,
            TypeRecord {
                kind: TypeKind::Forward,
                name: name.to_string(),
                size: 0,
                encoding: None,
                reference: None,
                array: None,
                members: Vec::new(),
                resolves_to: None,
            },
        );
        let r = CtfRef {
            file: self.file,
            ty: id,
        };
        self.names.insert(name.to_string(), r);
        r
    }

    /// Link a forward declaration to the concrete type it names, once the
    /// concrete definition is known.
    pub fn resolve_forward(&mut self, forward: CtfRef, concrete: CtfRef) {
        if let Some(rec) = self.types.get_mut(&forward.ty) {
            rec.resolves_to = Some(concrete);
        }
    }

    fn get(&self, t: CtfRef) -> Result<&TypeRecord, CgError> {
        self.types
            .get(&t.ty)
            .ok_or_else(|| CgError::Ctf(format!("no such CTF type id {}", t.ty.0)))
    }
}

impl CtfProvider for InMemoryCtf {
    fn type_resolve(&self, t: CtfRef) -> Result<CtfRef, CgError> {
        let rec = self.get(t)?;
        match rec.resolves_to {
            Some(next) => Ok(next),
            None => Ok(t),
        }
    }

    fn type_kind(&self, t: CtfRef) -> Result<TypeKind, CgError> {
        Ok(self.get(t)?.kind)
    }

    fn type_reference(&self, t: CtfRef) -> Result<CtfRef, CgError> {
        self.get(t)?
            .reference
            .ok_or_else(|| CgError::Ctf(format!("type {} has no reference type", t.ty.0)))
    }

    fn type_size(&self, t: CtfRef) -> Result<u32, CgError> {
        Ok(self.get(t)?.size)
    }

    fn type_encoding(&self, t: CtfRef) -> Result<TypeEncoding, CgError> {
        self.get(t)?
            .encoding
            .ok_or_else(|| CgError::Ctf(format!("type {} has no scalar encoding", t.ty.0)))
    }

    fn array_info(&self, t: CtfRef) -> Result<ArrayInfo, CgError> {
        self.get(t)?
            .array
            .ok_or_else(|| CgError::Ctf(format!("type {} is not an array", t.ty.0)))
    }

    fn member_info(&self, t: CtfRef, name: &str) -> Result<MemberInfo, CgError> {
        self.get(t)?
            .members
            .iter()
            .find(|m| m.name == name)
            .cloned()
            .ok_or_else(|| CgError::Ctf(format!("no member named '{name}' on type {}", t.ty.0)))
    }

    fn type_name(&self, t: CtfRef) -> Result<String, CgError> {
        Ok(self.get(t)?.name.clone())
    }

    fn type_lookup(&self, name: &str) -> Result<CtfRef, CgError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| CgError::Ctf(format!("no type named '{name}' in global index")))
    }
}
