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

//! The input AST contract (spec.md §3, §6). The code generator only reads
//! these nodes, with two exceptions: `result_reg` is written by the
//! visitor as it emits each node's value, and `flags` gains/loses `REF`
//! temporarily as a parent requests reference-mode evaluation from a child
//! (spec.md §9, "mutable flags on AST nodes").

use bitflags::bitflags;

use crate::ctf::CtfRef;
use crate::ident::IdentId;
use crate::isa::Reg;

bitflags! {
    /// Per-node semantic flags (spec.md §3). `REF` is the one flag parents
    /// toggle on children as a request-mode argument, not a fact about the
    /// node itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NodeFlags: u16 {
        const SIGNED    = 0b0000_0001;
        const BITFIELD  = 0b0000_0010;
        const USERLAND  = 0b0000_0100;
        const REF       = 0b0000_1000;
        const WRITABLE  = 0b0001_0000;
        const LVALUE    = 0b0010_0000;
        const DYNAMIC   = 0b0100_0000;
    }
}

/// Byte offset and bit width of a field within its container, for
/// bit-field-aware load/store (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    pub bit_offset: u32,
    pub bit_width: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Binary arithmetic/bitwise operators (spec.md §4.8 "Arithmetic binary").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncDecOp {
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

/// The operator/kind discriminant for an AST node (spec.md §9 "polymorphic
/// AST": "a sum type over operator kinds with per-variant payload").
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    IntLit(i64),
    StrLit(String),
    Ident(IdentId),
    Symbol(IdentId),

    Binary {
        op: BinOp,
        lhs: Box<ExprNode>,
        rhs: Box<ExprNode>,
    },
    BinaryAssign {
        op: BinOp,
        lhs: Box<ExprNode>,
        rhs: Box<ExprNode>,
    },
    Compare {
        op: CmpOp,
        lhs: Box<ExprNode>,
        rhs: Box<ExprNode>,
    },
    Logic {
        op: LogicOp,
        lhs: Box<ExprNode>,
        rhs: Box<ExprNode>,
    },
    Not(Box<ExprNode>),
    Ternary {
        cond: Box<ExprNode>,
        then_branch: Box<ExprNode>,
        else_branch: Box<ExprNode>,
    },
    IncDec {
        op: IncDecOp,
        target: Box<ExprNode>,
    },
    Assign {
        lhs: Box<ExprNode>,
        rhs: Box<ExprNode>,
    },

    /// `a.b` or `p->b`; `arrow` distinguishes the two only for diagnostics,
    /// both resolve identically once the left side's address is in hand.
    Member {
        base: Box<ExprNode>,
        name: String,
        arrow: bool,
    },
    Deref(Box<ExprNode>),
    AddrOf(Box<ExprNode>),

    /// Associative- or built-in-array subscript, e.g. `a[i, j]` or
    /// `args[0]`. `keys` is the sibling-list of key expressions.
    ArrayRead {
        array: IdentId,
        keys: Vec<ExprNode>,
    },

    Call {
        func: IdentId,
        args: Vec<ExprNode>,
    },

    /// An inline substitution site; `args` binds the inline's formals.
    InlineUse {
        inline: IdentId,
        args: Vec<ExprNode>,
    },

    /// A translator-output root node (spec.md §4.9 "a translator body (a
    /// 'member' node)"): the clause root when translating `src` to the
    /// translator's destination type.
    TranslatorBody {
        translator: IdentId,
        src: Box<ExprNode>,
    },

    Comma {
        lhs: Box<ExprNode>,
        rhs: Box<ExprNode>,
    },

    /// `(T) expr`.
    Cast(Box<ExprNode>),
}

/// A single AST node. The CG mutates only `result_reg` and `flags`
/// (temporarily, for `REF`); every other field is read-only input
/// (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct ExprNode {
    pub kind: ExprKind,
    pub flags: NodeFlags,
    pub ctf: CtfRef,
    pub bitfield: Option<BitField>,
    pub endian: Endian,
    pub result_reg: Option<Reg>,
}

impl ExprNode {
    pub fn new(kind: ExprKind, ctf: CtfRef) -> Self {
        ExprNode {
            kind,
            flags: NodeFlags::empty(),
            ctf,
            bitfield: None,
            endian: Endian::Little,
            result_reg: None,
        }
    }

    pub fn with_flags(mut self, flags: NodeFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_bitfield(mut self, bf: BitField) -> Self {
        self.bitfield = Some(bf);
        self.flags |= NodeFlags::BITFIELD;
        self
    }

    pub fn is_ref(&self) -> bool {
        self.flags.contains(NodeFlags::REF)
    }

    pub fn is_signed(&self) -> bool {
        self.flags.contains(NodeFlags::SIGNED)
    }

    pub fn is_dynamic(&self) -> bool {
        self.flags.contains(NodeFlags::DYNAMIC)
    }

    /// Toggle `REF` on for the duration of a child recursion; callers are
    /// expected to restore the prior value on every exit path (spec.md §9).
    pub fn set_ref(&mut self, on: bool) -> bool {
        let prev = self.is_ref();
        self.flags.set(NodeFlags::REF, on);
        prev
    }
}

/// A snapshot of a node's type/flag fields, detached from its `kind` so
/// code generator helpers can read "this node's own type" while a `match`
/// on `&mut node.kind` holds a disjoint mutable borrow of the node.
#[derive(Debug, Clone, Copy)]
pub struct NodeMeta {
    pub ctf: CtfRef,
    pub flags: NodeFlags,
    pub bitfield: Option<BitField>,
    pub endian: Endian,
}

impl NodeMeta {
    pub fn of(node: &ExprNode) -> Self {
        NodeMeta {
            ctf: node.ctf,
            flags: node.flags,
            bitfield: node.bitfield,
            endian: node.endian,
        }
    }

    pub fn is_signed(&self) -> bool {
        self.flags.contains(NodeFlags::SIGNED)
    }
}
