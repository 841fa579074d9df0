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

//! The target virtual ISA: an eBPF-shaped register+stack machine. See
//! `SPEC_FULL.md` §0 for why this concrete shape was chosen to stand in for
//! spec.md's abstract "in-kernel sandboxed execution engine".

use std::fmt;

/// A virtual register, `R0..=R10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct Reg(pub u8);

impl Reg {
    pub const R0: Reg = Reg(0);
    pub const R1: Reg = Reg(1);
    pub const R2: Reg = Reg(2);
    pub const R3: Reg = Reg(3);
    pub const R4: Reg = Reg(4);
    pub const R5: Reg = Reg(5);
    pub const R10_FP: Reg = Reg(10);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 10 {
            write!(f, "fp")
        } else {
            write!(f, "r{}", self.0)
        }
    }
}

/// ALU / branch conditions. Used for both register-register and
/// register-immediate instruction forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum AluOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Lsh,
    /// Arithmetic (sign-extending) right shift.
    Arsh,
    /// Logical (zero-filling) right shift.
    Rsh,
    Mov,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum JumpCond {
    Always,
    Eq,
    Ne,
    /// Signed less-than.
    Slt,
    Sle,
    Sgt,
    Sge,
    /// Unsigned less-than.
    Lt,
    Le,
    Gt,
    Ge,
    /// Branch if the register is nonzero.
    Nz,
    /// Branch if the register is zero.
    Z,
}

/// Memory access width, always one of the four ISA-supported sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Width {
    B1,
    B2,
    B4,
    B8,
}

impl Width {
    pub fn bytes(self) -> u32 {
        match self {
            Width::B1 => 1,
            Width::B2 => 2,
            Width::B4 => 4,
            Width::B8 => 8,
        }
    }

    pub fn bits(self) -> u32 {
        self.bytes() * 8
    }

    /// Round a bit count up to a byte boundary, then up to the nearest
    /// power-of-two width in `{1,2,4,8}` bytes, using the classic `clp2`
    /// trick (spec.md §4.6).
    pub fn from_bits_clp2(mut bits: u32) -> Result<Width, crate::errors::CgError> {
        bits = bits.div_ceil(8) * 8;
        let bytes = bits / 8;
        let mut x = bytes.max(1) - 1;
        x |= x >> 1;
        x |= x >> 2;
        x |= x >> 4;
        x |= x >> 8;
        x |= x >> 16;
        let clp2 = x + 1;
        match clp2 {
            1 => Ok(Width::B1),
            2 => Ok(Width::B2),
            4 => Ok(Width::B4),
            8 => Ok(Width::B8),
            _ => Err(crate::errors::CgError::Unknown(
                "bit-field width rounds to an unsupported access size",
            )),
        }
    }

    pub fn from_bytes(size: u32) -> Result<Width, crate::errors::CgError> {
        match size {
            1 => Ok(Width::B1),
            2 => Ok(Width::B2),
            4 => Ok(Width::B4),
            8 => Ok(Width::B8),
            _ => Err(crate::errors::CgError::Unknown(
                "load/store width is not one of {1,2,4,8}",
            )),
        }
    }
}

/// The address space a load/store targets. Userland loads are accepted by
/// the opcode table but rejected at selection time — see
/// `cg::loadstore::choose_load` and spec.md's open question about this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum AddrSpace {
    Kernel,
    User,
}

/// A single emitted instruction. Conceptually an 8-byte VM word:
/// `(opcode, dst, src, offset, imm)`. `label` marks this instruction as a
/// branch/patch target for the downstream assembler; `NONE` (`None`) means
/// unlabelled.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub enum Op {
    /// `dst = dst OP src` (register form).
    Alu { op: AluOp, dst: Reg, src: Reg },
    /// `dst = dst OP imm` (immediate form).
    AluImm { op: AluOp, dst: Reg, imm: i64 },
    /// Load the low 32 bits of a 64-bit immediate into `dst`.
    LoadImm32 { dst: Reg, imm: i32 },
    /// The second word of a 64-bit immediate load: high 32 bits.
    LoadImm64High { imm: i32 },
    /// `dst = *(width *)(src + off)`, address space and sign per field.
    Load {
        width: Width,
        signed: bool,
        space: AddrSpace,
        dst: Reg,
        src: Reg,
        off: i16,
    },
    /// `*(width *)(dst + off) = src`.
    Store {
        width: Width,
        space: AddrSpace,
        dst: Reg,
        off: i16,
        src: Reg,
    },
    /// Call helper `helper` by numeric id; the downstream linker resolves it.
    Call { helper: u32 },
    /// Conditional or unconditional branch to `target`.
    Jump { cond: JumpCond, a: Reg, b: Reg, target: Label },
    /// Same as `Jump` but compares a register against an immediate.
    JumpImm { cond: JumpCond, a: Reg, imm: i64, target: Label },
    /// Unconditional jump with no comparison.
    Goto { target: Label },
    /// No-op; used as a branch-convergence target (spec.md's `post:`
    /// label in comparison/logic codegen).
    Nop,
    /// Program exit; terminates the clause.
    Exit,
}

/// A label id minted by `InsnList::fresh_label`. `NONE` in spec.md's
/// terminology is simply "this branch has not been given a target yet",
/// which we represent by not constructing a `Jump`/`Goto` until one exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// A helper identified by a small integer and described by a prototype
/// string listing argument kinds in positional order (spec.md §4.5 / §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct HelperSig {
    pub id: u32,
    pub proto: &'static str,
}

/// Recognized helpers (minimum set, spec.md §6).
pub mod helpers {
    use super::HelperSig;

    pub const COPYS: HelperSig = HelperSig { id: 1, proto: "rri" };
    pub const SETS: HelperSig = HelperSig { id: 2, proto: "i" };
    pub const STRLEN: HelperSig = HelperSig { id: 3, proto: "ri" };
    pub const STRCMP: HelperSig = HelperSig { id: 4, proto: "rr" };
    pub const SET_GLOBAL: HelperSig = HelperSig { id: 5, proto: "ir" };
    pub const SET_THREAD: HelperSig = HelperSig { id: 6, proto: "ir" };
    pub const SET_LOCAL: HelperSig = HelperSig { id: 7, proto: "ir" };
    pub const SET_GLOBAL_ASSOC: HelperSig = HelperSig { id: 8, proto: "irdi" };
    pub const SET_THREAD_ASSOC: HelperSig = HelperSig { id: 9, proto: "irdi" };
    pub const GET_GLOBAL: HelperSig = HelperSig { id: 10, proto: "i" };
    pub const GET_THREAD: HelperSig = HelperSig { id: 11, proto: "i" };
    pub const GET_LOCAL: HelperSig = HelperSig { id: 12, proto: "i" };
    pub const GET_GLOBAL_ASSOC: HelperSig = HelperSig { id: 13, proto: "idi" };
    pub const GET_THREAD_ASSOC: HelperSig = HelperSig { id: 14, proto: "idi" };
    pub const GET_GLOBAL_ARRAY: HelperSig = HelperSig { id: 15, proto: "ir" };
    pub const GET_THREAD_ARRAY: HelperSig = HelperSig { id: 16, proto: "ir" };
    pub const ALLOC_SCRATCH: HelperSig = HelperSig { id: 17, proto: "r" };
    pub const SUBR: HelperSig = HelperSig { id: 18, proto: "idi" };

    pub const FIRST_HELPER: u32 = COPYS.id;
}

/// Bound below which a helper call clobbers a register (spec.md's
/// `CALLER_SAVED_BOUND`): `[0, 6)` is caller-saved, `[6, 10)` callee-saved,
/// `R10` is the read-only frame pointer.
pub const CALLER_SAVED_BOUND: u8 = 6;
pub const R_MAX: u8 = 10;
pub const FIRST_ARG_REG: u8 = 1;

/// Upper bound on a string-table offset (spec.md's `STROFF_MAX`): the
/// largest value the ISA's 32-bit immediate field can carry.
pub const STROFF_MAX: u32 = i32::MAX as u32;
