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

//! Load/store opcode selector (spec.md §4.6, component C6): picks the
//! right memory op for a node's (size, sign, address space), and runs the
//! bit-field extract/insert epilogue/prologue around it.

use crate::ast::{Endian, NodeFlags, NodeMeta};
use crate::cg::CompileContext;
use crate::ctf::CtfProvider;
use crate::errors::CgError;
use crate::isa::{AddrSpace, AluOp, Op, Reg, Width};

fn resolve_width(meta: NodeMeta, ctf: &dyn CtfProvider) -> Result<Width, CgError> {
    match meta.bitfield {
        Some(bf) => Width::from_bits_clp2(bf.bit_width),
        None => {
            let size = ctf.type_size(meta.ctf)?;
            Width::from_bytes(size)
        }
    }
}

fn addr_space(meta: NodeMeta) -> Result<AddrSpace, CgError> {
    if meta.flags.contains(NodeFlags::USERLAND) {
        // Open question (spec.md §9): userland loads are accepted by the
        // opcode table's shape but rejected here — see DESIGN.md.
        Err(CgError::Unknown("userland loads are not supported by this target"))
    } else {
        Ok(AddrSpace::Kernel)
    }
}

/// `choose_load(node, ctf, type)`: the width, signedness, and address
/// space a load of this node should use.
pub fn choose_load(meta: NodeMeta, ctf: &dyn CtfProvider) -> Result<(Width, bool, AddrSpace), CgError> {
    let width = resolve_width(meta, ctf)?;
    let space = addr_space(meta)?;
    Ok((width, meta.is_signed(), space))
}

/// `choose_store(size)`: symmetric with `choose_load`, minus signedness
/// (stores don't sign/zero-extend).
pub fn choose_store(meta: NodeMeta, ctf: &dyn CtfProvider) -> Result<(Width, AddrSpace), CgError> {
    let width = resolve_width(meta, ctf)?;
    let space = addr_space(meta)?;
    Ok((width, space))
}

/// Emit a load of `meta`'s value from `[addr + off]` into `dst`, running
/// the bit-field extract epilogue if `meta` describes a bit-field.
pub fn emit_load(
    ctx: &mut CompileContext,
    meta: NodeMeta,
    addr: Reg,
    off: i16,
    dst: Reg,
) -> Result<(), CgError> {
    let (width, signed, space) = choose_load(meta, ctx.ctf)?;
    ctx.insns.append(Op::Load {
        width,
        signed,
        space,
        dst,
        src: addr,
        off,
    });
    if meta.bitfield.is_some() {
        emit_bitfield_extract(ctx, dst, meta, width)?;
    }
    Ok(())
}

/// Emit a store of `src` to `[addr + off]`.
pub fn emit_store(
    ctx: &mut CompileContext,
    meta: NodeMeta,
    addr: Reg,
    off: i16,
    src: Reg,
) -> Result<(), CgError> {
    let (width, space) = choose_store(meta, ctx.ctf)?;
    ctx.insns.append(Op::Store {
        width,
        space,
        dst: addr,
        off,
        src,
    });
    Ok(())
}

fn unsigned_shift_amount(meta: NodeMeta, w_bits: u32) -> u32 {
    let bf = meta.bitfield.expect("bitfield shift requested on non-bitfield node");
    match meta.endian {
        Endian::Little => bf.bit_offset % 8,
        Endian::Big => w_bits - (bf.bit_offset % 8 + bf.bit_width),
    }
}

/// Bit-field extract read epilogue (spec.md §4.6).
fn emit_bitfield_extract(
    ctx: &mut CompileContext,
    reg: Reg,
    meta: NodeMeta,
    width: Width,
) -> Result<(), CgError> {
    let bf = meta
        .bitfield
        .ok_or(CgError::Unknown("bit-field extract requested on a non-bit-field node"))?;
    let w_bits = width.bits();
    let shift = unsigned_shift_amount(meta, w_bits);

    if meta.is_signed() {
        let to_top = 64 - bf.bit_width - shift;
        ctx.insns.append(Op::AluImm {
            op: AluOp::Lsh,
            dst: reg,
            imm: to_top as i64,
        });
        ctx.insns.append(Op::AluImm {
            op: AluOp::Arsh,
            dst: reg,
            imm: (64 - bf.bit_width) as i64,
        });
    } else {
        if shift > 0 {
            ctx.insns.append(Op::AluImm {
                op: AluOp::Rsh,
                dst: reg,
                imm: shift as i64,
            });
        }
        let mask = field_mask(bf.bit_width);
        ctx.insns.append(Op::AluImm {
            op: AluOp::And,
            dst: reg,
            imm: mask,
        });
    }
    Ok(())
}

fn field_mask(bit_width: u32) -> i64 {
    if bit_width >= 64 {
        -1
    } else {
        ((1u64 << bit_width) - 1) as i64
    }
}

/// Bit-field insert write prologue (spec.md §4.6). `container` holds the
/// address of the field's containing storage; `value` holds the new field
/// value (unmasked). Returns a fresh register holding the merged container
/// value — the caller stores it and must free it afterward.
pub fn emit_bitfield_insert(
    ctx: &mut CompileContext,
    meta: NodeMeta,
    container: Reg,
    value: Reg,
) -> Result<Reg, CgError> {
    let bf = meta
        .bitfield
        .ok_or(CgError::Unknown("bit-field insert requested on a non-bit-field node"))?;
    let width = resolve_width(meta, ctx.ctf)?;
    let w_bits = width.bits();
    let shift = unsigned_shift_amount(meta, w_bits);
    let mask = field_mask(bf.bit_width);

    let tmp = ctx.regs.alloc()?;
    ctx.insns.append(Op::Load {
        width,
        signed: false,
        space: AddrSpace::Kernel,
        dst: tmp,
        src: container,
        off: 0,
    });
    let clear_mask = !((mask as u64) << shift) as i64;
    ctx.insns.append(Op::AluImm {
        op: AluOp::And,
        dst: tmp,
        imm: clear_mask,
    });
    ctx.insns.append(Op::AluImm {
        op: AluOp::And,
        dst: value,
        imm: mask,
    });
    if shift > 0 {
        ctx.insns.append(Op::AluImm {
            op: AluOp::Lsh,
            dst: value,
            imm: shift as i64,
        });
    }
    ctx.insns.append(Op::Alu {
        op: AluOp::Or,
        dst: tmp,
        src: value,
    });
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BitField;
    use crate::cg::{CgConfig, CompileContext, ProbeDescriptor};
    use crate::ctf::{CtfFile, CtfRef, InMemoryCtf};
    use crate::ident::InMemoryIdentTable;

    fn meta(bitfield: BitField, endian: Endian, signed: bool) -> NodeMeta {
        NodeMeta {
            ctf: CtfRef::NONE,
            flags: if signed { NodeFlags::SIGNED } else { NodeFlags::empty() },
            bitfield: Some(bitfield),
            endian,
        }
    }

    /// Insert reads the container, masks out the field's old bits, shifts
    /// and masks the new value into place, and ORs the two together — the
    /// same shift amount `unsigned_shift_amount` would use to extract it
    /// back out (invariant 5: insert and extract agree on field placement).
    #[test]
    fn bitfield_insert_emits_read_mask_shift_merge_shaped_by_the_same_shift_extract_uses() {
        let ctf = InMemoryCtf::new(CtfFile(1));
        let mut idents = InMemoryIdentTable::new();
        let mut ctx = CompileContext::new(CgConfig::default(), ProbeDescriptor::default(), &mut idents, &ctf);

        let bf = BitField { bit_offset: 4, bit_width: 3 };
        let m = meta(bf, Endian::Little, false);
        let container = ctx.regs.alloc().unwrap();
        let value = ctx.regs.alloc().unwrap();

        let before = ctx.insns.len();
        let merged = emit_bitfield_insert(&mut ctx, m, container, value).unwrap();
        assert_ne!(merged, container);

        let emitted = ctx.insns.nodes()[before..].to_vec();
        assert!(matches!(emitted[0].op, Op::Load { .. }));
        assert!(emitted
            .iter()
            .any(|n| matches!(n.op, Op::AluImm { op: AluOp::Lsh, dst, imm } if dst == value && imm == unsigned_shift_amount(m, Width::B1.bits()) as i64)));
        assert!(matches!(emitted.last().unwrap().op, Op::Alu { op: AluOp::Or, .. }));
    }

    #[test]
    fn unsigned_shift_amount_differs_by_endian() {
        let bf = BitField { bit_offset: 4, bit_width: 3 };
        let little = meta(bf, Endian::Little, false);
        let big = meta(bf, Endian::Big, false);
        assert_eq!(unsigned_shift_amount(little, 8), 4);
        assert_eq!(unsigned_shift_amount(big, 8), 8 - (4 + 3));
    }

    #[test]
    fn field_mask_covers_exactly_the_requested_width() {
        assert_eq!(field_mask(3), 0b111);
        assert_eq!(field_mask(64), -1);
    }

    #[test]
    fn signed_extract_emits_shift_pair_sized_to_width() {
        let ctf = InMemoryCtf::new(CtfFile(1));
        let mut idents = InMemoryIdentTable::new();
        let mut ctx = CompileContext::new(CgConfig::default(), ProbeDescriptor::default(), &mut idents, &ctf);
        let bf = BitField { bit_offset: 0, bit_width: 5 };
        let m = meta(bf, Endian::Little, true);
        let reg = ctx.regs.alloc().unwrap();

        let before = ctx.insns.len();
        emit_bitfield_extract(&mut ctx, reg, m, Width::B1).unwrap();
        let emitted = ctx.insns.nodes()[before..].to_vec();
        assert_eq!(emitted.len(), 2);
        assert!(matches!(emitted[0].op, Op::AluImm { op: AluOp::Lsh, .. }));
        assert!(matches!(emitted[1].op, Op::AluImm { op: AluOp::Arsh, .. }));
    }

    #[test]
    fn userland_address_space_is_rejected() {
        let meta = NodeMeta {
            ctf: CtfRef::NONE,
            flags: NodeFlags::USERLAND,
            bitfield: None,
            endian: Endian::Little,
        };
        assert!(addr_space(meta).is_err());
    }
}
