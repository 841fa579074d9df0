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

//! Type machinery (spec.md §4.7, component C7): member lookup through
//! forward declarations, pointer-arithmetic scaling, and scalar promotion.

use crate::cg::CompileContext;
use crate::ctf::{CtfRef, MemberInfo, TypeKind};
use crate::errors::CgError;
use crate::isa::{AluOp, Op, Reg};

/// A CTF type is treated as a string for comparison/arglist purposes when
/// it is named exactly `"string"` — the common convention for the builtin
/// string type in this type system's CTF encoding.
pub fn is_string_type(ctx: &CompileContext, t: CtfRef) -> bool {
    ctx.ctf.type_name(t).map(|n| n == "string").unwrap_or(false)
}

/// True for pointer and array types (spec.md §4.8 "Arithmetic binary",
/// `emit_incdec`'s pointee-size step): these are the types
/// `ptr_size_scale` accepts.
pub fn is_pointer_or_array(ctx: &CompileContext, t: CtfRef) -> Result<bool, CgError> {
    Ok(matches!(ctx.ctf.type_kind(t)?, TypeKind::Pointer | TypeKind::Array))
}

/// True for types the arglist/assignment machinery passes by reference
/// rather than by value (spec.md §1(d) "pass-by-reference escape for
/// composites and strings"): structs, unions, arrays, and strings.
pub fn is_by_ref(ctx: &CompileContext, t: CtfRef) -> Result<bool, CgError> {
    if is_string_type(ctx, t) {
        return Ok(true);
    }
    Ok(matches!(
        ctx.ctf.type_kind(t)?,
        TypeKind::Struct | TypeKind::Union | TypeKind::Array
    ))
}

/// `membinfo(ctf, type, name)`: resolves forward declarations by
/// repeatedly substituting the type's definition from the global type
/// index until the kind is no longer a forward reference (or no further
/// improvement is possible), then asks CTF for the member record. Returns
/// the possibly-changed CTF handle so the caller keeps using
/// member-sourced types in the right file.
pub fn membinfo(
    ctx: &CompileContext,
    mut t: CtfRef,
    name: &str,
) -> Result<(CtfRef, MemberInfo), CgError> {
    loop {
        match ctx.ctf.type_kind(t)? {
            TypeKind::Forward | TypeKind::Typedef => {
                let next = ctx.ctf.type_resolve(t)?;
                if next == t {
                    break;
                }
                t = next;
            }
            // `p->x` carries `p`'s pointer type on the base node; member
            // lookup itself is against the pointee, since the emitted
            // address arithmetic is identical either way (spec.md §4.8
            // "Pointer-to-member and dot" dispatches `.` and `->`
            // identically once the left side's address is in hand).
            TypeKind::Pointer => t = ctx.ctf.type_reference(t)?,
            _ => break,
        }
    }
    let member = ctx.ctf.member_info(t, name)?;
    Ok((t, member))
}

/// `ptr_size_scale(t, op, dreg)`: for a pointer or array type, scale
/// `dreg` by the element size (multiply for arithmetic scaling, divide for
/// pointer-difference). A size-1 element produces no code.
pub fn ptr_size_scale(ctx: &mut CompileContext, t: CtfRef, op: AluOp, dreg: Reg) -> Result<(), CgError> {
    let elem = match ctx.ctf.type_kind(t)? {
        TypeKind::Pointer => ctx.ctf.type_reference(t)?,
        TypeKind::Array => ctx.ctf.array_info(t)?.element_ty,
        _ => {
            return Err(CgError::Unknown(
                "ptr_size_scale called on a type that is neither a pointer nor an array",
            ));
        }
    };
    let size = ctx.ctf.type_size(elem)?;
    if size > 1 {
        ctx.insns.append(Op::AluImm {
            op,
            dst: dreg,
            imm: size as i64,
        });
    }
    Ok(())
}

/// `typecast(src_ctf, dst_ctf, reg)`: if the destination is scalar and
/// narrower, or the sign differs, sign- or zero-extend `reg` by shifting
/// left by `64 - dst_bits` then shifting right (arithmetic or logical) by
/// the same amount. Otherwise emits nothing — this makes casting `T` to
/// `T` a no-op (invariant 8).
pub fn typecast(ctx: &mut CompileContext, src_ctf: CtfRef, dst_ctf: CtfRef, reg: Reg) -> Result<(), CgError> {
    let (src_enc, dst_enc) = match (ctx.ctf.type_encoding(src_ctf), ctx.ctf.type_encoding(dst_ctf)) {
        (Ok(s), Ok(d)) => (s, d),
        // Non-scalar casts (struct/union/array) carry no bit encoding;
        // those are handled by the caller via member-wise copy, not here.
        _ => return Ok(()),
    };

    if dst_enc.bits < src_enc.bits || dst_enc.signed != src_enc.signed {
        let shift = (64 - dst_enc.bits) as i64;
        ctx.insns.append(Op::AluImm {
            op: AluOp::Lsh,
            dst: reg,
            imm: shift,
        });
        let op = if dst_enc.signed { AluOp::Arsh } else { AluOp::Rsh };
        ctx.insns.append(Op::AluImm { op, dst: reg, imm: shift });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cg::{CgConfig, CompileContext, ProbeDescriptor};
    use crate::ctf::{CtfFile, InMemoryCtf};
    use crate::ident::InMemoryIdentTable;
    use crate::isa::Reg;

    /// Casting a type to itself emits nothing (invariant 8).
    #[test]
    fn typecast_same_type_is_a_no_op() {
        let mut ctf = InMemoryCtf::new(CtfFile(1));
        let int64 = ctf.add_integer("int64_t", 8, true);
        let mut idents = InMemoryIdentTable::new();
        let mut ctx = CompileContext::new(CgConfig::default(), ProbeDescriptor::default(), &mut idents, &ctf);

        let before = ctx.insns.len();
        typecast(&mut ctx, int64, int64, Reg(1)).unwrap();
        assert_eq!(ctx.insns.len(), before);
    }

    #[test]
    fn typecast_narrowing_emits_the_shift_pair() {
        let mut ctf = InMemoryCtf::new(CtfFile(1));
        let int64 = ctf.add_integer("int64_t", 8, true);
        let int8 = ctf.add_integer("int8_t", 1, true);
        let mut idents = InMemoryIdentTable::new();
        let mut ctx = CompileContext::new(CgConfig::default(), ProbeDescriptor::default(), &mut idents, &ctf);

        typecast(&mut ctx, int64, int8, Reg(1)).unwrap();
        assert_eq!(ctx.insns.len(), 2);
    }

    #[test]
    fn is_pointer_or_array_accepts_only_those_two_kinds() {
        let mut ctf = InMemoryCtf::new(CtfFile(1));
        let int64 = ctf.add_integer("int64_t", 8, true);
        let ptr = ctf.add_pointer("int64_ptr", int64);
        let mut idents = InMemoryIdentTable::new();
        let ctx = CompileContext::new(CgConfig::default(), ProbeDescriptor::default(), &mut idents, &ctf);

        assert!(is_pointer_or_array(&ctx, ptr).unwrap());
        assert!(!is_pointer_or_array(&ctx, int64).unwrap());
    }

    #[test]
    fn is_by_ref_covers_structs_and_strings_not_scalars() {
        let mut ctf = InMemoryCtf::new(CtfFile(1));
        let int64 = ctf.add_integer("int64_t", 8, true);
        let string_ty = ctf.add_struct("string", 64, vec![]);
        let mut idents = InMemoryIdentTable::new();
        let ctx = CompileContext::new(CgConfig::default(), ProbeDescriptor::default(), &mut idents, &ctf);

        assert!(is_by_ref(&ctx, string_ty).unwrap());
        assert!(!is_by_ref(&ctx, int64).unwrap());
    }

    #[test]
    fn membinfo_resolves_through_a_pointer_to_the_pointee_struct() {
        let mut ctf = InMemoryCtf::new(CtfFile(1));
        let u32_ty = ctf.add_integer("uint32_t", 4, false);
        let foo = ctf.add_struct(
            "foo",
            16,
            vec![crate::ctf::MemberInfo {
                name: "x".into(),
                ty: u32_ty,
                byte_offset: 8,
                bit_offset: 0,
                bit_width: None,
            }],
        );
        let foo_ptr = ctf.add_pointer("foo_ptr", foo);
        let mut idents = InMemoryIdentTable::new();
        let ctx = CompileContext::new(CgConfig::default(), ProbeDescriptor::default(), &mut idents, &ctf);

        let (resolved, member) = membinfo(&ctx, foo_ptr, "x").unwrap();
        assert_eq!(resolved, foo);
        assert_eq!(member.byte_offset, 8);
    }
}
