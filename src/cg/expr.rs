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

//! Expression visitor (spec.md §4.8, component C8): the recursive,
//! per-AST-kind emitter. This is the bulk of the generator — every other
//! module exists to be called from here.

use crate::ast::{BinOp, BitField, CmpOp, Endian, ExprKind, ExprNode, IncDecOp, LogicOp, NodeFlags, NodeMeta};
use crate::cg::helper::{call_helper, ArgValue};
use crate::cg::{imm, loadstore, types, CompileContext};
use crate::errors::CgError;
use crate::ident::{IdentId, IdentKind, Scope};
use crate::isa::{helpers, AddrSpace, AluOp, HelperSig, JumpCond, Op, Reg, Width};

/// Request-mode argument a parent passes down to a child (spec.md §9,
/// "mutable flags on AST nodes", option (a): an explicit mode parameter
/// rather than relying solely on the `REF` flag).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Value,
    Ref,
}

/// Emit `node`, honoring the result-register contract: on return,
/// `node.result_reg` holds a register the caller owns and must free. The
/// `REF` flag is toggled for the duration of this call and restored on
/// every exit path, successful or not (spec.md §9).
pub fn emit(ctx: &mut CompileContext, node: &mut ExprNode, mode: Mode) -> Result<Reg, CgError> {
    let prev_ref = node.set_ref(mode == Mode::Ref);
    let result = emit_kind(ctx, node, mode);
    node.flags.set(NodeFlags::REF, prev_ref);
    if let Ok(r) = result {
        node.result_reg = Some(r);
    }
    result
}

fn emit_kind(ctx: &mut CompileContext, node: &mut ExprNode, mode: Mode) -> Result<Reg, CgError> {
    let meta = NodeMeta::of(node);
    match &mut node.kind {
        ExprKind::IntLit(v) => {
            let reg = ctx.regs.alloc()?;
            imm::set_imm(&mut ctx.insns, reg, *v);
            Ok(reg)
        }

        ExprKind::StrLit(s) => {
            let off = ctx.strtab.insert(s)?;
            let r0 = call_helper(ctx, helpers::SETS, &[ArgValue::Imm(off as i64)])?;
            let dst = ctx.regs.alloc()?;
            ctx.insns.append(Op::Alu {
                op: AluOp::Mov,
                dst,
                src: r0,
            });
            Ok(dst)
        }

        ExprKind::Ident(id) => emit_ident(ctx, *id, meta, mode),

        ExprKind::Symbol(id) => emit_symbol(ctx, *id, meta, mode),

        ExprKind::Binary { op, lhs, rhs } => {
            let lhs_reg = emit(ctx, lhs, Mode::Value)?;
            let rhs_reg = emit(ctx, rhs, Mode::Value)?;
            let lhs_meta = NodeMeta::of(lhs);
            let rhs_meta = NodeMeta::of(rhs);
            emit_binary_op(ctx, *op, lhs_meta, rhs_meta, lhs_reg, rhs_reg)?;
            Ok(lhs_reg)
        }

        ExprKind::BinaryAssign { op, lhs, rhs } => {
            let lhs_reg = emit(ctx, lhs, Mode::Value)?;
            let rhs_reg = emit(ctx, rhs, Mode::Value)?;
            let lhs_meta = NodeMeta::of(lhs);
            let rhs_meta = NodeMeta::of(rhs);
            emit_binary_op(ctx, *op, lhs_meta, rhs_meta, lhs_reg, rhs_reg)?;
            store_to_lvalue(ctx, lhs, lhs_reg)?;
            Ok(lhs_reg)
        }

        ExprKind::Compare { op, lhs, rhs } => emit_compare(ctx, *op, lhs, rhs),

        ExprKind::Logic { op, lhs, rhs } => emit_logic(ctx, *op, lhs, rhs),

        ExprKind::Not(expr) => {
            let reg = emit(ctx, expr, Mode::Value)?;
            let zero_label = ctx.insns.fresh_label();
            let post_label = ctx.insns.fresh_label();
            ctx.insns.append(Op::JumpImm {
                cond: JumpCond::Z,
                a: reg,
                imm: 0,
                target: zero_label,
            });
            imm::set_imm(&mut ctx.insns, reg, 0);
            ctx.insns.append(Op::Goto { target: post_label });
            imm::set_imm_labelled(&mut ctx.insns, reg, 1, Some(zero_label), None);
            ctx.insns.append_labelled(post_label, Op::Nop);
            Ok(reg)
        }

        ExprKind::Ternary {
            cond,
            then_branch,
            else_branch,
        } => {
            let cond_reg = emit(ctx, cond, Mode::Value)?;
            let false_label = ctx.insns.fresh_label();
            ctx.insns.append(Op::JumpImm {
                cond: JumpCond::Z,
                a: cond_reg,
                imm: 0,
                target: false_label,
            });
            ctx.regs.free(cond_reg);

            let then_reg = emit(ctx, then_branch, Mode::Value)?;
            // Placeholder move, destination unknown until the else branch
            // is emitted (spec.md §9 "late patching").
            let placeholder = ctx.insns.append(Op::Nop);
            ctx.regs.free(then_reg);
            let post_label = ctx.insns.fresh_label();
            ctx.insns.append(Op::Goto { target: post_label });

            ctx.insns.append_labelled(false_label, Op::Nop);
            let else_reg = emit(ctx, else_branch, Mode::Value)?;
            ctx.insns.patch(
                placeholder,
                Op::Alu {
                    op: AluOp::Mov,
                    dst: else_reg,
                    src: then_reg,
                },
            );
            ctx.insns.append_labelled(post_label, Op::Nop);
            Ok(else_reg)
        }

        ExprKind::IncDec { op, target } => emit_incdec(ctx, *op, target),

        ExprKind::Assign { lhs, rhs } => {
            let rhs_reg = emit(ctx, rhs, Mode::Value)?;
            types::typecast(ctx, rhs.ctf, lhs.ctf, rhs_reg)?;
            store_to_lvalue(ctx, lhs, rhs_reg)?;
            Ok(rhs_reg)
        }

        ExprKind::Member { base, name, .. } => emit_member(ctx, base, name, meta, mode),

        ExprKind::Deref(expr) => {
            let reg = emit(ctx, expr, Mode::Value)?;
            if mode != Mode::Ref {
                loadstore::emit_load(ctx, meta, reg, 0, reg)?;
            }
            Ok(reg)
        }

        ExprKind::AddrOf(expr) => emit(ctx, expr, Mode::Ref),

        ExprKind::ArrayRead { array, keys } => emit_array_read(ctx, *array, keys, meta),

        ExprKind::Call { func, args } => {
            let desc = ctx.idents.resolve(*func)?;
            if !matches!(desc.kind, IdentKind::Function) {
                return Err(CgError::CgExpr);
            }
            let argcount = emit_arglist(ctx, args)?;
            let r0 = call_helper(
                ctx,
                helpers::SUBR,
                &[
                    ArgValue::Imm(func.0 as i64),
                    ArgValue::StackMarker,
                    ArgValue::Imm(argcount as i64),
                ],
            )?;
            let dst = ctx.regs.alloc()?;
            ctx.insns.append(Op::Alu {
                op: AluOp::Mov,
                dst,
                src: r0,
            });
            ctx.stack_depth -= argcount * 16;
            Ok(dst)
        }

        ExprKind::InlineUse { inline, args } => emit_inline(ctx, *inline, args, mode),

        ExprKind::TranslatorBody { translator, src } => emit_translator_body(ctx, *translator, src),

        ExprKind::Comma { lhs, rhs } => {
            let l = emit(ctx, lhs, Mode::Value)?;
            ctx.regs.free(l);
            emit(ctx, rhs, mode)
        }

        ExprKind::Cast(expr) => {
            let reg = emit(ctx, expr, mode)?;
            let src_ctf = expr.ctf;
            types::typecast(ctx, src_ctf, meta.ctf, reg)?;
            Ok(reg)
        }
    }
}

// ---------------------------------------------------------------------
// Arithmetic / comparison / logic helpers
// ---------------------------------------------------------------------

fn map_binop(op: BinOp, signed: bool) -> AluOp {
    match op {
        BinOp::Add => AluOp::Add,
        BinOp::Sub => AluOp::Sub,
        BinOp::Mul => AluOp::Mul,
        // XXX signedness (spec.md §9 open question): the target ISA has a
        // single DIV/MOD opcode regardless of operand signedness.
        BinOp::Div => AluOp::Div,
        BinOp::Mod => AluOp::Mod,
        BinOp::And => AluOp::And,
        BinOp::Or => AluOp::Or,
        BinOp::Xor => AluOp::Xor,
        BinOp::Shl => AluOp::Lsh,
        BinOp::Shr => {
            if signed {
                AluOp::Arsh
            } else {
                AluOp::Rsh
            }
        }
    }
}

/// Arithmetic binary body shared by `Binary` and `BinaryAssign` (spec.md
/// §4.8 "Arithmetic binary"): pointer-arithmetic scaling, then the
/// register-form ALU op into `lhs_reg`, freeing `rhs_reg`.
fn emit_binary_op(
    ctx: &mut CompileContext,
    op: BinOp,
    lhs_meta: NodeMeta,
    rhs_meta: NodeMeta,
    lhs_reg: Reg,
    rhs_reg: Reg,
) -> Result<(), CgError> {
    let lhs_ptr = types::is_pointer_or_array(ctx, lhs_meta.ctf)?;
    let rhs_ptr = types::is_pointer_or_array(ctx, rhs_meta.ctf)?;

    if matches!(op, BinOp::Add | BinOp::Sub) {
        match (lhs_ptr, rhs_ptr) {
            (true, true) if op == BinOp::Sub => {
                ctx.insns.append(Op::Alu {
                    op: AluOp::Sub,
                    dst: lhs_reg,
                    src: rhs_reg,
                });
                ctx.regs.free(rhs_reg);
                // spec.md §9 open question: the source scales off
                // `dn_right` here, which looks like a bug since the
                // pointer-minus-pointer result has already landed in the
                // left operand's register. We scale by the left operand's
                // element size instead (both operands are required to
                // match by the type checker) — see DESIGN.md.
                types::ptr_size_scale(ctx, lhs_meta.ctf, AluOp::Div, lhs_reg)?;
                return Ok(());
            }
            (true, false) => types::ptr_size_scale(ctx, lhs_meta.ctf, AluOp::Mul, rhs_reg)?,
            (false, true) => types::ptr_size_scale(ctx, rhs_meta.ctf, AluOp::Mul, lhs_reg)?,
            _ => {}
        }
    }

    let alu = map_binop(op, lhs_meta.is_signed());
    ctx.insns.append(Op::Alu {
        op: alu,
        dst: lhs_reg,
        src: rhs_reg,
    });
    ctx.regs.free(rhs_reg);
    Ok(())
}

fn map_cmp(op: CmpOp, signed: bool) -> JumpCond {
    match (op, signed) {
        (CmpOp::Eq, _) => JumpCond::Eq,
        (CmpOp::Ne, _) => JumpCond::Ne,
        (CmpOp::Lt, true) => JumpCond::Slt,
        (CmpOp::Lt, false) => JumpCond::Lt,
        (CmpOp::Le, true) => JumpCond::Sle,
        (CmpOp::Le, false) => JumpCond::Le,
        (CmpOp::Gt, true) => JumpCond::Sgt,
        (CmpOp::Gt, false) => JumpCond::Gt,
        (CmpOp::Ge, true) => JumpCond::Sge,
        (CmpOp::Ge, false) => JumpCond::Ge,
    }
}

fn emit_compare(ctx: &mut CompileContext, op: CmpOp, lhs: &mut ExprNode, rhs: &mut ExprNode) -> Result<Reg, CgError> {
    let lhs_reg = emit(ctx, lhs, Mode::Value)?;
    let rhs_reg = emit(ctx, rhs, Mode::Value)?;
    let lhs_meta = NodeMeta::of(lhs);
    let rhs_meta = NodeMeta::of(rhs);

    let (work_reg, signed) = if types::is_string_type(ctx, lhs_meta.ctf) {
        let r0 = call_helper(ctx, helpers::STRCMP, &[ArgValue::Reg(lhs_reg), ArgValue::Reg(rhs_reg)])?;
        ctx.regs.free(lhs_reg);
        ctx.regs.free(rhs_reg);
        let dst = ctx.regs.alloc()?;
        ctx.insns.append(Op::Alu {
            op: AluOp::Mov,
            dst,
            src: r0,
        });
        (dst, true)
    } else {
        ctx.insns.append(Op::Alu {
            op: AluOp::Sub,
            dst: lhs_reg,
            src: rhs_reg,
        });
        ctx.regs.free(rhs_reg);
        (lhs_reg, lhs_meta.is_signed() && rhs_meta.is_signed())
    };

    let cond = map_cmp(op, signed);
    let true_label = ctx.insns.fresh_label();
    let post_label = ctx.insns.fresh_label();
    ctx.insns.append(Op::JumpImm {
        cond,
        a: work_reg,
        imm: 0,
        target: true_label,
    });
    imm::set_imm(&mut ctx.insns, work_reg, 0);
    ctx.insns.append(Op::Goto { target: post_label });
    imm::set_imm_labelled(&mut ctx.insns, work_reg, 1, Some(true_label), None);
    ctx.insns.append_labelled(post_label, Op::Nop);
    Ok(work_reg)
}

fn normalize_bool(ctx: &mut CompileContext, reg: Reg) {
    let nz_label = ctx.insns.fresh_label();
    let post_label = ctx.insns.fresh_label();
    ctx.insns.append(Op::JumpImm {
        cond: JumpCond::Nz,
        a: reg,
        imm: 0,
        target: nz_label,
    });
    imm::set_imm(&mut ctx.insns, reg, 0);
    ctx.insns.append(Op::Goto { target: post_label });
    imm::set_imm_labelled(&mut ctx.insns, reg, 1, Some(nz_label), None);
    ctx.insns.append_labelled(post_label, Op::Nop);
}

fn emit_logic(ctx: &mut CompileContext, op: LogicOp, lhs: &mut ExprNode, rhs: &mut ExprNode) -> Result<Reg, CgError> {
    match op {
        LogicOp::And => {
            let result = emit(ctx, lhs, Mode::Value)?;
            let false_label = ctx.insns.fresh_label();
            let post_label = ctx.insns.fresh_label();
            ctx.insns.append(Op::JumpImm {
                cond: JumpCond::Z,
                a: result,
                imm: 0,
                target: false_label,
            });
            let rhs_reg = emit(ctx, rhs, Mode::Value)?;
            ctx.insns.append(Op::JumpImm {
                cond: JumpCond::Z,
                a: rhs_reg,
                imm: 0,
                target: false_label,
            });
            ctx.regs.free(rhs_reg);
            imm::set_imm(&mut ctx.insns, result, 1);
            ctx.insns.append(Op::Goto { target: post_label });
            imm::set_imm_labelled(&mut ctx.insns, result, 0, Some(false_label), None);
            ctx.insns.append_labelled(post_label, Op::Nop);
            Ok(result)
        }
        LogicOp::Or => {
            let result = emit(ctx, lhs, Mode::Value)?;
            let true_label = ctx.insns.fresh_label();
            let false_label = ctx.insns.fresh_label();
            let post_label = ctx.insns.fresh_label();
            ctx.insns.append(Op::JumpImm {
                cond: JumpCond::Nz,
                a: result,
                imm: 0,
                target: true_label,
            });
            let rhs_reg = emit(ctx, rhs, Mode::Value)?;
            ctx.insns.append(Op::JumpImm {
                cond: JumpCond::Z,
                a: rhs_reg,
                imm: 0,
                target: false_label,
            });
            ctx.regs.free(rhs_reg);
            // Falls straight through into `true_label` when rhs is nonzero.
            imm::set_imm_labelled(&mut ctx.insns, result, 1, Some(true_label), None);
            ctx.insns.append(Op::Goto { target: post_label });
            imm::set_imm_labelled(&mut ctx.insns, result, 0, Some(false_label), None);
            ctx.insns.append_labelled(post_label, Op::Nop);
            Ok(result)
        }
        LogicOp::Xor => {
            let lhs_reg = emit(ctx, lhs, Mode::Value)?;
            normalize_bool(ctx, lhs_reg);
            let rhs_reg = emit(ctx, rhs, Mode::Value)?;
            normalize_bool(ctx, rhs_reg);
            ctx.insns.append(Op::Alu {
                op: AluOp::Xor,
                dst: lhs_reg,
                src: rhs_reg,
            });
            ctx.regs.free(rhs_reg);
            Ok(lhs_reg)
        }
    }
}

fn emit_incdec(ctx: &mut CompileContext, op: IncDecOp, target: &mut ExprNode) -> Result<Reg, CgError> {
    let child_reg = emit(ctx, target, Mode::Value)?;
    let target_meta = NodeMeta::of(target);
    let step = if types::is_pointer_or_array(ctx, target_meta.ctf)? {
        let elem = match ctx.ctf.type_kind(target_meta.ctf)? {
            crate::ctf::TypeKind::Pointer => ctx.ctf.type_reference(target_meta.ctf)?,
            crate::ctf::TypeKind::Array => ctx.ctf.array_info(target_meta.ctf)?.element_ty,
            _ => unreachable!("is_pointer_or_array guarantees Pointer or Array"),
        };
        ctx.ctf.type_size(elem)? as i64
    } else {
        1
    };

    let scratch = ctx.regs.alloc()?;
    imm::set_imm(&mut ctx.insns, scratch, step);

    let is_post = matches!(op, IncDecOp::PostInc | IncDecOp::PostDec);
    let saved = if is_post {
        let s = ctx.regs.alloc()?;
        ctx.insns.append(Op::Alu {
            op: AluOp::Mov,
            dst: s,
            src: child_reg,
        });
        Some(s)
    } else {
        None
    };

    let alu = match op {
        IncDecOp::PreInc | IncDecOp::PostInc => AluOp::Add,
        IncDecOp::PreDec | IncDecOp::PostDec => AluOp::Sub,
    };
    ctx.insns.append(Op::Alu {
        op: alu,
        dst: child_reg,
        src: scratch,
    });
    ctx.regs.free(scratch);

    store_to_lvalue(ctx, target, child_reg)?;

    match saved {
        Some(s) => {
            ctx.regs.free(child_reg);
            Ok(s)
        }
        None => Ok(child_reg),
    }
}

// ---------------------------------------------------------------------
// Identifier / symbol leaves
// ---------------------------------------------------------------------

fn scope_get_scalar(scope: Scope) -> Result<HelperSig, CgError> {
    match scope {
        Scope::Global => Ok(helpers::GET_GLOBAL),
        Scope::Thread => Ok(helpers::GET_THREAD),
        Scope::Local => Ok(helpers::GET_LOCAL),
    }
}

fn scope_set_scalar(scope: Scope) -> Result<HelperSig, CgError> {
    match scope {
        Scope::Global => Ok(helpers::SET_GLOBAL),
        Scope::Thread => Ok(helpers::SET_THREAD),
        Scope::Local => Ok(helpers::SET_LOCAL),
    }
}

fn scope_get_assoc(scope: Scope) -> Result<HelperSig, CgError> {
    match scope {
        Scope::Global => Ok(helpers::GET_GLOBAL_ASSOC),
        Scope::Thread => Ok(helpers::GET_THREAD_ASSOC),
        Scope::Local => Err(CgError::Unknown("associative arrays cannot be function-local")),
    }
}

fn scope_set_assoc(scope: Scope) -> Result<HelperSig, CgError> {
    match scope {
        Scope::Global => Ok(helpers::SET_GLOBAL_ASSOC),
        Scope::Thread => Ok(helpers::SET_THREAD_ASSOC),
        Scope::Local => Err(CgError::Unknown("associative arrays cannot be function-local")),
    }
}

fn scope_get_array(scope: Scope) -> Result<HelperSig, CgError> {
    match scope {
        Scope::Global => Ok(helpers::GET_GLOBAL_ARRAY),
        Scope::Thread => Ok(helpers::GET_THREAD_ARRAY),
        Scope::Local => Err(CgError::Unknown("built-in arrays cannot be function-local")),
    }
}

fn emit_symbol(ctx: &mut CompileContext, id: IdentId, meta: NodeMeta, mode: Mode) -> Result<Reg, CgError> {
    let reg = ctx.regs.alloc()?;
    // The immediate is a placeholder; the downstream linker relocates it
    // using the attached back-pointer (spec.md §4.4, §3).
    imm::set_imm_labelled(&mut ctx.insns, reg, 0, None, Some(id));
    if mode != Mode::Ref {
        loadstore::emit_load(ctx, meta, reg, 0, reg)?;
    }
    Ok(reg)
}

fn emit_ident(ctx: &mut CompileContext, id: IdentId, meta: NodeMeta, mode: Mode) -> Result<Reg, CgError> {
    let desc = ctx.idents.resolve(id)?;
    ctx.idents.mark_read(id);

    if let Some(r) = ctx.idents.cgreg(id) {
        let dst = ctx.regs.alloc()?;
        ctx.insns.append(Op::Alu {
            op: AluOp::Mov,
            dst,
            src: r,
        });
        return Ok(dst);
    }

    match desc.kind {
        IdentKind::Inline => emit_inline(ctx, id, &mut [], mode),
        IdentKind::ScalarVar | IdentKind::TranslatorOutput => {
            let sig = scope_get_scalar(desc.scope.scope())?;
            let r0 = call_helper(ctx, sig, &[ArgValue::Imm(id.0 as i64)])?;
            let dst = ctx.regs.alloc()?;
            ctx.insns.append(Op::Alu {
                op: AluOp::Mov,
                dst,
                src: r0,
            });
            Ok(dst)
        }
        IdentKind::Function => Err(CgError::CgExpr),
        IdentKind::ArrayVar { .. } | IdentKind::Args => {
            Err(CgError::Unknown("array-kinded identifier referenced without a subscript"))
        }
        IdentKind::Symbol => emit_symbol(ctx, id, meta, mode),
    }
}

fn emit_inline(ctx: &mut CompileContext, inline_id: IdentId, args: &mut [ExprNode], mode: Mode) -> Result<Reg, CgError> {
    let record = ctx
        .idents
        .inline(inline_id)
        .cloned()
        .ok_or(CgError::Unknown("dangling inline identifier"))?;
    if record.formals.len() != args.len() {
        return Err(CgError::Unknown("inline invoked with the wrong number of arguments"));
    }

    if record.is_array {
        // Array-substitution inline (spec.md §4.8 "Inline variable"): bind
        // each actual-argument subtree into the corresponding formal's root
        // slot directly rather than through a register. An array-style
        // inline's formals commonly sit where a key or lvalue subtree is
        // expected, not a scalar value, so splicing the actual expression
        // tree in place is the substitution the formal stands for.
        let mut root = record.root.clone();
        for (formal, actual) in record.formals.iter().zip(args.iter()) {
            splice_formal(&mut root, *formal, actual);
        }
        let result = emit(ctx, &mut root, mode)?;
        types::typecast(ctx, root.ctf, record.declared_ctf, result)?;
        return Ok(result);
    }

    // Scalar inline: each formal's actual is evaluated once into a register
    // and published via `cgreg`, restoring whatever the formal's cgreg held
    // before (not just clearing it) so a formal id reused by an outer,
    // still-in-progress inline expansion keeps its own binding.
    let mut saved = Vec::with_capacity(record.formals.len());
    for (formal, actual) in record.formals.iter().zip(args.iter_mut()) {
        let r = emit(ctx, actual, Mode::Value)?;
        saved.push((*formal, ctx.idents.cgreg(*formal)));
        ctx.idents.set_cgreg(*formal, Some(r));
    }

    let mut root = record.root.clone();
    let result = emit(ctx, &mut root, mode);

    for (formal, prior) in &saved {
        if let Some(r) = ctx.idents.cgreg(*formal) {
            ctx.regs.free(r);
        }
        ctx.idents.set_cgreg(*formal, *prior);
    }

    let result = result?;
    types::typecast(ctx, root.ctf, record.declared_ctf, result)?;
    Ok(result)
}

/// Replace every leaf reference to `formal` within `node` with a clone of
/// `actual`, recursing through every variant that carries child nodes.
fn splice_formal(node: &mut ExprNode, formal: IdentId, actual: &ExprNode) {
    if let ExprKind::Ident(id) = &node.kind {
        if *id == formal {
            *node = actual.clone();
            return;
        }
    }
    match &mut node.kind {
        ExprKind::Binary { lhs, rhs, .. }
        | ExprKind::BinaryAssign { lhs, rhs, .. }
        | ExprKind::Compare { lhs, rhs, .. }
        | ExprKind::Logic { lhs, rhs, .. }
        | ExprKind::Assign { lhs, rhs }
        | ExprKind::Comma { lhs, rhs } => {
            splice_formal(lhs, formal, actual);
            splice_formal(rhs, formal, actual);
        }
        ExprKind::Not(inner) | ExprKind::Deref(inner) | ExprKind::AddrOf(inner) | ExprKind::Cast(inner) => {
            splice_formal(inner, formal, actual);
        }
        ExprKind::Ternary {
            cond,
            then_branch,
            else_branch,
        } => {
            splice_formal(cond, formal, actual);
            splice_formal(then_branch, formal, actual);
            splice_formal(else_branch, formal, actual);
        }
        ExprKind::IncDec { target, .. } => splice_formal(target, formal, actual),
        ExprKind::Member { base, .. } => splice_formal(base, formal, actual),
        ExprKind::ArrayRead { keys, .. } => {
            for k in keys {
                splice_formal(k, formal, actual);
            }
        }
        ExprKind::Call { args, .. } | ExprKind::InlineUse { args, .. } => {
            for a in args {
                splice_formal(a, formal, actual);
            }
        }
        ExprKind::TranslatorBody { src, .. } => splice_formal(src, formal, actual),
        ExprKind::IntLit(_) | ExprKind::StrLit(_) | ExprKind::Ident(_) | ExprKind::Symbol(_) => {}
    }
}

// ---------------------------------------------------------------------
// Member access / dereference
// ---------------------------------------------------------------------

fn emit_member(
    ctx: &mut CompileContext,
    base: &mut ExprNode,
    name: &str,
    meta: NodeMeta,
    mode: Mode,
) -> Result<Reg, CgError> {
    if let ExprKind::TranslatorBody { translator, src } = &mut base.kind {
        // `xlate(<src>).member`: the translator output isn't a real memory
        // object, so `.member` substitutes the translator's per-member
        // expression directly rather than materializing the whole struct
        // (spec.md §4.8 "Pointer-to-member and dot", "if the left is a
        // translator output").
        let translator_id = *translator;
        let record = ctx
            .idents
            .translator(translator_id)
            .cloned()
            .ok_or(CgError::Unknown("dangling translator identifier"))?;
        let input_reg = emit(ctx, src, Mode::Value)?;
        ctx.idents.set_cgreg(record.input_ident, Some(input_reg));

        let member = record
            .members
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| CgError::Ctf(format!("translator has no member named '{name}'")))?;
        let mut member_expr = member.expr.clone();
        let result = emit(ctx, &mut member_expr, mode);

        ctx.regs.free(input_reg);
        ctx.idents.set_cgreg(record.input_ident, None);

        let result = result?;
        types::typecast(ctx, member_expr.ctf, member.member_ctf, result)?;
        return Ok(result);
    }

    let base_reg = emit(ctx, base, Mode::Value)?;
    let (_resolved, member) = types::membinfo(ctx, NodeMeta::of(base).ctf, name)?;
    if member.byte_offset != 0 {
        ctx.insns.append(Op::AluImm {
            op: AluOp::Add,
            dst: base_reg,
            imm: member.byte_offset as i64,
        });
    }
    if mode != Mode::Ref {
        loadstore::emit_load(ctx, meta, base_reg, 0, base_reg)?;
    }
    Ok(base_reg)
}

// ---------------------------------------------------------------------
// Arrays: args[], builtin arrays, associative arrays
// ---------------------------------------------------------------------

fn emit_array_read(
    ctx: &mut CompileContext,
    array: IdentId,
    keys: &mut [ExprNode],
    meta: NodeMeta,
) -> Result<Reg, CgError> {
    let desc = ctx.idents.resolve(array)?;
    ctx.idents.mark_read(array);

    match desc.kind {
        IdentKind::Args => {
            if keys.len() != 1 {
                return Err(CgError::Unknown("args[] subscript takes exactly one index"));
            }
            let restore = if let ExprKind::IntLit(v) = &mut keys[0].kind {
                let orig = *v;
                *v = ctx.probe.translate_index(orig as u32) as i64;
                Some(orig)
            } else {
                None
            };
            let index_reg = emit(ctx, &mut keys[0], Mode::Value)?;
            if let Some(orig) = restore {
                if let ExprKind::IntLit(v) = &mut keys[0].kind {
                    *v = orig;
                }
            }

            let sig = scope_get_array(desc.scope.scope())?;
            let r0 = call_helper(ctx, sig, &[ArgValue::Imm(array.0 as i64), ArgValue::Reg(index_reg)])?;
            ctx.regs.free(index_reg);
            let dst = ctx.regs.alloc()?;
            ctx.insns.append(Op::Alu {
                op: AluOp::Mov,
                dst,
                src: r0,
            });

            let size = ctx.ctf.type_size(meta.ctf)?;
            if size < 8 {
                let shift = (64 - size * 8) as i64;
                ctx.insns.append(Op::AluImm {
                    op: AluOp::Lsh,
                    dst,
                    imm: shift,
                });
                let op = if meta.is_signed() { AluOp::Arsh } else { AluOp::Rsh };
                ctx.insns.append(Op::AluImm { op, dst, imm: shift });
            }
            Ok(dst)
        }

        IdentKind::ArrayVar { associative: false } => {
            if keys.len() != 1 {
                return Err(CgError::Unknown("built-in array subscript takes exactly one index"));
            }
            let index_reg = emit(ctx, &mut keys[0], Mode::Value)?;
            let sig = scope_get_array(desc.scope.scope())?;
            let r0 = call_helper(ctx, sig, &[ArgValue::Imm(array.0 as i64), ArgValue::Reg(index_reg)])?;
            ctx.regs.free(index_reg);
            let dst = ctx.regs.alloc()?;
            ctx.insns.append(Op::Alu {
                op: AluOp::Mov,
                dst,
                src: r0,
            });
            Ok(dst)
        }

        IdentKind::ArrayVar { associative: true } => {
            let argcount = emit_arglist(ctx, keys)?;
            let sig = scope_get_assoc(desc.scope.scope())?;
            let r0 = call_helper(
                ctx,
                sig,
                &[
                    ArgValue::Imm(array.0 as i64),
                    ArgValue::StackMarker,
                    ArgValue::Imm(argcount as i64),
                ],
            )?;
            let dst = ctx.regs.alloc()?;
            ctx.insns.append(Op::Alu {
                op: AluOp::Mov,
                dst,
                src: r0,
            });
            ctx.stack_depth -= argcount * 16;

            if types::is_by_ref(ctx, meta.ctf)? {
                let materialize_label = ctx.insns.fresh_label();
                let done_label = ctx.insns.fresh_label();
                ctx.insns.append(Op::JumpImm {
                    cond: JumpCond::Z,
                    a: dst,
                    imm: 0,
                    target: materialize_label,
                });
                ctx.insns.append(Op::Goto { target: done_label });
                ctx.insns.append_labelled(materialize_label, Op::Nop);

                let size = ctx.ctf.type_size(meta.ctf)?;
                let size_reg = ctx.regs.alloc()?;
                imm::set_imm(&mut ctx.insns, size_reg, size as i64);
                let scratch = call_helper(ctx, helpers::ALLOC_SCRATCH, &[ArgValue::Reg(size_reg)])?;
                ctx.regs.free(size_reg);
                ctx.insns.append(Op::Alu {
                    op: AluOp::Mov,
                    dst,
                    src: scratch,
                });

                let argcount2 = emit_arglist(ctx, keys)?;
                let set_sig = scope_set_assoc(desc.scope.scope())?;
                call_helper(
                    ctx,
                    set_sig,
                    &[
                        ArgValue::Imm(array.0 as i64),
                        ArgValue::Reg(dst),
                        ArgValue::StackMarker,
                        ArgValue::Imm(argcount2 as i64),
                    ],
                )?;
                ctx.stack_depth -= argcount2 * 16;

                let argcount3 = emit_arglist(ctx, keys)?;
                let r0b = call_helper(
                    ctx,
                    sig,
                    &[
                        ArgValue::Imm(array.0 as i64),
                        ArgValue::StackMarker,
                        ArgValue::Imm(argcount3 as i64),
                    ],
                )?;
                ctx.insns.append(Op::Alu {
                    op: AluOp::Mov,
                    dst,
                    src: r0b,
                });
                ctx.stack_depth -= argcount3 * 16;

                ctx.insns.append_labelled(done_label, Op::Nop);
            }
            Ok(dst)
        }

        _ => Err(CgError::Unknown("identifier is not subscriptable")),
    }
}

/// Argument-list emission (spec.md §4.8 "Argument list emission"): every
/// argument is evaluated first, then a vector of `(value, size)` 8-byte
/// pairs is laid out on the stack. Returns the argument count; the caller
/// restores `stack_depth` after the consuming helper call returns.
fn emit_arglist(ctx: &mut CompileContext, args: &mut [ExprNode]) -> Result<u32, CgError> {
    let argcount = args.len() as u32;

    let mut evaluated: Vec<(Reg, NodeMeta, bool)> = Vec::with_capacity(args.len());
    for a in args.iter_mut() {
        let by_ref = types::is_by_ref(ctx, a.ctf)?;
        let mode = if by_ref { Mode::Ref } else { Mode::Value };
        let r = emit(ctx, a, mode)?;
        evaluated.push((r, NodeMeta::of(a), by_ref));
    }

    let base_depth = ctx.stack_depth + argcount * 16;
    ctx.stack_depth = base_depth;

    for (i, (r, meta, by_ref)) in evaluated.into_iter().enumerate() {
        let value_off = -(base_depth as i32) + (i as i32) * 16;
        ctx.insns.append(Op::Store {
            width: Width::B8,
            space: AddrSpace::Kernel,
            dst: Reg::R10_FP,
            off: value_off as i16,
            src: r,
        });

        let size_reg = if by_ref {
            if types::is_string_type(ctx, meta.ctf) {
                let cap = ctx.ctf.type_size(meta.ctf)?;
                let r0 = call_helper(ctx, helpers::STRLEN, &[ArgValue::Reg(r), ArgValue::Imm(cap as i64)])?;
                let scratch = ctx.regs.alloc()?;
                ctx.insns.append(Op::Alu {
                    op: AluOp::Mov,
                    dst: scratch,
                    src: r0,
                });
                scratch
            } else {
                let sz = ctx.ctf.type_size(meta.ctf)? as i64;
                let scratch = ctx.regs.alloc()?;
                imm::set_imm(&mut ctx.insns, scratch, sz);
                scratch
            }
        } else {
            let scratch = ctx.regs.alloc()?;
            imm::set_imm(&mut ctx.insns, scratch, 0);
            scratch
        };

        ctx.insns.append(Op::Store {
            width: Width::B8,
            space: AddrSpace::Kernel,
            dst: Reg::R10_FP,
            off: (value_off + 8) as i16,
            src: size_reg,
        });
        ctx.regs.free(size_reg);
        ctx.regs.free(r);
    }

    Ok(argcount)
}

/// Stores `value` to the location denoted by `lhs` (spec.md §4.8
/// "Assignment"): the variable-store helper for an identifier, the
/// associative-store helper for an array element, or a plain memory store
/// (re-emitting `lhs` in `Ref` mode) for everything else.
fn store_to_lvalue(ctx: &mut CompileContext, lhs: &mut ExprNode, value: Reg) -> Result<(), CgError> {
    match &mut lhs.kind {
        ExprKind::Ident(id) => {
            let id = *id;
            let desc = ctx.idents.resolve(id)?;
            ctx.idents.mark_write(id);
            match desc.kind {
                IdentKind::ScalarVar | IdentKind::TranslatorOutput => {
                    let sig = scope_set_scalar(desc.scope.scope())?;
                    call_helper(ctx, sig, &[ArgValue::Imm(id.0 as i64), ArgValue::Reg(value)])?;
                    Ok(())
                }
                _ => Err(CgError::Unknown("identifier is not a scalar storage location")),
            }
        }
        ExprKind::ArrayRead { array, keys } => {
            let array = *array;
            let desc = ctx.idents.resolve(array)?;
            ctx.idents.mark_write(array);
            match desc.kind {
                IdentKind::ArrayVar { associative: true } => {
                    let argcount = emit_arglist(ctx, keys)?;
                    let sig = scope_set_assoc(desc.scope.scope())?;
                    call_helper(
                        ctx,
                        sig,
                        &[
                            ArgValue::Imm(array.0 as i64),
                            ArgValue::Reg(value),
                            ArgValue::StackMarker,
                            ArgValue::Imm(argcount as i64),
                        ],
                    )?;
                    ctx.stack_depth -= argcount * 16;
                    Ok(())
                }
                // `args[]` and other built-in arrays have no SET_* helper:
                // they are read-only by construction.
                _ => Err(CgError::Unknown("this array is read-only")),
            }
        }
        _ => {
            let addr = emit(ctx, lhs, Mode::Ref)?;
            let meta = NodeMeta::of(lhs);
            if meta.bitfield.is_some() {
                let merged = loadstore::emit_bitfield_insert(ctx, meta, addr, value)?;
                loadstore::emit_store(ctx, meta, addr, 0, merged)?;
                ctx.regs.free(merged);
            } else {
                loadstore::emit_store(ctx, meta, addr, 0, value)?;
            }
            ctx.regs.free(addr);
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------
// Translators
// ---------------------------------------------------------------------

/// Emits a translator-body node: the per-member expressions populate a
/// scratch buffer of the destination CTF type's size, and the node's
/// result is the scratch buffer's address (spec.md §4.8 "Assignment", "If
/// the RHS is of a translator-output type").
fn emit_translator_body(ctx: &mut CompileContext, translator_id: IdentId, src: &mut ExprNode) -> Result<Reg, CgError> {
    let record = ctx
        .idents
        .translator(translator_id)
        .cloned()
        .ok_or(CgError::Unknown("dangling translator identifier"))?;

    let (input_reg, self_allocated) = match ctx.idents.cgreg(record.input_ident) {
        Some(r) => (r, false),
        None => {
            let r = ctx.regs.alloc()?;
            ctx.idents.set_cgreg(record.input_ident, Some(r));
            (r, true)
        }
    };

    let src_reg = emit(ctx, src, Mode::Value)?;
    if src_reg != input_reg {
        ctx.insns.append(Op::Alu {
            op: AluOp::Mov,
            dst: input_reg,
            src: src_reg,
        });
        ctx.regs.free(src_reg);
    }

    let dst_size = ctx.ctf.type_size(record.dst_ctf)?;
    let size_reg = ctx.regs.alloc()?;
    imm::set_imm(&mut ctx.insns, size_reg, dst_size as i64);
    let scratch = call_helper(ctx, helpers::ALLOC_SCRATCH, &[ArgValue::Reg(size_reg)])?;
    ctx.regs.free(size_reg);
    let base = ctx.regs.alloc()?;
    ctx.insns.append(Op::Alu {
        op: AluOp::Mov,
        dst: base,
        src: scratch,
    });

    let mut members = record.members.clone();
    for member in members.iter_mut() {
        let val_reg = emit(ctx, &mut member.expr, Mode::Value)?;
        let member_src_ctf = member.expr.ctf;
        types::typecast(ctx, member_src_ctf, member.member_ctf, val_reg)?;

        let minfo = ctx.ctf.member_info(record.dst_ctf, &member.name)?;
        let addr = if minfo.byte_offset != 0 {
            let a = ctx.regs.alloc()?;
            ctx.insns.append(Op::Alu {
                op: AluOp::Mov,
                dst: a,
                src: base,
            });
            ctx.insns.append(Op::AluImm {
                op: AluOp::Add,
                dst: a,
                imm: minfo.byte_offset as i64,
            });
            a
        } else {
            base
        };

        let bitfield = minfo.bit_width.map(|bw| BitField {
            bit_offset: minfo.bit_offset,
            bit_width: bw,
        });
        let member_meta = NodeMeta {
            ctf: member.member_ctf,
            flags: NodeFlags::empty(),
            bitfield,
            endian: Endian::Little,
        };

        if bitfield.is_some() {
            let merged = loadstore::emit_bitfield_insert(ctx, member_meta, addr, val_reg)?;
            loadstore::emit_store(ctx, member_meta, addr, 0, merged)?;
            ctx.regs.free(merged);
        } else {
            loadstore::emit_store(ctx, member_meta, addr, 0, val_reg)?;
        }

        if addr != base {
            ctx.regs.free(addr);
        }
        ctx.regs.free(val_reg);
    }

    if self_allocated {
        ctx.regs.free(input_reg);
        ctx.idents.set_cgreg(record.input_ident, None);
    }

    Ok(base)
}
