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

//! Helper-call emitter (spec.md §4.5, component C5): encodes the target
//! ABI around every helper call — spill caller-saved registers, marshal
//! arguments per the helper's prototype string, emit `CALL`, unspill.

use crate::cg::CompileContext;
use crate::errors::CgError;
use crate::isa::{AddrSpace, AluOp, HelperSig, Op, Reg, Width};

/// One argument to a helper call, tagged the same way as the prototype
/// character it must match (spec.md §4.5: `r`, `i`, `d`).
#[derive(Debug, Clone, Copy)]
pub enum ArgValue {
    /// Pass a register's value: a register-to-register move into the next
    /// arg register.
    Reg(Reg),
    /// Pass an immediate: materialized into the next arg register.
    Imm(i64),
    /// Stack-depth marker: `FP - stack_depth`, computed once into `R0` and
    /// then relayed into position.
    StackMarker,
}

/// Emits a full helper call per the protocol in spec.md §4.5 and returns
/// `R0`, the result register. The caller must move it elsewhere before
/// emitting anything else that might call another helper.
pub fn call_helper(
    ctx: &mut CompileContext,
    sig: HelperSig,
    args: &[ArgValue],
) -> Result<Reg, CgError> {
    // 1. Assert R0 is free.
    if ctx.regs.is_allocated(Reg::R0) {
        return Err(CgError::ReservedReg);
    }

    // 2. Validate the prototype length against the supplied argument count.
    if sig.proto.len() != args.len() {
        return Err(CgError::InvalidHelper {
            helper: sig.id,
            expected: sig.proto.len(),
            got: args.len(),
        });
    }
    if sig.id < crate::isa::helpers::FIRST_HELPER {
        return Err(CgError::InvalidHelper {
            helper: sig.id,
            expected: sig.proto.len(),
            got: args.len(),
        });
    }

    // 3. If any `d` appears, compute FP - stack_depth once into R0.
    if sig.proto.contains('d') {
        ctx.insns.append(Op::Alu {
            op: AluOp::Mov,
            dst: Reg::R0,
            src: Reg::R10_FP,
        });
        ctx.insns.append(Op::AluImm {
            op: AluOp::Sub,
            dst: Reg::R0,
            imm: ctx.stack_depth as i64,
        });
    }

    // 4. Spill every currently allocated register in [1, CALLER_SAVED_BOUND).
    let to_spill = ctx
        .regs
        .iter_allocated(1, ctx.config.caller_saved_bound);
    let mut spills: Vec<(Reg, u32)> = Vec::with_capacity(to_spill.len());
    for r in to_spill {
        ctx.stack_depth += 8;
        let off = ctx.stack_depth;
        ctx.insns.append(Op::Store {
            width: Width::B8,
            space: AddrSpace::Kernel,
            dst: Reg::R10_FP,
            off: -(off as i16),
            src: r,
        });
        spills.push((r, off));
    }

    // 5. Marshal each argument into the next successive arg register.
    for (i, kind) in sig.proto.chars().enumerate() {
        let target = Reg(ctx.config.first_arg_reg + i as u8);
        match (kind, args[i]) {
            ('r', ArgValue::Reg(src)) => {
                if src != target {
                    ctx.insns.append(Op::Alu {
                        op: AluOp::Mov,
                        dst: target,
                        src,
                    });
                }
            }
            ('i', ArgValue::Imm(v)) => {
                crate::cg::imm::set_imm(&mut ctx.insns, target, v);
            }
            ('d', ArgValue::StackMarker) => {
                if target != Reg::R0 {
                    ctx.insns.append(Op::Alu {
                        op: AluOp::Mov,
                        dst: target,
                        src: Reg::R0,
                    });
                }
            }
            _ => return Err(CgError::Unknown("helper argument kind mismatches its prototype")),
        }
    }

    // 6. Emit the call.
    ctx.insns.append(Op::Call { helper: sig.id });

    // 7. Unspill in reverse (LIFO) order, shrinking stack_depth back down.
    for (r, off) in spills.iter().rev() {
        ctx.insns.append(Op::Load {
            width: Width::B8,
            signed: false,
            space: AddrSpace::Kernel,
            dst: *r,
            src: Reg::R10_FP,
            off: -(*off as i16),
        });
    }
    ctx.stack_depth -= 8 * spills.len() as u32;

    // 8. R0 carries the result; it is live only until the next call.
    Ok(Reg::R0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cg::{CgConfig, CompileContext, ProbeDescriptor};
    use crate::ctf::{CtfFile, InMemoryCtf};
    use crate::ident::InMemoryIdentTable;
    use crate::isa::helpers;

    #[test]
    fn r0_busy_at_call_site_is_reserved_reg() {
        let ctf = InMemoryCtf::new(CtfFile(1));
        let mut idents = InMemoryIdentTable::new();
        let mut ctx = CompileContext::new(CgConfig::default(), ProbeDescriptor::default(), &mut idents, &ctf);

        while ctx.regs.alloc().unwrap() != Reg::R0 {}
        let err = call_helper(&mut ctx, helpers::GET_GLOBAL, &[ArgValue::Imm(0)]).unwrap_err();
        assert_eq!(err, CgError::ReservedReg);
    }

    #[test]
    fn prototype_length_mismatch_is_invalid_helper() {
        let ctf = InMemoryCtf::new(CtfFile(1));
        let mut idents = InMemoryIdentTable::new();
        let mut ctx = CompileContext::new(CgConfig::default(), ProbeDescriptor::default(), &mut idents, &ctf);

        let err = call_helper(&mut ctx, helpers::GET_GLOBAL, &[]).unwrap_err();
        assert_eq!(
            err,
            CgError::InvalidHelper {
                helper: helpers::GET_GLOBAL.id,
                expected: 1,
                got: 0,
            }
        );
    }

    /// Only the caller-saved registers live at the call site are spilled,
    /// and they come back in LIFO order with `stack_depth` restored
    /// (invariant 7).
    #[test]
    fn call_spills_only_live_caller_saved_registers_and_unspills_lifo() {
        let ctf = InMemoryCtf::new(CtfFile(1));
        let mut idents = InMemoryIdentTable::new();
        let mut ctx = CompileContext::new(CgConfig::default(), ProbeDescriptor::default(), &mut idents, &ctf);

        // Allocates R9, R8, R7, R6, R5, R4 in that order; only R5 and R4
        // fall inside [1, caller_saved_bound=6).
        for _ in 0..6 {
            ctx.regs.alloc().unwrap();
        }
        let stack_depth_before = ctx.stack_depth;

        call_helper(&mut ctx, helpers::GET_GLOBAL, &[ArgValue::Imm(7)]).unwrap();

        assert_eq!(ctx.stack_depth, stack_depth_before);
        let stores: Vec<Reg> = ctx
            .insns
            .nodes()
            .iter()
            .filter_map(|n| match n.op {
                Op::Store { src, .. } => Some(src),
                _ => None,
            })
            .collect();
        assert_eq!(stores, vec![Reg(4), Reg(5)]);
        let loads: Vec<Reg> = ctx
            .insns
            .nodes()
            .iter()
            .filter_map(|n| match n.op {
                Op::Load { dst, src, .. } if src == Reg::R10_FP => Some(dst),
                _ => None,
            })
            .collect();
        assert_eq!(loads, vec![Reg(5), Reg(4)]);
    }
}
