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

//! A small CLI that drives `probecg::compile` over the hand-built ASTs
//! from `spec.md` §8's concrete end-to-end scenarios and dumps the
//! resulting instruction list as JSON. There is no real front end behind
//! this crate (parsing, type-checking and CTF resolution are out of
//! scope, per `SPEC_FULL.md` §1), so `--scenario` selects one of a fixed
//! set of demo clauses built directly against the `ast`/`ctf`/`ident`
//! contracts instead of reading a source file.

use anyhow::Result;
use clap::{Parser as ClapParser, ValueEnum};
use std::fs;
use std::path::PathBuf;

use probecg::ast::{BinOp, CmpOp, ExprKind, ExprNode, NodeFlags};
use probecg::cg::{CgConfig, ProbeDescriptor};
use probecg::ctf::{CtfFile, InMemoryCtf, MemberInfo};
use probecg::ident::{IdentDescriptor, IdentId, IdentKind, InMemoryIdentTable, ScopeFlags};

#[derive(ClapParser)]
#[clap(version = "0.1.0", author = "Connor Nolan")]
struct Opts {
    #[clap(short, long, value_enum)]
    scenario: Scenario,
    #[clap(short, long)]
    output: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy)]
enum Scenario {
    /// spec.md §8.1: integer literal `7`.
    Literal,
    /// spec.md §8.2: `a + b`, both 64-bit globals.
    Add,
    /// spec.md §8.3: `p->x`, `x` at byte offset 8, 4 bytes, unsigned.
    Member,
    /// spec.md §8.4: `s = "hi"`, `s` a thread-local string variable.
    AssignString,
    /// spec.md §8.5: `x < y` for signed integers.
    CompareLt,
    /// spec.md §8.6: `a[i]`, `a` an associative global array with one key.
    AssocRead,
}

fn build(scenario: Scenario) -> (ExprNode, InMemoryIdentTable, InMemoryCtf, ProbeDescriptor) {
    let mut ctf = InMemoryCtf::new(CtfFile(1));
    let mut idents = InMemoryIdentTable::new();
    let probe = ProbeDescriptor::default();

    let root = match scenario {
        Scenario::Literal => ExprNode::new(ExprKind::IntLit(7), probecg::ctf::CtfRef::NONE),

        Scenario::Add => {
            let int64 = ctf.add_integer("int64_t", 8, true);
            idents.declare(IdentDescriptor {
                id: IdentId(1),
                kind: IdentKind::ScalarVar,
                scope: ScopeFlags::empty(),
                ctf: int64,
                name: "a".into(),
            });
            idents.declare(IdentDescriptor {
                id: IdentId(2),
                kind: IdentKind::ScalarVar,
                scope: ScopeFlags::empty(),
                ctf: int64,
                name: "b".into(),
            });
            let lhs = ExprNode::new(ExprKind::Ident(IdentId(1)), int64).with_flags(NodeFlags::SIGNED);
            let rhs = ExprNode::new(ExprKind::Ident(IdentId(2)), int64).with_flags(NodeFlags::SIGNED);
            ExprNode::new(
                ExprKind::Binary {
                    op: BinOp::Add,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                int64,
            )
            .with_flags(NodeFlags::SIGNED)
        }

        Scenario::Member => {
            let u32_ty = ctf.add_integer("uint32_t", 4, false);
            let foo = ctf.add_struct(
                "foo",
                16,
                vec![MemberInfo {
                    name: "x".into(),
                    ty: u32_ty,
                    byte_offset: 8,
                    bit_offset: 0,
                    bit_width: None,
                }],
            );
            let foo_ptr = ctf.add_pointer("foo_ptr", foo);
            idents.declare(IdentDescriptor {
                id: IdentId(1),
                kind: IdentKind::ScalarVar,
                scope: ScopeFlags::empty(),
                ctf: foo_ptr,
                name: "p".into(),
            });
            let base = ExprNode::new(ExprKind::Ident(IdentId(1)), foo_ptr);
            ExprNode::new(
                ExprKind::Member {
                    base: Box::new(base),
                    name: "x".into(),
                    arrow: true,
                },
                u32_ty,
            )
        }

        Scenario::AssignString => {
            let string_ty = ctf.add_struct("string", 64, vec![]);
            idents.declare(IdentDescriptor {
                id: IdentId(1),
                kind: IdentKind::ScalarVar,
                scope: ScopeFlags::TLS,
                ctf: string_ty,
                name: "s".into(),
            });
            let lhs = ExprNode::new(ExprKind::Ident(IdentId(1)), string_ty);
            let rhs = ExprNode::new(ExprKind::StrLit("hi".into()), string_ty);
            ExprNode::new(
                ExprKind::Assign {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                string_ty,
            )
        }

        Scenario::CompareLt => {
            let int64 = ctf.add_integer("int64_t", 8, true);
            idents.declare(IdentDescriptor {
                id: IdentId(1),
                kind: IdentKind::ScalarVar,
                scope: ScopeFlags::empty(),
                ctf: int64,
                name: "x".into(),
            });
            idents.declare(IdentDescriptor {
                id: IdentId(2),
                kind: IdentKind::ScalarVar,
                scope: ScopeFlags::empty(),
                ctf: int64,
                name: "y".into(),
            });
            let lhs = ExprNode::new(ExprKind::Ident(IdentId(1)), int64).with_flags(NodeFlags::SIGNED);
            let rhs = ExprNode::new(ExprKind::Ident(IdentId(2)), int64).with_flags(NodeFlags::SIGNED);
            ExprNode::new(
                ExprKind::Compare {
                    op: CmpOp::Lt,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                int64,
            )
        }

        Scenario::AssocRead => {
            let int64 = ctf.add_integer("int64_t", 8, true);
            idents.declare(IdentDescriptor {
                id: IdentId(1),
                kind: IdentKind::ArrayVar { associative: true },
                scope: ScopeFlags::empty(),
                ctf: int64,
                name: "a".into(),
            });
            idents.declare(IdentDescriptor {
                id: IdentId(2),
                kind: IdentKind::ScalarVar,
                scope: ScopeFlags::empty(),
                ctf: int64,
                name: "i".into(),
            });
            let key = ExprNode::new(ExprKind::Ident(IdentId(2)), int64).with_flags(NodeFlags::SIGNED);
            ExprNode::new(
                ExprKind::ArrayRead {
                    array: IdentId(1),
                    keys: vec![key],
                },
                int64,
            )
            .with_flags(NodeFlags::SIGNED)
        }
    };

    (root, idents, ctf, probe)
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    let (mut root, mut idents, ctf, probe) = build(opts.scenario);

    let insns = probecg::compile(CgConfig::default(), probe, &mut idents, &ctf, &mut root)
        .map_err(|e| anyhow::anyhow!("code generation failed: {e}"))?;

    let json = serde_json::to_string_pretty(&insns)?;
    match opts.output {
        Some(path) => {
            fs::write(&path, &json)?;
            println!("Wrote {} instructions to {}", insns.len(), path.display());
        }
        None => println!("{json}"),
    }

    Ok(())
}
