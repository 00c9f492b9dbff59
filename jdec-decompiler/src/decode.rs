//! Decode raw code bytes into the symbolic instruction model.
//!
//! Constant-pool indices are resolved eagerly through [`ConstPool`], so the
//! rest of the pipeline never sees a pool index. Branch targets stay as
//! absolute byte offsets; the CFG builder validates their alignment.

use jdec_classfile::{ConstPool, ConstValue, JvmType};
use jdec_opcode::op;

use jdec_ir::insn::{
    ArithOp, ArrayKind, BranchCond, CmpKind, ConstOp, Insn, Instruction, InvokeKind, PrimType,
    SlotType, StackOp,
};

use crate::diag::Fault;

pub fn decode_method(code: &[u8], pool: &dyn ConstPool) -> Result<Vec<Instruction>, Fault> {
    let mut out = Vec::new();
    let mut pc = 0usize;
    while pc < code.len() {
        let size = jdec_opcode::insn_len(code, pc)?;
        let insn = decode_one(code, pc, pool)?;
        out.push(Instruction {
            offset: pc as u32,
            size: size as u32,
            insn,
        });
        pc += size;
    }
    Ok(out)
}

fn bad(pc: usize, what: &str) -> Fault {
    Fault::MalformedBytecode(format!("{what} at pc {pc:#x}"))
}

fn u8_at(code: &[u8], at: usize) -> Result<u8, Fault> {
    code.get(at).copied().ok_or_else(|| bad(at, "truncated operand"))
}

fn u16_at(code: &[u8], at: usize) -> Result<u16, Fault> {
    Ok(u16::from_be_bytes([u8_at(code, at)?, u8_at(code, at + 1)?]))
}

fn i16_at(code: &[u8], at: usize) -> Result<i16, Fault> {
    Ok(u16_at(code, at)? as i16)
}

fn i32_at(code: &[u8], at: usize) -> Result<i32, Fault> {
    Ok(i32::from_be_bytes([
        u8_at(code, at)?,
        u8_at(code, at + 1)?,
        u8_at(code, at + 2)?,
        u8_at(code, at + 3)?,
    ]))
}

fn target(pc: usize, displacement: i64) -> Result<u32, Fault> {
    let t = pc as i64 + displacement;
    u32::try_from(t).map_err(|_| bad(pc, "branch target before code start"))
}

fn pool_const(pool: &dyn ConstPool, idx: u16, pc: usize) -> Result<ConstOp, Fault> {
    let v = pool
        .const_value(idx)
        .ok_or_else(|| bad(pc, "unresolvable constant index"))?;
    Ok(ConstOp::Pool(v))
}

fn member(pool: &dyn ConstPool, idx: u16, pc: usize) -> Result<jdec_classfile::MemberRef, Fault> {
    pool.member_ref(idx)
        .ok_or_else(|| bad(pc, "unresolvable member index"))
}

fn class(pool: &dyn ConstPool, idx: u16, pc: usize) -> Result<String, Fault> {
    pool.class_name(idx)
        .ok_or_else(|| bad(pc, "unresolvable class index"))
}

/// Class-ref operands of checkcast/anewarray may be array descriptors
/// (`[[Ljava/lang/Cloneable;`) rather than plain class names.
fn class_as_type(name: &str) -> JvmType {
    if name.starts_with('[') {
        JvmType::parse(name).unwrap_or_else(|_| JvmType::reference(name))
    } else {
        JvmType::reference(name)
    }
}

fn decode_one(code: &[u8], pc: usize, pool: &dyn ConstPool) -> Result<Insn, Fault> {
    let opcode = code[pc];
    let insn = match opcode {
        op::NOP => Insn::Nop,
        op::ACONST_NULL => Insn::Const(ConstOp::Null),
        op::ICONST_M1..=op::ICONST_5 => {
            Insn::Const(ConstOp::Int(opcode as i32 - op::ICONST_0 as i32))
        }
        op::LCONST_0 | op::LCONST_1 => {
            Insn::Const(ConstOp::Long((opcode - op::LCONST_0) as i64))
        }
        op::FCONST_0..=op::FCONST_2 => {
            Insn::Const(ConstOp::Float((opcode - op::FCONST_0) as f32))
        }
        op::DCONST_0 | op::DCONST_1 => {
            Insn::Const(ConstOp::Double((opcode - op::DCONST_0) as f64))
        }
        op::BIPUSH => Insn::Const(ConstOp::Int(u8_at(code, pc + 1)? as i8 as i32)),
        op::SIPUSH => Insn::Const(ConstOp::Int(i16_at(code, pc + 1)? as i32)),
        op::LDC => Insn::Const(pool_const(pool, u8_at(code, pc + 1)? as u16, pc)?),
        op::LDC_W | op::LDC2_W => {
            let c = pool_const(pool, u16_at(code, pc + 1)?, pc)?;
            if opcode == op::LDC2_W
                && !matches!(
                    c,
                    ConstOp::Pool(ConstValue::Long(_) | ConstValue::Double(_))
                )
            {
                return Err(bad(pc, "ldc2_w of non-wide constant"));
            }
            Insn::Const(c)
        }

        op::ILOAD..=op::ALOAD => Insn::Load {
            slot: u8_at(code, pc + 1)? as u16,
            ty: slot_type(opcode - op::ILOAD),
        },
        op::ILOAD_0..=op::ALOAD_3 => {
            let v = opcode - op::ILOAD_0;
            Insn::Load {
                slot: (v % 4) as u16,
                ty: slot_type(v / 4),
            }
        }
        op::ISTORE..=op::ASTORE => Insn::Store {
            slot: u8_at(code, pc + 1)? as u16,
            ty: slot_type(opcode - op::ISTORE),
        },
        op::ISTORE_0..=op::ASTORE_3 => {
            let v = opcode - op::ISTORE_0;
            Insn::Store {
                slot: (v % 4) as u16,
                ty: slot_type(v / 4),
            }
        }

        op::IALOAD..=op::SALOAD => Insn::ArrayLoad {
            elem: array_kind(opcode - op::IALOAD),
        },
        op::IASTORE..=op::SASTORE => Insn::ArrayStore {
            elem: array_kind(opcode - op::IASTORE),
        },

        op::POP => Insn::Stack(StackOp::Pop),
        op::POP2 => Insn::Stack(StackOp::Pop2),
        op::DUP => Insn::Stack(StackOp::Dup),
        op::DUP_X1 => Insn::Stack(StackOp::DupX1),
        op::DUP_X2 => Insn::Stack(StackOp::DupX2),
        op::DUP2 => Insn::Stack(StackOp::Dup2),
        op::DUP2_X1 => Insn::Stack(StackOp::Dup2X1),
        op::DUP2_X2 => Insn::Stack(StackOp::Dup2X2),
        op::SWAP => Insn::Stack(StackOp::Swap),

        op::IADD..=op::DADD => arith(ArithOp::Add, opcode - op::IADD),
        op::ISUB..=op::DSUB => arith(ArithOp::Sub, opcode - op::ISUB),
        op::IMUL..=op::DMUL => arith(ArithOp::Mul, opcode - op::IMUL),
        op::IDIV..=op::DDIV => arith(ArithOp::Div, opcode - op::IDIV),
        op::IREM..=op::DREM => arith(ArithOp::Rem, opcode - op::IREM),
        op::INEG..=op::DNEG => Insn::Neg {
            ty: prim_type(opcode - op::INEG),
        },
        op::ISHL | op::LSHL => arith(ArithOp::Shl, opcode - op::ISHL),
        op::ISHR | op::LSHR => arith(ArithOp::Shr, opcode - op::ISHR),
        op::IUSHR | op::LUSHR => arith(ArithOp::Ushr, opcode - op::IUSHR),
        op::IAND | op::LAND => arith(ArithOp::And, opcode - op::IAND),
        op::IOR | op::LOR => arith(ArithOp::Or, opcode - op::IOR),
        op::IXOR | op::LXOR => arith(ArithOp::Xor, opcode - op::IXOR),

        op::IINC => Insn::Iinc {
            slot: u8_at(code, pc + 1)? as u16,
            delta: u8_at(code, pc + 2)? as i8 as i16,
        },

        op::I2L => convert(PrimType::Int, JvmType::Long),
        op::I2F => convert(PrimType::Int, JvmType::Float),
        op::I2D => convert(PrimType::Int, JvmType::Double),
        op::L2I => convert(PrimType::Long, JvmType::Int),
        op::L2F => convert(PrimType::Long, JvmType::Float),
        op::L2D => convert(PrimType::Long, JvmType::Double),
        op::F2I => convert(PrimType::Float, JvmType::Int),
        op::F2L => convert(PrimType::Float, JvmType::Long),
        op::F2D => convert(PrimType::Float, JvmType::Double),
        op::D2I => convert(PrimType::Double, JvmType::Int),
        op::D2L => convert(PrimType::Double, JvmType::Long),
        op::D2F => convert(PrimType::Double, JvmType::Float),
        op::I2B => convert(PrimType::Int, JvmType::Byte),
        op::I2C => convert(PrimType::Int, JvmType::Char),
        op::I2S => convert(PrimType::Int, JvmType::Short),

        op::LCMP => Insn::Cmp(CmpKind::Lcmp),
        op::FCMPL => Insn::Cmp(CmpKind::FloatL),
        op::FCMPG => Insn::Cmp(CmpKind::FloatG),
        op::DCMPL => Insn::Cmp(CmpKind::DoubleL),
        op::DCMPG => Insn::Cmp(CmpKind::DoubleG),

        op::IFEQ..=op::IF_ACMPNE | op::IFNULL | op::IFNONNULL => Insn::Branch {
            cond: branch_cond(opcode),
            target: target(pc, i16_at(code, pc + 1)? as i64)?,
        },
        op::GOTO => Insn::Goto {
            target: target(pc, i16_at(code, pc + 1)? as i64)?,
        },
        op::GOTO_W => Insn::Goto {
            target: target(pc, i32_at(code, pc + 1)? as i64)?,
        },
        op::JSR => Insn::Jsr {
            target: target(pc, i16_at(code, pc + 1)? as i64)?,
        },
        op::JSR_W => Insn::Jsr {
            target: target(pc, i32_at(code, pc + 1)? as i64)?,
        },
        op::RET => Insn::Ret {
            slot: u8_at(code, pc + 1)? as u16,
        },

        op::TABLESWITCH => {
            let base = pc + 1 + jdec_opcode::pad_after(pc);
            let default = target(pc, i32_at(code, base)? as i64)?;
            let lo = i32_at(code, base + 4)?;
            let hi = i32_at(code, base + 8)?;
            let mut cases = Vec::with_capacity((hi - lo + 1) as usize);
            for (i, key) in (lo..=hi).enumerate() {
                let off = i32_at(code, base + 12 + i * 4)?;
                cases.push((key, target(pc, off as i64)?));
            }
            Insn::Switch { default, cases }
        }
        op::LOOKUPSWITCH => {
            let base = pc + 1 + jdec_opcode::pad_after(pc);
            let default = target(pc, i32_at(code, base)? as i64)?;
            let npairs = i32_at(code, base + 4)? as usize;
            let mut cases = Vec::with_capacity(npairs);
            let mut prev_key: Option<i32> = None;
            for i in 0..npairs {
                let key = i32_at(code, base + 8 + i * 8)?;
                if prev_key.is_some_and(|p| p >= key) {
                    return Err(bad(pc, "lookupswitch keys not strictly ascending"));
                }
                prev_key = Some(key);
                let off = i32_at(code, base + 12 + i * 8)?;
                cases.push((key, target(pc, off as i64)?));
            }
            Insn::Switch { default, cases }
        }

        op::IRETURN..=op::ARETURN => Insn::Return {
            ty: Some(slot_type(opcode - op::IRETURN)),
        },
        op::RETURN => Insn::Return { ty: None },

        op::GETSTATIC | op::GETFIELD => Insn::GetField {
            member: member(pool, u16_at(code, pc + 1)?, pc)?,
            is_static: opcode == op::GETSTATIC,
        },
        op::PUTSTATIC | op::PUTFIELD => Insn::PutField {
            member: member(pool, u16_at(code, pc + 1)?, pc)?,
            is_static: opcode == op::PUTSTATIC,
        },
        op::INVOKEVIRTUAL..=op::INVOKEDYNAMIC => Insn::Invoke {
            kind: match opcode {
                op::INVOKEVIRTUAL => InvokeKind::Virtual,
                op::INVOKESPECIAL => InvokeKind::Special,
                op::INVOKESTATIC => InvokeKind::Static,
                op::INVOKEINTERFACE => InvokeKind::Interface,
                _ => InvokeKind::Dynamic,
            },
            member: member(pool, u16_at(code, pc + 1)?, pc)?,
        },

        op::NEW => Insn::New {
            class: class(pool, u16_at(code, pc + 1)?, pc)?,
        },
        op::NEWARRAY => Insn::NewArray {
            elem: newarray_elem(u8_at(code, pc + 1)?).ok_or_else(|| bad(pc, "bad atype"))?,
        },
        op::ANEWARRAY => Insn::NewArray {
            elem: class_as_type(&class(pool, u16_at(code, pc + 1)?, pc)?),
        },
        op::MULTIANEWARRAY => {
            let elem = class_as_type(&class(pool, u16_at(code, pc + 1)?, pc)?);
            let dims = u8_at(code, pc + 3)?;
            if dims == 0 {
                return Err(bad(pc, "multianewarray with zero dimensions"));
            }
            Insn::MultiNewArray { elem, dims }
        }
        op::ARRAYLENGTH => Insn::ArrayLength,

        op::CHECKCAST => Insn::CheckCast {
            class: class(pool, u16_at(code, pc + 1)?, pc)?,
        },
        op::INSTANCEOF => Insn::InstanceOf {
            class: class(pool, u16_at(code, pc + 1)?, pc)?,
        },

        op::ATHROW => Insn::Throw,
        op::MONITORENTER => Insn::Monitor { enter: true },
        op::MONITOREXIT => Insn::Monitor { enter: false },

        op::WIDE => {
            let modified = u8_at(code, pc + 1)?;
            let slot = u16_at(code, pc + 2)?;
            match modified {
                op::ILOAD..=op::ALOAD => Insn::Load {
                    slot,
                    ty: slot_type(modified - op::ILOAD),
                },
                op::ISTORE..=op::ASTORE => Insn::Store {
                    slot,
                    ty: slot_type(modified - op::ISTORE),
                },
                op::IINC => Insn::Iinc {
                    slot,
                    delta: i16_at(code, pc + 4)?,
                },
                op::RET => Insn::Ret { slot },
                _ => return Err(bad(pc, "bad wide target")),
            }
        }

        _ => {
            log::warn!("undefined opcode {opcode:#04x} at pc {pc:#x}");
            return Err(bad(pc, "undefined opcode"));
        }
    };
    Ok(insn)
}

fn slot_type(index: u8) -> SlotType {
    match index {
        0 => SlotType::Int,
        1 => SlotType::Long,
        2 => SlotType::Float,
        3 => SlotType::Double,
        _ => SlotType::Ref,
    }
}

fn prim_type(index: u8) -> PrimType {
    match index {
        0 => PrimType::Int,
        1 => PrimType::Long,
        2 => PrimType::Float,
        _ => PrimType::Double,
    }
}

fn array_kind(index: u8) -> ArrayKind {
    match index {
        0 => ArrayKind::Int,
        1 => ArrayKind::Long,
        2 => ArrayKind::Float,
        3 => ArrayKind::Double,
        4 => ArrayKind::Ref,
        5 => ArrayKind::Byte,
        6 => ArrayKind::Char,
        _ => ArrayKind::Short,
    }
}

fn arith(op: ArithOp, index: u8) -> Insn {
    Insn::Arith {
        op,
        ty: prim_type(index),
    }
}

fn convert(from: PrimType, to: JvmType) -> Insn {
    Insn::Convert { from, to }
}

fn branch_cond(opcode: u8) -> BranchCond {
    match opcode {
        op::IFEQ => BranchCond::Eq,
        op::IFNE => BranchCond::Ne,
        op::IFLT => BranchCond::Lt,
        op::IFGE => BranchCond::Ge,
        op::IFGT => BranchCond::Gt,
        op::IFLE => BranchCond::Le,
        op::IF_ICMPEQ => BranchCond::ICmpEq,
        op::IF_ICMPNE => BranchCond::ICmpNe,
        op::IF_ICMPLT => BranchCond::ICmpLt,
        op::IF_ICMPGE => BranchCond::ICmpGe,
        op::IF_ICMPGT => BranchCond::ICmpGt,
        op::IF_ICMPLE => BranchCond::ICmpLe,
        op::IF_ACMPEQ => BranchCond::ACmpEq,
        op::IF_ACMPNE => BranchCond::ACmpNe,
        op::IFNULL => BranchCond::Null,
        _ => BranchCond::NonNull,
    }
}

/// newarray atype codes, JVMS table 6.5.newarray-A.
fn newarray_elem(atype: u8) -> Option<JvmType> {
    Some(match atype {
        4 => JvmType::Boolean,
        5 => JvmType::Char,
        6 => JvmType::Float,
        7 => JvmType::Double,
        8 => JvmType::Byte,
        9 => JvmType::Short,
        10 => JvmType::Int,
        11 => JvmType::Long,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jdec_classfile::MemberRef;

    struct FakePool;

    impl ConstPool for FakePool {
        fn const_value(&self, index: u16) -> Option<ConstValue> {
            match index {
                1 => Some(ConstValue::Str("hi".into())),
                2 => Some(ConstValue::Double(0.5)),
                _ => None,
            }
        }
        fn member_ref(&self, index: u16) -> Option<MemberRef> {
            (index == 3).then(|| MemberRef::new("T", "f", "(I)V"))
        }
        fn class_name(&self, index: u16) -> Option<String> {
            (index == 4).then(|| "[[Ljava/lang/Cloneable;".to_string())
        }
    }

    #[test]
    fn decodes_short_const_forms() {
        let insns =
            decode_method(&[op::ICONST_M1, op::BIPUSH, 0xfe, op::SIPUSH, 0x01, 0x00], &FakePool)
                .unwrap();
        assert_eq!(insns[0].insn, Insn::Const(ConstOp::Int(-1)));
        assert_eq!(insns[1].insn, Insn::Const(ConstOp::Int(-2)));
        assert_eq!(insns[2].insn, Insn::Const(ConstOp::Int(256)));
        assert_eq!(insns[2].offset, 3);
    }

    #[test]
    fn resolves_pool_operands() {
        let insns = decode_method(&[op::LDC, 1, op::LDC2_W, 0, 2], &FakePool).unwrap();
        assert_eq!(
            insns[0].insn,
            Insn::Const(ConstOp::Pool(ConstValue::Str("hi".into())))
        );
        assert_eq!(
            insns[1].insn,
            Insn::Const(ConstOp::Pool(ConstValue::Double(0.5)))
        );
    }

    #[test]
    fn ldc2_of_narrow_constant_is_malformed() {
        assert!(decode_method(&[op::LDC2_W, 0, 1], &FakePool).is_err());
    }

    #[test]
    fn branch_targets_are_absolute() {
        let insns = decode_method(&[op::NOP, op::GOTO, 0xff, 0xfd, op::NOP], &FakePool);
        // goto at pc 1 with displacement -3 would land at -2.
        assert!(insns.is_err());

        let insns = decode_method(&[op::IFEQ, 0x00, 0x03, op::RETURN], &FakePool).unwrap();
        assert_eq!(
            insns[0].insn,
            Insn::Branch {
                cond: BranchCond::Eq,
                target: 3
            }
        );
    }

    #[test]
    fn checkcast_of_array_descriptor() {
        let insns = decode_method(&[op::ANEWARRAY, 0, 4], &FakePool).unwrap();
        assert_eq!(
            insns[0].insn,
            Insn::NewArray {
                elem: JvmType::array(JvmType::array(JvmType::reference("java/lang/Cloneable"))),
            }
        );
    }

    #[test]
    fn wide_iinc() {
        let insns =
            decode_method(&[op::WIDE, op::IINC, 0x01, 0x00, 0xff, 0x9c], &FakePool).unwrap();
        assert_eq!(
            insns[0].insn,
            Insn::Iinc {
                slot: 256,
                delta: -100
            }
        );
        assert_eq!(insns[0].size, 6);
    }

    #[test]
    fn lookupswitch_pairs_sorted() {
        // pc 0, so 3 pad bytes.
        let mut code = vec![op::LOOKUPSWITCH, 0, 0, 0];
        code.extend_from_slice(&28i32.to_be_bytes()); // default
        code.extend_from_slice(&2i32.to_be_bytes());
        code.extend_from_slice(&5i32.to_be_bytes());
        code.extend_from_slice(&28i32.to_be_bytes());
        code.extend_from_slice(&9i32.to_be_bytes());
        code.extend_from_slice(&28i32.to_be_bytes());
        code.push(op::RETURN); // pc 28
        let insns = decode_method(&code, &FakePool).unwrap();
        assert_eq!(
            insns[0].insn,
            Insn::Switch {
                default: 28,
                cases: vec![(5, 28), (9, 28)],
            }
        );
    }
}
