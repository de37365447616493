mod op;
mod instruction;
mod builder;
mod decoder;
mod line_map;

pub use op::{CHECK_NULLABLE, CHECK_TOP, NameKind, Op, UNRESOLVED_CLASS};
pub use instruction::Instruction;
pub use builder::{
    BytecodeBuilder, JumpList, Label, patch_a_in, patch_b_in, patch_small_in,
};
pub use decoder::{BytecodeDecoder, DecodeError, decode_at, disassemble, jump_target};
pub use line_map::{LineTableBuilder, line_for_pc};

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode_all(bytes: &[u8]) -> Vec<Instruction> {
        BytecodeDecoder::new(bytes)
            .map(|r| r.expect("decode error").1)
            .collect()
    }

    #[test]
    fn size_classes_follow_op_order() {
        assert_eq!(Op::Nop.len(), 3);
        assert_eq!(Op::PopHandler.len(), 3);
        assert_eq!(Op::PushConst.len(), 7);
        assert_eq!(Op::CheckType.len(), 7);
        assert_eq!(Op::LoadName.len(), 11);
        assert_eq!(Op::CallSuper.len(), 11);
        assert_eq!(Op::COUNT, Op::CallSuper as usize + 1);
    }

    #[test]
    fn round_trip_all_classes() {
        let mut b = BytecodeBuilder::new();
        b.push_int(-7);
        b.load_local(3);
        b.store_local(12);
        b.emit(Op::Return, 1);
        b.push_const(42);
        b.call_method(9, 2);
        b.emit_a(Op::MakeClosure, 2, 5);
        b.load_name(NameKind::Global, 1, 4);
        b.emit_ab(Op::CallSuper, 1, 8, 3);

        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::PushInt { value: -7 },
            Instruction::LoadLocal { slot: 3 },
            Instruction::StoreLocal { slot: 12 },
            Instruction::Return { has_value: true },
            Instruction::PushConst { idx: 42 },
            Instruction::CallMethod { argc: 2, symbol: 9 },
            Instruction::MakeClosure { captures: 2, func: 5 },
            Instruction::LoadName { kind: NameKind::Global, a: 1, b: 4 },
            Instruction::CallSuper { argc: 1, symbol: 8, class: 3 },
        ]);
    }

    #[test]
    fn forward_jump() {
        let mut b = BytecodeBuilder::new();
        b.emit(Op::PushTrue, 0);
        let label = b.jump(Op::JumpIfFalse);
        b.push_int(1);
        b.bind(label);
        b.emit(Op::Return, 0);

        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::PushTrue,
            Instruction::JumpIfFalse { offset: 3 },
            Instruction::PushInt { value: 1 },
            Instruction::Return { has_value: false },
        ]);
    }

    #[test]
    fn backward_jump() {
        let mut b = BytecodeBuilder::new();
        let top = b.current_offset();
        b.emit(Op::Nop, 0);
        b.jump_back(Op::Jump, top);

        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::Nop,
            Instruction::Jump { offset: -10 },
        ]);
    }

    #[test]
    fn jump_list_patches_every_link() {
        let mut b = BytecodeBuilder::new();
        let mut list = JumpList::new();
        b.jump_to_list(Op::Jump, &mut list);
        b.emit(Op::Nop, 0);
        b.jump_to_list(Op::JumpIfTrue, &mut list);
        b.jump_to_list(Op::Jump, &mut list);
        b.emit(Op::Pop, 0);
        assert!(!list.is_empty());
        b.bind_list(list);
        let end = b.current_offset();
        let bytes = b.into_bytes();

        let targets: Vec<usize> = BytecodeDecoder::new(&bytes)
            .map(|r| r.expect("decode error"))
            .filter_map(|(pc, instr)| jump_target(pc, &instr))
            .collect();
        assert_eq!(targets, vec![end, end, end]);
    }

    #[test]
    fn catch_test_offset_lives_in_second_operand() {
        let mut b = BytecodeBuilder::new();
        let (pos, label) = b.catch_test(17);
        b.emit(Op::Pop, 0);
        b.bind(label);
        assert_eq!(pos, 0);
        assert_eq!(decode_all(b.as_bytes()), vec![
            Instruction::CatchTest { class: 17, offset: 3 },
            Instruction::Pop,
        ]);
    }

    #[test]
    fn pending_class_operand_disassembles_as_placeholder() {
        let instr = Instruction::CatchTest { class: UNRESOLVED_CLASS, offset: 4 };
        assert_eq!(instr.to_string(), "CatchTest c? ~4");
        let instr = Instruction::CheckType { slot: 2, class: 5 };
        assert_eq!(instr.to_string(), "CheckType s2 c5");
    }

    #[test]
    fn set_op_rewrites_same_class() {
        let mut b = BytecodeBuilder::new();
        let ret = b.emit(Op::Return, 0);
        b.set_op(ret, Op::GenReturn);
        assert_eq!(decode_all(b.as_bytes()), vec![Instruction::GenReturn]);
    }

    #[test]
    fn link_patches_rewrite_finished_code() {
        let mut b = BytecodeBuilder::new();
        let site = b.load_name(NameKind::Unresolved, 77, 0);
        let mut code = b.into_bytes();
        patch_small_in(&mut code, site, NameKind::Class as u16);
        patch_a_in(&mut code, site, 4);
        patch_b_in(&mut code, site, 0);
        assert_eq!(decode_all(&code), vec![Instruction::LoadName {
            kind: NameKind::Class,
            a: 4,
            b: 0
        }]);
    }

    #[test]
    fn unknown_opcode_is_reported() {
        let bytes = [0xEE, 0, 0];
        assert_eq!(
            decode_at(&bytes, 0),
            Err(DecodeError::UnknownOp { pc: 0, byte: 0xEE })
        );
    }

    #[test]
    fn truncated_instruction_is_reported() {
        let bytes = [Op::PushConst as u8, 0, 0, 1];
        assert_eq!(decode_at(&bytes, 0), Err(DecodeError::Truncated { pc: 0 }));
    }

    #[test]
    fn disassembly_shows_jump_targets() {
        let mut b = BytecodeBuilder::new();
        let label = b.jump(Op::Jump);
        b.emit(Op::Nop, 0);
        b.bind(label);
        b.emit(Op::Return, 0);
        let text = disassemble(b.as_bytes());
        assert_eq!(
            text,
            "0000 Jump ~3 (-> 0010)\n0007 Nop\n0010 Return nil\n"
        );
    }
}
