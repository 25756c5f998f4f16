// This is where a raw 12-bit program word becomes something the interpreter
// can act on. A word splits into three nibbles; a non-zero first nibble
// selects from the primary table, a zero first nibble makes the second
// nibble select from the wide table. Descriptors are plain data -- the
// operation tag is dispatched with a match in ops.rs.

use crate::fields::{CndMode, DstMode, SrcMode};
use crate::ops::Op;
use crate::program::ProgramWord;

/// A program word split into its three nibbles.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct VmInstruction {
    pub nibble1: u8,
    pub nibble2: u8,
    pub nibble3: u8,
}

pub fn decode_instruction(word: ProgramWord) -> VmInstruction {
    VmInstruction {
        nibble1: ((word >> 8) & 0xf) as u8,
        nibble2: ((word >> 4) & 0xf) as u8,
        nibble3: (word & 0xf) as u8,
    }
}

bitflags! {
    /// Behavior modifiers attached to a descriptor.
    pub struct OpFlags: u8 {
        /// Destination MOV writes a byte split across dst and dst+1.
        const DST_BYTE     = 0x1;
        /// A write to the JSR or PCL register turns into a call or jump.
        const CAN_JUMP     = 0x2;
        /// MOV may route its read through the SFR trap.
        const CAN_RD_SFR   = 0x4;
        /// MOV may route its write through the SFR trap.
        const CAN_WR_SFR   = 0x8;
        /// Immediate-literal logic operations also mutate Carry.
        const UPDATE_CARRY = 0x10;
    }
}

pub struct InstructionDescriptor {
    pub op: Op,
    pub dst: Option<DstMode>,
    pub cnd: Option<CndMode>,
    pub src: Option<SrcMode>,
    pub flags: OpFlags,
}

const fn descr(op: Op, dst: Option<DstMode>, src: Option<SrcMode>, flags: OpFlags) -> InstructionDescriptor {
    InstructionDescriptor { op, dst, cnd: None, src, flags }
}

const NONE: OpFlags = OpFlags::empty();
const CAN_JUMP: OpFlags = OpFlags::CAN_JUMP;
const UPDATE_CARRY: OpFlags = OpFlags::UPDATE_CARRY;

/// Single nibble opcodes, indexed by the first nibble minus one.
pub static INSTRUCTIONS: [InstructionDescriptor; 15] = [
    descr(Op::Add, Some(DstMode::Rx), Some(SrcMode::Ry), NONE),
    descr(Op::Adc, Some(DstMode::Rx), Some(SrcMode::Ry), NONE),
    descr(Op::Sub, Some(DstMode::Rx), Some(SrcMode::Ry), NONE),
    descr(Op::Sbb, Some(DstMode::Rx), Some(SrcMode::Ry), NONE),
    descr(Op::Or, Some(DstMode::Rx), Some(SrcMode::Ry), NONE),
    descr(Op::And, Some(DstMode::Rx), Some(SrcMode::Ry), NONE),
    descr(Op::Xor, Some(DstMode::Rx), Some(SrcMode::Ry), NONE),
    descr(Op::Mov, Some(DstMode::Rx), Some(SrcMode::Ry), CAN_JUMP),
    descr(Op::Mov, Some(DstMode::Rx), Some(SrcMode::Literal), CAN_JUMP),
    descr(Op::Mov, Some(DstMode::Indirect), Some(SrcMode::R0), NONE),
    descr(Op::Mov, Some(DstMode::R0), Some(SrcMode::Indirect), NONE),
    descr(Op::Mov, Some(DstMode::Pointer), Some(SrcMode::R0), OpFlags::CAN_WR_SFR),
    descr(Op::Mov, Some(DstMode::R0), Some(SrcMode::Pointer), OpFlags::CAN_RD_SFR),
    descr(Op::Mov, Some(DstMode::Pc), Some(SrcMode::ByteLiteral), OpFlags::DST_BYTE),
    descr(Op::Jr, None, Some(SrcMode::ByteLiteral), NONE),
];

/// Double nibble opcodes, indexed by the second nibble (first nibble zero).
pub static INSTRUCTIONS_WIDE: [InstructionDescriptor; 16] = [
    descr(Op::Cp, Some(DstMode::R0), Some(SrcMode::Literal), NONE),
    descr(Op::Add, Some(DstMode::R0), Some(SrcMode::Literal), NONE),
    descr(Op::Inc, Some(DstMode::Ry), None, CAN_JUMP),
    descr(Op::Dec, Some(DstMode::Ry), None, CAN_JUMP),
    descr(Op::Dsz, Some(DstMode::Ry), None, NONE),
    descr(Op::Or, Some(DstMode::R0), Some(SrcMode::Literal), UPDATE_CARRY),
    descr(Op::And, Some(DstMode::R0), Some(SrcMode::Literal), UPDATE_CARRY),
    descr(Op::Xor, Some(DstMode::R0), Some(SrcMode::Literal), UPDATE_CARRY),
    descr(Op::Exr, None, Some(SrcMode::Literal), NONE),
    descr(Op::Bit, Some(DstMode::RgIn), Some(SrcMode::Crumb), NONE),
    descr(Op::Bset, Some(DstMode::RgOut), Some(SrcMode::Crumb), NONE),
    descr(Op::Bclr, Some(DstMode::RgOut), Some(SrcMode::Crumb), NONE),
    descr(Op::Btg, Some(DstMode::RgOut), Some(SrcMode::Crumb), NONE),
    descr(Op::Rrc, Some(DstMode::Ry), None, NONE),
    descr(Op::Ret, Some(DstMode::R0), Some(SrcMode::Literal), NONE),
    InstructionDescriptor {
        op: Op::Skip,
        dst: None,
        cnd: Some(CndMode::Flag),
        src: Some(SrcMode::Crumb),
        flags: NONE,
    },
];

/// Selects the unique descriptor for a decoded instruction.
pub fn get_instruction_descriptor(instr: &VmInstruction) -> &'static InstructionDescriptor {
    if instr.nibble1 != 0 {
        &INSTRUCTIONS[instr.nibble1 as usize - 1]
    } else {
        &INSTRUCTIONS_WIDE[instr.nibble2 as usize]
    }
}
