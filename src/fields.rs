// Operand fields of the instruction descriptors. Rather than have magic
// nibble arithmetic spread through the operations, each addressing mode is a
// variant of a small sum type that knows how to resolve itself against the
// decoded nibbles and the VM state. Destinations resolve to addresses,
// sources to values; both know how to render themselves for the
// disassembler.

use crate::decoder::VmInstruction;
use crate::devices::WrFlags;
use crate::memory::{MemoryAddr, REG_IN, REG_OUT, REG_PCL, SFR_IN_B, SFR_OUT_B, SFR_WR_FLAGS};
use crate::vm::VmState;

pub const REG_NAMES: [&str; 16] = [
    "R0", "R1", "R2", "R3", "R4", "R5", "R6", "R7", "R8", "R9", "OUT", "IN", "JSR", "PCL", "PCM",
    "PCH",
];

/// Byte address encoded directly in the low two nibbles of the instruction.
pub fn pointer_addr(instr: &VmInstruction) -> MemoryAddr {
    (instr.nibble2 << 4) | instr.nibble3
}

/// Resolves the 2-bit register-group selector. Values 0..=2 pick R0..=R2;
/// value 3 picks the IN or OUT register, whose position depends on
/// WrFlags.IN_OUT_POS.
fn rg_addr(instr: &VmInstruction, vm: &VmState, input: bool) -> MemoryAddr {
    let rg = instr.nibble3 >> 2;
    if rg < 0x3 {
        rg
    } else if WrFlags::from_bits_truncate(vm.mem.read(SFR_WR_FLAGS)).contains(WrFlags::IN_OUT_POS) {
        if input {
            SFR_IN_B
        } else {
            SFR_OUT_B
        }
    } else if input {
        REG_IN
    } else {
        REG_OUT
    }
}

/// Destination operand addressing modes.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum DstMode {
    /// Main-bank register selected by the second nibble.
    Rx,
    /// Main-bank register selected by the third nibble.
    Ry,
    /// Register group, input variant of the IN/OUT selector.
    RgIn,
    /// Register group, output variant of the IN/OUT selector.
    RgOut,
    R0,
    /// The PCL/PCM register pair written by the byte-wide MOV.
    Pc,
    /// Absolute byte address from the low two nibbles.
    Pointer,
    /// Indirect address assembled from two main-bank registers.
    Indirect,
}

impl DstMode {
    pub fn resolve(&self, instr: &VmInstruction, vm: &VmState) -> MemoryAddr {
        match *self {
            DstMode::Rx => instr.nibble2,
            DstMode::Ry => instr.nibble3,
            DstMode::RgIn => rg_addr(instr, vm, true),
            DstMode::RgOut => rg_addr(instr, vm, false),
            DstMode::R0 => 0x0,
            DstMode::Pc => REG_PCL,
            DstMode::Pointer => pointer_addr(instr),
            DstMode::Indirect => (vm.mem.reg(instr.nibble2) << 4) | vm.mem.reg(instr.nibble3),
        }
    }

    pub fn render(&self, instr: &VmInstruction) -> String {
        match *self {
            DstMode::Rx => REG_NAMES[instr.nibble2 as usize].to_string(),
            DstMode::Ry => REG_NAMES[instr.nibble3 as usize].to_string(),
            DstMode::RgIn | DstMode::RgOut => {
                let rg = instr.nibble3 >> 2;
                if rg < 0x3 {
                    REG_NAMES[rg as usize].to_string()
                } else {
                    String::from("RS")
                }
            }
            DstMode::R0 => String::from("R0"),
            DstMode::Pc => String::from("PC"),
            DstMode::Pointer => format!("[{:#x}]", pointer_addr(instr)),
            DstMode::Indirect => format!(
                "[{}:{}]",
                REG_NAMES[instr.nibble2 as usize], REG_NAMES[instr.nibble3 as usize]
            ),
        }
    }
}

/// Source operand addressing modes.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum SrcMode {
    /// Main-bank register selected by the third nibble.
    Ry,
    R0,
    /// Absolute byte address from the low two nibbles.
    Pointer,
    /// Indirect address assembled from two main-bank registers.
    Indirect,
    /// 4-bit literal from the third nibble.
    Literal,
    /// 8-bit literal from the low two nibbles.
    ByteLiteral,
    /// 2-bit literal from the low bits of the third nibble.
    Crumb,
}

impl SrcMode {
    pub fn resolve(&self, instr: &VmInstruction, vm: &VmState) -> u8 {
        match *self {
            SrcMode::Ry => vm.mem.reg(instr.nibble3),
            SrcMode::R0 => vm.mem.reg(0),
            SrcMode::Pointer => vm.mem.read(pointer_addr(instr)),
            SrcMode::Indirect => {
                let addr = (vm.mem.reg(instr.nibble2) << 4) | vm.mem.reg(instr.nibble3);
                vm.mem.read(addr)
            }
            SrcMode::Literal => instr.nibble3,
            SrcMode::ByteLiteral => (instr.nibble2 << 4) | instr.nibble3,
            SrcMode::Crumb => instr.nibble3 & 0x3,
        }
    }

    pub fn render(&self, instr: &VmInstruction) -> String {
        match *self {
            SrcMode::Ry => REG_NAMES[instr.nibble3 as usize].to_string(),
            SrcMode::R0 => String::from("R0"),
            SrcMode::Pointer => format!("[{:#x}]", pointer_addr(instr)),
            SrcMode::Indirect => format!(
                "[{}:{}]",
                REG_NAMES[instr.nibble2 as usize], REG_NAMES[instr.nibble3 as usize]
            ),
            SrcMode::Literal => format!("{:#x}", instr.nibble3),
            SrcMode::ByteLiteral => format!("{:#x}", (instr.nibble2 << 4) | instr.nibble3),
            SrcMode::Crumb => format!("{:#x}", instr.nibble3 & 0x3),
        }
    }
}

/// Condition operand of SKIP: a flag selector in the high bits of the third
/// nibble (0: C, 1: NC, 2: Z, 3: NZ).
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum CndMode {
    Flag,
}

impl CndMode {
    pub fn resolve(&self, instr: &VmInstruction) -> u8 {
        instr.nibble3 >> 2
    }

    pub fn render(&self, instr: &VmInstruction) -> String {
        format!("{:#x}", instr.nibble3 >> 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode_instruction;
    use crate::program::Program;
    use crate::vm::VmState;

    fn vm() -> VmState {
        VmState::new(Program::from_words(&[]))
    }

    #[test]
    fn register_modes_resolve_to_page_zero() {
        let vm = vm();
        let instr = decode_instruction(0x156);
        assert_eq!(DstMode::Rx.resolve(&instr, &vm), 0x5);
        assert_eq!(DstMode::Ry.resolve(&instr, &vm), 0x6);
        assert_eq!(DstMode::R0.resolve(&instr, &vm), 0x0);
    }

    #[test]
    fn indirect_mode_combines_two_registers() {
        let mut vm = vm();
        vm.mem.write(0x2, 0xa);
        vm.mem.write(0x3, 0x5);
        let instr = decode_instruction(0xa23);
        assert_eq!(DstMode::Indirect.resolve(&instr, &vm), 0xa5);
        vm.mem.write(0xa5, 0x7);
        assert_eq!(SrcMode::Indirect.resolve(&instr, &vm), 0x7);
    }

    #[test]
    fn pointer_mode_uses_the_literal_byte() {
        let vm = vm();
        let instr = decode_instruction(0xcf4);
        assert_eq!(DstMode::Pointer.resolve(&instr, &vm), 0xf4);
        assert_eq!(pointer_addr(&instr), 0xf4);
    }

    #[test]
    fn register_group_follows_in_out_position() {
        let mut vm = vm();
        let instr = decode_instruction(0x09c); // BIT with rg = 3
        assert_eq!(DstMode::RgIn.resolve(&instr, &vm), REG_IN);
        assert_eq!(DstMode::RgOut.resolve(&instr, &vm), REG_OUT);
        vm.mem.write(SFR_WR_FLAGS, WrFlags::IN_OUT_POS.bits());
        assert_eq!(DstMode::RgIn.resolve(&instr, &vm), SFR_IN_B);
        assert_eq!(DstMode::RgOut.resolve(&instr, &vm), SFR_OUT_B);
        let low = decode_instruction(0x094); // rg = 1
        assert_eq!(DstMode::RgIn.resolve(&low, &vm), 0x1);
    }

    #[test]
    fn literals_come_from_the_low_nibbles() {
        let vm = vm();
        let instr = decode_instruction(0x9e7);
        assert_eq!(SrcMode::Literal.resolve(&instr, &vm), 0x7);
        assert_eq!(SrcMode::ByteLiteral.resolve(&instr, &vm), 0xe7);
        assert_eq!(SrcMode::Crumb.resolve(&instr, &vm), 0x3);
        assert_eq!(CndMode::Flag.resolve(&instr), 0x1);
    }

    #[test]
    fn rendering_matches_the_operand_forms() {
        let instr = decode_instruction(0x8c0);
        assert_eq!(DstMode::Rx.render(&instr), "JSR");
        assert_eq!(SrcMode::Ry.render(&instr), "R0");
        let ptr = decode_instruction(0xcf4);
        assert_eq!(DstMode::Pointer.render(&ptr), "[0xf4]");
        let ind = decode_instruction(0xa23);
        assert_eq!(DstMode::Indirect.render(&ind), "[R2:R3]");
        let lit = decode_instruction(0x93a);
        assert_eq!(SrcMode::Literal.render(&lit), "0xa");
    }
}
