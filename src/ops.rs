// Operation semantics. Every arithmetic result is kept both as an unsigned
// 5-bit raw value (for Carry/Zero) and as a signed sum of sign-extended
// nibbles (for Overflow). The jump trap runs after the write, keyed on the
// destination address, so self-modifying writes to the PC registers behave
// like control flow.

use crate::conversions::{nibble_to_i8, split_byte};
use crate::decoder::{InstructionDescriptor, OpFlags, VmInstruction};
use crate::devices::{maybe_handle_sfr_read, maybe_handle_sfr_write};
use crate::memory::{MemoryAddr, PAGE_SIZE};
use crate::vm::{Flags, VmError, VmState};

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Op {
    Add,
    Adc,
    Sub,
    Sbb,
    Or,
    And,
    Xor,
    Mov,
    Jr,
    Cp,
    Inc,
    Dec,
    Dsz,
    Exr,
    Bit,
    Bset,
    Bclr,
    Btg,
    Rrc,
    Ret,
    Skip,
}

impl Op {
    pub fn mnemonic(&self) -> &'static str {
        match *self {
            Op::Add => "ADD",
            Op::Adc => "ADC",
            Op::Sub => "SUB",
            Op::Sbb => "SBB",
            Op::Or => "OR",
            Op::And => "AND",
            Op::Xor => "XOR",
            Op::Mov => "MOV",
            Op::Jr => "JR",
            Op::Cp => "CP",
            Op::Inc => "INC",
            Op::Dec => "DEC",
            Op::Dsz => "DSZ",
            Op::Exr => "EXR",
            Op::Bit => "BIT",
            Op::Bset => "BSET",
            Op::Bclr => "BCLR",
            Op::Btg => "BTG",
            Op::Rrc => "RRC",
            Op::Ret => "RET",
            Op::Skip => "SKIP",
        }
    }
}

impl InstructionDescriptor {
    fn dst_addr(&self, instr: &VmInstruction, vm: &VmState) -> MemoryAddr {
        match &self.dst {
            Some(dst) => dst.resolve(instr, vm),
            None => panic!("instruction has no destination operand"),
        }
    }

    fn src_val(&self, instr: &VmInstruction, vm: &VmState) -> u8 {
        match &self.src {
            Some(src) => src.resolve(instr, vm),
            None => panic!("instruction has no source operand"),
        }
    }
}

/// Dispatches a decoded instruction. The tables in the decoder guarantee the
/// operands each operation needs are present.
pub fn execute(
    instr: &VmInstruction,
    descr: &InstructionDescriptor,
    vm: &mut VmState,
) -> Result<(), VmError> {
    match descr.op {
        Op::Add => op_add(instr, descr, vm, false),
        Op::Adc => op_add(instr, descr, vm, true),
        Op::Sub => op_sub(instr, descr, vm, false),
        Op::Sbb => op_sub(instr, descr, vm, true),
        Op::Or => op_or(instr, descr, vm),
        Op::And => op_and(instr, descr, vm),
        Op::Xor => op_xor(instr, descr, vm),
        Op::Mov => return op_mov(instr, descr, vm),
        Op::Jr => op_jr(instr, descr, vm),
        Op::Cp => op_cp(instr, descr, vm),
        Op::Inc => return op_inc(instr, descr, vm),
        Op::Dec => return op_dec(instr, descr, vm),
        Op::Dsz => op_dsz(instr, descr, vm),
        Op::Exr => op_exr(instr, descr, vm),
        Op::Bit => op_bit(instr, descr, vm),
        Op::Bset => op_bset(instr, descr, vm),
        Op::Bclr => op_bclr(instr, descr, vm),
        Op::Btg => op_btg(instr, descr, vm),
        Op::Rrc => op_rrc(instr, descr, vm),
        Op::Ret => return op_ret(instr, descr, vm),
        Op::Skip => op_skip(instr, descr, vm),
    }
    Ok(())
}

fn op_add(instr: &VmInstruction, descr: &InstructionDescriptor, vm: &mut VmState, with_carry: bool) {
    let dst_addr = descr.dst_addr(instr, vm);
    let dst = vm.mem.read(dst_addr);
    let src = descr.src_val(instr, vm);
    let mut result = dst + src;
    let mut sresult = nibble_to_i8(dst) + nibble_to_i8(src);
    if with_carry && vm.reg_flags.contains(Flags::CARRY) {
        result += 1;
        sresult += 1;
    }
    vm.mem.write(dst_addr, result & 0xf);
    vm.update_zero_flag(result);
    vm.update_carry_flag(result);
    vm.update_overflow_flag(sresult);
}

fn op_sub(instr: &VmInstruction, descr: &InstructionDescriptor, vm: &mut VmState, with_borrow: bool) {
    let dst_addr = descr.dst_addr(instr, vm);
    let dst = vm.mem.read(dst_addr);
    let src = descr.src_val(instr, vm);
    let mut result = dst.wrapping_sub(src);
    let mut sresult = nibble_to_i8(dst) - nibble_to_i8(src);
    if with_borrow && !vm.reg_flags.contains(Flags::CARRY) {
        result = result.wrapping_sub(1);
        sresult -= 1;
    }
    vm.mem.write(dst_addr, result & 0xf);
    vm.update_zero_flag(result);
    vm.update_borrow_flag(result);
    vm.update_overflow_flag(sresult);
}

/// CP is identical in behavior to SUB, except that the result is discarded.
fn op_cp(instr: &VmInstruction, descr: &InstructionDescriptor, vm: &mut VmState) {
    let dst = vm.mem.read(descr.dst_addr(instr, vm));
    let src = descr.src_val(instr, vm);
    let result = dst.wrapping_sub(src);
    let sresult = nibble_to_i8(dst) - nibble_to_i8(src);
    vm.update_zero_flag(result);
    vm.update_borrow_flag(result);
    vm.update_overflow_flag(sresult);
}

/// When src is a literal, OR sets the Carry flag.
fn op_or(instr: &VmInstruction, descr: &InstructionDescriptor, vm: &mut VmState) {
    let dst_addr = descr.dst_addr(instr, vm);
    let result = vm.mem.read(dst_addr) | descr.src_val(instr, vm);
    vm.mem.write(dst_addr, result);
    vm.update_zero_flag(result);
    if descr.flags.contains(OpFlags::UPDATE_CARRY) {
        vm.reg_flags.insert(Flags::CARRY);
    }
}

/// When src is a literal, AND clears the Carry flag.
fn op_and(instr: &VmInstruction, descr: &InstructionDescriptor, vm: &mut VmState) {
    let dst_addr = descr.dst_addr(instr, vm);
    let result = vm.mem.read(dst_addr) & descr.src_val(instr, vm);
    vm.mem.write(dst_addr, result);
    vm.update_zero_flag(result);
    if descr.flags.contains(OpFlags::UPDATE_CARRY) {
        vm.reg_flags.remove(Flags::CARRY);
    }
}

/// When src is a literal, XOR toggles the Carry flag.
fn op_xor(instr: &VmInstruction, descr: &InstructionDescriptor, vm: &mut VmState) {
    let dst_addr = descr.dst_addr(instr, vm);
    let result = vm.mem.read(dst_addr) ^ descr.src_val(instr, vm);
    vm.mem.write(dst_addr, result);
    vm.update_zero_flag(result);
    if descr.flags.contains(OpFlags::UPDATE_CARRY) {
        vm.reg_flags.toggle(Flags::CARRY);
    }
}

fn op_mov(
    instr: &VmInstruction,
    descr: &InstructionDescriptor,
    vm: &mut VmState,
) -> Result<(), VmError> {
    if descr.flags.contains(OpFlags::CAN_RD_SFR) && maybe_handle_sfr_read(instr, vm) {
        return Ok(());
    }
    if descr.flags.contains(OpFlags::CAN_WR_SFR) && maybe_handle_sfr_write(instr, vm) {
        return Ok(());
    }
    let dst_addr = descr.dst_addr(instr, vm);
    let src = descr.src_val(instr, vm);
    if descr.flags.contains(OpFlags::DST_BYTE) {
        let (low, high) = split_byte(src);
        vm.mem.write(dst_addr, low);
        vm.mem.write(dst_addr + 1, high);
    } else {
        vm.mem.write(dst_addr, src);
    }
    if descr.flags.contains(OpFlags::CAN_JUMP) {
        vm.maybe_call_or_jump(dst_addr)?;
    }
    Ok(())
}

fn op_jr(instr: &VmInstruction, descr: &InstructionDescriptor, vm: &mut VmState) {
    let offset = descr.src_val(instr, vm) as i8;
    vm.reg_pc = vm.reg_pc.wrapping_add(offset as u16);
}

fn op_inc(
    instr: &VmInstruction,
    descr: &InstructionDescriptor,
    vm: &mut VmState,
) -> Result<(), VmError> {
    let dst_addr = descr.dst_addr(instr, vm);
    let result = vm.mem.read(dst_addr) + 1;
    vm.mem.write(dst_addr, result & 0xf);
    vm.update_zero_flag(result);
    vm.update_carry_flag(result);
    vm.maybe_call_or_jump(dst_addr)
}

fn op_dec(
    instr: &VmInstruction,
    descr: &InstructionDescriptor,
    vm: &mut VmState,
) -> Result<(), VmError> {
    let dst_addr = descr.dst_addr(instr, vm);
    let result = vm.mem.read(dst_addr).wrapping_sub(1);
    vm.mem.write(dst_addr, result & 0xf);
    vm.update_zero_flag(result);
    vm.update_borrow_flag(result);
    vm.maybe_call_or_jump(dst_addr)
}

/// Decrement and skip the next instruction on reaching zero. Flags are left
/// untouched.
fn op_dsz(instr: &VmInstruction, descr: &InstructionDescriptor, vm: &mut VmState) {
    let dst_addr = descr.dst_addr(instr, vm);
    let result = vm.mem.read(dst_addr).wrapping_sub(1) & 0xf;
    vm.mem.write(dst_addr, result);
    if result == 0 {
        vm.reg_pc += 1;
    }
}

/// Exchange the first n registers with the alternate bank; n == 0 means all 16.
fn op_exr(instr: &VmInstruction, descr: &InstructionDescriptor, vm: &mut VmState) {
    let mut n = descr.src_val(instr, vm) as usize;
    if n == 0 {
        n = PAGE_SIZE;
    }
    vm.mem.swap_banks(n);
}

fn op_bit(instr: &VmInstruction, descr: &InstructionDescriptor, vm: &mut VmState) {
    let dst_addr = descr.dst_addr(instr, vm);
    let m = descr.src_val(instr, vm);
    let result = vm.mem.read(dst_addr) & (1 << m);
    vm.update_zero_flag(result);
}

fn op_bset(instr: &VmInstruction, descr: &InstructionDescriptor, vm: &mut VmState) {
    let dst_addr = descr.dst_addr(instr, vm);
    let m = descr.src_val(instr, vm);
    let value = vm.mem.read(dst_addr) | (1 << m);
    vm.mem.write(dst_addr, value);
}

fn op_bclr(instr: &VmInstruction, descr: &InstructionDescriptor, vm: &mut VmState) {
    let dst_addr = descr.dst_addr(instr, vm);
    let m = descr.src_val(instr, vm);
    let value = vm.mem.read(dst_addr) & !(1 << m);
    vm.mem.write(dst_addr, value);
}

fn op_btg(instr: &VmInstruction, descr: &InstructionDescriptor, vm: &mut VmState) {
    let dst_addr = descr.dst_addr(instr, vm);
    let m = descr.src_val(instr, vm);
    let value = vm.mem.read(dst_addr) ^ (1 << m);
    vm.mem.write(dst_addr, value);
}

/// Rotate right through Carry: bit 0 becomes the new Carry, the old Carry
/// enters at bit 3.
fn op_rrc(instr: &VmInstruction, descr: &InstructionDescriptor, vm: &mut VmState) {
    let dst_addr = descr.dst_addr(instr, vm);
    let mut result = vm.mem.read(dst_addr);
    let carry = vm.reg_flags.contains(Flags::CARRY);
    vm.reg_flags.set(Flags::CARRY, result & 0x1 != 0);
    result >>= 1;
    if carry {
        result |= 0x8;
    }
    vm.mem.write(dst_addr, result);
    vm.update_zero_flag(result);
}

/// Return from subroutine, carrying a return value nibble into R0.
fn op_ret(
    instr: &VmInstruction,
    descr: &InstructionDescriptor,
    vm: &mut VmState,
) -> Result<(), VmError> {
    let n = descr.src_val(instr, vm);
    vm.ret(n)
}

/// Skip the next m instructions (m == 0 means 4) if the condition holds.
fn op_skip(instr: &VmInstruction, descr: &InstructionDescriptor, vm: &mut VmState) {
    let cnd_flg = match &descr.cnd {
        Some(cnd) => cnd.resolve(instr),
        None => panic!("SKIP without a condition operand"),
    };
    let mut m = descr.src_val(instr, vm) as u16;
    if m == 0 {
        m = 4;
    }
    let taken = match cnd_flg {
        0 => vm.reg_flags.contains(Flags::CARRY),
        1 => !vm.reg_flags.contains(Flags::CARRY),
        2 => vm.reg_flags.contains(Flags::ZERO),
        _ => !vm.reg_flags.contains(Flags::ZERO),
    };
    if taken {
        vm.reg_pc += m;
    }
}

/// Renders an instruction as `MNEMONIC dst[,cnd][,src]`.
pub fn disassemble_instruction(instr: &VmInstruction, descr: &InstructionDescriptor) -> String {
    let mut out = format!("{:<4} ", descr.op.mnemonic());
    let mut first = true;
    if let Some(dst) = &descr.dst {
        out.push_str(&dst.render(instr));
        first = false;
    }
    if let Some(cnd) = &descr.cnd {
        if !first {
            out.push(',');
        }
        out.push_str(&cnd.render(instr));
        first = false;
    }
    if let Some(src) = &descr.src {
        if !first {
            out.push(',');
        }
        out.push_str(&src.render(instr));
    }
    out
}
