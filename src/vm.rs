// The state of a running virtual machine and its cycle engine. A cycle
// stamps the cycle clock, refreshes the user-sync latch and the input
// register, then fetches, decodes and executes exactly one instruction.
// Pacing between cycles is the caller's business (see lib.rs); the engine
// only reports how long to wait.

use thiserror::Error;

use crate::clock::{as_usec, ClockRef, VmClock};
use crate::conversions::{join_pc, split_pc};
use crate::decoder::{decode_instruction, get_instruction_descriptor, VmInstruction};
use crate::devices::{RdFlags, WrFlags, CLOCK_PERIODS_USEC, SERIAL_BAUD_9600, SYNC_PERIODS_USEC};
use crate::memory::{
    Memory, MemoryAddr, REG_IN, REG_JSR, REG_PCH, REG_PCL, REG_PCM, REG_R0, SFR_AUTO_OFF,
    SFR_CLOCK, SFR_DIMMER, SFR_IN_B, SFR_RANDOM, SFR_RD_FLAGS, SFR_SER_CTRL, SFR_SYNC,
    SFR_WR_FLAGS, STACK_BASE,
};
use crate::ops;
use crate::program::{Program, PROGRAM_MEMORY_SIZE};
use crate::rng::Rng;

pub const MAX_STACK_DEPTH: u8 = 5;

bitflags! {
    /// The internal Flags register. Not addressable from code.
    pub struct Flags: u8 {
        const CARRY    = 0x1;
        const ZERO     = 0x2;
        const OVERFLOW = 0x4;
    }
}

/// Fatal runtime errors. These terminate execution with a diagnostic.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("program counter out of range: {0:#05x}")]
    PcOutOfRange(u16),
}

/// The state of a running virtual machine.
pub struct VmState {
    pub prg: Program,
    pub mem: Memory,

    // Extra registers that are not directly accessible.
    pub reg_pc: u16,
    pub reg_sp: u8,
    pub reg_flags: Flags,

    pub rng: Rng,

    pub clock: ClockRef,
    pub t_cycle_start: VmClock,
    pub t_cycle_end: VmClock,
    pub t_last_sync: VmClock,

    // Stats for the status panel.
    pub dt_last_cycle: VmClock,
    pub dt_last_cycle_period: VmClock,
    pub dt_last_user_sync_period: VmClock,
}

impl VmState {
    /// Creates a VM in its power-on state, taking ownership of the program.
    pub fn new(prg: Program) -> Self {
        let mut rng = Rng::new();
        let mut mem = Memory::new();
        mem.write(SFR_SER_CTRL, SERIAL_BAUD_9600);
        mem.write(SFR_AUTO_OFF, 0x2);
        mem.write(SFR_DIMMER, 0xf);
        let first = rng.next();
        mem.write(SFR_RANDOM, first);

        VmState {
            prg,
            mem,
            reg_pc: 0,
            reg_sp: 0,
            reg_flags: Flags::empty(),
            rng,
            clock: ClockRef::new(),
            t_cycle_start: 0,
            t_cycle_end: 0,
            t_last_sync: 0,
            dt_last_cycle: 0,
            dt_last_cycle_period: 0,
            dt_last_user_sync_period: 0,
        }
    }

    /// Fetches and splits the next program word, advancing the program
    /// counter. Program memory wraps at 4096 words; the bound check is
    /// defensive and only trips when a relative jump has pushed the counter
    /// past the end.
    pub fn decode_next(&mut self) -> Result<VmInstruction, VmError> {
        if self.reg_pc as usize >= PROGRAM_MEMORY_SIZE {
            return Err(VmError::PcOutOfRange(self.reg_pc));
        }
        let word = self.prg.fetch(self.reg_pc);
        self.reg_pc += 1;
        if self.reg_pc as usize == PROGRAM_MEMORY_SIZE {
            self.reg_pc = 0; // Loop back to the first instruction.
        }
        Ok(decode_instruction(word))
    }

    /// Runs one full cycle: clock stamp, user-sync latch, input refresh,
    /// fetch, decode, execute.
    pub fn execute_cycle(&mut self) -> Result<(), VmError> {
        let start = self.clock.now();
        self.dt_last_cycle_period = start - self.t_cycle_start;
        self.t_cycle_start = start;

        self.update_user_sync();
        self.update_in_reg();

        let instr = self.decode_next()?;
        let descr = get_instruction_descriptor(&instr);
        ops::execute(&instr, descr, self)?;

        self.t_cycle_end = self.clock.now();
        self.dt_last_cycle = self.t_cycle_end - self.t_cycle_start;
        Ok(())
    }

    /// Microseconds left until the next cycle is due under the period
    /// selected by the Clock register.
    pub fn cycle_wait_usec(&self) -> i64 {
        let elapsed = as_usec(self.clock.now() - self.t_cycle_start);
        let period = CLOCK_PERIODS_USEC[self.mem.read(SFR_CLOCK) as usize];
        if period >= elapsed {
            period - elapsed
        } else {
            0
        }
    }

    /// Sets the sticky USER_SYNC bit whenever the period selected by the
    /// Sync register has elapsed. Cleared by a program read of RdFlags.
    fn update_user_sync(&mut self) {
        let now = self.clock.now();
        let elapsed = as_usec(now - self.t_last_sync);
        let period = SYNC_PERIODS_USEC[self.mem.read(SFR_SYNC) as usize];
        if elapsed >= period {
            self.dt_last_user_sync_period = now - self.t_last_sync;
            self.t_last_sync = now;
            let flags = self.mem.read(SFR_RD_FLAGS);
            self.mem.write(SFR_RD_FLAGS, flags | RdFlags::USER_SYNC.bits());
        }
    }

    /// Refreshes the input register to "no keys pressed". The UI overwrites
    /// this between cycles when a key is down.
    fn update_in_reg(&mut self) {
        if WrFlags::from_bits_truncate(self.mem.read(SFR_WR_FLAGS)).contains(WrFlags::IN_OUT_POS) {
            self.mem.write(SFR_IN_B, 0xf);
        } else {
            self.mem.write(REG_IN, 0xf);
        }
    }

    /// Initiates a call or jump if the destination of a completed write was
    /// the JSR or PCL register.
    pub fn maybe_call_or_jump(&mut self, dst_addr: MemoryAddr) -> Result<(), VmError> {
        if dst_addr == REG_JSR {
            if self.reg_sp == MAX_STACK_DEPTH {
                return Err(VmError::StackOverflow);
            }
            let (low, mid, high) = split_pc(self.reg_pc);
            let frame = STACK_BASE + self.reg_sp * 3;
            self.mem.write(frame, low);
            self.mem.write(frame + 1, mid);
            self.mem.write(frame + 2, high);
            self.reg_sp += 1;
            self.reg_pc = join_pc(
                self.mem.read(REG_JSR),
                self.mem.read(REG_PCM),
                self.mem.read(REG_PCH),
            );
            return Ok(());
        }

        if dst_addr == REG_PCL {
            self.reg_pc = join_pc(
                self.mem.read(REG_PCL),
                self.mem.read(REG_PCM),
                self.mem.read(REG_PCH),
            );
        }
        Ok(())
    }

    /// Pops a return address into the program counter and stores the return
    /// value nibble in R0.
    pub fn ret(&mut self, value: u8) -> Result<(), VmError> {
        if self.reg_sp == 0 {
            return Err(VmError::StackUnderflow);
        }
        self.mem.write(REG_R0, value);
        self.reg_sp -= 1;
        let frame = STACK_BASE + self.reg_sp * 3;
        self.reg_pc = join_pc(
            self.mem.read(frame),
            self.mem.read(frame + 1),
            self.mem.read(frame + 2),
        );
        Ok(())
    }

    /// Updates the Zero flag from the low nibble of a raw result.
    pub fn update_zero_flag(&mut self, result: u8) {
        self.reg_flags.set(Flags::ZERO, result & 0xf == 0);
    }

    /// Updates the Carry flag for addition ops (ADD, ADC, INC).
    pub fn update_carry_flag(&mut self, result: u8) {
        self.reg_flags.set(Flags::CARRY, result & 0x10 != 0);
    }

    /// Updates the Carry flag for subtraction ops (SUB, SBB, CP, DEC), where
    /// it acts as the inverse of Borrow.
    pub fn update_borrow_flag(&mut self, result: u8) {
        self.reg_flags.set(Flags::CARRY, result & 0x10 == 0);
    }

    /// Updates the Overflow flag from the signed result, mirroring it into
    /// the V_FLAG bit of RdFlags.
    pub fn update_overflow_flag(&mut self, sresult: i8) {
        let overflow = sresult < -8 || sresult > 7;
        self.reg_flags.set(Flags::OVERFLOW, overflow);
        let flags = self.mem.read(SFR_RD_FLAGS);
        if overflow {
            self.mem.write(SFR_RD_FLAGS, flags | RdFlags::V_FLAG.bits());
        } else {
            self.mem.write(SFR_RD_FLAGS, flags & !RdFlags::V_FLAG.bits());
        }
    }
}
