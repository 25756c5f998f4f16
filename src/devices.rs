// Peripheral behavior behind the special function register page: the bit
// assignments of the flag registers, the period tables driven by the Clock
// and Sync registers, and the read/write traps that give a handful of SFRs
// side effects. Anything not listed here behaves as plain RAM.

use crate::decoder::VmInstruction;
use crate::fields::pointer_addr;
use crate::memory::{
    is_sfr_address, MemoryWord, REG_R0, SFR_KEY_STATUS, SFR_RANDOM, SFR_RD_FLAGS,
};
use crate::vm::VmState;

bitflags! {
    /// Bit masks for the WrFlags special function register.
    pub struct WrFlags: u8 {
        const RX_TX_POS  = 0x1;
        const IN_OUT_POS = 0x2;
        const MATRIX_OFF = 0x4;
        const LEDS_OFF   = 0x8;
    }
}

bitflags! {
    /// Bit masks for the RdFlags special function register.
    pub struct RdFlags: u8 {
        const USER_SYNC = 0x1;
        const V_FLAG    = 0x2;
    }
}

bitflags! {
    /// Bit masks for the KeyStatus special function register.
    pub struct KeyStatus: u8 {
        const JUST_PRESS = 0x1;
        const LAST_PRESS = 0x2;
        const ANY_PRESS  = 0x4;
    }
}

/// SerCtrl value selecting 9600 baud, the power-on default.
pub const SERIAL_BAUD_9600: MemoryWord = 0x3;

/// Clock periods in microseconds indexed by the value of the Clock register.
pub const CLOCK_PERIODS_USEC: [i64; 16] = [
    1, 10, 33, 100, 333, 1000, 2000, 5000, 10000, 20000, 50000, 100000, 200000, 500000, 1000000,
    2000000,
];

/// Sync periods in microseconds indexed by the value of the Sync register.
pub const SYNC_PERIODS_USEC: [i64; 16] = [
    1000, 1667, 2500, 4000, 6667, 10000, 16667, 25000, 40000, 66667, 100000, 166667, 250000,
    400000, 666667, 1000000,
];

/// Display labels for the Clock register values.
pub const CLOCK_FREQUENCIES: [&str; 16] = [
    "MAX", "100 KHz", "30 KHz", "10 KHz", "3 KHz", "1 KHz", "500 Hz", "200 Hz", "100 Hz", "50 Hz",
    "20 Hz", "10 Hz", "5 Hz", "2 Hz", "1 Hz", "0.5 Hz",
];

/// Overrides memory read behavior for special function registers. The value
/// lands in R0. Returns true if the access was handled.
pub fn maybe_handle_sfr_read(instr: &VmInstruction, vm: &mut VmState) -> bool {
    let addr = pointer_addr(instr);
    if !is_sfr_address(addr) {
        return false;
    }

    match addr {
        SFR_RD_FLAGS => {
            // USER_SYNC is a sticky latch, cleared by the read.
            let flags = vm.mem.read(SFR_RD_FLAGS);
            vm.mem.write(REG_R0, flags);
            vm.mem.write(SFR_RD_FLAGS, flags & !RdFlags::USER_SYNC.bits());
        }
        SFR_KEY_STATUS => {
            let status = vm.mem.read(SFR_KEY_STATUS);
            vm.mem.write(REG_R0, status);
            vm.mem.write(SFR_KEY_STATUS, status & !KeyStatus::JUST_PRESS.bits());
        }
        SFR_RANDOM => {
            vm.mem.write(REG_R0, vm.mem.read(SFR_RANDOM));
            let next = vm.rng.next();
            vm.mem.write(SFR_RANDOM, next);
        }
        _ => {
            let value = vm.mem.read(addr);
            vm.mem.write(REG_R0, value);
        }
    }

    true
}

/// Overrides memory write behavior for special function registers. The value
/// written is R0. Returns true if the access was handled.
pub fn maybe_handle_sfr_write(instr: &VmInstruction, vm: &mut VmState) -> bool {
    let addr = pointer_addr(instr);
    if !is_sfr_address(addr) {
        return false;
    }

    match addr {
        SFR_RANDOM => {
            let first = vm.rng.reseed(vm.mem.read(REG_R0));
            vm.mem.write(SFR_RANDOM, first);
        }
        _ => {
            let value = vm.mem.read(REG_R0);
            vm.mem.write(addr, value);
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_tables_span_the_documented_range() {
        assert_eq!(CLOCK_PERIODS_USEC[0x0], 1);
        assert_eq!(CLOCK_PERIODS_USEC[0xf], 2_000_000);
        assert_eq!(SYNC_PERIODS_USEC[0x0], 1_000);
        assert_eq!(SYNC_PERIODS_USEC[0xf], 1_000_000);
        assert!(CLOCK_PERIODS_USEC.windows(2).all(|w| w[0] < w[1]));
        assert!(SYNC_PERIODS_USEC.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn flag_bits_fit_in_a_nibble() {
        assert!(WrFlags::all().bits() <= 0xf);
        assert!(RdFlags::all().bits() <= 0xf);
        assert!(KeyStatus::all().bits() <= 0xf);
    }
}
