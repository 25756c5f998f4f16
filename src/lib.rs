// Emulator for a 4-bit badge microcontroller: 12-bit instructions, a
// 256-nibble address space with memory-mapped peripherals, a 5-frame call
// stack and a programmable cycle clock. The library hosts the whole machine;
// the binary in main.rs only parses arguments and wires it up.

#[macro_use]
extern crate bitflags;

pub mod clock;
pub mod conversions;
pub mod decoder;
pub mod devices;
pub mod fields;
pub mod memory;
pub mod ops;
pub mod program;
pub mod rng;
pub mod ui;
pub mod vm;

use std::io;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::program::Program;
use crate::ui::{Ui, UiOptions, MAX_UI_SLEEP_USEC, UI_UPDATE_PERIOD_USEC};
use crate::vm::{VmError, VmState};

#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Vm(#[from] VmError),
}

pub struct Emulator {
    pub vm: VmState,
}

impl Emulator {
    /// Creates an emulator in power-on state, taking ownership of the
    /// program image.
    pub fn new(prg: Program) -> Emulator {
        Emulator { vm: VmState::new(prg) }
    }

    /// Drives the machine until the user quits or a fatal error occurs. The
    /// loop never sleeps longer than the shortest of the remaining cycle
    /// time and the UI refresh budget, so key handling stays responsive even
    /// at the slowest clock rates. The terminal is restored before any error
    /// is returned.
    pub fn run(&mut self, options: UiOptions) -> Result<(), EmulatorError> {
        let mut ui = Ui::new(options)?;

        while !ui.quit {
            // Process input and redraw; the first pass happens before any
            // cycle so single-step mode starts on the first instruction.
            ui.update(&mut self.vm)?;
            if ui.quit {
                break;
            }
            if ui.paused {
                sleep_usec(UI_UPDATE_PERIOD_USEC); // The cycle clock is paused.
                continue;
            }

            // Check how much time is left until the next cycle is due.
            let wait_usec = self.vm.cycle_wait_usec();
            if wait_usec > 0 {
                sleep_usec(wait_usec.min(MAX_UI_SLEEP_USEC));
                if wait_usec > MAX_UI_SLEEP_USEC {
                    continue; // The next cycle is not here yet.
                }
            }

            if let Err(err) = self.vm.execute_cycle() {
                ui.restore();
                return Err(err.into());
            }
            ui.cycle_executed();
        }

        ui.restore();
        Ok(())
    }
}

fn sleep_usec(usec: i64) {
    if usec > 0 {
        thread::sleep(Duration::from_micros(usec as u64));
    }
}
