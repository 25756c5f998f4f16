// Terminal front end. Renders the pixel matrix and a status panel with
// termion, feeds key presses back into the key registers, and owns the
// pause/single-step state. The VM is only touched between cycles, and only
// through two sanctioned paths: the Page register and the key registers.
//
// Terminal teardown is guarded by a process-wide atomic so it can run at
// most once, whether it is triggered by a clean quit, a fatal VM error or
// the Drop impl. Fatal errors are printed only after the restore.

use std::io::{self, Stdout, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use termion::event::Key;
use termion::input::{Keys, TermRead};
use termion::raw::{IntoRawMode, RawTerminal};
use termion::{clear, color, cursor, AsyncReader};

use crate::clock::{as_usec, VmClock};
use crate::decoder::{decode_instruction, get_instruction_descriptor};
use crate::devices::{KeyStatus, WrFlags, CLOCK_FREQUENCIES};
use crate::memory::{
    NUM_PAGES, PAGE_SIZE, REG_IN, REG_OUT, SFR_CLOCK, SFR_DIMMER, SFR_IN_B, SFR_KEY_REG,
    SFR_KEY_STATUS, SFR_OUT_B, SFR_PAGE, SFR_RD_FLAGS, SFR_SYNC, SFR_WR_FLAGS,
};
use crate::ops::disassemble_instruction;
use crate::program::PROGRAM_MEMORY_SIZE;
use crate::vm::VmState;

/// Number of consecutive pages visible on the matrix at once.
pub const DISPLAY_PAGES: usize = 2;

const DIMMER_LEVELS: u16 = 0x10;

/// Delay after which a key press will generate a corresponding key release.
const KEY_UP_DELAY_USEC: i64 = 200_000;

/// Minimum period between redrawing status during execution.
const STATUS_UPDATE_USEC: i64 = 100_000;

/// Minimum period between UI updates.
pub const UI_UPDATE_PERIOD_USEC: i64 = 1_000;

/// Maximum time to sleep when waiting to synchronize to the next cycle,
/// so input handling stays responsive at slow clock rates.
pub const MAX_UI_SLEEP_USEC: i64 = 5_000;

/// Number of disassembled instructions to show before and after the current one.
const DISASSEMBLE_CONTEXT_SIZE: u16 = 5;

const STATUS_COL: u16 = 21;

/// True iff the terminal is in raw mode and needs cleanup.
static NEED_CLEANUP: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Copy, Clone, Default)]
pub struct UiOptions {
    pub start_paused: bool,
    pub red_mode: bool,
}

pub struct Ui {
    stdout: RawTerminal<Stdout>,
    keys: Keys<AsyncReader>,
    options: UiOptions,

    pub quit: bool,
    pub paused: bool,
    single_step: bool,

    /// True iff the VM state may have changed since the last update.
    vm_dirty: bool,
    last_pages: [[u8; PAGE_SIZE]; DISPLAY_PAGES],
    last_dimmer: u8,
    last_matrix_off: bool,
    display_drawn: bool,

    t_last_status_update: VmClock,
    t_last_key_press: VmClock,

    // Stats.
    dt_last_display_update: VmClock,
    dt_last_status_update: VmClock,
}

impl Ui {
    pub fn new(options: UiOptions) -> io::Result<Ui> {
        let mut stdout = io::stdout().into_raw_mode()?;
        write!(stdout, "{}{}", clear::All, cursor::Hide)?;
        stdout.flush()?;
        NEED_CLEANUP.store(true, Ordering::SeqCst);

        let mut ui = Ui {
            stdout,
            keys: termion::async_stdin().keys(),
            quit: false,
            paused: options.start_paused,
            single_step: false,
            options,
            vm_dirty: true,
            last_pages: [[0; PAGE_SIZE]; DISPLAY_PAGES],
            last_dimmer: 0,
            last_matrix_off: false,
            display_drawn: false,
            t_last_status_update: 0,
            t_last_key_press: 0,
            dt_last_display_update: 0,
            dt_last_status_update: 0,
        };
        ui.draw_frame()?;
        Ok(ui)
    }

    /// Processes pending input and redraws whatever changed.
    pub fn update(&mut self, vm: &mut VmState) -> io::Result<()> {
        self.handle_keys(vm);
        if self.quit || !self.vm_dirty {
            return Ok(());
        }
        self.maybe_update_display(vm)?;
        self.maybe_update_status(vm)?;
        self.vm_dirty = false;
        Ok(())
    }

    /// Called after every executed cycle. Single-step mode pauses again
    /// after each instruction.
    pub fn cycle_executed(&mut self) {
        self.vm_dirty = true;
        if self.single_step {
            self.paused = true;
        }
    }

    /// Restores the terminal. Idempotent; also run on drop.
    pub fn restore(&mut self) {
        if NEED_CLEANUP.swap(false, Ordering::SeqCst) {
            let _ = write!(
                self.stdout,
                "{}{}{}{}",
                color::Fg(color::Reset),
                clear::All,
                cursor::Goto(1, 1),
                cursor::Show
            );
            let _ = self.stdout.flush();
            let _ = self.stdout.suspend_raw_mode();
        }
    }

    fn handle_keys(&mut self, vm: &mut VmState) {
        let mut key = None;
        match self.keys.next() {
            Some(Ok(Key::Char('q'))) | Some(Ok(Key::Ctrl('c'))) => {
                self.quit = true;
                return;
            }
            Some(Ok(Key::Char('\n'))) => {
                self.single_step = false;
                self.paused = false;
            }
            Some(Ok(Key::Char(' '))) => {
                self.single_step = true;
                self.paused = false;
            }
            Some(Ok(Key::Left)) => {
                let page = vm.mem.read(SFR_PAGE).wrapping_sub(1) & 0xf;
                vm.mem.write(SFR_PAGE, page);
                self.vm_dirty = true;
            }
            Some(Ok(Key::Right)) => {
                let page = (vm.mem.read(SFR_PAGE) + 1) & 0xf;
                vm.mem.write(SFR_PAGE, page);
                self.vm_dirty = true;
            }
            Some(Ok(Key::Char(ch))) => {
                key = badge_key(ch);
            }
            _ => {}
        }

        if let Some(key) = key {
            let status = KeyStatus::JUST_PRESS | KeyStatus::LAST_PRESS | KeyStatus::ANY_PRESS;
            vm.mem.write(SFR_KEY_STATUS, status.bits());
            vm.mem.write(SFR_KEY_REG, key);
            self.vm_dirty = true;
            self.t_last_key_press = vm.clock.now();
        } else if vm.mem.read(SFR_KEY_STATUS) & KeyStatus::LAST_PRESS.bits() != 0 {
            // There is no portable way to get key release events, so assume
            // keys are released after a preset amount of time.
            let elapsed_usec = as_usec(vm.clock.now() - self.t_last_key_press);
            if elapsed_usec >= KEY_UP_DELAY_USEC {
                let released = vm.mem.read(SFR_KEY_STATUS)
                    & !(KeyStatus::LAST_PRESS | KeyStatus::ANY_PRESS).bits();
                vm.mem.write(SFR_KEY_STATUS, released);
                self.vm_dirty = true;
            }
        }
    }

    /// Draws the static window borders and headings.
    fn draw_frame(&mut self) -> io::Result<()> {
        let mut s = String::new();
        s.push_str(&format!("{}┌{}┐", cursor::Goto(1, 1), "─".repeat(PAGE_SIZE)));
        for row in 0..PAGE_SIZE as u16 {
            s.push_str(&format!(
                "{}│{}│",
                cursor::Goto(1, row + 2),
                " ".repeat(PAGE_SIZE)
            ));
        }
        s.push_str(&format!(
            "{}└{}┘",
            cursor::Goto(1, PAGE_SIZE as u16 + 2),
            "─".repeat(PAGE_SIZE)
        ));
        write!(self.stdout, "{}", s)?;
        self.stdout.flush()
    }

    fn maybe_update_display(&mut self, vm: &VmState) -> io::Result<()> {
        let start = vm.clock.now();

        let page = vm.mem.read(SFR_PAGE);
        let next_page = (page + 1) % NUM_PAGES as u8;
        let dimmer = vm.mem.read(SFR_DIMMER);
        let matrix_off =
            WrFlags::from_bits_truncate(vm.mem.read(SFR_WR_FLAGS)).contains(WrFlags::MATRIX_OFF);

        // Detect if nothing changed and skip the redraw.
        let mut pages = [[0u8; PAGE_SIZE]; DISPLAY_PAGES];
        pages[0].copy_from_slice(vm.mem.page(page));
        pages[1].copy_from_slice(vm.mem.page(next_page));
        if self.display_drawn
            && self.last_dimmer == dimmer
            && self.last_matrix_off == matrix_off
            && self.last_pages == pages
        {
            self.dt_last_display_update = vm.clock.now() - start;
            return Ok(());
        }
        self.last_pages = pages;
        self.last_dimmer = dimmer;
        self.last_matrix_off = matrix_off;
        self.display_drawn = true;

        let level = (u16::from(dimmer) + 1) * 255 / (DIMMER_LEVELS + 1);
        let on_color = if self.options.red_mode {
            color::Rgb(level as u8, 0, 0)
        } else {
            color::Rgb(level as u8, level as u8, level as u8)
        };

        let mut s = String::new();
        for row in 0..PAGE_SIZE {
            s.push_str(&format!("{}", cursor::Goto(2, row as u16 + 2)));
            // The higher page sits to the left of the selected page.
            for &p in &[next_page, page] {
                let nibble = vm.mem.page(p)[row];
                for bit in (0..4).rev() {
                    if !matrix_off && nibble & (1 << bit) != 0 {
                        s.push_str(&format!("{}▐▌", color::Fg(on_color)));
                    } else {
                        s.push_str("  ");
                    }
                }
            }
        }
        s.push_str(&format!("{}", color::Fg(color::Reset)));
        write!(self.stdout, "{}", s)?;
        self.stdout.flush()?;

        self.dt_last_display_update = vm.clock.now() - start;
        Ok(())
    }

    fn maybe_update_status(&mut self, vm: &VmState) -> io::Result<()> {
        let start = vm.clock.now();
        if !self.paused && as_usec(start - self.t_last_status_update) < STATUS_UPDATE_USEC {
            // Rate limit status updates when running to avoid slowdowns.
            return Ok(());
        }

        let io_pos =
            WrFlags::from_bits_truncate(vm.mem.read(SFR_WR_FLAGS)).contains(WrFlags::IN_OUT_POS);
        let (reg_out, reg_in) = if io_pos {
            (vm.mem.read(SFR_OUT_B), vm.mem.read(SFR_IN_B))
        } else {
            (vm.mem.read(REG_OUT), vm.mem.read(REG_IN))
        };

        let mut s = String::new();
        let mut row = 1;
        let line = |s: &mut String, row: &mut u16, text: String| {
            s.push_str(&format!("{}{}{}", cursor::Goto(STATUS_COL, *row), clear::UntilNewline, text));
            *row += 1;
        };

        line(&mut s, &mut row, format!("Last cycle (ns):            {:<10}", vm.dt_last_cycle));
        line(&mut s, &mut row, format!("Last cycle period (ns):     {:<10}", vm.dt_last_cycle_period));
        line(&mut s, &mut row, format!("Last user sync period (ns): {:<10}", vm.dt_last_user_sync_period));
        line(&mut s, &mut row, format!("Last display update (ns):   {:<10}", self.dt_last_display_update));
        line(&mut s, &mut row, format!("Last status update (ns):    {:<10}", self.dt_last_status_update));
        row += 1;

        line(
            &mut s,
            &mut row,
            format!(
                "PC: {:03x}   SP: {:x}   Flags: {:x}   {}",
                vm.reg_pc,
                vm.reg_sp,
                vm.reg_flags.bits(),
                if self.paused { "PAUSED " } else { "       " }
            ),
        );
        line(
            &mut s,
            &mut row,
            format!(
                "Page: {:x}   Clock: {:x} ({})   Sync: {:x}",
                vm.mem.read(SFR_PAGE),
                vm.mem.read(SFR_CLOCK),
                CLOCK_FREQUENCIES[vm.mem.read(SFR_CLOCK) as usize],
                vm.mem.read(SFR_SYNC)
            ),
        );
        line(
            &mut s,
            &mut row,
            format!(
                "Out: {:x}   In: {:x}   KeySts: {:x}   KeyReg: {:x}",
                reg_out,
                reg_in,
                vm.mem.read(SFR_KEY_STATUS),
                vm.mem.read(SFR_KEY_REG)
            ),
        );
        line(
            &mut s,
            &mut row,
            format!(
                "WrFlgs: {:x}   RdFlgs: {:x}   Dimmer: {:x}",
                vm.mem.read(SFR_WR_FLAGS),
                vm.mem.read(SFR_RD_FLAGS),
                vm.mem.read(SFR_DIMMER)
            ),
        );
        row += 1;

        line(&mut s, &mut row, String::from("R0 R1 R2 R3 R4 R5 R6 R7 R8 R9 10 11 12 13 14 15"));
        let mut regs = String::new();
        for i in 0..PAGE_SIZE as u8 {
            regs.push_str(&format!(" {:x} ", vm.mem.reg(i)));
        }
        line(&mut s, &mut row, regs);
        row += 1;

        // Disassemble the current instruction with context around it.
        line(&mut s, &mut row, String::from("ADDR:  OPC  INSTRUCTION"));
        line(&mut s, &mut row, String::from("-----------------------"));
        let first_pc = vm.reg_pc.saturating_sub(DISASSEMBLE_CONTEXT_SIZE);
        let last_pc = (vm.reg_pc + DISASSEMBLE_CONTEXT_SIZE).min(PROGRAM_MEMORY_SIZE as u16 - 1);
        for pc in first_pc..=last_pc {
            let instr = decode_instruction(vm.prg.fetch(pc));
            let descr = get_instruction_descriptor(&instr);
            line(
                &mut s,
                &mut row,
                format!(
                    "{}{:03x}:  {:x}{:x}{:x}  {:<20}",
                    if pc == vm.reg_pc { '>' } else { ' ' },
                    pc,
                    instr.nibble1,
                    instr.nibble2,
                    instr.nibble3,
                    disassemble_instruction(&instr, descr)
                ),
            );
        }
        row += 1;
        line(
            &mut s,
            &mut row,
            String::from("[space] step  [enter] run  [left/right] page  [q] quit"),
        );

        write!(self.stdout, "{}", s)?;
        self.stdout.flush()?;

        let end = vm.clock.now();
        self.dt_last_status_update = end - start;
        self.t_last_status_update = end;
        Ok(())
    }
}

impl Drop for Ui {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Reference keyboard map for the 14 badge keys.
fn badge_key(ch: char) -> Option<u8> {
    match ch {
        '\t' => Some(0),
        '1' => Some(1),
        '2' => Some(2),
        '3' => Some(3),
        '4' => Some(4),
        'a' => Some(5),
        's' => Some(6),
        'd' => Some(7),
        'f' => Some(8),
        'z' => Some(9),
        'x' => Some(10),
        'c' => Some(11),
        'v' => Some(12),
        '/' => Some(13),
        _ => None,
    }
}
