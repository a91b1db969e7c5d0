// The machine context and its evaluation loop. Everything that mutates guest
// state (interpreter, syscall dispatcher, monitor) borrows the Machine; there
// is exactly one thread of control, so program order is commit order.

use crate::devices::{Framebuffer, Keyboard, Rtc, Serial, Signal, VgaCtl};
use crate::devices::{FB_MMIO, KBD_MMIO, RTC_MMIO, SERIAL_MMIO, VGACTL_MMIO};
use crate::expr;
use crate::fs::FileSystem;
use crate::ftrace::FuncTracer;
use crate::iringbuf::InstRing;
use crate::loader::LoaderError;
use crate::memory::{AccessFault, Bus, Width, MBASE};
use crate::parser::parse_instruction;
use crate::watchpoint::WatchPool;
use crate::Configuration;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use termion::color;
use thiserror::Error;

pub const CSR_MTVEC: usize = 1;
pub const CSR_MEPC: usize = 2;
pub const CSR_MCAUSE: usize = 3;
pub const CSR_MSTATUS: usize = 4;
const NR_CSR: usize = 5;

pub const CAUSE_MISALIGNED_FETCH: u32 = 0;
pub const CAUSE_ECALL_M: u32 = 11;

// How many retired instructions between device polls during `run`.
const DEVICE_UPDATE_INTERVAL: u64 = 4096;

pub const REG_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

#[derive(Debug, Error)]
pub enum Fault {
    #[error("{0}")]
    Access(AccessFault),
    #[error("invalid instruction 0x{word:08x} at pc = 0x{pc:08x}")]
    IllegalInstruction { pc: u32, word: u32 },
    #[error("jump to misaligned target 0x{target:08x} with no trap handler installed")]
    MisalignedTarget { target: u32 },
    #[error("unhandled syscall {id}")]
    UnknownSyscall { id: u32 },
    #[error("invalid whence {0} in lseek")]
    BadWhence(u32),
    #[error("access to unimplemented CSR 0x{addr:03x}")]
    UnknownCsr { addr: u32 },
    #[error("execve of '{path}' failed: {source}")]
    Exec { path: String, source: LoaderError },
}

impl From<AccessFault> for Fault {
    fn from(fault: AccessFault) -> Self {
        Fault::Access(fault)
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum State {
    Stop,
    Running,
    End { code: u32 },
    Abort,
    Quit,
}

pub struct Cpu {
    pub pc: u32,
    pub npc: u32,
    pub x: [u32; 32],
    pub csr: [u32; NR_CSR],
}

impl Cpu {
    pub fn new() -> Self {
        Cpu { pc: MBASE, npc: MBASE, x: [0; 32], csr: [0; NR_CSR] }
    }

    pub fn reg(&self, i: usize) -> u32 {
        self.x[i]
    }

    // x0 is hardwired to zero; writes to it are discarded.
    pub fn set_reg(&mut self, i: usize, value: u32) {
        if i != 0 {
            self.x[i] = value;
        }
    }

    pub fn mepc(&self) -> u32 {
        self.csr[CSR_MEPC]
    }

    // The dense CSR bank only backs the registers trap delivery needs.
    pub fn csr_index(addr: u32) -> Option<usize> {
        match addr {
            0x300 => Some(CSR_MSTATUS),
            0x305 => Some(CSR_MTVEC),
            0x341 => Some(CSR_MEPC),
            0x342 => Some(CSR_MCAUSE),
            _ => None,
        }
    }

    // Records the trap and hands the caller the handler address to install.
    pub fn raise_intr(&mut self, cause: u32, epc: u32) -> u32 {
        log::trace!(
            target: "etrace",
            "exception: mcause = 0x{:08x}, mepc = 0x{:08x}, mtvec = 0x{:08x}",
            cause,
            epc,
            self.csr[CSR_MTVEC]
        );
        self.csr[CSR_MCAUSE] = cause;
        self.csr[CSR_MEPC] = epc;
        self.csr[CSR_MTVEC]
    }

    // No asynchronous interrupt sources in this design.
    pub fn query_intr(&self) -> Option<u32> {
        None
    }

    pub fn reg_by_name(&self, name: &str) -> Option<u32> {
        match name {
            "pc" => Some(self.pc),
            "fp" => Some(self.x[8]),
            _ => REG_NAMES.iter().position(|&n| n == name).map(|i| self.x[i]),
        }
    }
}

impl fmt::Display for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..32 {
            writeln!(f, "{:<5} 0x{:08x}  {}", REG_NAMES[i], self.x[i], self.x[i])?;
        }
        write!(f, "{:<5} 0x{:08x}", "pc", self.pc)
    }
}

pub struct Machine {
    pub cpu: Cpu,
    pub bus: Bus,
    pub state: State,
    pub iring: InstRing,
    pub ftrace: Option<FuncTracer>,
    pub fs: FileSystem,
    pub watchpoints: WatchPool,
    pub serial: Rc<RefCell<Serial>>,
    pub rtc: Rc<RefCell<Rtc>>,
    pub keyboard: Rc<RefCell<Keyboard>>,
    pub gpu: Rc<RefCell<Framebuffer>>,
    steps: u64,
}

impl Machine {
    pub fn new(config: Configuration) -> Machine {
        let keyboard = Keyboard::new();
        let (width, height) = config.display;
        let gpu = if config.with_window {
            Framebuffer::with_window(width, height, keyboard.clone())
        } else {
            Framebuffer::new(width, height, keyboard.clone())
        };
        let serial = if config.capture_serial { Serial::capturing() } else { Serial::new() };
        let rtc = Rtc::new();

        let mut bus = Bus::new(config.ram_size);
        bus.attach(SERIAL_MMIO, 8, Box::new(serial.clone()));
        bus.attach(RTC_MMIO, 8, Box::new(rtc.clone()));
        bus.attach(KBD_MMIO, 4, Box::new(keyboard.clone()));
        bus.attach(VGACTL_MMIO, 8, VgaCtl::new(gpu.clone()));
        bus.attach(FB_MMIO, gpu.borrow().vmem_size() as u32, Box::new(gpu.clone()));

        let fs = FileSystem::new(config.ramdisk, serial.clone(), keyboard.clone(), gpu.clone());

        Machine {
            cpu: Cpu::new(),
            bus,
            state: State::Stop,
            iring: InstRing::new(),
            ftrace: None,
            fs,
            watchpoints: WatchPool::new(),
            serial,
            rtc,
            keyboard,
            gpu,
            steps: 0,
        }
    }

    pub fn vaddr_read(&mut self, addr: u32, width: Width) -> Result<u32, Fault> {
        Ok(self.bus.read(addr, width)?)
    }

    pub fn vaddr_write(&mut self, addr: u32, width: Width, value: u32) -> Result<(), Fault> {
        Ok(self.bus.write(addr, width, value)?)
    }

    // Control transfer with the alignment rule: a misaligned target raises
    // cause 0, and without a handler installed that is fatal.
    pub fn jump_to(&mut self, target: u32) -> Result<(), Fault> {
        if target & 0x3 != 0 {
            let tvec = self.cpu.raise_intr(CAUSE_MISALIGNED_FETCH, self.cpu.pc);
            if tvec == 0 {
                return Err(Fault::MisalignedTarget { target });
            }
            self.cpu.npc = tvec;
        } else {
            self.cpu.npc = target;
        }
        Ok(())
    }

    // Fetch, decode, execute, commit. Hooks fire in order: ring buffer,
    // ftrace (from the jump instructions themselves), then the watchpoint
    // sweep after commit.
    pub fn step(&mut self) {
        let pc = self.cpu.pc;
        let word = match self.bus.read(pc, Width::Word) {
            Ok(word) => word,
            Err(fault) => return self.fatal(Fault::Access(fault)),
        };
        let instr = match parse_instruction(word) {
            Some(instr) => instr,
            None => return self.fatal(Fault::IllegalInstruction { pc, word }),
        };
        self.iring.push(pc, instr.as_asm(pc));
        self.cpu.npc = pc.wrapping_add(4);
        if let Err(fault) = instr.execute(self) {
            return self.fatal(fault);
        }
        self.cpu.pc = self.cpu.npc;
        self.cpu.x[0] = 0;
        // A trap that already left the RUNNING state (ebreak, abort) wins
        // over a watchpoint hit in the same cycle.
        if self.state == State::Running {
            self.check_watchpoints();
        }
    }

    pub fn run(&mut self, n: u64) {
        match self.state {
            State::End { .. } | State::Abort => {
                println!("Program execution has ended. To restart the program, exit and run again.");
                return;
            }
            _ => self.state = State::Running,
        }
        for _ in 0..n {
            self.step();
            self.steps += 1;
            if self.steps % DEVICE_UPDATE_INTERVAL == 0 {
                self.pump_devices();
            }
            if self.state != State::Running {
                break;
            }
        }
        match self.state {
            State::Running => self.state = State::Stop,
            State::End { code } => {
                if code == 0 {
                    println!(
                        "remu32: {}HIT GOOD TRAP{} at pc = 0x{:08x}",
                        color::Fg(color::Green),
                        color::Fg(color::Reset),
                        self.cpu.pc
                    );
                } else {
                    println!(
                        "remu32: {}HIT BAD TRAP{} at pc = 0x{:08x} (exit code {})",
                        color::Fg(color::Red),
                        color::Fg(color::Reset),
                        self.cpu.pc,
                        code
                    );
                    self.iring.dump(self.cpu.pc);
                }
            }
            State::Abort => {
                println!(
                    "remu32: {}ABORT{} at pc = 0x{:08x}",
                    color::Fg(color::Red),
                    color::Fg(color::Reset),
                    self.cpu.pc
                );
            }
            _ => {}
        }
    }

    fn fatal(&mut self, fault: Fault) {
        log::error!("{}", fault);
        self.iring.dump(self.cpu.pc);
        self.state = State::Abort;
    }

    pub fn pump_devices(&mut self) {
        if self.bus.update() == Signal::Quit {
            self.state = State::Quit;
        }
    }

    // Re-evaluate every enabled watchpoint; the first observed change wins
    // and stops the machine for this cycle.
    pub fn check_watchpoints(&mut self) {
        let Machine { cpu, bus, watchpoints, state, .. } = self;
        for (id, wp) in watchpoints.iter_mut() {
            if !wp.enabled {
                continue;
            }
            let new_value = match expr::expr(&wp.expr, cpu, bus) {
                Ok(value) => value,
                Err(_) => continue,
            };
            if new_value != wp.old_value {
                println!("Watchpoint {}: {}", id, wp.expr);
                println!();
                println!("Old value     = 0x{:08x}", wp.old_value);
                println!("Current value = 0x{:08x}", new_value);
                wp.old_value = new_value;
                *state = State::Stop;
                return;
            }
            wp.old_value = new_value;
        }
    }
}
