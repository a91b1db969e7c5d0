// The numeric-ID syscall switch, entered when a guest ECALL traps into the
// built-in kernel personality. a7 selects, a0..a2 carry arguments, a0 takes
// the return value.

use crate::loader::naive_uload;
use crate::memory::Width;
use crate::processor::{Fault, Machine, State};

pub const SYS_EXIT: u32 = 0;
pub const SYS_YIELD: u32 = 1;
pub const SYS_OPEN: u32 = 2;
pub const SYS_READ: u32 = 3;
pub const SYS_WRITE: u32 = 4;
pub const SYS_KILL: u32 = 5;
pub const SYS_GETPID: u32 = 6;
pub const SYS_CLOSE: u32 = 7;
pub const SYS_LSEEK: u32 = 8;
pub const SYS_BRK: u32 = 9;
pub const SYS_FSTAT: u32 = 10;
pub const SYS_TIME: u32 = 11;
pub const SYS_SIGNAL: u32 = 12;
pub const SYS_EXECVE: u32 = 13;
pub const SYS_FORK: u32 = 14;
pub const SYS_LINK: u32 = 15;
pub const SYS_UNLINK: u32 = 16;
pub const SYS_WAIT: u32 = 17;
pub const SYS_TIMES: u32 = 18;
pub const SYS_GETTIMEOFDAY: u32 = 19;

const SYSCALL_NAMES: [&str; 20] = [
    "exit", "yield", "open", "read", "write", "kill", "getpid", "close", "lseek", "brk", "fstat",
    "time", "signal", "execve", "fork", "link", "unlink", "wait", "times", "gettimeofday",
];

pub fn syscall_name(id: u32) -> &'static str {
    SYSCALL_NAMES.get(id as usize).copied().unwrap_or("unknown_syscall")
}

pub fn do_syscall(m: &mut Machine) -> Result<(), Fault> {
    let id = m.cpu.reg(17);
    let a0 = m.cpu.reg(10);
    let a1 = m.cpu.reg(11);
    let a2 = m.cpu.reg(12);

    let ret = match id {
        // exit hands control to the shell; if the ramdisk has none, the
        // machine ends with the guest's exit code.
        SYS_EXIT => {
            if naive_uload(m, "/bin/nterm").is_err() {
                m.state = State::End { code: a0 };
            }
            None
        }
        SYS_YIELD => {
            m.pump_devices();
            None
        }
        SYS_OPEN => {
            let path = m.bus.read_cstr(a0)?;
            Some(m.fs.open(&path, a1, a2) as u32)
        }
        SYS_READ => {
            let Machine { fs, bus, .. } = m;
            Some(fs.read(bus, a0 as usize, a1, a2 as usize)? as u32)
        }
        SYS_WRITE => {
            let Machine { fs, bus, .. } = m;
            Some(fs.write(bus, a0 as usize, a1, a2 as usize)? as u32)
        }
        SYS_CLOSE => Some(m.fs.close(a0 as usize) as u32),
        SYS_LSEEK => Some(m.fs.lseek(a0 as usize, a1 as i32, a2)? as u32),
        // Single address space: the heap grows freely and brk always
        // succeeds.
        SYS_BRK => Some(0),
        SYS_EXECVE => {
            let path = m.bus.read_cstr(a0)?;
            naive_uload(m, &path).map_err(|source| Fault::Exec { path, source })?;
            None
        }
        SYS_GETTIMEOFDAY => {
            let us = m.rtc.borrow().uptime_us();
            m.bus.write(a0, Width::Word, (us / 1_000_000) as u32)?;
            m.bus.write(a0.wrapping_add(4), Width::Word, (us % 1_000_000) as u32)?;
            Some(0)
        }
        _ => return Err(Fault::UnknownSyscall { id }),
    };

    if let Some(value) = ret {
        m.cpu.set_reg(10, value);
    }
    log::trace!(
        target: "strace",
        "{}({}, {}, {}) = {}",
        syscall_name(id),
        a0 as i32,
        a1 as i32,
        a2 as i32,
        m.cpu.reg(10) as i32
    );
    Ok(())
}
