// The monitor REPL: a fixed table of commands over plain stdin line reads.
// Handlers print their results directly; a handler never changes machine
// state when its arguments fail to parse.

use crate::devices::Signal;
use crate::expr;
use crate::memory::Width;
use crate::processor::{Machine, State};
use std::io::{self, BufRead, Write};

struct Command {
    name: &'static str,
    help: &'static str,
    handler: fn(&mut Machine, Option<&str>) -> Signal,
}

const CMD_TABLE: &[Command] = &[
    Command {
        name: "help",
        help: "Display information about all supported commands",
        handler: cmd_help,
    },
    Command { name: "c", help: "Continue the execution of the program", handler: cmd_c },
    Command { name: "q", help: "Exit remu32", handler: cmd_q },
    Command { name: "si", help: "Single step execution (si [N])", handler: cmd_si },
    Command {
        name: "info",
        help: "Print program information (info r - registers, info w - watchpoints)",
        handler: cmd_info,
    },
    Command { name: "x", help: "Scan memory (x N EXPR)", handler: cmd_x },
    Command { name: "p", help: "Evaluate an expression (p EXPR)", handler: cmd_p },
    Command { name: "w", help: "Set watchpoint (w EXPR)", handler: cmd_w },
    Command { name: "d", help: "Delete watchpoint (d N)", handler: cmd_d },
];

fn cmd_help(_m: &mut Machine, args: Option<&str>) -> Signal {
    match args {
        None => {
            for cmd in CMD_TABLE {
                println!("{} - {}", cmd.name, cmd.help);
            }
        }
        Some(name) => match CMD_TABLE.iter().find(|cmd| cmd.name == name) {
            Some(cmd) => println!("{} - {}", cmd.name, cmd.help),
            None => println!("Unknown command '{}'", name),
        },
    }
    Signal::Ok
}

fn cmd_c(m: &mut Machine, _args: Option<&str>) -> Signal {
    m.run(u64::MAX);
    Signal::Ok
}

fn cmd_q(m: &mut Machine, _args: Option<&str>) -> Signal {
    m.state = State::Quit;
    Signal::Quit
}

fn cmd_si(m: &mut Machine, args: Option<&str>) -> Signal {
    let steps = match args {
        None => 1,
        Some(text) => match text.trim().parse::<u64>() {
            Ok(n) if n > 0 => n,
            _ => {
                println!("Invalid step count: {}", text.trim());
                return Signal::Ok;
            }
        },
    };
    m.run(steps);
    Signal::Ok
}

fn cmd_info(m: &mut Machine, args: Option<&str>) -> Signal {
    match args.map(str::trim) {
        Some("r") => println!("{}", m.cpu),
        Some("w") => m.watchpoints.list(),
        _ => {
            println!("Usage: info r - print registers");
            println!("       info w - list watchpoints");
        }
    }
    Signal::Ok
}

fn cmd_x(m: &mut Machine, args: Option<&str>) -> Signal {
    let usage = || println!("Usage: x N EXPR - scan memory");
    let args = match args {
        Some(args) => args,
        None => {
            usage();
            return Signal::Ok;
        }
    };
    let (count_str, expr_str) = match args.trim().split_once(char::is_whitespace) {
        Some(parts) => parts,
        None => {
            usage();
            return Signal::Ok;
        }
    };
    let count = match count_str.parse::<u32>() {
        Ok(n) if n > 0 => n,
        _ => {
            println!("Invalid count!");
            usage();
            return Signal::Ok;
        }
    };
    let Machine { cpu, bus, .. } = m;
    let addr = match expr::expr(expr_str, cpu, bus) {
        Ok(value) => value,
        Err(e) => {
            println!("Invalid expression: {}", e);
            return Signal::Ok;
        }
    };
    for i in 0..count {
        let p = addr.wrapping_add(i * 4);
        match bus.read(p, Width::Word) {
            Ok(word) => println!("0x{:08x}: {:08x}", p, word),
            Err(_) => {
                println!("Cannot access memory at address 0x{:08x}", p);
                break;
            }
        }
    }
    Signal::Ok
}

fn cmd_p(m: &mut Machine, args: Option<&str>) -> Signal {
    let args = match args {
        Some(args) => args,
        None => {
            println!("Usage: p EXPR");
            return Signal::Ok;
        }
    };
    let Machine { cpu, bus, .. } = m;
    match expr::expr(args, cpu, bus) {
        Ok(value) => println!("{}", value),
        Err(e) => println!("Invalid expression: {}", e),
    }
    Signal::Ok
}

fn cmd_w(m: &mut Machine, args: Option<&str>) -> Signal {
    let args = match args {
        Some(args) => args.trim(),
        None => {
            println!("Usage: w EXPR");
            return Signal::Ok;
        }
    };
    let Machine { cpu, bus, .. } = m;
    let value = match expr::expr(args, cpu, bus) {
        Ok(value) => value,
        Err(e) => {
            println!("Invalid expression: {}", e);
            return Signal::Ok;
        }
    };
    match m.watchpoints.set(args, value) {
        Some(id) => println!("Watchpoint {}: {} = 0x{:08x}", id, args, value),
        None => println!("No free watchpoint"),
    }
    Signal::Ok
}

fn cmd_d(m: &mut Machine, args: Option<&str>) -> Signal {
    let id = match args.map(|a| a.trim().parse::<usize>()) {
        Some(Ok(id)) => id,
        _ => {
            println!("Usage: d N");
            return Signal::Ok;
        }
    };
    if m.watchpoints.delete(id) {
        println!("Delete watchpoint {}", id);
    } else {
        println!("No watchpoint's number is {}", id);
    }
    Signal::Ok
}

pub struct Sdb {
    batch: bool,
}

impl Sdb {
    pub fn new(batch: bool) -> Self {
        Sdb { batch }
    }

    // Dispatch a single command line; exposed so tests can drive the monitor
    // without a terminal.
    pub fn dispatch(&mut self, m: &mut Machine, line: &str) -> Signal {
        let line = line.trim();
        let (cmd, rest) = match line.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd, Some(rest.trim())),
            None => (line, None),
        };
        if cmd.is_empty() {
            return Signal::NoOp;
        }
        let args = rest.filter(|r| !r.is_empty());
        match CMD_TABLE.iter().find(|entry| entry.name == cmd) {
            Some(entry) => (entry.handler)(m, args),
            None => {
                println!("Unknown command '{}'", cmd);
                Signal::NoOp
            }
        }
    }

    pub fn mainloop(&mut self, m: &mut Machine) {
        if self.batch {
            cmd_c(m, None);
            return;
        }
        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();
        loop {
            print!("(remu32) ");
            let _ = io::stdout().flush();
            let line = match lines.next() {
                Some(Ok(line)) => line,
                _ => return,
            };
            if self.dispatch(m, &line) == Signal::Quit {
                return;
            }
            if m.state == State::Quit {
                return;
            }
        }
    }
}
