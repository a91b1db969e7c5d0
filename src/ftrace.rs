// Function-call tracing. The ELF symbol table gives us (name, addr, size)
// ranges; JAL/JALR retirement tells us when control crosses one. Depth is a
// bare counter for indentation, there is no real call-stack validation.

use goblin::elf::{sym, Elf};
use std::fs;
use std::path::Path;
use thiserror::Error;

const FTRACE_INDENT: usize = 2;

#[derive(Debug, Error)]
pub enum FtraceError {
    #[error("cannot open ELF: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse ELF: {0}")]
    Parse(#[from] goblin::error::Error),
    #[error("no function symbols found")]
    NoSymbols,
}

pub struct FuncSym {
    pub name: String,
    pub addr: u32,
    pub size: u32,
}

pub struct FuncTracer {
    syms: Vec<FuncSym>,
    depth: usize,
}

impl FuncTracer {
    pub fn init(path: &Path) -> Result<Self, FtraceError> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    // STT_FUNC symbols with nonzero size, sorted by address. goblin handles
    // both ELF classes with the same header types.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FtraceError> {
        let elf = Elf::parse(bytes)?;
        let mut syms = Vec::new();
        for symbol in elf.syms.iter() {
            if symbol.st_type() == sym::STT_FUNC && symbol.st_size > 0 {
                if let Some(name) = elf.strtab.get_at(symbol.st_name) {
                    syms.push(FuncSym {
                        name: name.to_string(),
                        addr: symbol.st_value as u32,
                        size: symbol.st_size as u32,
                    });
                }
            }
        }
        if syms.is_empty() {
            return Err(FtraceError::NoSymbols);
        }
        syms.sort_by_key(|s| s.addr);
        log::info!("ftrace: loaded {} function symbols", syms.len());
        Ok(FuncTracer { syms, depth: 0 })
    }

    // Last symbol at or below the query address, if the query falls inside
    // its range.
    pub fn lookup(&self, addr: u32) -> &str {
        let idx = self.syms.partition_point(|s| s.addr <= addr);
        if idx == 0 {
            return "???";
        }
        let sym = &self.syms[idx - 1];
        if addr < sym.addr.wrapping_add(sym.size) {
            &sym.name
        } else {
            "???"
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn num_symbols(&self) -> usize {
        self.syms.len()
    }

    fn on_call(&mut self, pc: u32, target: u32) {
        let indent = " ".repeat(FTRACE_INDENT * self.depth);
        let callee = self.lookup(target);
        log::trace!(target: "ftrace", "0x{:08x}: {}call [{}@0x{:08x}]", pc, indent, callee, target);
        self.depth += 1;
    }

    fn on_ret(&mut self, pc: u32) {
        if self.depth > 0 {
            self.depth -= 1;
        }
        let indent = " ".repeat(FTRACE_INDENT * self.depth);
        let current = self.lookup(pc);
        log::trace!(target: "ftrace", "0x{:08x}: {}ret  [{}]", pc, indent, current);
    }

    pub fn on_jal(&mut self, pc: u32, target: u32) {
        self.on_call(pc, target);
    }

    // jalr x0, x1, 0 is the return idiom; rd == ra is a call; rd == x0 with
    // rs1 != ra is a tail call (counted as a call). Everything else is a
    // jump table or computed goto and is ignored.
    pub fn on_jalr(&mut self, pc: u32, rd: usize, rs1: usize, imm: i32, target: u32) {
        if rd == 0 && rs1 == 1 && imm == 0 {
            self.on_ret(pc);
        } else if rd == 1 {
            self.on_call(pc, target);
        } else if rd == 0 && rs1 != 1 {
            self.on_call(pc, target);
        }
    }
}
