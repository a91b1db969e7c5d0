// Ring of the most recently retired instructions, dumped on abnormal exit
// with a marker on the row that crashed.

use std::collections::VecDeque;
use termion::color;

pub const IRING_SIZE: usize = 16;

pub struct InstRing {
    items: VecDeque<(u32, String)>,
}

impl InstRing {
    pub fn new() -> Self {
        InstRing { items: VecDeque::with_capacity(IRING_SIZE) }
    }

    pub fn push(&mut self, pc: u32, asm: String) {
        if self.items.len() == IRING_SIZE {
            self.items.pop_front();
        }
        self.items.push_back((pc, asm));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    // Live entries in insertion order, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &(u32, String)> {
        self.items.iter()
    }

    pub fn dump(&self, crash_pc: u32) {
        println!("\n========== Instruction Ring Buffer ==========");
        for (pc, asm) in &self.items {
            if *pc == crash_pc {
                println!(
                    "{}-->{} 0x{:08x}: {}",
                    color::Fg(color::Red),
                    color::Fg(color::Reset),
                    pc,
                    asm
                );
            } else {
                println!("    0x{:08x}: {}", pc, asm);
            }
        }
        println!("=============================================");
    }
}
