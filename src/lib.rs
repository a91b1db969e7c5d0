pub mod devices;
pub mod expr;
pub mod fs;
pub mod ftrace;
pub mod instructions;
pub mod iringbuf;
pub mod loader;
pub mod manifest;
pub mod memory;
pub mod parser;
pub mod processor;
pub mod sdb;
pub mod syscall;
pub mod watchpoint;

pub use processor::{Fault, Machine, State};

use memory::MSIZE;

pub struct Configuration {
    pub ram_size: usize,
    pub display: (u32, u32),
    pub ramdisk: Vec<u8>,
    pub with_window: bool,
    pub capture_serial: bool,
}

impl Configuration {
    pub fn new() -> Configuration {
        Configuration {
            ram_size: MSIZE,
            display: (400, 300),
            ramdisk: Vec::new(),
            with_window: false,
            capture_serial: false,
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration::new()
    }
}
