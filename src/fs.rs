// The guest-side file table. A descriptor is an index into the table; the
// current offset lives on the entry itself, so each file has a single opener
// at a time. Entries are either windows into the ramdisk image or thin
// adapters over a device.

use crate::devices::{key_name, Framebuffer, Keyboard, Serial};
use crate::manifest::RAMDISK_FILES;
use crate::memory::Bus;
use crate::processor::Fault;
use std::cell::RefCell;
use std::rc::Rc;

pub const FD_STDIN: usize = 0;
pub const FD_STDOUT: usize = 1;
pub const FD_STDERR: usize = 2;
pub const FD_FB: usize = 3;

pub const SEEK_SET: u32 = 0;
pub const SEEK_CUR: u32 = 1;
pub const SEEK_END: u32 = 2;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Backend {
    RamDisk { disk_offset: usize },
    Serial,
    Framebuffer,
    EventStream,
    DispInfo,
    Invalid,
}

pub struct FileInfo {
    pub name: String,
    pub size: usize,
    pub backend: Backend,
    pub open_offset: usize,
}

pub struct FileSystem {
    table: Vec<FileInfo>,
    ramdisk: Vec<u8>,
    serial: Rc<RefCell<Serial>>,
    keyboard: Rc<RefCell<Keyboard>>,
    gpu: Rc<RefCell<Framebuffer>>,
}

fn entry(name: &str, size: usize, backend: Backend) -> FileInfo {
    FileInfo { name: name.to_string(), size, backend, open_offset: 0 }
}

impl FileSystem {
    pub fn new(
        ramdisk: Vec<u8>,
        serial: Rc<RefCell<Serial>>,
        keyboard: Rc<RefCell<Keyboard>>,
        gpu: Rc<RefCell<Framebuffer>>,
    ) -> Self {
        let (width, height) = gpu.borrow().config();
        let fb_size = (width * height * 4) as usize;
        let mut table = vec![
            entry("stdin", 0, Backend::Invalid),
            entry("stdout", 0, Backend::Serial),
            entry("stderr", 0, Backend::Serial),
            entry("/dev/fb", fb_size, Backend::Framebuffer),
        ];
        for file in RAMDISK_FILES {
            table.push(entry(
                file.name,
                file.size,
                Backend::RamDisk { disk_offset: file.disk_offset },
            ));
        }
        table.push(entry("/dev/events", 0, Backend::EventStream));
        table.push(entry("/proc/dispinfo", 0, Backend::DispInfo));
        FileSystem { table, ramdisk, serial, keyboard, gpu }
    }

    // The manifest normally comes from the image packer at build time; test
    // rigs (and ad-hoc images) grow the table the same way the generated
    // entries do.
    pub fn register(&mut self, name: &str, data: &[u8]) -> usize {
        let disk_offset = self.ramdisk.len();
        self.ramdisk.extend_from_slice(data);
        // Keep the device pseudo-files at the end of the table.
        let at = self.table.len() - 2;
        self.table.insert(
            at,
            entry(name, data.len(), Backend::RamDisk { disk_offset }),
        );
        at
    }

    pub fn file(&self, fd: usize) -> Option<&FileInfo> {
        self.table.get(fd)
    }

    pub fn open(&mut self, pathname: &str, _flags: u32, _mode: u32) -> i32 {
        for (i, file) in self.table.iter_mut().enumerate() {
            if file.name == pathname {
                file.open_offset = 0;
                return i as i32;
            }
        }
        log::info!("fs_open: no such file '{}'", pathname);
        -1
    }

    pub fn read(&mut self, bus: &mut Bus, fd: usize, buf: u32, len: usize) -> Result<usize, Fault> {
        let (backend, offset, size) = match self.table.get(fd) {
            Some(file) => (file.backend, file.open_offset, file.size),
            None => {
                log::warn!("fs_read: bad descriptor {}", fd);
                return Ok(0);
            }
        };
        let count = match backend {
            Backend::EventStream => self.events_read(bus, buf, len)?,
            Backend::DispInfo => self.dispinfo_read(bus, buf, len)?,
            Backend::RamDisk { disk_offset } => {
                if offset >= size {
                    0
                } else {
                    let len = len.min(size - offset);
                    self.ramdisk_read(bus, buf, disk_offset + offset, len)?
                }
            }
            _ => {
                log::warn!("fs_read: '{}' is not readable", self.table[fd].name);
                0
            }
        };
        self.table[fd].open_offset += count;
        Ok(count)
    }

    pub fn write(&mut self, bus: &mut Bus, fd: usize, buf: u32, len: usize) -> Result<usize, Fault> {
        let (backend, offset, size) = match self.table.get(fd) {
            Some(file) => (file.backend, file.open_offset, file.size),
            None => {
                log::warn!("fs_write: bad descriptor {}", fd);
                return Ok(0);
            }
        };
        let count = match backend {
            Backend::Serial => {
                let bytes = bus.ram(buf, len)?.to_vec();
                let mut serial = self.serial.borrow_mut();
                for byte in &bytes {
                    serial.putch(*byte);
                }
                len
            }
            // The open offset doubles as the pixel cursor here; seeking the
            // descriptor positions the next blit.
            Backend::Framebuffer => self.fb_write(bus, buf, offset, len)?,
            Backend::RamDisk { disk_offset } => {
                if offset >= size {
                    0
                } else {
                    let len = len.min(size - offset);
                    self.ramdisk_write(bus, buf, disk_offset + offset, len)?
                }
            }
            _ => {
                log::warn!("fs_write: '{}' is not writable", self.table[fd].name);
                0
            }
        };
        self.table[fd].open_offset += count;
        Ok(count)
    }

    pub fn lseek(&mut self, fd: usize, offset: i32, whence: u32) -> Result<usize, Fault> {
        let file = match self.table.get_mut(fd) {
            Some(file) => file,
            None => {
                log::warn!("fs_lseek: bad descriptor {}", fd);
                return Ok(0);
            }
        };
        let base = match whence {
            SEEK_SET => 0i64,
            SEEK_CUR => file.open_offset as i64,
            SEEK_END => file.size as i64,
            _ => return Err(Fault::BadWhence(whence)),
        };
        let new_offset = (base + offset as i64).clamp(0, file.size as i64) as usize;
        file.open_offset = new_offset;
        Ok(new_offset)
    }

    pub fn close(&mut self, _fd: usize) -> i32 {
        0
    }

    // Host-side read for the loader; only ramdisk-backed files make sense
    // here.
    pub fn read_host(&mut self, fd: usize, buf: &mut [u8]) -> usize {
        let (disk_offset, offset, size) = match self.table.get(fd) {
            Some(file) => match file.backend {
                Backend::RamDisk { disk_offset } => (disk_offset, file.open_offset, file.size),
                _ => return 0,
            },
            None => return 0,
        };
        if offset >= size {
            return 0;
        }
        let len = buf.len().min(size - offset);
        let start = disk_offset + offset;
        let avail = self.ramdisk.len().saturating_sub(start);
        let len = len.min(avail);
        buf[..len].copy_from_slice(&self.ramdisk[start..start + len]);
        self.table[fd].open_offset += len;
        len
    }

    fn ramdisk_read(
        &self,
        bus: &mut Bus,
        buf: u32,
        disk_offset: usize,
        len: usize,
    ) -> Result<usize, Fault> {
        let avail = self.ramdisk.len().saturating_sub(disk_offset);
        let len = len.min(avail);
        if len > 0 {
            bus.ram_mut(buf, len)?
                .copy_from_slice(&self.ramdisk[disk_offset..disk_offset + len]);
        }
        Ok(len)
    }

    fn ramdisk_write(
        &mut self,
        bus: &mut Bus,
        buf: u32,
        disk_offset: usize,
        len: usize,
    ) -> Result<usize, Fault> {
        let avail = self.ramdisk.len().saturating_sub(disk_offset);
        let len = len.min(avail);
        if len > 0 {
            let bytes = bus.ram(buf, len)?;
            self.ramdisk[disk_offset..disk_offset + len].copy_from_slice(bytes);
        }
        Ok(len)
    }

    // At most one keyboard event per call, "kd NAME" / "ku NAME"; zero when
    // the queue is empty.
    fn events_read(&self, bus: &mut Bus, buf: u32, len: usize) -> Result<usize, Fault> {
        let event = match self.keyboard.borrow_mut().pop() {
            Some(event) => event,
            None => return Ok(0),
        };
        let text = format!("{} {}", if event.down { "kd" } else { "ku" }, key_name(event.code));
        let count = text.len().min(len);
        bus.ram_mut(buf, count)?.copy_from_slice(&text.as_bytes()[..count]);
        Ok(count)
    }

    fn dispinfo_read(&self, bus: &mut Bus, buf: u32, len: usize) -> Result<usize, Fault> {
        let (width, height) = self.gpu.borrow().config();
        let text = format!("WIDTH : {}\nHEIGHT : {}\n", width, height);
        let count = text.len().min(len);
        bus.ram_mut(buf, count)?.copy_from_slice(&text.as_bytes()[..count]);
        Ok(count)
    }

    // Writes are split at row boundaries and issued as one blit per row; only
    // 4-byte-aligned offsets with 4-byte-multiple lengths move pixels.
    fn fb_write(&self, bus: &mut Bus, buf: u32, offset: usize, len: usize) -> Result<usize, Fault> {
        let (width, height) = self.gpu.borrow().config();
        if offset & 0x3 != 0 {
            return Ok(0);
        }
        let len = len & !0x3;
        if len == 0 {
            return Ok(0);
        }
        let bytes = bus.ram(buf, len)?.to_vec();
        let row_bytes = width as usize * 4;
        let mut written = 0;
        while written < len {
            let cursor = offset + written;
            let y = (cursor / row_bytes) as u32;
            let x = ((cursor % row_bytes) / 4) as u32;
            if y >= height {
                break;
            }
            let left_in_row = row_bytes - cursor % row_bytes;
            let chunk = (len - written).min(left_in_row);
            let w = (chunk / 4) as u32;
            if w == 0 {
                break;
            }
            let pixels: Vec<u32> = bytes[written..written + chunk]
                .chunks_exact(4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            self.gpu.borrow_mut().blit(x, y, &pixels, w, 1, true);
            written += chunk;
        }
        Ok(written)
    }
}
