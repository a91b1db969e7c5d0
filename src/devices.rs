// Device models behind the MMIO table: serial, RTC, keyboard and the
// framebuffer pair (pixel memory + control registers). Each device is a small
// state machine backed by host I/O; the bus hands them offsets relative to
// their region base.

use crate::memory::Width;
use minifb::{Key, KeyRepeat, Window, WindowOptions};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::mem::discriminant;
use std::rc::Rc;
use std::time::Instant;

pub const SERIAL_MMIO: u32 = 0xa000_03f8;
pub const RTC_MMIO: u32 = 0xa000_0048;
pub const KBD_MMIO: u32 = 0xa000_0060;
pub const VGACTL_MMIO: u32 = 0xa000_0100;
pub const FB_MMIO: u32 = 0xa100_0000;

pub const KEYDOWN_MASK: u32 = 0x8000;

pub enum Signal {
    Ok,
    Quit,
    NoOp,
}

impl PartialEq for Signal {
    fn eq(&self, other: &Signal) -> bool {
        discriminant(self) == discriminant(other)
    }
}

impl Signal {
    pub fn add(&mut self, rhs: &Self) {
        match rhs {
            Self::Quit => *self = Self::Quit,
            Self::NoOp => match *self {
                Self::Quit => *self = Self::Quit,
                _ => *self = Self::NoOp,
            },
            _ => {}
        }
    }
}

pub trait Device {
    fn read(&mut self, offset: u32, width: Width) -> u32;
    fn write(&mut self, offset: u32, width: Width, value: u32);
    fn update(&mut self) -> Signal {
        Signal::Ok
    }
}

// Devices are shared between the bus and the VFS backends, so the table holds
// cloned handles rather than the devices themselves.
impl<T: Device> Device for Rc<RefCell<T>> {
    fn read(&mut self, offset: u32, width: Width) -> u32 {
        self.borrow_mut().read(offset, width)
    }
    fn write(&mut self, offset: u32, width: Width, value: u32) {
        self.borrow_mut().write(offset, width, value)
    }
    fn update(&mut self) -> Signal {
        self.borrow_mut().update()
    }
}

pub struct Serial {
    capture: Option<Vec<u8>>,
}

impl Serial {
    pub fn new() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Serial { capture: None }))
    }

    // Test rigs swap stdout for an in-memory sink.
    pub fn capturing() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Serial { capture: Some(Vec::new()) }))
    }

    pub fn putch(&mut self, byte: u8) {
        match &mut self.capture {
            Some(buffer) => buffer.push(byte),
            None => {
                let mut out = io::stdout();
                let _ = out.write_all(&[byte]);
                let _ = out.flush();
            }
        }
    }

    pub fn captured(&self) -> &[u8] {
        self.capture.as_deref().unwrap_or(&[])
    }
}

impl Device for Serial {
    fn read(&mut self, _offset: u32, _width: Width) -> u32 {
        0
    }
    fn write(&mut self, _offset: u32, _width: Width, value: u32) {
        self.putch(value as u8);
    }
}

// Microsecond uptime as two 32-bit halves. Both halves are latched when the
// guest reads the high word, so the usual high/low/high read sequence never
// observes a torn value.
pub struct Rtc {
    boot: Instant,
    latch: u64,
}

impl Rtc {
    pub fn new() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Rtc { boot: Instant::now(), latch: 0 }))
    }

    pub fn uptime_us(&self) -> u64 {
        self.boot.elapsed().as_micros() as u64
    }
}

impl Device for Rtc {
    fn read(&mut self, offset: u32, _width: Width) -> u32 {
        if offset == 4 {
            self.latch = self.uptime_us();
            (self.latch >> 32) as u32
        } else {
            self.latch as u32
        }
    }
    fn write(&mut self, _offset: u32, _width: Width, _value: u32) {}
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct KeyEvent {
    pub code: u32,
    pub down: bool,
}

// One register: bit 15 = keydown, low bits = scancode, zero = queue empty.
// A read consumes the event, whichever consumer (MMIO or /dev/events) gets
// there first.
pub struct Keyboard {
    queue: VecDeque<KeyEvent>,
}

impl Keyboard {
    pub fn new() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Keyboard { queue: VecDeque::new() }))
    }

    pub fn push(&mut self, code: u32, down: bool) {
        self.queue.push_back(KeyEvent { code, down });
    }

    pub fn pop(&mut self) -> Option<KeyEvent> {
        self.queue.pop_front()
    }
}

impl Device for Keyboard {
    fn read(&mut self, _offset: u32, _width: Width) -> u32 {
        match self.pop() {
            Some(event) => (if event.down { KEYDOWN_MASK } else { 0 }) | event.code,
            None => 0,
        }
    }
    fn write(&mut self, _offset: u32, _width: Width, _value: u32) {}
}

// Scancode zero is reserved for "no event".
pub const KEY_NAMES: &[&str] = &[
    "NONE", "ESCAPE", "F1", "F2", "F3", "F4", "F5", "F6", "F7", "F8", "F9", "F10", "F11", "F12",
    "GRAVE", "1", "2", "3", "4", "5", "6", "7", "8", "9", "0", "MINUS", "EQUALS", "BACKSPACE",
    "TAB", "Q", "W", "E", "R", "T", "Y", "U", "I", "O", "P", "LEFTBRACKET", "RIGHTBRACKET",
    "BACKSLASH", "CAPSLOCK", "A", "S", "D", "F", "G", "H", "J", "K", "L", "SEMICOLON",
    "APOSTROPHE", "RETURN", "LSHIFT", "Z", "X", "C", "V", "B", "N", "M", "COMMA", "PERIOD",
    "SLASH", "RSHIFT", "LCTRL", "APPLICATION", "LALT", "SPACE", "RALT", "RCTRL", "UP", "DOWN",
    "LEFT", "RIGHT", "INSERT", "DELETE", "HOME", "END", "PAGEUP", "PAGEDOWN",
];

pub fn key_name(code: u32) -> &'static str {
    KEY_NAMES.get(code as usize).copied().unwrap_or("NONE")
}

pub fn scancode(name: &str) -> Option<u32> {
    KEY_NAMES.iter().position(|&n| n == name).map(|p| p as u32)
}

fn host_key_name(key: Key) -> Option<&'static str> {
    let name = match key {
        Key::Escape => "ESCAPE",
        Key::F1 => "F1",
        Key::F2 => "F2",
        Key::F3 => "F3",
        Key::F4 => "F4",
        Key::F5 => "F5",
        Key::F6 => "F6",
        Key::F7 => "F7",
        Key::F8 => "F8",
        Key::F9 => "F9",
        Key::F10 => "F10",
        Key::F11 => "F11",
        Key::F12 => "F12",
        Key::Backquote => "GRAVE",
        Key::Key1 => "1",
        Key::Key2 => "2",
        Key::Key3 => "3",
        Key::Key4 => "4",
        Key::Key5 => "5",
        Key::Key6 => "6",
        Key::Key7 => "7",
        Key::Key8 => "8",
        Key::Key9 => "9",
        Key::Key0 => "0",
        Key::Minus => "MINUS",
        Key::Equal => "EQUALS",
        Key::Backspace => "BACKSPACE",
        Key::Tab => "TAB",
        Key::Q => "Q",
        Key::W => "W",
        Key::E => "E",
        Key::R => "R",
        Key::T => "T",
        Key::Y => "Y",
        Key::U => "U",
        Key::I => "I",
        Key::O => "O",
        Key::P => "P",
        Key::LeftBracket => "LEFTBRACKET",
        Key::RightBracket => "RIGHTBRACKET",
        Key::Backslash => "BACKSLASH",
        Key::CapsLock => "CAPSLOCK",
        Key::A => "A",
        Key::S => "S",
        Key::D => "D",
        Key::F => "F",
        Key::G => "G",
        Key::H => "H",
        Key::J => "J",
        Key::K => "K",
        Key::L => "L",
        Key::Semicolon => "SEMICOLON",
        Key::Apostrophe => "APOSTROPHE",
        Key::Enter => "RETURN",
        Key::LeftShift => "LSHIFT",
        Key::Z => "Z",
        Key::X => "X",
        Key::C => "C",
        Key::V => "V",
        Key::B => "B",
        Key::N => "N",
        Key::M => "M",
        Key::Comma => "COMMA",
        Key::Period => "PERIOD",
        Key::Slash => "SLASH",
        Key::RightShift => "RSHIFT",
        Key::LeftCtrl => "LCTRL",
        Key::Menu => "APPLICATION",
        Key::LeftAlt => "LALT",
        Key::Space => "SPACE",
        Key::RightAlt => "RALT",
        Key::RightCtrl => "RCTRL",
        Key::Up => "UP",
        Key::Down => "DOWN",
        Key::Left => "LEFT",
        Key::Right => "RIGHT",
        Key::Insert => "INSERT",
        Key::Delete => "DELETE",
        Key::Home => "HOME",
        Key::End => "END",
        Key::PageUp => "PAGEUP",
        Key::PageDown => "PAGEDOWN",
        _ => return None,
    };
    Some(name)
}

// Linear 32-bpp pixel memory plus the host window it is presented into. The
// window is optional: headless hosts (and the test suite) keep the pixel
// buffer and skip presentation.
pub struct Framebuffer {
    width: u32,
    height: u32,
    vmem: Vec<u8>,
    window: Option<Window>,
    keyboard: Rc<RefCell<Keyboard>>,
}

impl Framebuffer {
    pub fn new(width: u32, height: u32, keyboard: Rc<RefCell<Keyboard>>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Framebuffer {
            width,
            height,
            vmem: vec![0; (width * height * 4) as usize],
            window: None,
            keyboard,
        }))
    }

    pub fn with_window(
        width: u32,
        height: u32,
        keyboard: Rc<RefCell<Keyboard>>,
    ) -> Rc<RefCell<Self>> {
        let fb = Self::new(width, height, keyboard);
        match Window::new("remu32", width as usize, height as usize, WindowOptions::default()) {
            Ok(window) => fb.borrow_mut().window = Some(window),
            Err(e) => log::warn!("no display available, running headless: {}", e),
        }
        fb
    }

    pub fn config(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn vmem_size(&self) -> usize {
        self.vmem.len()
    }

    pub fn pixel(&self, x: u32, y: u32) -> u32 {
        let p = ((y * self.width + x) * 4) as usize;
        u32::from_le_bytes([self.vmem[p], self.vmem[p + 1], self.vmem[p + 2], self.vmem[p + 3]])
    }

    // Rectangle blit from a host-side pixel slice, clipped to the screen.
    pub fn blit(&mut self, x: u32, y: u32, pixels: &[u32], w: u32, h: u32, sync: bool) {
        for row in 0..h {
            let dy = y + row;
            if dy >= self.height {
                break;
            }
            for col in 0..w {
                let dx = x + col;
                if dx >= self.width {
                    break;
                }
                let src = pixels[(row * w + col) as usize];
                let p = ((dy * self.width + dx) * 4) as usize;
                self.vmem[p..p + 4].copy_from_slice(&src.to_le_bytes());
            }
        }
        if sync {
            self.present();
        }
    }

    pub fn present(&mut self) {
        if let Some(window) = &mut self.window {
            let buffer: Vec<u32> = self
                .vmem
                .chunks_exact(4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            window
                .update_with_buffer(&buffer, self.width as usize, self.height as usize)
                .expect("Error updating screen!");
        }
    }
}

impl Device for Framebuffer {
    fn read(&mut self, offset: u32, width: Width) -> u32 {
        let p = offset as usize;
        if p + width as usize > self.vmem.len() {
            return 0;
        }
        let b = &self.vmem[p..p + width as usize];
        match width {
            Width::Byte => b[0] as u32,
            Width::Half => u16::from_le_bytes([b[0], b[1]]) as u32,
            Width::Word => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        }
    }

    fn write(&mut self, offset: u32, width: Width, value: u32) {
        let p = offset as usize;
        if p + width as usize > self.vmem.len() {
            return;
        }
        match width {
            Width::Byte => self.vmem[p] = value as u8,
            Width::Half => self.vmem[p..p + 2].copy_from_slice(&(value as u16).to_le_bytes()),
            Width::Word => self.vmem[p..p + 4].copy_from_slice(&value.to_le_bytes()),
        }
    }

    fn update(&mut self) -> Signal {
        let (pressed, released) = match &mut self.window {
            Some(window) => {
                if !window.is_open() {
                    return Signal::Quit;
                }
                window.update();
                (window.get_keys_pressed(KeyRepeat::No), window.get_keys_released())
            }
            None => return Signal::Ok,
        };
        let mut keyboard = self.keyboard.borrow_mut();
        if let Some(keys) = pressed {
            for key in keys {
                if let Some(code) = host_key_name(key).and_then(scancode) {
                    keyboard.push(code, true);
                }
            }
        }
        if let Some(keys) = released {
            for key in keys {
                if let Some(code) = host_key_name(key).and_then(scancode) {
                    keyboard.push(code, false);
                }
            }
        }
        Signal::Ok
    }
}

// The control registers live in their own region: register 0 reads back the
// packed screen size, register 1 presents the frame when written nonzero.
pub struct VgaCtl {
    fb: Rc<RefCell<Framebuffer>>,
}

impl VgaCtl {
    pub fn new(fb: Rc<RefCell<Framebuffer>>) -> Box<Self> {
        Box::new(VgaCtl { fb })
    }
}

impl Device for VgaCtl {
    fn read(&mut self, offset: u32, _width: Width) -> u32 {
        if offset == 0 {
            let (w, h) = self.fb.borrow().config();
            (w << 16) | h
        } else {
            0
        }
    }

    fn write(&mut self, offset: u32, _width: Width, value: u32) {
        if offset == 4 && value != 0 {
            self.fb.borrow_mut().present();
        }
    }
}
