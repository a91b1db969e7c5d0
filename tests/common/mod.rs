// Shared test rig: a small headless machine, a hand assembler for the test
// programs, and minimal ELF image builders for the loader and ftrace tests.

#![allow(dead_code)]

use remu32::memory::Width;
use remu32::{Configuration, Machine};

pub fn machine() -> Machine {
    let mut config = Configuration::new();
    config.ram_size = 4 * 1024 * 1024;
    config.capture_serial = true;
    Machine::new(config)
}

pub fn load_words(m: &mut Machine, addr: u32, words: &[u32]) {
    for (i, word) in words.iter().enumerate() {
        m.bus.write(addr + 4 * i as u32, Width::Word, *word).unwrap();
    }
}

pub fn load_bytes(m: &mut Machine, addr: u32, bytes: &[u8]) {
    m.bus.ram_mut(addr, bytes.len()).unwrap().copy_from_slice(bytes);
}

// Just enough of an assembler to write test programs with.
pub mod rv {
    fn r_type(funct7: u32, rs2: u32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
        (funct7 << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
    }

    fn i_type(imm: i32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
        ((imm as u32 & 0xfff) << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
    }

    fn s_type(imm: i32, rs2: u32, rs1: u32, funct3: u32) -> u32 {
        let imm = imm as u32;
        ((imm >> 5 & 0x7f) << 25)
            | (rs2 << 20)
            | (rs1 << 15)
            | (funct3 << 12)
            | ((imm & 0x1f) << 7)
            | 0b0100011
    }

    fn b_type(imm: i32, rs2: u32, rs1: u32, funct3: u32) -> u32 {
        let imm = imm as u32;
        ((imm >> 12 & 0x1) << 31)
            | ((imm >> 5 & 0x3f) << 25)
            | (rs2 << 20)
            | (rs1 << 15)
            | (funct3 << 12)
            | ((imm >> 1 & 0xf) << 8)
            | ((imm >> 11 & 0x1) << 7)
            | 0b1100011
    }

    fn j_type(imm: i32, rd: u32) -> u32 {
        let imm = imm as u32;
        ((imm >> 20 & 0x1) << 31)
            | ((imm >> 1 & 0x3ff) << 21)
            | ((imm >> 11 & 0x1) << 20)
            | ((imm >> 12 & 0xff) << 12)
            | (rd << 7)
            | 0b1101111
    }

    pub fn lui(rd: u32, imm20: u32) -> u32 {
        (imm20 << 12) | (rd << 7) | 0b0110111
    }
    pub fn auipc(rd: u32, imm20: u32) -> u32 {
        (imm20 << 12) | (rd << 7) | 0b0010111
    }
    pub fn jal(rd: u32, offset: i32) -> u32 {
        j_type(offset, rd)
    }
    pub fn jalr(rd: u32, rs1: u32, offset: i32) -> u32 {
        i_type(offset, rs1, 0, rd, 0b1100111)
    }
    pub fn beq(rs1: u32, rs2: u32, offset: i32) -> u32 {
        b_type(offset, rs2, rs1, 0)
    }
    pub fn bne(rs1: u32, rs2: u32, offset: i32) -> u32 {
        b_type(offset, rs2, rs1, 1)
    }
    pub fn blt(rs1: u32, rs2: u32, offset: i32) -> u32 {
        b_type(offset, rs2, rs1, 4)
    }
    pub fn bltu(rs1: u32, rs2: u32, offset: i32) -> u32 {
        b_type(offset, rs2, rs1, 6)
    }
    pub fn lb(rd: u32, rs1: u32, offset: i32) -> u32 {
        i_type(offset, rs1, 0, rd, 0b0000011)
    }
    pub fn lh(rd: u32, rs1: u32, offset: i32) -> u32 {
        i_type(offset, rs1, 1, rd, 0b0000011)
    }
    pub fn lw(rd: u32, rs1: u32, offset: i32) -> u32 {
        i_type(offset, rs1, 2, rd, 0b0000011)
    }
    pub fn lbu(rd: u32, rs1: u32, offset: i32) -> u32 {
        i_type(offset, rs1, 4, rd, 0b0000011)
    }
    pub fn lhu(rd: u32, rs1: u32, offset: i32) -> u32 {
        i_type(offset, rs1, 5, rd, 0b0000011)
    }
    pub fn sb(rs2: u32, rs1: u32, offset: i32) -> u32 {
        s_type(offset, rs2, rs1, 0)
    }
    pub fn sh(rs2: u32, rs1: u32, offset: i32) -> u32 {
        s_type(offset, rs2, rs1, 1)
    }
    pub fn sw(rs2: u32, rs1: u32, offset: i32) -> u32 {
        s_type(offset, rs2, rs1, 2)
    }
    pub fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
        i_type(imm, rs1, 0, rd, 0b0010011)
    }
    pub fn sltiu(rd: u32, rs1: u32, imm: i32) -> u32 {
        i_type(imm, rs1, 3, rd, 0b0010011)
    }
    pub fn xori(rd: u32, rs1: u32, imm: i32) -> u32 {
        i_type(imm, rs1, 4, rd, 0b0010011)
    }
    pub fn srai(rd: u32, rs1: u32, shamt: u32) -> u32 {
        i_type((0x400 | shamt) as i32, rs1, 5, rd, 0b0010011)
    }
    pub fn add(rd: u32, rs1: u32, rs2: u32) -> u32 {
        r_type(0, rs2, rs1, 0, rd, 0b0110011)
    }
    pub fn sub(rd: u32, rs1: u32, rs2: u32) -> u32 {
        r_type(0x20, rs2, rs1, 0, rd, 0b0110011)
    }
    pub fn sll(rd: u32, rs1: u32, rs2: u32) -> u32 {
        r_type(0, rs2, rs1, 1, rd, 0b0110011)
    }
    pub fn slt(rd: u32, rs1: u32, rs2: u32) -> u32 {
        r_type(0, rs2, rs1, 2, rd, 0b0110011)
    }
    pub fn sltu(rd: u32, rs1: u32, rs2: u32) -> u32 {
        r_type(0, rs2, rs1, 3, rd, 0b0110011)
    }
    pub fn sra(rd: u32, rs1: u32, rs2: u32) -> u32 {
        r_type(0x20, rs2, rs1, 5, rd, 0b0110011)
    }
    pub fn csrrw(rd: u32, csr: u32, rs1: u32) -> u32 {
        (csr << 20) | (rs1 << 15) | (1 << 12) | (rd << 7) | 0b1110011
    }
    pub fn csrrs(rd: u32, csr: u32, rs1: u32) -> u32 {
        (csr << 20) | (rs1 << 15) | (2 << 12) | (rd << 7) | 0b1110011
    }
    pub fn ecall() -> u32 {
        0x0000_0073
    }
    pub fn ebreak() -> u32 {
        0x0010_0073
    }
    pub fn mret() -> u32 {
        0x3020_0073
    }
}

fn le16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn le32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

const EM_RISCV: u16 = 243;
const EHSIZE: u32 = 52;
const PHENTSIZE: u32 = 32;

fn elf32_header(
    entry: u32,
    machine: u16,
    shoff: u32,
    shnum: u16,
    shstrndx: u16,
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"\x7fELF");
    out.extend_from_slice(&[1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    le16(&mut out, 2); // ET_EXEC
    le16(&mut out, machine);
    le32(&mut out, 1);
    le32(&mut out, entry);
    le32(&mut out, EHSIZE); // e_phoff
    le32(&mut out, shoff);
    le32(&mut out, 0); // e_flags
    le16(&mut out, EHSIZE as u16);
    le16(&mut out, PHENTSIZE as u16);
    le16(&mut out, 1); // e_phnum
    le16(&mut out, 40); // e_shentsize
    le16(&mut out, shnum);
    le16(&mut out, shstrndx);
    out
}

fn elf32_phdr(offset: u32, vaddr: u32, filesz: u32, memsz: u32) -> Vec<u8> {
    let mut out = Vec::new();
    le32(&mut out, 1); // PT_LOAD
    le32(&mut out, offset);
    le32(&mut out, vaddr);
    le32(&mut out, vaddr);
    le32(&mut out, filesz);
    le32(&mut out, memsz);
    le32(&mut out, 7); // RWX
    le32(&mut out, 4);
    out
}

// One PT_LOAD segment, no sections.
pub fn elf32_exec(entry: u32, vaddr: u32, payload: &[u8], memsz: u32) -> Vec<u8> {
    elf32_exec_for_machine(entry, vaddr, payload, memsz, EM_RISCV)
}

pub fn elf32_exec_for_machine(
    entry: u32,
    vaddr: u32,
    payload: &[u8],
    memsz: u32,
    machine: u16,
) -> Vec<u8> {
    let mut out = elf32_header(entry, machine, 0, 0, 0);
    out.extend(elf32_phdr(EHSIZE + PHENTSIZE, vaddr, payload.len() as u32, memsz));
    out.extend_from_slice(payload);
    out
}

pub fn words_as_bytes(words: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    for word in words {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out
}

// As elf32_exec, plus a symbol table: (name, addr, size) triples become
// STT_FUNC entries.
pub fn elf32_with_syms(
    entry: u32,
    vaddr: u32,
    payload: &[u8],
    syms: &[(&str, u32, u32)],
) -> Vec<u8> {
    let symtab_off = EHSIZE + PHENTSIZE + payload.len() as u32;
    let symtab_size = (1 + syms.len() as u32) * 16;

    let mut strtab: Vec<u8> = vec![0];
    let mut name_offsets = Vec::new();
    for (name, _, _) in syms {
        name_offsets.push(strtab.len() as u32);
        strtab.extend_from_slice(name.as_bytes());
        strtab.push(0);
    }
    while strtab.len() % 4 != 0 {
        strtab.push(0);
    }
    let strtab_off = symtab_off + symtab_size;
    let shoff = strtab_off + strtab.len() as u32;

    let mut out = elf32_header(entry, EM_RISCV, shoff, 3, 2);
    out.extend(elf32_phdr(EHSIZE + PHENTSIZE, vaddr, payload.len() as u32, payload.len() as u32));
    out.extend_from_slice(payload);

    // Null symbol, then the function symbols (st_info = GLOBAL | FUNC).
    out.extend_from_slice(&[0; 16]);
    for ((_, addr, size), name_off) in syms.iter().zip(&name_offsets) {
        le32(&mut out, *name_off);
        le32(&mut out, *addr);
        le32(&mut out, *size);
        out.push(0x12);
        out.push(0);
        le16(&mut out, 1);
    }
    out.extend_from_slice(&strtab);

    // Section headers: null, .symtab, .strtab.
    out.extend_from_slice(&[0; 40]);
    let mut symtab_hdr = Vec::new();
    le32(&mut symtab_hdr, 0);
    le32(&mut symtab_hdr, 2); // SHT_SYMTAB
    le32(&mut symtab_hdr, 0);
    le32(&mut symtab_hdr, 0);
    le32(&mut symtab_hdr, symtab_off);
    le32(&mut symtab_hdr, symtab_size);
    le32(&mut symtab_hdr, 2); // sh_link -> .strtab
    le32(&mut symtab_hdr, 1);
    le32(&mut symtab_hdr, 4);
    le32(&mut symtab_hdr, 16);
    out.extend(symtab_hdr);
    let mut strtab_hdr = Vec::new();
    le32(&mut strtab_hdr, 0);
    le32(&mut strtab_hdr, 3); // SHT_STRTAB
    le32(&mut strtab_hdr, 0);
    le32(&mut strtab_hdr, 0);
    le32(&mut strtab_hdr, strtab_off);
    le32(&mut strtab_hdr, strtab.len() as u32);
    le32(&mut strtab_hdr, 0);
    le32(&mut strtab_hdr, 0);
    le32(&mut strtab_hdr, 1);
    le32(&mut strtab_hdr, 0);
    out.extend(strtab_hdr);
    out
}
