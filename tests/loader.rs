// ELF loading through the VFS, and the ftrace symbol machinery that feeds
// off the same images.

mod common;

use common::rv::*;
use common::{elf32_exec, elf32_exec_for_machine, elf32_with_syms, load_words, machine, words_as_bytes};
use remu32::ftrace::FuncTracer;
use remu32::loader::{naive_uload, LoaderError};
use remu32::memory::{Width, MBASE};
use remu32::processor::State;

#[test]
fn naive_uload_loads_segments_and_transfers_control() {
    let mut m = machine();
    let vaddr = MBASE + 0x2000;
    let code = [addi(11, 0, 7), addi(10, 0, 0), ebreak()];
    let payload = words_as_bytes(&code);
    // memsz exceeds filesz by 16 bytes of BSS.
    let elf = elf32_exec(vaddr, vaddr, &payload, payload.len() as u32 + 16);
    // Dirty the would-be BSS to prove the loader zeroes it.
    let bss = vaddr + payload.len() as u32;
    for b in m.bus.ram_mut(bss, 16).unwrap() {
        *b = 0xff;
    }
    m.fs.register("/bin/hello", &elf);

    naive_uload(&mut m, "/bin/hello").unwrap();
    assert_eq!(m.cpu.pc, vaddr);
    assert_eq!(m.bus.read(vaddr, Width::Word).unwrap(), code[0]);
    assert_eq!(m.bus.ram(bss, 16).unwrap(), &[0u8; 16][..]);

    m.run(u64::MAX);
    assert_eq!(m.state, State::End { code: 0 });
    assert_eq!(m.cpu.x[11], 7);
}

#[test]
fn loader_rejects_bad_images() {
    let mut m = machine();
    m.fs.register("/bin/garbage", b"this is not an ELF");
    assert!(matches!(
        naive_uload(&mut m, "/bin/garbage"),
        Err(LoaderError::BadMagic)
    ));

    let elf = elf32_exec_for_machine(MBASE, MBASE, &words_as_bytes(&[ebreak()]), 4, 3);
    m.fs.register("/bin/x86", &elf);
    assert!(matches!(
        naive_uload(&mut m, "/bin/x86"),
        Err(LoaderError::WrongMachine(3))
    ));

    assert!(matches!(
        naive_uload(&mut m, "/bin/missing"),
        Err(LoaderError::NotFound(_))
    ));
    // A failed load leaves the machine where it was.
    assert_eq!(m.cpu.pc, MBASE);
    assert_eq!(m.state, State::Stop);
}

#[test]
fn loader_rejects_segments_outside_ram() {
    let mut m = machine();
    let elf = elf32_exec(0x1000, 0x1000, &words_as_bytes(&[ebreak()]), 4);
    m.fs.register("/bin/lowmem", &elf);
    assert!(matches!(
        naive_uload(&mut m, "/bin/lowmem"),
        Err(LoaderError::BadSegment { vaddr: 0x1000, .. })
    ));
}

#[test]
fn symbol_lookup_by_address_range() {
    let vaddr = MBASE + 0x100;
    let code = words_as_bytes(&[addi(0, 0, 0); 4]);
    let elf = elf32_with_syms(
        vaddr,
        vaddr,
        &code,
        &[("main", vaddr, 8), ("helper", vaddr + 8, 8)],
    );
    let tracer = FuncTracer::from_bytes(&elf).unwrap();
    assert_eq!(tracer.num_symbols(), 2);
    assert_eq!(tracer.lookup(vaddr), "main");
    assert_eq!(tracer.lookup(vaddr + 4), "main");
    assert_eq!(tracer.lookup(vaddr + 8), "helper");
    assert_eq!(tracer.lookup(vaddr + 16), "???");
    assert_eq!(tracer.lookup(vaddr - 4), "???");
}

#[test]
fn jalr_classification_drives_the_depth_counter() {
    let elf = elf32_with_syms(MBASE, MBASE, &words_as_bytes(&[addi(0, 0, 0)]), &[("f", MBASE, 4)]);
    let mut tracer = FuncTracer::from_bytes(&elf).unwrap();
    tracer.on_jal(MBASE, MBASE); // call
    assert_eq!(tracer.depth(), 1);
    tracer.on_jalr(MBASE, 1, 5, 0, MBASE); // call, link in ra
    assert_eq!(tracer.depth(), 2);
    tracer.on_jalr(MBASE, 0, 6, 4, MBASE); // tail call, counted as call
    assert_eq!(tracer.depth(), 3);
    tracer.on_jalr(MBASE, 5, 6, 0, MBASE); // ignored
    assert_eq!(tracer.depth(), 3);
    for _ in 0..3 {
        tracer.on_jalr(MBASE, 0, 1, 0, MBASE); // return
    }
    assert_eq!(tracer.depth(), 0);
    // Underflow is clamped, not wrapped.
    tracer.on_jalr(MBASE, 0, 1, 0, MBASE);
    assert_eq!(tracer.depth(), 0);
}

#[test]
fn executed_calls_and_returns_balance() {
    let mut m = machine();
    let elf = elf32_with_syms(
        MBASE,
        MBASE,
        &words_as_bytes(&[addi(0, 0, 0)]),
        &[("entry", MBASE, 4), ("leaf", MBASE + 8, 4)],
    );
    m.ftrace = Some(FuncTracer::from_bytes(&elf).unwrap());
    load_words(&mut m, MBASE, &[jal(1, 8), ebreak(), jalr(0, 1, 0)]);
    m.run(u64::MAX);
    assert_eq!(m.state, State::End { code: 0 });
    assert_eq!(m.ftrace.as_ref().unwrap().depth(), 0);
}

#[test]
fn unparseable_ftrace_elf_is_a_soft_failure() {
    assert!(FuncTracer::from_bytes(b"junk").is_err());
    let no_syms = elf32_exec(MBASE, MBASE, &words_as_bytes(&[ebreak()]), 4);
    assert!(FuncTracer::from_bytes(&no_syms).is_err());
}
