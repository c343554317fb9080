use wozmon::config::MachineConfig;
use wozmon::cpu::CPU;
use wozmon::machine::{Machine, ResidentExit};
use wozmon::memory::Memory;
use wozmon::port::ScriptedPort;

fn booted() -> Machine<ScriptedPort> {
    let mut machine = Machine::new(ScriptedPort::new(), MachineConfig::default());
    machine.boot();
    machine
}

#[test]
fn test_store_and_run_straight_line_program() {
    let mut machine = booted();

    // LDA #$01, STA $0200, LDA #$05, STA $0201, BRK
    machine.feed("0300: A9 01 8D 00 02 A9 05 8D 01 02 00\n");
    let (_, runs) = machine.feed("0300R\n");

    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].exit, ResidentExit::Halted);
    assert_eq!(runs[0].cycles, 19);
    assert_eq!(machine.memory().read(0x0200), 0x01);
    assert_eq!(machine.memory().read(0x0201), 0x05);
    assert_eq!(machine.cpu().get_register_a(), 0x05);
}

#[test]
fn test_counting_loop() {
    let mut machine = booted();

    // LDX #$05, LDA #$00, loop: CLC, ADC #$01, DEX, BNE loop, STA $0200, BRK
    machine.feed("0300: A2 05 A9 00 18 69 01 CA D0 FA 8D 00 02 00\n");
    let (_, runs) = machine.feed("0300R\n");

    assert_eq!(runs[0].cycles, 59);
    assert_eq!(machine.memory().read(0x0200), 0x05);
    assert_eq!(machine.cpu().get_register_x(), 0x00);
}

#[test]
fn test_subroutine_call() {
    let mut machine = booted();

    // LDA #$05, JSR $0309, CLC, ADC #$02, BRK
    // $0309: SEC, SBC #$01, RTS
    machine.feed("0300: A9 05 20 09 03 18 69 02 00 38 E9 01 60\n");
    let (_, runs) = machine.feed("0300R\n");

    assert_eq!(runs[0].cycles, 29);
    assert_eq!(machine.cpu().get_register_a(), 0x06);
}

#[test]
fn test_resident_code_prints_through_display_register() {
    let mut machine = booted();

    machine.feed("0300: A2 00 BD 10 03 F0 07 8D 12 D0 E8 4C 02 03 00\n");
    machine.feed("0310: C8 C5 CC CC CF 00\n");
    let (output, runs) = machine.feed("0300R\n");

    assert_eq!(runs[0].exit, ResidentExit::Halted);
    assert_eq!(output, "0300R\n\n0300: A2HELLO\\\n");
}

#[test]
fn test_monitor_resumes_after_jump_to_entry() {
    let mut machine = booted();

    // INC $0200, JMP $FF00
    machine.feed("0300: EE 00 02 4C 00 FF\n");
    let (output, runs) = machine.feed("0300R\n0300R\n0200\n");

    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.exit == ResidentExit::MonitorEntry));
    assert!(output.ends_with("0200: 02\n"));
}

#[test]
fn test_examine_listing_of_stored_program() {
    let mut machine = booted();
    machine.feed("0300: A9 01 8D 00 02 A9 05 8D 01 02 00\n");
    let (output, _) = machine.feed("0300.030A\n");

    assert_eq!(
        output,
        "0300.030A\n\n0300: A9 01 8D 00 02 A9 05 8D\n0308: 01 02 00\n"
    );
    assert_eq!(machine.monitor().store_pointer(), 0x030A);
}

#[test]
fn test_escape_and_garbage_recover() {
    let mut machine = booted();
    let (output, runs) = machine.feed("0300: 11\u{1b}HELLO\n0300: 22\n0300\n");

    assert!(runs.is_empty());
    // Escape dropped the first line, HELLO was rejected, the third line stored.
    assert_eq!(machine.memory().read(0x0300), 0x22);
    assert!(output.contains("\\\n"));
    assert!(output.ends_with("0300: 22\n"));
}

#[test]
fn test_simple_calculation() {
    let mut cpu = CPU::new();
    let mut memory = Memory::new();

    // Calculate 10 + 20 + 30 and store result
    memory
        .write_hex(0x8000, "A9 0A 69 14 69 1E 85 50 00")
        .unwrap();
    memory.write_u16(0xFFFC, 0x8000);
    cpu.reset(&mut memory);

    while !cpu.is_halted() {
        cpu.step(&mut memory).unwrap();
    }

    assert_eq!(cpu.get_register_a(), 60);
    assert_eq!(memory.read(0x50), 60);
}
