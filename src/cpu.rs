use thiserror::Error;

use crate::memory::Bus;
use crate::metrics::record_instruction;

#[derive(Debug)]
pub struct CPU {
    pub a: u8,      // Accumulator
    pub x: u8,      // X Index Register
    pub y: u8,      // Y Index Register
    pub pc: u16,    // Program Counter
    pub sp: u8,     // Stack Pointer
    pub status: u8, // Status Register

    pub cycles: u64,
    pub halted: bool,
}

// Status register flags
pub const CARRY_FLAG: u8 = 0x01;
pub const ZERO_FLAG: u8 = 0x02;
pub const INTERRUPT_DISABLE: u8 = 0x04;
pub const DECIMAL_MODE: u8 = 0x08;
pub const BREAK_COMMAND: u8 = 0x10;
pub const UNUSED_FLAG: u8 = 0x20;
pub const OVERFLOW_FLAG: u8 = 0x40;
pub const NEGATIVE_FLAG: u8 = 0x80;

pub const STACK_BASE: u16 = 0x0100;
pub const NMI_VECTOR: u16 = 0xFFFA;
pub const RESET_VECTOR: u16 = 0xFFFC;
pub const IRQ_VECTOR: u16 = 0xFFFE;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CpuError {
    #[error("unknown opcode ${opcode:02X} at ${pc:04X}")]
    UnknownOpcode { opcode: u8, pc: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    Implicit,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Relative,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    IndexedIndirect,
    IndirectIndexed,
}

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    ADC, AND, ASL, BCC, BCS, BEQ, BIT, BMI, BNE, BPL, BRK, BVC, BVS, CLC,
    CLD, CLI, CLV, CMP, CPX, CPY, DEC, DEX, DEY, EOR, INC, INX, INY, JMP,
    JSR, LDA, LDX, LDY, LSR, NOP, ORA, PHA, PHP, PLA, PLP, ROL, ROR, RTI,
    RTS, SBC, SEC, SED, SEI, STA, STX, STY, TAX, TAY, TSX, TXA, TXS, TYA,
}

impl Instruction {
    pub fn name(&self) -> &'static str {
        use Instruction::*;
        match self {
            ADC => "ADC", AND => "AND", ASL => "ASL", BCC => "BCC", BCS => "BCS",
            BEQ => "BEQ", BIT => "BIT", BMI => "BMI", BNE => "BNE", BPL => "BPL",
            BRK => "BRK", BVC => "BVC", BVS => "BVS", CLC => "CLC", CLD => "CLD",
            CLI => "CLI", CLV => "CLV", CMP => "CMP", CPX => "CPX", CPY => "CPY",
            DEC => "DEC", DEX => "DEX", DEY => "DEY", EOR => "EOR", INC => "INC",
            INX => "INX", INY => "INY", JMP => "JMP", JSR => "JSR", LDA => "LDA",
            LDX => "LDX", LDY => "LDY", LSR => "LSR", NOP => "NOP", ORA => "ORA",
            PHA => "PHA", PHP => "PHP", PLA => "PLA", PLP => "PLP", ROL => "ROL",
            ROR => "ROR", RTI => "RTI", RTS => "RTS", SBC => "SBC", SEC => "SEC",
            SED => "SED", SEI => "SEI", STA => "STA", STX => "STX", STY => "STY",
            TAX => "TAX", TAY => "TAY", TSX => "TSX", TXA => "TXA", TXS => "TXS",
            TYA => "TYA",
        }
    }

    // Reads that cost a cycle more when indexing crosses a page
    fn pays_page_penalty(&self) -> bool {
        use Instruction::*;
        matches!(self, ADC | AND | CMP | EOR | LDA | LDX | LDY | ORA | SBC)
    }
}

/// A decoded opcode with its base cycle count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub instruction: Instruction,
    pub mode: AddressingMode,
    pub cycles: u8,
}

/// Decode one of the 151 documented NMOS opcodes.
pub fn decode(opcode: u8) -> Option<Opcode> {
    use AddressingMode::*;
    use Instruction::*;

    let (instruction, mode, cycles) = match opcode {
        0x69 => (ADC, Immediate, 2),
        0x65 => (ADC, ZeroPage, 3),
        0x75 => (ADC, ZeroPageX, 4),
        0x6D => (ADC, Absolute, 4),
        0x7D => (ADC, AbsoluteX, 4),
        0x79 => (ADC, AbsoluteY, 4),
        0x61 => (ADC, IndexedIndirect, 6),
        0x71 => (ADC, IndirectIndexed, 5),

        0x29 => (AND, Immediate, 2),
        0x25 => (AND, ZeroPage, 3),
        0x35 => (AND, ZeroPageX, 4),
        0x2D => (AND, Absolute, 4),
        0x3D => (AND, AbsoluteX, 4),
        0x39 => (AND, AbsoluteY, 4),
        0x21 => (AND, IndexedIndirect, 6),
        0x31 => (AND, IndirectIndexed, 5),

        0x0A => (ASL, Accumulator, 2),
        0x06 => (ASL, ZeroPage, 5),
        0x16 => (ASL, ZeroPageX, 6),
        0x0E => (ASL, Absolute, 6),
        0x1E => (ASL, AbsoluteX, 7),

        0x90 => (BCC, Relative, 2),
        0xB0 => (BCS, Relative, 2),
        0xF0 => (BEQ, Relative, 2),
        0x30 => (BMI, Relative, 2),
        0xD0 => (BNE, Relative, 2),
        0x10 => (BPL, Relative, 2),
        0x50 => (BVC, Relative, 2),
        0x70 => (BVS, Relative, 2),

        0x24 => (BIT, ZeroPage, 3),
        0x2C => (BIT, Absolute, 4),

        0x00 => (BRK, Implicit, 7),

        0x18 => (CLC, Implicit, 2),
        0xD8 => (CLD, Implicit, 2),
        0x58 => (CLI, Implicit, 2),
        0xB8 => (CLV, Implicit, 2),

        0xC9 => (CMP, Immediate, 2),
        0xC5 => (CMP, ZeroPage, 3),
        0xD5 => (CMP, ZeroPageX, 4),
        0xCD => (CMP, Absolute, 4),
        0xDD => (CMP, AbsoluteX, 4),
        0xD9 => (CMP, AbsoluteY, 4),
        0xC1 => (CMP, IndexedIndirect, 6),
        0xD1 => (CMP, IndirectIndexed, 5),

        0xE0 => (CPX, Immediate, 2),
        0xE4 => (CPX, ZeroPage, 3),
        0xEC => (CPX, Absolute, 4),

        0xC0 => (CPY, Immediate, 2),
        0xC4 => (CPY, ZeroPage, 3),
        0xCC => (CPY, Absolute, 4),

        0xC6 => (DEC, ZeroPage, 5),
        0xD6 => (DEC, ZeroPageX, 6),
        0xCE => (DEC, Absolute, 6),
        0xDE => (DEC, AbsoluteX, 7),

        0xCA => (DEX, Implicit, 2),
        0x88 => (DEY, Implicit, 2),

        0x49 => (EOR, Immediate, 2),
        0x45 => (EOR, ZeroPage, 3),
        0x55 => (EOR, ZeroPageX, 4),
        0x4D => (EOR, Absolute, 4),
        0x5D => (EOR, AbsoluteX, 4),
        0x59 => (EOR, AbsoluteY, 4),
        0x41 => (EOR, IndexedIndirect, 6),
        0x51 => (EOR, IndirectIndexed, 5),

        0xE6 => (INC, ZeroPage, 5),
        0xF6 => (INC, ZeroPageX, 6),
        0xEE => (INC, Absolute, 6),
        0xFE => (INC, AbsoluteX, 7),

        0xE8 => (INX, Implicit, 2),
        0xC8 => (INY, Implicit, 2),

        0x4C => (JMP, Absolute, 3),
        0x6C => (JMP, Indirect, 5),
        0x20 => (JSR, Absolute, 6),

        0xA9 => (LDA, Immediate, 2),
        0xA5 => (LDA, ZeroPage, 3),
        0xB5 => (LDA, ZeroPageX, 4),
        0xAD => (LDA, Absolute, 4),
        0xBD => (LDA, AbsoluteX, 4),
        0xB9 => (LDA, AbsoluteY, 4),
        0xA1 => (LDA, IndexedIndirect, 6),
        0xB1 => (LDA, IndirectIndexed, 5),

        0xA2 => (LDX, Immediate, 2),
        0xA6 => (LDX, ZeroPage, 3),
        0xB6 => (LDX, ZeroPageY, 4),
        0xAE => (LDX, Absolute, 4),
        0xBE => (LDX, AbsoluteY, 4),

        0xA0 => (LDY, Immediate, 2),
        0xA4 => (LDY, ZeroPage, 3),
        0xB4 => (LDY, ZeroPageX, 4),
        0xAC => (LDY, Absolute, 4),
        0xBC => (LDY, AbsoluteX, 4),

        0x4A => (LSR, Accumulator, 2),
        0x46 => (LSR, ZeroPage, 5),
        0x56 => (LSR, ZeroPageX, 6),
        0x4E => (LSR, Absolute, 6),
        0x5E => (LSR, AbsoluteX, 7),

        0xEA => (NOP, Implicit, 2),

        0x09 => (ORA, Immediate, 2),
        0x05 => (ORA, ZeroPage, 3),
        0x15 => (ORA, ZeroPageX, 4),
        0x0D => (ORA, Absolute, 4),
        0x1D => (ORA, AbsoluteX, 4),
        0x19 => (ORA, AbsoluteY, 4),
        0x01 => (ORA, IndexedIndirect, 6),
        0x11 => (ORA, IndirectIndexed, 5),

        0x48 => (PHA, Implicit, 3),
        0x08 => (PHP, Implicit, 3),
        0x68 => (PLA, Implicit, 4),
        0x28 => (PLP, Implicit, 4),

        0x2A => (ROL, Accumulator, 2),
        0x26 => (ROL, ZeroPage, 5),
        0x36 => (ROL, ZeroPageX, 6),
        0x2E => (ROL, Absolute, 6),
        0x3E => (ROL, AbsoluteX, 7),

        0x6A => (ROR, Accumulator, 2),
        0x66 => (ROR, ZeroPage, 5),
        0x76 => (ROR, ZeroPageX, 6),
        0x6E => (ROR, Absolute, 6),
        0x7E => (ROR, AbsoluteX, 7),

        0x40 => (RTI, Implicit, 6),
        0x60 => (RTS, Implicit, 6),

        0xE9 => (SBC, Immediate, 2),
        0xE5 => (SBC, ZeroPage, 3),
        0xF5 => (SBC, ZeroPageX, 4),
        0xED => (SBC, Absolute, 4),
        0xFD => (SBC, AbsoluteX, 4),
        0xF9 => (SBC, AbsoluteY, 4),
        0xE1 => (SBC, IndexedIndirect, 6),
        0xF1 => (SBC, IndirectIndexed, 5),

        0x38 => (SEC, Implicit, 2),
        0xF8 => (SED, Implicit, 2),
        0x78 => (SEI, Implicit, 2),

        0x85 => (STA, ZeroPage, 3),
        0x95 => (STA, ZeroPageX, 4),
        0x8D => (STA, Absolute, 4),
        0x9D => (STA, AbsoluteX, 5),
        0x99 => (STA, AbsoluteY, 5),
        0x81 => (STA, IndexedIndirect, 6),
        0x91 => (STA, IndirectIndexed, 6),

        0x86 => (STX, ZeroPage, 3),
        0x96 => (STX, ZeroPageY, 4),
        0x8E => (STX, Absolute, 4),

        0x84 => (STY, ZeroPage, 3),
        0x94 => (STY, ZeroPageX, 4),
        0x8C => (STY, Absolute, 4),

        0xAA => (TAX, Implicit, 2),
        0xA8 => (TAY, Implicit, 2),
        0xBA => (TSX, Implicit, 2),
        0x8A => (TXA, Implicit, 2),
        0x9A => (TXS, Implicit, 2),
        0x98 => (TYA, Implicit, 2),

        _ => return None,
    };

    Some(Opcode { instruction, mode, cycles })
}

fn page_crossed(from: u16, to: u16) -> bool {
    from & 0xFF00 != to & 0xFF00
}

impl CPU {
    pub fn new() -> Self {
        CPU {
            a: 0,
            x: 0,
            y: 0,
            pc: 0,
            sp: 0xFD,
            status: UNUSED_FLAG | INTERRUPT_DISABLE,
            cycles: 0,
            halted: false,
        }
    }

    pub fn reset<B: Bus>(&mut self, bus: &mut B) {
        self.pc = bus.read_u16(RESET_VECTOR);

        self.a = 0;
        self.x = 0;
        self.y = 0;
        self.sp = 0xFD;
        self.status = UNUSED_FLAG | INTERRUPT_DISABLE;
        self.cycles = 0;
        self.halted = false;
    }

    /// Start executing at `address`, as after a jump from the monitor.
    /// Registers other than PC are left as they are.
    pub fn jump(&mut self, address: u16) {
        self.pc = address;
        self.halted = false;
    }

    /// Execute one instruction. Returns the cycles it took, or 0 when the
    /// CPU is halted.
    pub fn step<B: Bus>(&mut self, bus: &mut B) -> Result<u8, CpuError> {
        if self.halted {
            return Ok(0);
        }

        let pc = self.pc;
        let opcode = self.fetch(bus);
        let Some(op) = decode(opcode) else {
            self.halted = true;
            return Err(CpuError::UnknownOpcode { opcode, pc });
        };

        let (address, crossed) = self.operand_address(bus, op.mode);
        let mut cycles = op.cycles;
        if crossed
            && op.instruction.pays_page_penalty()
            && matches!(
                op.mode,
                AddressingMode::AbsoluteX | AddressingMode::AbsoluteY | AddressingMode::IndirectIndexed
            )
        {
            cycles += 1;
        }
        cycles += self.execute(bus, op.instruction, op.mode, address, crossed);

        self.cycles += cycles as u64;
        record_instruction(op.instruction.name(), cycles);
        Ok(cycles)
    }

    /// Maskable interrupt; ignored while interrupts are disabled.
    pub fn irq<B: Bus>(&mut self, bus: &mut B) {
        if !self.get_flag(INTERRUPT_DISABLE) {
            self.interrupt(bus, IRQ_VECTOR);
        }
    }

    pub fn nmi<B: Bus>(&mut self, bus: &mut B) {
        self.interrupt(bus, NMI_VECTOR);
    }

    fn interrupt<B: Bus>(&mut self, bus: &mut B, vector: u16) {
        self.push_u16(bus, self.pc);
        self.push(bus, (self.status & !BREAK_COMMAND) | UNUSED_FLAG);
        self.set_flag(INTERRUPT_DISABLE, true);
        self.pc = bus.read_u16(vector);
        self.halted = false;
        self.cycles += 7;
    }

    // Getters
    pub fn get_register_a(&self) -> u8 { self.a }
    pub fn get_register_x(&self) -> u8 { self.x }
    pub fn get_register_y(&self) -> u8 { self.y }
    pub fn get_pc(&self) -> u16 { self.pc }
    pub fn get_sp(&self) -> u8 { self.sp }
    pub fn get_status(&self) -> u8 { self.status }
    pub fn get_cycles(&self) -> u64 { self.cycles }
    pub fn is_halted(&self) -> bool { self.halted }

    // Flag operations
    pub fn set_flag(&mut self, flag: u8, value: bool) {
        if value {
            self.status |= flag;
        } else {
            self.status &= !flag;
        }
    }

    pub fn get_flag(&self, flag: u8) -> bool {
        (self.status & flag) != 0
    }

    fn update_zero_and_negative_flags(&mut self, value: u8) {
        self.set_flag(ZERO_FLAG, value == 0);
        self.set_flag(NEGATIVE_FLAG, (value & 0x80) != 0);
    }

    fn fetch<B: Bus>(&mut self, bus: &mut B) -> u8 {
        let value = bus.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        value
    }

    fn fetch_u16<B: Bus>(&mut self, bus: &mut B) -> u16 {
        let low = self.fetch(bus) as u16;
        let high = self.fetch(bus) as u16;
        (high << 8) | low
    }

    // Pointer stored in the zero page; the high byte wraps within it
    fn read_zero_page_pointer<B: Bus>(bus: &mut B, ptr: u8) -> u16 {
        let low = bus.read(ptr as u16) as u16;
        let high = bus.read(ptr.wrapping_add(1) as u16) as u16;
        (high << 8) | low
    }

    /// Resolve the effective address for `mode`, advancing PC past the
    /// operand. The flag reports an indexed access or branch target that
    /// landed on a different page.
    fn operand_address<B: Bus>(&mut self, bus: &mut B, mode: AddressingMode) -> (u16, bool) {
        match mode {
            AddressingMode::Implicit | AddressingMode::Accumulator => (0, false),
            AddressingMode::Immediate => {
                let addr = self.pc;
                self.pc = self.pc.wrapping_add(1);
                (addr, false)
            }
            AddressingMode::ZeroPage => (self.fetch(bus) as u16, false),
            AddressingMode::ZeroPageX => (self.fetch(bus).wrapping_add(self.x) as u16, false),
            AddressingMode::ZeroPageY => (self.fetch(bus).wrapping_add(self.y) as u16, false),
            AddressingMode::Relative => {
                let offset = self.fetch(bus) as i8;
                let target = self.pc.wrapping_add(offset as i16 as u16);
                (target, page_crossed(self.pc, target))
            }
            AddressingMode::Absolute => (self.fetch_u16(bus), false),
            AddressingMode::AbsoluteX => {
                let base = self.fetch_u16(bus);
                let addr = base.wrapping_add(self.x as u16);
                (addr, page_crossed(base, addr))
            }
            AddressingMode::AbsoluteY => {
                let base = self.fetch_u16(bus);
                let addr = base.wrapping_add(self.y as u16);
                (addr, page_crossed(base, addr))
            }
            AddressingMode::Indirect => {
                let ptr = self.fetch_u16(bus);
                // 6502 bug: if ptr is at page boundary, high byte wraps around within the page
                let low = bus.read(ptr) as u16;
                let high = bus.read((ptr & 0xFF00) | (ptr.wrapping_add(1) & 0x00FF)) as u16;
                ((high << 8) | low, false)
            }
            AddressingMode::IndexedIndirect => {
                let ptr = self.fetch(bus).wrapping_add(self.x);
                (Self::read_zero_page_pointer(bus, ptr), false)
            }
            AddressingMode::IndirectIndexed => {
                let ptr = self.fetch(bus);
                let base = Self::read_zero_page_pointer(bus, ptr);
                let addr = base.wrapping_add(self.y as u16);
                (addr, page_crossed(base, addr))
            }
        }
    }

    /// Carry out `instruction`. Returns cycles beyond the opcode's base count.
    fn execute<B: Bus>(
        &mut self,
        bus: &mut B,
        instruction: Instruction,
        mode: AddressingMode,
        address: u16,
        crossed: bool,
    ) -> u8 {
        use Instruction::*;

        match instruction {
            LDA => {
                self.a = bus.read(address);
                self.update_zero_and_negative_flags(self.a);
            }
            LDX => {
                self.x = bus.read(address);
                self.update_zero_and_negative_flags(self.x);
            }
            LDY => {
                self.y = bus.read(address);
                self.update_zero_and_negative_flags(self.y);
            }
            STA => bus.write(address, self.a),
            STX => bus.write(address, self.x),
            STY => bus.write(address, self.y),

            ADC => {
                let value = bus.read(address);
                self.adc(value);
            }
            SBC => {
                let value = bus.read(address);
                self.sbc(value);
            }
            AND => {
                self.a &= bus.read(address);
                self.update_zero_and_negative_flags(self.a);
            }
            ORA => {
                self.a |= bus.read(address);
                self.update_zero_and_negative_flags(self.a);
            }
            EOR => {
                self.a ^= bus.read(address);
                self.update_zero_and_negative_flags(self.a);
            }
            CMP => {
                let value = bus.read(address);
                self.compare(self.a, value);
            }
            CPX => {
                let value = bus.read(address);
                self.compare(self.x, value);
            }
            CPY => {
                let value = bus.read(address);
                self.compare(self.y, value);
            }
            BIT => {
                let value = bus.read(address);
                self.set_flag(ZERO_FLAG, self.a & value == 0);
                self.set_flag(OVERFLOW_FLAG, value & 0x40 != 0);
                self.set_flag(NEGATIVE_FLAG, value & 0x80 != 0);
            }

            ASL => self.modify(bus, mode, address, Self::asl),
            LSR => self.modify(bus, mode, address, Self::lsr),
            ROL => self.modify(bus, mode, address, Self::rol),
            ROR => self.modify(bus, mode, address, Self::ror),
            INC => self.modify(bus, mode, address, |cpu, v| {
                let result = v.wrapping_add(1);
                cpu.update_zero_and_negative_flags(result);
                result
            }),
            DEC => self.modify(bus, mode, address, |cpu, v| {
                let result = v.wrapping_sub(1);
                cpu.update_zero_and_negative_flags(result);
                result
            }),

            INX => {
                self.x = self.x.wrapping_add(1);
                self.update_zero_and_negative_flags(self.x);
            }
            INY => {
                self.y = self.y.wrapping_add(1);
                self.update_zero_and_negative_flags(self.y);
            }
            DEX => {
                self.x = self.x.wrapping_sub(1);
                self.update_zero_and_negative_flags(self.x);
            }
            DEY => {
                self.y = self.y.wrapping_sub(1);
                self.update_zero_and_negative_flags(self.y);
            }

            // Transfer operations
            TAX => {
                self.x = self.a;
                self.update_zero_and_negative_flags(self.x);
            }
            TAY => {
                self.y = self.a;
                self.update_zero_and_negative_flags(self.y);
            }
            TXA => {
                self.a = self.x;
                self.update_zero_and_negative_flags(self.a);
            }
            TYA => {
                self.a = self.y;
                self.update_zero_and_negative_flags(self.a);
            }
            TSX => {
                self.x = self.sp;
                self.update_zero_and_negative_flags(self.x);
            }
            TXS => self.sp = self.x,

            // Stack operations
            PHA => self.push(bus, self.a),
            PHP => self.push(bus, self.status | BREAK_COMMAND | UNUSED_FLAG),
            PLA => {
                self.a = self.pop(bus);
                self.update_zero_and_negative_flags(self.a);
            }
            PLP => self.status = (self.pop(bus) & !BREAK_COMMAND) | UNUSED_FLAG,

            // Jump operations
            JMP => self.pc = address,
            JSR => {
                let return_addr = self.pc.wrapping_sub(1);
                self.push_u16(bus, return_addr);
                self.pc = address;
            }
            RTS => self.pc = self.pop_u16(bus).wrapping_add(1),
            RTI => {
                self.status = (self.pop(bus) & !BREAK_COMMAND) | UNUSED_FLAG;
                self.pc = self.pop_u16(bus);
            }
            BRK => self.brk(bus),

            // Branch instructions
            BCC => return self.branch_if(!self.get_flag(CARRY_FLAG), address, crossed),
            BCS => return self.branch_if(self.get_flag(CARRY_FLAG), address, crossed),
            BEQ => return self.branch_if(self.get_flag(ZERO_FLAG), address, crossed),
            BNE => return self.branch_if(!self.get_flag(ZERO_FLAG), address, crossed),
            BMI => return self.branch_if(self.get_flag(NEGATIVE_FLAG), address, crossed),
            BPL => return self.branch_if(!self.get_flag(NEGATIVE_FLAG), address, crossed),
            BVC => return self.branch_if(!self.get_flag(OVERFLOW_FLAG), address, crossed),
            BVS => return self.branch_if(self.get_flag(OVERFLOW_FLAG), address, crossed),

            // Flag manipulation instructions
            CLC => self.set_flag(CARRY_FLAG, false),
            SEC => self.set_flag(CARRY_FLAG, true),
            CLI => self.set_flag(INTERRUPT_DISABLE, false),
            SEI => self.set_flag(INTERRUPT_DISABLE, true),
            CLD => self.set_flag(DECIMAL_MODE, false),
            SED => self.set_flag(DECIMAL_MODE, true),
            CLV => self.set_flag(OVERFLOW_FLAG, false),

            NOP => {}
        }
        0
    }

    /// Read-modify-write on the accumulator or a memory location.
    fn modify<B: Bus>(&mut self, bus: &mut B, mode: AddressingMode, address: u16, op: fn(&mut Self, u8) -> u8) {
        if mode == AddressingMode::Accumulator {
            let value = self.a;
            self.a = op(self, value);
        } else {
            let value = bus.read(address);
            let result = op(self, value);
            bus.write(address, result);
        }
    }

    fn asl(&mut self, value: u8) -> u8 {
        self.set_flag(CARRY_FLAG, value & 0x80 != 0);
        let result = value << 1;
        self.update_zero_and_negative_flags(result);
        result
    }

    fn lsr(&mut self, value: u8) -> u8 {
        self.set_flag(CARRY_FLAG, value & 0x01 != 0);
        let result = value >> 1;
        self.update_zero_and_negative_flags(result);
        result
    }

    fn rol(&mut self, value: u8) -> u8 {
        let carry_in = self.get_flag(CARRY_FLAG) as u8;
        self.set_flag(CARRY_FLAG, value & 0x80 != 0);
        let result = (value << 1) | carry_in;
        self.update_zero_and_negative_flags(result);
        result
    }

    fn ror(&mut self, value: u8) -> u8 {
        let carry_in = (self.get_flag(CARRY_FLAG) as u8) << 7;
        self.set_flag(CARRY_FLAG, value & 0x01 != 0);
        let result = (value >> 1) | carry_in;
        self.update_zero_and_negative_flags(result);
        result
    }

    fn adc(&mut self, value: u8) {
        let carry = self.get_flag(CARRY_FLAG) as u16;
        let binary = self.a as u16 + value as u16 + carry;
        let overflow = (self.a ^ binary as u8) & (value ^ binary as u8) & 0x80 != 0;
        self.set_flag(OVERFLOW_FLAG, overflow);

        if self.get_flag(DECIMAL_MODE) {
            let mut low = (self.a & 0x0F) as u16 + (value & 0x0F) as u16 + carry;
            let mut high = (self.a >> 4) as u16 + (value >> 4) as u16;
            if low > 9 {
                low += 6;
            }
            if low > 0x0F {
                high += 1;
            }
            if high > 9 {
                high += 6;
            }
            self.set_flag(CARRY_FLAG, high > 0x0F);
            self.a = ((high << 4) | (low & 0x0F)) as u8;
        } else {
            self.set_flag(CARRY_FLAG, binary > 0xFF);
            self.a = binary as u8;
        }
        self.update_zero_and_negative_flags(self.a);
    }

    fn sbc(&mut self, value: u8) {
        let borrow = if self.get_flag(CARRY_FLAG) { 0 } else { 1 };
        let binary = (self.a as i16) - (value as i16) - borrow;
        let overflow = ((self.a as i16) ^ binary) & ((self.a as i16) ^ (value as i16)) & 0x80 != 0;
        self.set_flag(CARRY_FLAG, binary >= 0);
        self.set_flag(OVERFLOW_FLAG, overflow);

        if self.get_flag(DECIMAL_MODE) {
            let mut low = (self.a & 0x0F) as i16 - (value & 0x0F) as i16 - borrow;
            let mut high = (self.a >> 4) as i16 - (value >> 4) as i16;
            if low < 0 {
                low -= 6;
                high -= 1;
            }
            if high < 0 {
                high -= 6;
            }
            self.a = ((high << 4) | (low & 0x0F)) as u8;
        } else {
            self.a = binary as u8;
        }
        self.update_zero_and_negative_flags(self.a);
    }

    fn compare(&mut self, register: u8, value: u8) {
        let result = register.wrapping_sub(value);
        self.set_flag(CARRY_FLAG, register >= value);
        self.update_zero_and_negative_flags(result);
    }

    // BRK stacks the return address and status like an interrupt, then
    // halts so the host can hand control back to the monitor.
    fn brk<B: Bus>(&mut self, bus: &mut B) {
        let return_addr = self.pc.wrapping_add(1);
        self.push_u16(bus, return_addr);
        self.push(bus, self.status | BREAK_COMMAND | UNUSED_FLAG);
        self.set_flag(INTERRUPT_DISABLE, true);
        self.pc = return_addr;
        self.halted = true;
    }

    // Taken branches cost a cycle, two when the target is on another page
    fn branch_if(&mut self, condition: bool, target: u16, crossed: bool) -> u8 {
        if !condition {
            return 0;
        }
        self.pc = target;
        if crossed { 2 } else { 1 }
    }

    // Stack operations
    pub fn push<B: Bus>(&mut self, bus: &mut B, value: u8) {
        bus.write(STACK_BASE + self.sp as u16, value);
        self.sp = self.sp.wrapping_sub(1);
    }

    pub fn pop<B: Bus>(&mut self, bus: &mut B) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        bus.read(STACK_BASE + self.sp as u16)
    }

    fn push_u16<B: Bus>(&mut self, bus: &mut B, value: u16) {
        self.push(bus, (value >> 8) as u8);
        self.push(bus, (value & 0xFF) as u8);
    }

    fn pop_u16<B: Bus>(&mut self, bus: &mut B) -> u16 {
        let low = self.pop(bus) as u16;
        let high = self.pop(bus) as u16;
        (high << 8) | low
    }
}

impl Default for CPU {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Memory;

    // Load `program` at $8000 behind the reset vector and reset the CPU.
    fn boot(program: &[u8]) -> (CPU, Memory) {
        let mut cpu = CPU::new();
        let mut memory = Memory::new();
        memory.load_rom(program, 0x8000);
        memory.write_u16(RESET_VECTOR, 0x8000);
        cpu.reset(&mut memory);
        (cpu, memory)
    }

    fn steps(cpu: &mut CPU, memory: &mut Memory, count: usize) {
        for _ in 0..count {
            cpu.step(memory).unwrap();
        }
    }

    #[test]
    fn test_lda_immediate() {
        // LDA #$42
        let (mut cpu, mut memory) = boot(&[0xA9, 0x42]);
        let cycles = cpu.step(&mut memory).unwrap();

        assert_eq!(cycles, 2);
        assert_eq!(cpu.get_register_a(), 0x42);
        assert_eq!(cpu.get_pc(), 0x8002);
        assert!(!cpu.get_flag(ZERO_FLAG));
        assert!(!cpu.get_flag(NEGATIVE_FLAG));
    }

    #[test]
    fn test_adc_carry_and_overflow() {
        // LDA #$FF, ADC #$02
        let (mut cpu, mut memory) = boot(&[0xA9, 0xFF, 0x69, 0x02]);
        steps(&mut cpu, &mut memory, 2);
        assert_eq!(cpu.get_register_a(), 0x01);
        assert!(cpu.get_flag(CARRY_FLAG));
        assert!(!cpu.get_flag(OVERFLOW_FLAG));

        // LDA #$7F, ADC #$01
        let (mut cpu, mut memory) = boot(&[0xA9, 0x7F, 0x69, 0x01]);
        steps(&mut cpu, &mut memory, 2);
        assert_eq!(cpu.get_register_a(), 0x80);
        assert!(!cpu.get_flag(CARRY_FLAG));
        assert!(cpu.get_flag(OVERFLOW_FLAG));
        assert!(cpu.get_flag(NEGATIVE_FLAG));
    }

    #[test]
    fn test_sbc_borrow() {
        // LDA #$20, SBC #$30 with carry clear
        let (mut cpu, mut memory) = boot(&[0xA9, 0x20, 0xE9, 0x30]);
        steps(&mut cpu, &mut memory, 2);

        assert_eq!(cpu.get_register_a(), 0xEF); // 0x20 - 0x30 - 1
        assert!(!cpu.get_flag(CARRY_FLAG));
        assert!(cpu.get_flag(NEGATIVE_FLAG));
    }

    #[test]
    fn test_decimal_mode() {
        // SED, CLC, LDA #$99, ADC #$01
        let (mut cpu, mut memory) = boot(&[0xF8, 0x18, 0xA9, 0x99, 0x69, 0x01]);
        steps(&mut cpu, &mut memory, 4);
        assert_eq!(cpu.get_register_a(), 0x00);
        assert!(cpu.get_flag(CARRY_FLAG));
        assert!(cpu.get_flag(ZERO_FLAG));

        // SED, SEC, LDA #$10, SBC #$01
        let (mut cpu, mut memory) = boot(&[0xF8, 0x38, 0xA9, 0x10, 0xE9, 0x01]);
        steps(&mut cpu, &mut memory, 4);
        assert_eq!(cpu.get_register_a(), 0x09);
        assert!(cpu.get_flag(CARRY_FLAG));
    }

    #[test]
    fn test_logic_and_compare() {
        // LDA #$F0, AND #$0F, ORA #$3C, EOR #$FF, CMP #$C3
        let (mut cpu, mut memory) = boot(&[0xA9, 0xF0, 0x29, 0x0F, 0x09, 0x3C, 0x49, 0xFF, 0xC9, 0xC3]);
        steps(&mut cpu, &mut memory, 2);
        assert!(cpu.get_flag(ZERO_FLAG));
        steps(&mut cpu, &mut memory, 2);
        assert_eq!(cpu.get_register_a(), 0xC3);
        cpu.step(&mut memory).unwrap();
        assert!(cpu.get_flag(ZERO_FLAG));
        assert!(cpu.get_flag(CARRY_FLAG));
    }

    #[test]
    fn test_bit_copies_high_bits() {
        let (mut cpu, mut memory) = boot(&[0xA9, 0x01, 0x24, 0x10]);
        memory.write(0x10, 0xC0);
        steps(&mut cpu, &mut memory, 2);
        assert!(cpu.get_flag(ZERO_FLAG));
        assert!(cpu.get_flag(OVERFLOW_FLAG));
        assert!(cpu.get_flag(NEGATIVE_FLAG));
    }

    #[test]
    fn test_shifts_and_rotates() {
        // LDA #$81, ASL A, ROL A, LSR A, ROR A
        let (mut cpu, mut memory) = boot(&[0xA9, 0x81, 0x0A, 0x2A, 0x4A, 0x6A]);
        steps(&mut cpu, &mut memory, 2);
        assert_eq!(cpu.get_register_a(), 0x02);
        assert!(cpu.get_flag(CARRY_FLAG));
        cpu.step(&mut memory).unwrap();
        assert_eq!(cpu.get_register_a(), 0x05);
        assert!(!cpu.get_flag(CARRY_FLAG));
        cpu.step(&mut memory).unwrap();
        assert_eq!(cpu.get_register_a(), 0x02);
        assert!(cpu.get_flag(CARRY_FLAG));
        cpu.step(&mut memory).unwrap();
        assert_eq!(cpu.get_register_a(), 0x81);
    }

    #[test]
    fn test_inc_memory_wraps() {
        let (mut cpu, mut memory) = boot(&[0xE6, 0x50, 0xE6, 0x50]);
        memory.write(0x50, 0xFE);
        cpu.step(&mut memory).unwrap();
        assert_eq!(memory.read(0x50), 0xFF);
        assert!(cpu.get_flag(NEGATIVE_FLAG));
        cpu.step(&mut memory).unwrap();
        assert_eq!(memory.read(0x50), 0x00);
        assert!(cpu.get_flag(ZERO_FLAG));
    }

    #[test]
    fn test_jsr_rts() {
        let (mut cpu, mut memory) = boot(&[0x20, 0x00, 0x90, 0xEA]);
        memory.write(0x9000, 0x60); // RTS
        let initial_sp = cpu.get_sp();

        cpu.step(&mut memory).unwrap();
        assert_eq!(cpu.get_pc(), 0x9000);
        assert_eq!(cpu.get_sp(), initial_sp - 2);

        cpu.step(&mut memory).unwrap();
        assert_eq!(cpu.get_pc(), 0x8003);
        assert_eq!(cpu.get_sp(), initial_sp);
    }

    #[test]
    fn test_jmp_indirect_page_boundary_bug() {
        let (mut cpu, mut memory) = boot(&[0x6C, 0xFF, 0x30]);
        memory.write(0x30FF, 0x00);
        memory.write(0x3100, 0x50); // ignored
        memory.write(0x3000, 0x40);
        cpu.step(&mut memory).unwrap();
        assert_eq!(cpu.get_pc(), 0x4000);
    }

    #[test]
    fn test_indirect_addressing_modes() {
        // LDX #$05, LDA ($20,X), LDY #$05, LDA ($30),Y
        let (mut cpu, mut memory) = boot(&[0xA2, 0x05, 0xA1, 0x20, 0xA0, 0x05, 0xB1, 0x30]);
        memory.write_u16(0x25, 0x3000);
        memory.write(0x3000, 0x42);
        memory.write_u16(0x30, 0x4000);
        memory.write(0x4005, 0x24);

        steps(&mut cpu, &mut memory, 2);
        assert_eq!(cpu.get_register_a(), 0x42);
        steps(&mut cpu, &mut memory, 2);
        assert_eq!(cpu.get_register_a(), 0x24);
    }

    #[test]
    fn test_page_cross_costs_a_cycle() {
        // LDX #$FF, LDA $30F0,X
        let (mut cpu, mut memory) = boot(&[0xA2, 0xFF, 0xBD, 0xF0, 0x30]);
        cpu.step(&mut memory).unwrap();
        assert_eq!(cpu.step(&mut memory).unwrap(), 5);

        // Stores never pay it: LDX #$FF, STA $30F0,X
        let (mut cpu, mut memory) = boot(&[0xA2, 0xFF, 0x9D, 0xF0, 0x30]);
        cpu.step(&mut memory).unwrap();
        assert_eq!(cpu.step(&mut memory).unwrap(), 5);
    }

    #[test]
    fn test_branch_cycles() {
        // LDX #$00, BEQ +2 (taken), NOP, NOP, BNE +0 (not taken)
        let (mut cpu, mut memory) = boot(&[0xA2, 0x00, 0xF0, 0x02, 0xEA, 0xEA, 0xD0, 0x00]);
        cpu.step(&mut memory).unwrap();
        assert_eq!(cpu.step(&mut memory).unwrap(), 3);
        assert_eq!(cpu.get_pc(), 0x8006);
        assert_eq!(cpu.step(&mut memory).unwrap(), 2);
    }

    #[test]
    fn test_stack_status_round_trip() {
        // SEC, PHP, CLC, PLP
        let (mut cpu, mut memory) = boot(&[0x38, 0x08, 0x18, 0x28]);
        steps(&mut cpu, &mut memory, 2);
        assert_eq!(memory.read(0x01FD) & (BREAK_COMMAND | CARRY_FLAG), BREAK_COMMAND | CARRY_FLAG);
        steps(&mut cpu, &mut memory, 2);
        assert!(cpu.get_flag(CARRY_FLAG));
        assert!(!cpu.get_flag(BREAK_COMMAND));
    }

    #[test]
    fn test_brk_halts_and_stacks_state() {
        let (mut cpu, mut memory) = boot(&[0x00, 0xEA, 0xEA]);
        assert_eq!(cpu.step(&mut memory).unwrap(), 7);
        assert!(cpu.is_halted());
        assert_eq!(cpu.get_pc(), 0x8002);

        let status = cpu.pop(&mut memory);
        assert_eq!(status & BREAK_COMMAND, BREAK_COMMAND);
        assert_eq!(cpu.pop(&mut memory), 0x02);
        assert_eq!(cpu.pop(&mut memory), 0x80);

        // Halted CPUs do nothing.
        assert_eq!(cpu.step(&mut memory).unwrap(), 0);
        assert_eq!(cpu.get_pc(), 0x8002);
    }

    #[test]
    fn test_unknown_opcode_is_an_error() {
        let (mut cpu, mut memory) = boot(&[0x02]);
        assert_eq!(
            cpu.step(&mut memory),
            Err(CpuError::UnknownOpcode { opcode: 0x02, pc: 0x8000 })
        );
        assert!(cpu.is_halted());
    }

    #[test]
    fn test_irq_respects_disable_flag() {
        let mut cpu = CPU::new();
        let mut memory = Memory::new();
        memory.write_u16(IRQ_VECTOR, 0xE2A4);
        cpu.pc = 0xA023;

        cpu.irq(&mut memory);
        assert_eq!(cpu.get_pc(), 0xA023);

        cpu.set_flag(INTERRUPT_DISABLE, false);
        let old_status = cpu.get_status();
        cpu.irq(&mut memory);
        assert_eq!(cpu.get_pc(), 0xE2A4);
        assert_eq!(cpu.get_cycles(), 7);
        assert_eq!(cpu.pop(&mut memory), old_status | UNUSED_FLAG);
        assert_eq!(cpu.pop_u16(&mut memory), 0xA023);
    }

    #[test]
    fn test_nmi_ignores_disable_flag() {
        let mut cpu = CPU::new();
        let mut memory = Memory::new();
        memory.write_u16(NMI_VECTOR, 0xE226);
        cpu.pc = 0xA023;
        cpu.nmi(&mut memory);
        assert_eq!(cpu.get_pc(), 0xE226);
        assert!(cpu.get_flag(INTERRUPT_DISABLE));
    }

    #[test]
    fn test_every_documented_opcode_decodes() {
        let count = (0u8..=255).filter(|&op| decode(op).is_some()).count();
        assert_eq!(count, 151);
    }
}
