//! The emulated host: RAM, a 6502, the monitor and a character port.
//!
//! Resident code reaches the keyboard and display through four registers
//! overlaid on RAM (see [`MappedBus`]). The monitor itself works on plain
//! RAM.

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::MachineConfig;
use crate::cpu::{CpuError, CPU};
use crate::memory::{Bus, Memory};
use crate::metrics;
use crate::monitor::Monitor;
use crate::port::{CharacterPort, ScriptedPort};

const KEY_READY: u8 = 0x80;

/// RAM with the keyboard and display registers mapped over it.
///
/// - keyboard data: the waiting key, bit 7 set; reading clears the strobe
/// - keyboard control: bit 7 set while a key is waiting
/// - display data: writes go to the display; reads as 0 (always ready)
/// - display control: reads as 0, writes ignored
pub struct MappedBus<'a, P> {
    memory: &'a mut Memory,
    port: &'a mut P,
    config: &'a MachineConfig,
}

impl<'a, P: CharacterPort> MappedBus<'a, P> {
    pub fn new(memory: &'a mut Memory, port: &'a mut P, config: &'a MachineConfig) -> Self {
        Self { memory, port, config }
    }
}

impl<P: CharacterPort> Bus for MappedBus<'_, P> {
    fn read(&mut self, address: u16) -> u8 {
        if address == self.config.keyboard_data {
            self.port.read_key() | 0x80
        } else if address == self.config.keyboard_control {
            if self.port.key_ready() { KEY_READY } else { 0 }
        } else if address == self.config.display_data || address == self.config.display_control {
            0
        } else {
            self.memory.read(address)
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        if address == self.config.display_data {
            self.port.write_display(value | 0x80);
        } else if !self.config.is_register(address) {
            self.memory.write(address, value);
        }
    }
}

/// Why resident code gave control back to the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResidentExit {
    /// Executed BRK.
    Halted,
    /// Jumped to the monitor entry point.
    MonitorEntry,
    Fault { opcode: u8, pc: u16 },
    StepBudget,
}

impl ResidentExit {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResidentExit::Halted => "halted",
            ResidentExit::MonitorEntry => "monitor_entry",
            ResidentExit::Fault { .. } => "fault",
            ResidentExit::StepBudget => "step_budget",
        }
    }
}

impl From<CpuError> for ResidentExit {
    fn from(error: CpuError) -> Self {
        match error {
            CpuError::UnknownOpcode { opcode, pc } => ResidentExit::Fault { opcode, pc },
        }
    }
}

/// Summary of one stay in resident code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResidentRun {
    pub start: u16,
    pub exit: ResidentExit,
    pub steps: u64,
    pub cycles: u64,
    /// Program counter when control came back.
    pub pc: u16,
}

pub struct Machine<P> {
    memory: Memory,
    cpu: CPU,
    monitor: Monitor,
    port: P,
    config: MachineConfig,
    last_run: Option<ResidentRun>,
}

impl<P: CharacterPort> Machine<P> {
    pub fn new(port: P, config: MachineConfig) -> Self {
        Self {
            memory: Memory::new(),
            cpu: CPU::new(),
            monitor: Monitor::new(),
            port,
            config,
            last_run: None,
        }
    }

    /// Show the monitor prompt. Call once before feeding keys.
    pub fn boot(&mut self) {
        self.monitor.enter(&mut self.port);
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn cpu(&self) -> &CPU {
        &self.cpu
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn last_run(&self) -> Option<&ResidentRun> {
        self.last_run.as_ref()
    }

    /// Handle every key that is ready, running resident code whenever a
    /// line asks for it. Never waits for input.
    pub fn pump(&mut self) -> Vec<ResidentRun> {
        let mut runs = Vec::new();
        while let Some(handoff) = self.monitor.pump(&mut self.port, &mut self.memory) {
            runs.push(self.run_resident(handoff.address));
        }
        runs
    }

    /// Interactive loop. Returns once the port closes.
    pub fn run_forever(&mut self) {
        while let Some(handoff) = self.monitor.run(&mut self.port, &mut self.memory) {
            self.run_resident(handoff.address);
        }
        debug!("port closed, leaving monitor");
    }

    /// Execute from `address` until the code halts, returns to the monitor
    /// entry point, faults or runs out of steps. The monitor prompt is shown
    /// again afterwards.
    pub fn run_resident(&mut self, address: u16) -> ResidentRun {
        self.cpu.jump(address);
        let start_cycles = self.cpu.get_cycles();
        let mut steps = 0u64;

        let exit = loop {
            if self.cpu.get_pc() == self.config.monitor_entry {
                break ResidentExit::MonitorEntry;
            }
            if matches!(self.config.max_resident_steps, Some(limit) if steps >= limit) {
                break ResidentExit::StepBudget;
            }

            let mut bus = MappedBus::new(&mut self.memory, &mut self.port, &self.config);
            match self.cpu.step(&mut bus) {
                Ok(_) => {
                    steps += 1;
                    if self.cpu.is_halted() {
                        break ResidentExit::Halted;
                    }
                }
                Err(e) => {
                    warn!("resident code at ${:04X} faulted: {}", address, e);
                    break e.into();
                }
            }
        };

        let run = ResidentRun {
            start: address,
            exit,
            steps,
            cycles: self.cpu.get_cycles() - start_cycles,
            pc: self.cpu.get_pc(),
        };
        match exit {
            ResidentExit::StepBudget => warn!("resident code at ${:04X} stopped after {} steps", address, steps),
            _ => info!("resident code at ${:04X} returned ({}) after {} steps", address, exit.as_str(), steps),
        }
        metrics::record_resident_exit(exit.as_str());

        self.last_run = Some(run);
        self.monitor.enter(&mut self.port);
        run
    }
}

impl Machine<ScriptedPort> {
    /// Type `text`, process it, and return what the display showed.
    pub fn feed(&mut self, text: &str) -> (String, Vec<ResidentRun>) {
        self.port.type_text(text);
        let runs = self.pump();
        let output = crate::charset::decode_display_text(&self.port.take_output());
        (output, runs)
    }
}
