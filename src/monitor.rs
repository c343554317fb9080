//! The command interpreter and memory access engine.
//!
//! A completed line is scanned left to right. Delimiters switch the mode,
//! hex runs either set the current address (examine modes) or deposit a
//! byte (store mode), and `R` hands control to resident code:
//!
//! ```text
//! 0300            examine $0300
//! 0300.0307       examine $0300, then show up to $0307
//! 0300: A9 01 8D  store three bytes from $0300
//! 0300R           jump to $0300
//! ```

use log::{debug, info};

use crate::charset::{COLON, CR, DOT, RUN, SPACE};
use crate::hex::{byte_digits, parse_hex_run};
use crate::line_editor::{EditEvent, LineEditor, RestartReason, LINE_CAPACITY};
use crate::memory::Bus;
use crate::metrics;
use crate::port::CharacterPort;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Examine,
    Store,
    BlockExamine,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Examine => "examine",
            Mode::Store => "store",
            Mode::BlockExamine => "block_examine",
        }
    }
}

/// Control leaving the monitor for resident code. There is no return
/// address; the monitor is re-entered only through [`Monitor::enter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handoff {
    pub address: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Done,
    Restarted,
    Run(u16),
}

impl LineOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            LineOutcome::Done => "done",
            LineOutcome::Restarted => "restarted",
            LineOutcome::Run(_) => "run",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Monitor {
    editor: LineEditor,
    store_pointer: u16,
    last_examined: u16,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_pointer(&self) -> u16 {
        self.store_pointer
    }

    pub fn last_examined(&self) -> u16 {
        self.last_examined
    }

    pub fn editor(&self) -> &LineEditor {
        &self.editor
    }

    /// Entry point: show the prompt and wait for a fresh line. Address
    /// state from earlier sessions is kept.
    pub fn enter<P: CharacterPort>(&mut self, port: &mut P) {
        self.editor.restart(RestartReason::Escape, port);
    }

    /// Feed one key. Returns a handoff when a completed line ran `R`.
    pub fn on_key<P: CharacterPort, B: Bus>(&mut self, key: u8, port: &mut P, bus: &mut B) -> Option<Handoff> {
        match self.editor.accept(key, port) {
            EditEvent::Accepted => None,
            EditEvent::Restarted(reason) => {
                metrics::record_line_restart(reason.as_str());
                None
            }
            EditEvent::LineComplete => {
                let mut line = [0u8; LINE_CAPACITY];
                let len = self.editor.line().len();
                line[..len].copy_from_slice(self.editor.line());

                match self.execute_line(&line[..len], port, bus) {
                    LineOutcome::Run(address) => Some(Handoff { address }),
                    _ => None,
                }
            }
        }
    }

    /// Process every key that is ready without waiting for more.
    pub fn pump<P: CharacterPort, B: Bus>(&mut self, port: &mut P, bus: &mut B) -> Option<Handoff> {
        while port.key_ready() {
            let key = port.read_key();
            if let Some(handoff) = self.on_key(key, port, bus) {
                return Some(handoff);
            }
        }
        None
    }

    /// Block on the port until a line runs resident code. Returns `None`
    /// if the port closes first.
    pub fn run<P: CharacterPort, B: Bus>(&mut self, port: &mut P, bus: &mut B) -> Option<Handoff> {
        while let Some(key) = port.wait_key() {
            if let Some(handoff) = self.on_key(key, port, bus) {
                return Some(handoff);
            }
        }
        None
    }

    /// Interpret one input line. The line normally ends in CR; scanning
    /// also stops at the end of the slice.
    pub fn execute_line<P: CharacterPort, B: Bus>(&mut self, line: &[u8], port: &mut P, bus: &mut B) -> LineOutcome {
        let outcome = self.scan_line(line, port, bus);
        debug!("line {:?} -> {:?}", crate::charset::decode_display_text(line).trim_end(), outcome);
        metrics::record_line(outcome.as_str());
        outcome
    }

    fn scan_line<P: CharacterPort, B: Bus>(&mut self, line: &[u8], port: &mut P, bus: &mut B) -> LineOutcome {
        let mut mode = Mode::Examine;
        let mut pos = 0;

        while let Some(&c) = line.get(pos) {
            if c == CR {
                break;
            }
            if c < DOT {
                pos += 1;
                continue;
            }
            match c {
                DOT => {
                    mode = Mode::BlockExamine;
                    pos += 1;
                }
                COLON => {
                    mode = Mode::Store;
                    pos += 1;
                }
                RUN => {
                    info!("run ${:04X}", self.last_examined);
                    metrics::record_run();
                    return LineOutcome::Run(self.last_examined);
                }
                _ => {
                    let run = parse_hex_run(line, pos);
                    if run.is_empty() {
                        metrics::record_line_restart(RestartReason::Malformed.as_str());
                        self.editor.restart(RestartReason::Malformed, port);
                        return LineOutcome::Restarted;
                    }
                    pos = run.end;

                    match mode {
                        Mode::Store => self.store(run.value.low_byte(), bus),
                        Mode::Examine => self.examine(run.value.value(), port, bus),
                        Mode::BlockExamine => {
                            self.block_examine(run.value.value(), port, bus);
                            mode = Mode::Examine;
                        }
                    }
                }
            }
        }

        self.editor.new_line(port);
        LineOutcome::Done
    }

    fn store<B: Bus>(&mut self, value: u8, bus: &mut B) {
        bus.write(self.store_pointer, value);
        self.store_pointer = self.store_pointer.wrapping_add(1);
        metrics::record_store();
    }

    fn set_address(&mut self, address: u16) {
        self.store_pointer = address;
        self.last_examined = address;
    }

    fn examine<P: CharacterPort, B: Bus>(&mut self, address: u16, port: &mut P, bus: &mut B) {
        self.set_address(address);
        show_address(port, address);
        show_byte(port, bus.read(address));
        metrics::record_examine(Mode::Examine.as_str());
    }

    /// Show every byte after the last examined address up to `end`, a new
    /// header line at each multiple of 8.
    fn block_examine<P: CharacterPort, B: Bus>(&mut self, end: u16, port: &mut P, bus: &mut B) {
        let mut address = self.last_examined;
        while address < end {
            address += 1;
            if address % 8 == 0 {
                show_address(port, address);
            }
            show_byte(port, bus.read(address));
        }
        self.set_address(end);
        metrics::record_examine(Mode::BlockExamine.as_str());
    }
}

fn show_address<P: CharacterPort>(port: &mut P, address: u16) {
    port.write_display(CR);
    for digit in byte_digits((address >> 8) as u8).into_iter().chain(byte_digits(address as u8)) {
        port.write_display(digit);
    }
    port.write_display(COLON);
}

fn show_byte<P: CharacterPort>(port: &mut P, value: u8) {
    port.write_display(SPACE);
    for digit in byte_digits(value) {
        port.write_display(digit);
    }
}
