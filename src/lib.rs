//! # wozmon
//!
//! A Woz-style hex memory monitor running on an emulated 6502 machine.
//!
//! The monitor reads a line from a polled keyboard, then examines, stores or
//! jumps according to what was typed:
//!
//! ```text
//! 0300: A9 C1 8D 12 D0 00    store a program
//! 0300.0305                  show it back
//! 0300R                      run it
//! ```
//!
//! ## Layout
//!
//! - [`charset`], [`hex`], [`line_editor`], [`monitor`]: the monitor itself,
//!   independent of any hardware
//! - [`port`]: the keyboard/display seen by the monitor
//! - [`memory`], [`cpu`], [`machine`]: the host the monitor runs on
//! - [`session`], [`server`], [`auth`]: monitors driven over HTTP
//!
//! ## Example
//!
//! ```rust
//! use wozmon::config::MachineConfig;
//! use wozmon::machine::Machine;
//! use wozmon::port::ScriptedPort;
//!
//! let mut machine = Machine::new(ScriptedPort::new(), MachineConfig::default());
//! machine.boot();
//! let (output, _) = machine.feed("0300: 42\n0300\n");
//!
//! assert!(output.ends_with("0300: 42\n"));
//! assert_eq!(machine.memory().read(0x0300), 0x42);
//! ```

pub mod auth;
pub mod charset;
pub mod config;
pub mod cpu;
pub mod hex;
pub mod line_editor;
pub mod machine;
pub mod memory;
pub mod metrics;
pub mod monitor;
pub mod port;
pub mod server;
pub mod session;

pub use cpu::CPU;
pub use machine::Machine;
pub use memory::Memory;
pub use monitor::{Handoff, Monitor};
