/*! Target architecture tables.
 *
 * Lifted functions do not see machine registers. They operate on a state structure with one
 * 8-byte slot per register, passed by pointer. This module fixes the slot layout, the handful of
 * registers the pipeline needs by role, and the integer argument registers of each native calling
 * convention used when native code calls into lifted code or lifted code calls an import.
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of the stack synthesized for a native-to-lifted transition.
pub const DEFAULT_STACK_SIZE: u64 = 0x10000;

/// Width of one register slot in the state structure.
pub const REGISTER_SLOT_SIZE: u64 = 8;

const X86_64_REGISTERS: &[&str] = &[
    "RAX", "RBX", "RCX", "RDX", "RSI", "RDI", "RBP", "RSP", "R8", "R9", "R10", "R11", "R12",
    "R13", "R14", "R15", "RIP", "ZF", "SF", "CF", "OF",
];

const AARCH64_REGISTERS: &[&str] = &[
    "X0", "X1", "X2", "X3", "X4", "X5", "X6", "X7", "X8", "X9", "X10", "X11", "X12", "X13",
    "X14", "X15", "X16", "X17", "X18", "X19", "X20", "X21", "X22", "X23", "X24", "X25", "X26",
    "X27", "X28", "X29", "X30", "SP", "PC", "N", "Z", "C", "V",
];

const X86_64_SYSV_ARGS: &[&str] = &["RDI", "RSI", "RDX", "RCX", "R8", "R9"];
const X86_64_WIN64_ARGS: &[&str] = &["RCX", "RDX", "R8", "R9"];
const AARCH64_ARGS: &[&str] = &["X0", "X1", "X2", "X3", "X4", "X5", "X6", "X7"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    #[serde(alias = "amd64")]
    X86_64,
    #[serde(alias = "arm64")]
    Aarch64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperatingSystem {
    #[default]
    Linux,
    #[serde(alias = "macos")]
    MacOs,
    Windows,
}

/// Index of a register slot in the state structure of an [`Arch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Register(pub u16);

impl Arch {
    pub fn registers(self) -> &'static [&'static str] {
        match self {
            Arch::X86_64 => X86_64_REGISTERS,
            Arch::Aarch64 => AARCH64_REGISTERS,
        }
    }

    /// Looks a register up by name, ignoring case.
    pub fn register(self, name: &str) -> Option<Register> {
        self.registers()
            .iter()
            .position(|r| r.eq_ignore_ascii_case(name))
            .map(|idx| Register(idx as u16))
    }

    pub fn register_name(self, reg: Register) -> &'static str {
        self.registers().get(reg.0 as usize).copied().unwrap_or("?")
    }

    pub fn register_offset(self, reg: Register) -> u64 {
        reg.0 as u64 * REGISTER_SLOT_SIZE
    }

    pub fn state_size(self) -> u64 {
        self.registers().len() as u64 * REGISTER_SLOT_SIZE
    }

    pub fn pointer_size(self) -> u64 {
        8
    }

    pub fn stack_pointer(self) -> Register {
        self.fixed("RSP", "SP")
    }

    pub fn program_counter(self) -> Register {
        self.fixed("RIP", "PC")
    }

    pub fn return_register(self) -> Register {
        self.fixed("RAX", "X0")
    }

    /// Integer argument registers of the native calling convention, in order.
    pub fn argument_registers(self, os: OperatingSystem) -> Vec<Register> {
        let names = match (self, os) {
            (Arch::X86_64, OperatingSystem::Windows) => X86_64_WIN64_ARGS,
            (Arch::X86_64, _) => X86_64_SYSV_ARGS,
            (Arch::Aarch64, _) => AARCH64_ARGS,
        };
        names.iter().filter_map(|name| self.register(name)).collect()
    }

    pub fn triple(self, os: OperatingSystem) -> &'static str {
        match (self, os) {
            (Arch::X86_64, OperatingSystem::Linux) => "x86_64-unknown-linux-gnu",
            (Arch::X86_64, OperatingSystem::MacOs) => "x86_64-apple-darwin",
            (Arch::X86_64, OperatingSystem::Windows) => "x86_64-pc-windows-msvc",
            (Arch::Aarch64, OperatingSystem::Linux) => "aarch64-unknown-linux-gnu",
            (Arch::Aarch64, OperatingSystem::MacOs) => "aarch64-apple-darwin",
            (Arch::Aarch64, OperatingSystem::Windows) => "aarch64-pc-windows-msvc",
        }
    }

    fn fixed(self, x86: &str, arm: &str) -> Register {
        let name = match self {
            Arch::X86_64 => x86,
            Arch::Aarch64 => arm,
        };
        // Both names are entries of the static tables above.
        self.register(name).unwrap_or(Register(0))
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::X86_64 => write!(f, "x86_64"),
            Arch::Aarch64 => write!(f, "aarch64"),
        }
    }
}

impl fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatingSystem::Linux => write!(f, "linux"),
            OperatingSystem::MacOs => write!(f, "macos"),
            OperatingSystem::Windows => write!(f, "windows"),
        }
    }
}
