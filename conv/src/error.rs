// error.rs - Error types for image loading and script execution

use thiserror::Error;

/// Errors while parsing a conversation image
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("unexpected end of data at offset {offset:#x}")]
    Truncated { offset: usize },

    #[error("unknown import type {import_type:#06x} for \"{name}\"")]
    UnknownImportType { name: String, import_type: u16 },

    #[error("unknown return type {return_type:#06x} for \"{name}\"")]
    UnknownReturnType { name: String, return_type: u16 },
}

/// Errors while parsing a persisted globals file
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GlobalsError {
    #[error("globals record header cut off at offset {offset:#x}")]
    TruncatedHeader { offset: usize },

    #[error("globals of slot {slot} cut off at offset {offset:#x}")]
    TruncatedSlot { slot: u16, offset: usize },
}

/// Operand stack access errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StackError {
    #[error("stack overflow (capacity {capacity})")]
    Overflow { capacity: usize },

    #[error("stack underflow")]
    Underflow,

    #[error("stack index {index:#06x} out of range")]
    OutOfRange { index: u16 },
}

/// Faults that end a script run
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmFault {
    #[error(transparent)]
    Stack(#[from] StackError),

    #[error("instruction pointer {ip:#06x} outside of code")]
    InstructionPointer { ip: u16 },

    #[error("unknown opcode {word:#06x} at {pos:#06x}")]
    UnknownOpcode { word: u16, pos: u16 },

    #[error("unsupported opcode {mnemonic} at {pos:#06x}")]
    UnsupportedOpcode { mnemonic: &'static str, pos: u16 },

    #[error("division by zero at {pos:#06x}")]
    DivisionByZero { pos: u16 },

    #[error("unknown intrinsic index {index:#06x} at {pos:#06x}")]
    UnknownIntrinsic { index: u16, pos: u16 },

    #[error("intrinsic {name}() is not supported")]
    UnsupportedIntrinsic { name: String },

    #[error("string {index} not in string table")]
    InvalidString { index: u16 },
}
