//! Result and errors.
use std::fmt::{self, Display, Formatter};
use std::io;

use crate::constants::Address;

pub type Chip8Result<T> = std::result::Result<T, Chip8Error>;

#[derive(Debug)]
pub enum Chip8Error {
    /// Attempt to load a ROM that can't fit in memory.
    LargeProgram,
    /// Attempt to load a malformed fontset.
    Font(String),
    /// Subroutine call while the return stack is already full.
    StackOverflow { pc: Address },
    /// Subroutine return while the return stack is empty.
    StackUnderflow { pc: Address },
    /// Memory access through the index register outside the address space.
    OutOfBounds { address: Address },
    Io(io::Error),
    Fmt(fmt::Error),
}

impl Display for Chip8Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::LargeProgram => write!(f, "program too large for VM memory"),
            Self::Font(msg) => write!(f, "font error: {}", msg),
            Self::StackOverflow { pc } => {
                write!(f, "call stack overflow at 0x{:04X}", pc)
            }
            Self::StackUnderflow { pc } => {
                write!(f, "call stack underflow at 0x{:04X}", pc)
            }
            Self::OutOfBounds { address } => {
                write!(f, "memory access out of bounds at 0x{:04X}", address)
            }
            Self::Io(err) => write!(f, "{}", err),
            Self::Fmt(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for Chip8Error {}

impl From<io::Error> for Chip8Error {
    fn from(err: io::Error) -> Self {
        Chip8Error::Io(err)
    }
}

impl From<fmt::Error> for Chip8Error {
    fn from(err: fmt::Error) -> Self {
        Chip8Error::Fmt(err)
    }
}
