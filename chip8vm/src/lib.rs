mod bytecode;
mod clock;
pub mod constants;
mod cpu;
mod devices;
mod error;
mod vm;

pub use self::vm::Hz;

pub const IMPL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Borrowed view of the monochrome display plane, row-major.
pub type Chip8DisplayBuffer<'a> = &'a [bool; constants::DISPLAY_BUFFER_SIZE];

pub mod prelude {
    pub use super::{
        bytecode::Instruction,
        clock::Clock,
        devices::KeyCode,
        error::{Chip8Error, Chip8Result},
        vm::{Chip8Conf, Chip8Vm, Flow, MachineState, OpTrace, Quirks},
        Chip8DisplayBuffer, Hz,
    };
}
