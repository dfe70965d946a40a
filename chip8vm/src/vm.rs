//! Virtual machine.
use std::fmt::{self, Display, Formatter, Write};

use rand::prelude::*;

use crate::{
    bytecode::Instruction,
    constants::*,
    cpu::Chip8Cpu,
    devices::KeyCode,
    error::{Chip8Error, Chip8Result},
    Chip8DisplayBuffer,
};

pub struct Chip8Vm {
    cpu: Chip8Cpu,
    state: MachineState,
    conf: Chip8Conf,
    rng: StdRng,
    trace: Option<Box<dyn FnMut(OpTrace) + Send>>,
}

impl Chip8Vm {
    pub fn new(conf: Chip8Conf) -> Self {
        let rng = match conf.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Chip8Vm {
            cpu: Chip8Cpu::new(),
            state: MachineState::Running,
            conf,
            rng,
            trace: None,
        }
    }

    /// Configuration that was used to instantiate the VM.
    pub fn config(&self) -> &Chip8Conf {
        &self.conf
    }

    pub fn load_font(&mut self, fontset: &[u8]) -> Chip8Result<()> {
        if fontset.len() != FONTSET_DATA_LENGTH {
            return Err(Chip8Error::Font(format!(
                "fontset data must be {FONTSET_DATA_LENGTH} bytes, got {}",
                fontset.len()
            )));
        }

        self.cpu.ram[FONTSET_START..FONTSET_START + FONTSET_DATA_LENGTH].copy_from_slice(fontset);

        Ok(())
    }

    /// Load a program into virtual RAM at the entry point.
    ///
    /// The fontset must be below the program space, because `Fx29`
    /// computes glyph addresses relative to address 0.
    pub fn load_rom(&mut self, rom: &[u8]) -> Chip8Result<()> {
        if rom.len() > MEM_SIZE - MEM_START {
            return Err(Chip8Error::LargeProgram);
        }

        // Start with clean state to avoid leaking the previous program.
        self.cpu.reset();

        self.load_font(&FONTSET)?;

        self.cpu.ram[MEM_START..MEM_START + rom.len()].copy_from_slice(rom);

        // Reset the program counter to prepare for execution.
        self.cpu.pc = MEM_START;
        self.state = MachineState::Running;

        Ok(())
    }

    pub fn display_buffer(&self) -> Chip8DisplayBuffer {
        &self.cpu.display
    }
}

/// Result of a single instruction step, signalling the machine
/// controller and the host what the instruction did to control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Flow {
    Ok,
    /// Program counter has jumped to a new address.
    ///
    /// This is useful for the caller to avoid being
    /// blocked on infinite or long running loops.
    ///
    /// This is returned when the interpreter encounters:
    ///
    /// - 1nnn (`JP addr`)
    /// - 2nnn (`CALL addr`)
    /// - 00EE (`RET`)
    Jump,
    Draw,
    Sound,
    /// Wait for a keypress.
    ///
    /// This is triggered by the opcode `Fx0A` (`LD Vx, K`), which stops
    /// execution until a key is pressed, and loads the key value into `Vx`.
    KeyWait,
}

/// Run state of the machine, driven entirely by the host.
///
/// The execution engine never transitions the state itself; pausing and
/// quitting are input events. `Quit` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Running,
    Paused,
    Quit,
}

/// Points of deliberate behavioral divergence between interpreter
/// lineages. Programs may depend on either setting.
#[derive(Debug, Clone, Copy)]
pub struct Quirks {
    /// Sprites wrap around the display edges instead of clipping.
    pub draw_wrap: bool,
    /// VF is cleared before each sprite draw.
    pub vf_reset: bool,
}

impl Default for Quirks {
    fn default() -> Self {
        // Clip-not-wrap, and clearing VF up front, is the configuration
        // of the reference interpreter this VM reproduces.
        Self {
            draw_wrap: false,
            vf_reset: true,
        }
    }
}

/// VM Configuration Parameters.
#[derive(Default, Clone)]
pub struct Chip8Conf {
    pub clock_frequency: Option<Hz>,
    pub quirks: Quirks,
    /// Fixed seed for the `Cxnn` random source, for deterministic replay.
    pub rng_seed: Option<u64>,
}

impl Chip8Conf {
    /// Instruction budget of one 60 Hz frame, rounded down.
    pub fn instructions_per_frame(&self) -> usize {
        (self.clock_frequency.unwrap_or(Hz(DEFAULT_CLOCK_HZ)).0 / DELAY_FREQUENCY) as usize
    }
}

/// CPU clock frequency, in hertz (per second)
#[derive(Debug, Default, Clone, Copy)]
pub struct Hz(pub u64);

/// One fetched instruction, handed to the trace sink before execution.
#[derive(Debug, Clone, Copy)]
pub struct OpTrace {
    /// Address the instruction was fetched from.
    pub pc: Address,
    pub instruction: Instruction,
}

impl Display for OpTrace {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}: {}", self.pc, self.instruction)
    }
}

/// Machine controller
impl Chip8Vm {
    /// Sets the keyboard key input state.
    ///
    /// A key press clears the `key_wait` flag so a machine stalled on
    /// `Fx0A` can be resumed.
    pub fn set_key(&mut self, key: KeyCode, pressed: bool) {
        self.cpu.set_key_state(key.as_u8(), pressed);
        if pressed {
            self.cpu.key_wait = false;
        }
    }

    /// Clear the keyboard input state, setting all keys to up.
    pub fn clear_keys(&mut self) {
        self.cpu.clear_keys()
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    /// Transition the run state. `Quit` is terminal; later transitions
    /// are ignored.
    pub fn set_state(&mut self, next: MachineState) {
        if self.state != MachineState::Quit {
            self.state = next;
        }
    }

    /// Whether the buzzer tone should currently be playing.
    pub fn sound_active(&self) -> bool {
        self.cpu.buzzer_state
    }

    /// Whether the machine is stalled on `Fx0A` waiting for a keypress.
    pub fn waiting_for_key(&self) -> bool {
        self.cpu.key_wait
    }

    /// Install a sink that receives every fetched instruction before it
    /// executes. Tracing is a runtime choice; the default is no sink.
    pub fn set_trace<F>(&mut self, sink: F)
    where
        F: FnMut(OpTrace) + Send + 'static,
    {
        self.trace = Some(Box::new(sink));
    }

    pub fn clear_trace(&mut self) {
        self.trace = None;
    }

    /// Execute one 60 Hz frame: a batch of instruction steps followed by
    /// one timer tick.
    ///
    /// Does nothing unless the machine is `Running`; a paused machine
    /// executes no instructions and its timers do not tick.
    pub fn run_frame(&mut self) -> Chip8Result<()> {
        if self.state != MachineState::Running {
            return Ok(());
        }

        for _ in 0..self.conf.instructions_per_frame() {
            if self.step()? == Flow::KeyWait {
                // Stalled on Fx0A. The rest of this frame's budget would
                // re-execute the same instruction, so yield until the
                // host delivers input.
                break;
            }
        }

        // Count down timers
        self.cpu.tick_delay();
        self.cpu.tick_sound();

        // Buzzer should be on while sound timer counts down,
        // then turned off when the timer reaches zero.
        self.cpu.buzzer_state = self.cpu.sound_timer > 0;

        Ok(())
    }

    /// Execute a fixed number of raw instruction steps, without frame
    /// pacing or timer ticks.
    pub fn run_steps(&mut self, step_count: usize) -> Chip8Result<Flow> {
        let mut flow = Flow::Ok;

        for _ in 0..step_count {
            flow = self.step()?;
        }

        Ok(flow)
    }
}

/// Interpreter
impl Chip8Vm {
    /// Fetch, decode and execute a single instruction.
    pub fn step(&mut self) -> Chip8Result<Flow> {
        // Each instruction is two bytes, with the opcode identity in the first 4-bit nibble.
        let instr = Instruction::decode(self.cpu.instr());

        if let Some(sink) = self.trace.as_mut() {
            sink(OpTrace {
                pc: self.cpu.pc as Address,
                instruction: instr,
            });
        }

        // Advance past the fetched instruction before executing it, so
        // calls and jumps see the address of the next instruction.
        self.cpu.pc += 2;

        let Instruction { nnn, nn, n, x, y, .. } = instr;
        let (vx, vy) = (x as usize, y as usize);

        let mut flow = Flow::Ok;

        match instr.family() {
            // Miscellaneous instructions identified by nn
            0x0 | 0xE | 0xF => flow = self.exec_misc(instr)?,
            // 1NNN (JP addr)
            //
            // Jump to address.
            0x1 => {
                self.cpu.pc = nnn as usize;

                flow = Flow::Jump;
            }
            // 2NNN (CALL addr)
            //
            // Call subroutine at NNN.
            0x2 => {
                self.cpu.push_return(self.cpu.pc as Address)?;
                self.cpu.pc = nnn as usize;

                flow = Flow::Jump;
            }
            // 3XNN (SE Vx, byte)
            //
            // Skip the next instruction if register VX equals value NN.
            0x3 => {
                if self.cpu.registers[vx] == nn {
                    self.cpu.pc += 2;
                }
            }
            // 4XNN (SNE Vx, byte)
            //
            // Skip the next instruction if register VX does not equal value NN.
            0x4 => {
                if self.cpu.registers[vx] != nn {
                    self.cpu.pc += 2;
                }
            }
            // 5XY0 (SE Vx, Vy)
            //
            // Skip the next instruction if register VX equals value VY.
            0x5 => {
                if self.cpu.registers[vx] == self.cpu.registers[vy] {
                    self.cpu.pc += 2;
                }
            }
            // 6XNN (LD Vx, byte)
            //
            // Set register VX to value NN.
            0x6 => {
                self.cpu.registers[vx] = nn;
            }
            // 7XNN (ADD Vx, byte)
            //
            // Add value NN to register VX. Carry flag is not set.
            0x7 => {
                let x = self.cpu.registers[vx];
                self.cpu.registers[vx] = x.wrapping_add(nn);
            }
            // Arithmetic instructions identified by n
            0x8 => self.exec_math(vx, vy, n),
            // 9XY0 (SNE Vx, Vy)
            //
            // Skip next instruction if Vx != Vy.
            0x9 => {
                if self.cpu.registers[vx] != self.cpu.registers[vy] {
                    self.cpu.pc += 2;
                }
            }
            // ANNN (LD I, addr)
            //
            // Set address register I to value NNN.
            0xA => {
                self.cpu.address = nnn;
            }
            // BNNN (JP V0, addr)
            //
            // Jump to address NNN plus the value of register V0.
            // This variant always indexes on V0, not VX.
            0xB => {
                self.cpu.pc = (self.cpu.registers[0] as u16 + nnn) as usize;

                flow = Flow::Jump;
            }
            // CXNN (RND Vx, byte)
            //
            // Set register VX to the result of bitwise AND between a random number and NN.
            0xC => {
                self.cpu.registers[vx] = nn & self.rng.gen::<u8>();
            }
            // DXYN (DRW Vx, Vy, nibble)
            //
            // Draw sprite to the display buffer, at coordinate as per registers Vx and Vy.
            0xD => flow = self.exec_draw(vx, vy, n)?,
            // Unrecognized combination: deliberately ignored. The program
            // counter has already advanced past it.
            _ => {}
        }

        Ok(flow)
    }

    /// Execute an arithmetic instruction
    #[inline]
    fn exec_math(&mut self, vx: usize, vy: usize, n: u8) {
        match n {
            // 8XY0 (LD Vx, Vy)
            //
            // Store the value of register VY in register VX.
            0x0 => {
                self.cpu.registers[vx] = self.cpu.registers[vy];
            }
            // 8XY1 (OR Vx, Vy)
            //
            // Performs bitwise OR on VX and VY, and stores the result in VX.
            0x1 => {
                self.cpu.registers[vx] |= self.cpu.registers[vy];
            }
            // 8XY2 (AND Vx, Vy)
            //
            // Performs bitwise AND on VX and VY, and stores the result in VX.
            0x2 => {
                self.cpu.registers[vx] &= self.cpu.registers[vy];
            }
            // 8XY3 (XOR Vx, Vy)
            //
            // Performs bitwise XOR on VX and VY, and stores the result in VX.
            0x3 => {
                self.cpu.registers[vx] ^= self.cpu.registers[vy];
            }
            // 8XY4 (ADD Vx, Vy)
            //
            // Adds VY to VX, and stores the result in VX.
            // Overflow is wrapped.
            // If overflow, set VF to 1, else 0.
            0x4 => {
                let (x, y) = (self.cpu.registers[vx], self.cpu.registers[vy]);
                // The flag is computed from the operands before the
                // destination register is overwritten. VX may be VF.
                let sum = x as u16 + y as u16;
                self.cpu.registers[vx] = sum as u8;
                self.cpu.registers[0xF] = (sum > 0xFF) as u8;
            }
            // 8XY5 (SUB Vx, Vy)
            //
            // Subtracts VY from VX, and stores the result in VX.
            // VF is set to 0 when there is a borrow, set to 1 when there isn't.
            0x5 => {
                let (x, y) = (self.cpu.registers[vx], self.cpu.registers[vy]);
                let no_borrow = x >= y;
                self.cpu.registers[vx] = x.wrapping_sub(y);
                self.cpu.registers[0xF] = no_borrow as u8;
            }
            // 8XY6 (SHR Vx)
            //
            // Shift VX right by 1. VF receives the shifted-out bit.
            // VY is unused.
            0x6 => {
                let x = self.cpu.registers[vx];
                self.cpu.registers[vx] = x >> 1;
                self.cpu.registers[0xF] = x & 1;
            }
            // 8XY7 (SUBN Vx, Vy)
            //
            // Subtracts VX from VY, and stores the result in VX.
            // VF is set to 0 when there is a borrow, set to 1 when there isn't.
            0x7 => {
                let (x, y) = (self.cpu.registers[vx], self.cpu.registers[vy]);
                let no_borrow = y >= x;
                self.cpu.registers[vx] = y.wrapping_sub(x);
                self.cpu.registers[0xF] = no_borrow as u8;
            }
            // 8XYE (SHL Vx)
            //
            // Shift VX left by 1. VF receives the shifted-out bit.
            // VY is unused.
            0xE => {
                let x = self.cpu.registers[vx];
                self.cpu.registers[vx] = x << 1;
                self.cpu.registers[0xF] = (x >> 7) & 1;
            }
            // Unrecognized combination, ignored.
            _ => {}
        }
    }

    /// Execute a miscellaneous instruction
    #[inline]
    fn exec_misc(&mut self, instr: Instruction) -> Chip8Result<Flow> {
        let vx = instr.x as usize;

        let mut flow = Flow::Ok;

        match (instr.family(), instr.nn) {
            // 00E0 (CLS)
            //
            // Clear display
            (0x0, 0xE0) => {
                self.cpu.clear_display();
            }
            // 00EE (RET)
            //
            // Return from a subroutine.
            // Set the program counter to the value at the top of the stack.
            (0x0, 0xEE) => {
                self.cpu.pc = self.cpu.pop_return()? as usize;

                flow = Flow::Jump;
            }
            // ----------------------------------------------------------------
            // EX9E (SKP Vx)
            //
            // Skip the next instruction if the key named by VX is pressed.
            (0xE, 0x9E) => {
                if self.cpu.key_state(self.cpu.registers[vx]) {
                    self.cpu.pc += 2;
                }
            }
            // EXA1 (SKNP Vx)
            //
            // Skip the next instruction if the key named by VX is not pressed.
            (0xE, 0xA1) => {
                if !self.cpu.key_state(self.cpu.registers[vx]) {
                    self.cpu.pc += 2;
                }
            }
            // ----------------------------------------------------------------
            // FX07 (LD Vx, DT)
            //
            // Set Vx = delay timer value.
            (0xF, 0x07) => {
                self.cpu.registers[vx] = self.cpu.delay_timer;
            }
            // FX0A (LD Vx, K)
            //
            // Wait for a key press, store the value of the key in Vx.
            //
            // Blocking is simulated: while no key is down, the program
            // counter rewinds by exactly 2 so the same instruction is
            // fetched again next frame.
            (0xF, 0x0A) => {
                if let Some(k) = self.cpu.first_key() {
                    self.cpu.registers[vx] = k;
                    self.cpu.key_wait = false;
                } else {
                    // rewind the program counter to stall the machine
                    self.cpu.pc -= 2;
                    self.cpu.key_wait = true;
                    flow = Flow::KeyWait;
                }
            }
            // FX15 (LD DT, Vx)
            //
            // Set delay timer = Vx.
            (0xF, 0x15) => {
                self.cpu.delay_timer = self.cpu.registers[vx];
            }
            // FX18 (LD ST, Vx)
            //
            // Set sound timer = Vx.
            (0xF, 0x18) => {
                self.cpu.sound_timer = self.cpu.registers[vx];
                self.cpu.buzzer_state = self.cpu.sound_timer > 0;

                flow = Flow::Sound;
            }
            // FX1E (ADD I, Vx)
            //
            // Add Vx to I. The sum is not range-checked here; memory
            // reached through I is checked at the access site.
            (0xF, 0x1E) => {
                let x = self.cpu.registers[vx] as u16;
                self.cpu.address = self.cpu.address.wrapping_add(x);
            }
            // FX29 (LD F, Vx)
            //
            // Set I = location of sprite for digit Vx.
            (0xF, 0x29) => {
                let x = self.cpu.registers[vx] as usize;
                self.cpu.address = (FONTSET_START + x * FONTSET_HEIGHT) as Address;
            }
            // FX33 (LD B, Vx)
            //
            // Store the binary-coded decimal representation of Vx
            // in the memory locations I, I+1, and I+2.
            #[rustfmt::skip]
            (0xF, 0x33) => {
                let addr = self.cpu.address as usize;
                self.cpu.check_ram_range(addr, 3)?;

                let x = self.cpu.registers[vx];
                self.cpu.ram[addr + 2] = x       % 10;
                self.cpu.ram[addr + 1] = x / 10  % 10;
                self.cpu.ram[addr]     = x / 100 % 10;
            }
            // FX55 (LD [I], Vx)
            //
            // Store registers V0 through Vx in memory starting at location I.
            (0xF, 0x55) => {
                let addr = self.cpu.address as usize;
                self.cpu.check_ram_range(addr, vx + 1)?;

                self.cpu.ram[addr..=addr + vx].copy_from_slice(&self.cpu.registers[0..=vx]);
            }
            // FX65 (LD Vx, [I])
            //
            // Read registers V0 through Vx from memory starting at location I.
            (0xF, 0x65) => {
                let addr = self.cpu.address as usize;
                self.cpu.check_ram_range(addr, vx + 1)?;

                self.cpu.registers[0..=vx].copy_from_slice(&self.cpu.ram[addr..=addr + vx]);
            }
            // ----------------------------------------------------------------
            // Unrecognized combination: deliberately ignored.
            _ => {}
        }

        Ok(flow)
    }

    /// Execute a sprite draw.
    ///
    /// Only the starting coordinate wraps around the display; the sprite
    /// body clips at the right and bottom edges, unless the wrap quirk
    /// is enabled.
    fn exec_draw(&mut self, vx: usize, vy: usize, n: u8) -> Chip8Result<Flow> {
        let Quirks { draw_wrap, vf_reset } = self.conf.quirks;

        let addr = self.cpu.address as usize;
        self.cpu.check_ram_range(addr, n as usize)?;

        let x0 = self.cpu.registers[vx] as usize % DISPLAY_WIDTH;
        let y0 = self.cpu.registers[vy] as usize % DISPLAY_HEIGHT;

        if vf_reset {
            self.cpu.registers[0xF] = 0;
        }

        let mut is_erased = false;

        for r in 0..n as usize {
            let py = if draw_wrap {
                (y0 + r) % DISPLAY_HEIGHT
            } else if y0 + r >= DISPLAY_HEIGHT {
                // Hard clip: stop drawing the sprite entirely.
                break;
            } else {
                y0 + r
            };

            // Each row is 8 bits representing the 8 pixels of the sprite,
            // most significant bit leftmost.
            let row = self.cpu.ram[addr + r];

            for c in 0..8 {
                let px = if draw_wrap {
                    (x0 + c) % DISPLAY_WIDTH
                } else if x0 + c >= DISPLAY_WIDTH {
                    // Hard clip: stop the row at the right edge.
                    break;
                } else {
                    x0 + c
                };

                let d = px + py * DISPLAY_WIDTH;

                let old_px = self.cpu.display[d];
                let new_px = (row >> (7 - c)) & 1 != 0;

                // XOR erases a pixel when both the old and new values are 1.
                is_erased |= old_px && new_px;

                // Write to display buffer
                self.cpu.display[d] = old_px ^ new_px;
            }
        }

        // If a pixel was erased, then a collision occurred.
        if is_erased {
            self.cpu.registers[0xF] = 1;
        }

        Ok(Flow::Draw)
    }
}

/// Register and memory inspection, for hosts and debuggers.
impl Chip8Vm {
    pub fn registers(&self) -> &[u8; REGISTER_COUNT] {
        &self.cpu.registers
    }

    pub fn pc(&self) -> usize {
        self.cpu.pc
    }

    pub fn address(&self) -> Address {
        self.cpu.address
    }

    pub fn delay_timer(&self) -> u8 {
        self.cpu.delay_timer
    }

    pub fn sound_timer(&self) -> u8 {
        self.cpu.sound_timer
    }

    pub fn ram(&self) -> &[u8] {
        &*self.cpu.ram
    }
}

/// Troubleshooting
#[doc(hidden)]
impl Chip8Vm {
    /// Returns the contents of the memory as a human readable string.
    pub fn dump_ram(&self, count: usize) -> Result<String, fmt::Error> {
        let iter = self
            .cpu
            .ram
            .iter()
            .enumerate()
            .skip(MEM_START)
            .take(count)
            .step_by(2);
        let mut buf = String::new();

        for (i, op) in iter {
            writeln!(buf, "{:04X}: {:02X}{:02X}", i, op, self.cpu.ram[i + 1])?;
        }

        Ok(buf)
    }

    pub fn dump_display(&self) -> Result<String, fmt::Error> {
        let mut buf = String::new();

        for y in 0..DISPLAY_HEIGHT {
            for x in 0..DISPLAY_WIDTH {
                if self.cpu.display[x + y * DISPLAY_WIDTH] {
                    write!(buf, "#")?;
                } else {
                    write!(buf, ".")?;
                }
            }
            writeln!(buf)?;
        }

        Ok(buf)
    }

    pub fn dump_keys(&self) -> Result<String, fmt::Error> {
        let mut buf = String::new();

        if self.cpu.any_key() {
            write!(buf, "keys: ")?;
            for i in 0..KEY_COUNT {
                if self.cpu.key_state(i) {
                    write!(buf, "k{i:x}")?;
                }
            }
        }

        Ok(buf)
    }
}
