//! Opcode semantics, exercised through raw bytecode programs.
use chip8vm::constants::*;
use chip8vm::prelude::*;

fn boot(rom: &[u8]) -> Chip8Vm {
    let mut vm = Chip8Vm::new(Chip8Conf::default());
    vm.load_rom(rom).unwrap();
    vm
}

#[test]
fn test_ld_byte() {
    let mut vm = boot(&[
        0x60, 0x0A, // LD v0, 0x0A
        0x6E, 0xFF, // LD vE, 0xFF
    ]);

    vm.step().unwrap();
    assert_eq!(vm.registers()[0x0], 0x0A);
    assert_eq!(vm.pc(), MEM_START + 2);

    vm.step().unwrap();
    assert_eq!(vm.registers()[0xE], 0xFF);
    assert_eq!(vm.pc(), MEM_START + 4);
}

#[test]
fn test_add_byte_wraps_and_leaves_vf() {
    let mut vm = boot(&[
        0x6F, 0x01, // LD vF, 1     ; sentinel flag value
        0x60, 0xFA, // LD v0, 250
        0x70, 0x10, // ADD v0, 16   ; wraps to 10
    ]);

    vm.run_steps(3).unwrap();
    assert_eq!(vm.registers()[0x0], 10);
    // 7XNN never touches the flag register.
    assert_eq!(vm.registers()[0xF], 1);
}

#[test]
fn test_math_add_carry() {
    let mut vm = boot(&[
        0x60, 0xFA, // LD v0, 250
        0x61, 0x0A, // LD v1, 10
        0x80, 0x14, // ADD v0, v1   ; 260 wraps to 4, carry
    ]);
    vm.run_steps(3).unwrap();
    assert_eq!(vm.registers()[0x0], 4);
    assert_eq!(vm.registers()[0xF], 1);

    let mut vm = boot(&[
        0x60, 0x0A, // LD v0, 10
        0x61, 0x05, // LD v1, 5
        0x80, 0x14, // ADD v0, v1
    ]);
    vm.run_steps(3).unwrap();
    assert_eq!(vm.registers()[0x0], 15);
    assert_eq!(vm.registers()[0xF], 0);
}

#[test]
fn test_math_sub_borrow() {
    let mut vm = boot(&[
        0x60, 0x0A, // LD v0, 10
        0x61, 0x05, // LD v1, 5
        0x80, 0x15, // SUB v0, v1
    ]);
    vm.run_steps(3).unwrap();
    assert_eq!(vm.registers()[0x0], 5);
    assert_eq!(vm.registers()[0xF], 1); // no borrow

    let mut vm = boot(&[
        0x60, 0x05, // LD v0, 5
        0x61, 0x0A, // LD v1, 10
        0x80, 0x15, // SUB v0, v1   ; borrows, wraps to 251
    ]);
    vm.run_steps(3).unwrap();
    assert_eq!(vm.registers()[0x0], 251);
    assert_eq!(vm.registers()[0xF], 0);
}

#[test]
fn test_math_subn_borrow() {
    let mut vm = boot(&[
        0x60, 0x05, // LD v0, 5
        0x61, 0x0A, // LD v1, 10
        0x80, 0x17, // SUBN v0, v1  ; v0 = v1 - v0
    ]);
    vm.run_steps(3).unwrap();
    assert_eq!(vm.registers()[0x0], 5);
    assert_eq!(vm.registers()[0xF], 1); // no borrow

    let mut vm = boot(&[
        0x60, 0x0A, // LD v0, 10
        0x61, 0x05, // LD v1, 5
        0x80, 0x17, // SUBN v0, v1  ; borrows
    ]);
    vm.run_steps(3).unwrap();
    assert_eq!(vm.registers()[0x0], 251);
    assert_eq!(vm.registers()[0xF], 0);
}

#[test]
fn test_math_shift_right_flag_is_pre_shift_lsb() {
    let mut vm = boot(&[
        0x60, 0x05, // LD v0, 0b101
        0x80, 0x06, // SHR v0
    ]);
    vm.run_steps(2).unwrap();
    assert_eq!(vm.registers()[0x0], 0b10);
    assert_eq!(vm.registers()[0xF], 1);
}

#[test]
fn test_math_shift_left_flag_is_pre_shift_msb() {
    let mut vm = boot(&[
        0x60, 0x81, // LD v0, 0b1000_0001
        0x80, 0x0E, // SHL v0
    ]);
    vm.run_steps(2).unwrap();
    assert_eq!(vm.registers()[0x0], 0b10);
    assert_eq!(vm.registers()[0xF], 1);
}

#[test]
fn test_math_bitwise() {
    let mut vm = boot(&[
        0x60, 0b1100, // LD v0
        0x61, 0b1010, // LD v1
        0x80, 0x11,   // OR v0, v1
    ]);
    vm.run_steps(3).unwrap();
    assert_eq!(vm.registers()[0x0], 0b1110);

    let mut vm = boot(&[
        0x60, 0b1100, // LD v0
        0x61, 0b1010, // LD v1
        0x80, 0x12,   // AND v0, v1
    ]);
    vm.run_steps(3).unwrap();
    assert_eq!(vm.registers()[0x0], 0b1000);

    let mut vm = boot(&[
        0x60, 0b1100, // LD v0
        0x61, 0b1010, // LD v1
        0x80, 0x13,   // XOR v0, v1
    ]);
    vm.run_steps(3).unwrap();
    assert_eq!(vm.registers()[0x0], 0b0110);
}

#[test]
fn test_call_return_roundtrip() {
    let mut vm = boot(&[
        0x22, 0x06, // 0x200: CALL 0x206
        0x61, 0x01, // 0x202: LD v1, 1   ; continues here after RET
        0x00, 0x00, // 0x204:
        0x60, 0x01, // 0x206: LD v0, 1   ; subroutine body
        0x00, 0xEE, // 0x208: RET
    ]);

    assert_eq!(vm.step().unwrap(), Flow::Jump);
    assert_eq!(vm.pc(), 0x206);

    vm.step().unwrap();
    assert_eq!(vm.registers()[0x0], 1);

    // RET restores the instruction immediately after the CALL.
    assert_eq!(vm.step().unwrap(), Flow::Jump);
    assert_eq!(vm.pc(), 0x202);

    vm.step().unwrap();
    assert_eq!(vm.registers()[0x1], 1);
}

#[test]
fn test_skip_equal_byte() {
    let mut vm = boot(&[
        0x60, 0x07, // LD v0, 7
        0x30, 0x07, // SE v0, 7     ; taken
        0x61, 0xAA, // skipped
        0x30, 0x08, // SE v0, 8     ; not taken
        0x62, 0xBB, // executes
    ]);

    vm.run_steps(4).unwrap();
    assert_eq!(vm.registers()[0x1], 0);
    assert_eq!(vm.registers()[0x2], 0xBB);
}

#[test]
fn test_skip_not_equal_byte() {
    let mut vm = boot(&[
        0x60, 0x07, // LD v0, 7
        0x40, 0x08, // SNE v0, 8    ; taken
        0x61, 0xAA, // skipped
        0x62, 0xBB, // executes
    ]);

    vm.run_steps(3).unwrap();
    assert_eq!(vm.registers()[0x1], 0);
    assert_eq!(vm.registers()[0x2], 0xBB);
}

#[test]
fn test_skip_register_compare() {
    let mut vm = boot(&[
        0x60, 0x07, // LD v0, 7
        0x61, 0x07, // LD v1, 7
        0x50, 0x10, // SE v0, v1    ; taken
        0x62, 0xAA, // skipped
        0x90, 0x10, // SNE v0, v1   ; not taken
        0x63, 0xBB, // executes
    ]);

    vm.run_steps(5).unwrap();
    assert_eq!(vm.registers()[0x2], 0);
    assert_eq!(vm.registers()[0x3], 0xBB);
}

#[test]
fn test_jump() {
    let mut vm = boot(&[
        0x12, 0x04, // JP 0x204
        0x60, 0xAA, // never runs
        0x60, 0xBB, // 0x204: LD v0, 0xBB
    ]);

    assert_eq!(vm.step().unwrap(), Flow::Jump);
    assert_eq!(vm.pc(), 0x204);

    vm.step().unwrap();
    assert_eq!(vm.registers()[0x0], 0xBB);
}

#[test]
fn test_jump_offset_indexes_v0() {
    let mut vm = boot(&[
        0x60, 0x04, // LD v0, 4
        0xB2, 0x02, // JP v0, 0x202 ; lands on 0x206
        0x60, 0xAA, // never runs
        0x61, 0xCC, // 0x206: LD v1, 0xCC
    ]);

    vm.step().unwrap();
    assert_eq!(vm.step().unwrap(), Flow::Jump);
    assert_eq!(vm.pc(), 0x206);

    vm.step().unwrap();
    assert_eq!(vm.registers()[0x1], 0xCC);
}

#[test]
fn test_index_register() {
    let mut vm = boot(&[
        0xA1, 0x23, // LD I, 0x123
        0x60, 0x10, // LD v0, 16
        0xF0, 0x1E, // ADD I, v0
    ]);

    vm.step().unwrap();
    assert_eq!(vm.address(), 0x123);

    vm.run_steps(2).unwrap();
    assert_eq!(vm.address(), 0x133);
}

#[test]
fn test_random_masks_and_replays() {
    let rom = [
        0xC0, 0x0F, // RND v0, 0x0F
        0xC1, 0xFF, // RND v1, 0xFF
    ];

    let conf = Chip8Conf {
        rng_seed: Some(0x5EED),
        ..Chip8Conf::default()
    };

    let mut vm = Chip8Vm::new(conf.clone());
    vm.load_rom(&rom).unwrap();
    vm.run_steps(2).unwrap();

    // Only bits present in the mask may be set.
    assert_eq!(vm.registers()[0x0] & 0xF0, 0);

    // The same seed must replay the same sequence.
    let mut replay = Chip8Vm::new(conf);
    replay.load_rom(&rom).unwrap();
    replay.run_steps(2).unwrap();

    assert_eq!(vm.registers()[0x0], replay.registers()[0x0]);
    assert_eq!(vm.registers()[0x1], replay.registers()[0x1]);
}

#[test]
fn test_bcd() {
    let mut vm = boot(&[
        0xA3, 0x00, // LD I, 0x300
        0x60, 0xEA, // LD v0, 234
        0xF0, 0x33, // LD B, v0
    ]);

    vm.run_steps(3).unwrap();
    assert_eq!(&vm.ram()[0x300..0x303], &[2, 3, 4]);
}

#[test]
fn test_bcd_single_digit() {
    let mut vm = boot(&[
        0xA3, 0x00, // LD I, 0x300
        0x60, 0x07, // LD v0, 7
        0xF0, 0x33, // LD B, v0
    ]);

    vm.run_steps(3).unwrap();
    assert_eq!(&vm.ram()[0x300..0x303], &[0, 0, 7]);
}

#[test]
fn test_reg_store_load_inclusive() {
    let mut vm = boot(&[
        0x60, 0x11, // LD v0, 0x11
        0x61, 0x22, // LD v1, 0x22
        0x62, 0x33, // LD v2, 0x33
        0xA3, 0x00, // LD I, 0x300
        0xF2, 0x55, // LD [I], v2   ; store v0..=v2
        0x60, 0x00, // LD v0, 0
        0x61, 0x00, // LD v1, 0
        0x62, 0x00, // LD v2, 0
        0xF2, 0x65, // LD v2, [I]   ; load them back
    ]);

    vm.run_steps(5).unwrap();
    assert_eq!(&vm.ram()[0x300..0x304], &[0x11, 0x22, 0x33, 0x00]);

    vm.run_steps(4).unwrap();
    assert_eq!(&vm.registers()[0..3], &[0x11, 0x22, 0x33]);
}

#[test]
fn test_font_sprite_address() {
    let mut vm = boot(&[
        0x60, 0x07, // LD v0, 7
        0xF0, 0x29, // LD F, v0
    ]);

    vm.run_steps(2).unwrap();
    assert_eq!(vm.address(), 7 * FONTSET_HEIGHT as Address);

    // The glyph bytes for digit 7 must be resident below the program space.
    let addr = vm.address() as usize;
    assert_eq!(
        &vm.ram()[addr..addr + FONTSET_HEIGHT],
        &[0xF0, 0x10, 0x20, 0x40, 0x40]
    );
}

#[test]
fn test_keypad_skips() {
    let rom = [
        0x60, 0x05, // LD v0, 5
        0xE0, 0x9E, // SKP v0
        0x61, 0xAA, // skipped when key 5 down
        0xE0, 0xA1, // SKNP v0
        0x62, 0xBB, // skipped when key 5 up
        0x00, 0x00,
    ];

    // Key down: SKP taken, SKNP not taken.
    let mut vm = boot(&rom);
    vm.set_key(KeyCode::Key5, true);
    vm.run_steps(4).unwrap();
    assert_eq!(vm.registers()[0x1], 0);
    assert_eq!(vm.registers()[0x2], 0xBB);

    // Key up: SKP not taken, SKNP taken.
    let mut vm = boot(&rom);
    vm.run_steps(4).unwrap();
    assert_eq!(vm.registers()[0x1], 0xAA);
    assert_eq!(vm.registers()[0x2], 0);
}

#[test]
fn test_delay_timer_registers() {
    let mut vm = boot(&[
        0x60, 0x2A, // LD v0, 42
        0xF0, 0x15, // LD DT, v0
        0xF1, 0x07, // LD v1, DT
    ]);

    vm.run_steps(3).unwrap();
    assert_eq!(vm.delay_timer(), 42);
    assert_eq!(vm.registers()[0x1], 42);
}

#[test]
fn test_unknown_opcodes_are_noops() {
    // One unrecognized combination from each sub-dispatched family.
    for rom in [[0x01, 0x23], [0x80, 0x0F], [0xE0, 0x55], [0xF0, 0xFF]] {
        let mut vm = boot(&rom);
        let registers = *vm.registers();

        assert_eq!(vm.step().unwrap(), Flow::Ok);
        assert_eq!(vm.pc(), MEM_START + 2);
        assert_eq!(*vm.registers(), registers);
        assert_eq!(vm.address(), 0);
    }
}

#[test]
fn test_stack_overflow_is_an_error() {
    // A ladder of CALLs, each targeting the next instruction. The
    // thirteenth call exceeds the original interpreter's nesting depth.
    let mut rom = Vec::new();
    for i in 0..13u16 {
        let target = 0x202 + i * 2;
        rom.extend_from_slice(&target.to_be_bytes());
        rom[i as usize * 2] = 0x20 | rom[i as usize * 2];
    }

    let mut vm = boot(&rom);
    vm.run_steps(12).unwrap();

    assert!(matches!(
        vm.step(),
        Err(Chip8Error::StackOverflow { .. })
    ));
}

#[test]
fn test_return_on_empty_stack_is_an_error() {
    let mut vm = boot(&[0x00, 0xEE]);

    assert!(matches!(
        vm.step(),
        Err(Chip8Error::StackUnderflow { .. })
    ));
}

#[test]
fn test_index_access_out_of_bounds_is_an_error() {
    // Store through I when I + 3 runs past the end of memory.
    let mut vm = boot(&[
        0xAF, 0xFE, // LD I, 0xFFE
        0xF2, 0x55, // LD [I], v2
    ]);
    vm.step().unwrap();
    assert!(matches!(
        vm.step(),
        Err(Chip8Error::OutOfBounds { address: 0xFFE })
    ));

    // Draw when the sprite data would be read past the end of memory.
    let mut vm = boot(&[
        0xAF, 0xFE, // LD I, 0xFFE
        0xD0, 0x05, // DRW v0, v0, 5
    ]);
    vm.step().unwrap();
    assert!(matches!(
        vm.step(),
        Err(Chip8Error::OutOfBounds { address: 0xFFE })
    ));
}

#[test]
fn test_rom_too_large_fails_to_load() {
    let mut vm = Chip8Vm::new(Chip8Conf::default());

    let rom = vec![0x00; MEM_SIZE - MEM_START + 1];
    assert!(matches!(
        vm.load_rom(&rom),
        Err(Chip8Error::LargeProgram)
    ));

    let rom = vec![0x00; MEM_SIZE - MEM_START];
    assert!(vm.load_rom(&rom).is_ok());
}

#[test]
fn test_load_clears_previous_program() {
    let mut vm = Chip8Vm::new(Chip8Conf::default());

    vm.load_rom(&[0x6A, 0xBC, 0x6B, 0xCD]).unwrap();
    vm.load_rom(&[0x60, 0x01]).unwrap();

    // No stale bytes from the longer program remain.
    assert_eq!(&vm.ram()[MEM_START..MEM_START + 4], &[0x60, 0x01, 0, 0]);

    // The fontset survives a reload.
    assert_eq!(&vm.ram()[0..FONTSET_HEIGHT], &[0xF0, 0x90, 0x90, 0x90, 0xF0]);
}
