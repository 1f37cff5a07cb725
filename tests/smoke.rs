use accum_rs::alu::Flags;
use accum_rs::isa::{encode, Opcode};
use accum_rs::{Image, Machine};

fn run(words: Vec<u32>) -> Machine {
    let code_size = words.len() as u32;
    let image = Image {
        code_size,
        data_size: 0,
        words,
    };
    let mut machine = Machine::new();
    machine.load_image(&image).unwrap();
    machine.run().unwrap();
    machine
}

#[test]
fn arithmetic_adds_through_memory() {
    // ldi 2; st A; ldi 3; add A; halt with A in the trailing word.
    let machine = run(vec![
        encode(Opcode::Ldi, 2),
        encode(Opcode::St, 5),
        encode(Opcode::Ldi, 3),
        encode(Opcode::Add, 5),
        encode(Opcode::Halt, 0),
        0, // A
    ]);
    assert_eq!(machine.acc(), 5);
    assert!(!machine.flags().contains(Flags::Z));
    assert!(!machine.flags().contains(Flags::N));
}

#[test]
fn subtract_to_zero_sets_z() {
    let machine = run(vec![
        encode(Opcode::Ldi, 7),
        encode(Opcode::St, 5),
        encode(Opcode::Ldi, 7),
        encode(Opcode::Sub, 5),
        encode(Opcode::Halt, 0),
        0, // A
    ]);
    assert_eq!(machine.acc(), 0);
    assert!(machine.flags().contains(Flags::Z));
}

#[test]
fn division_by_zero_yields_zero_with_z() {
    let machine = run(vec![
        encode(Opcode::Ldi, 9),
        encode(Opcode::Div, 3),
        encode(Opcode::Halt, 0),
        0, // divisor cell, zero
    ]);
    assert_eq!(machine.acc(), 0);
    assert!(machine.flags().contains(Flags::Z));
}

#[test]
fn indirect_load_and_store() {
    // P holds the address of V; lda/sta go through it.
    let machine = run(vec![
        encode(Opcode::Ldi, 41),
        encode(Opcode::Sta, 5),
        encode(Opcode::Lda, 5),
        encode(Opcode::Inc, 0),
        encode(Opcode::Halt, 0),
        6, // P -> V
        0, // V
    ]);
    assert_eq!(machine.acc(), 42);
    assert_eq!(machine.mem_read(6).unwrap(), 41);
}

#[test]
fn determinism_same_program_same_hash() {
    let words = vec![
        encode(Opcode::Ldi, 2),
        encode(Opcode::St, 5),
        encode(Opcode::Ldi, 3),
        encode(Opcode::Add, 5),
        encode(Opcode::Halt, 0),
        0,
    ];
    let first = run(words.clone());
    let second = run(words);
    assert_eq!(first.log_hash(), second.log_hash());
    assert_eq!(first.ticks(), second.ticks());
}

#[test]
fn flags_track_acc_after_flag_writing_ops() {
    let machine = run(vec![
        encode(Opcode::Ldi, 1),
        encode(Opcode::Dec, 0),
        encode(Opcode::Halt, 0),
    ]);
    assert_eq!(machine.acc(), 0);
    assert_eq!(machine.flags().contains(Flags::Z), machine.acc() == 0);

    let machine = run(vec![
        encode(Opcode::Cla, 0),
        encode(Opcode::Dec, 0),
        encode(Opcode::Halt, 0),
    ]);
    assert_eq!(machine.acc(), u32::MAX);
    assert!(machine.flags().contains(Flags::N));
}
