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
fn signed_less_than_takes_the_branch() {
    // ldi -1; st A; ldi 0; cmp A; jl NEG; halt; NEG: ldi 42; halt
    let machine = run(vec![
        encode(Opcode::Ldi, 0xFF_FFFF),
        encode(Opcode::St, 8),
        encode(Opcode::Ldi, 0),
        encode(Opcode::Cmp, 8),
        encode(Opcode::Jl, 6),
        encode(Opcode::Halt, 0),
        encode(Opcode::Ldi, 42),
        encode(Opcode::Halt, 0),
        0, // A
    ]);
    assert_eq!(machine.acc(), 42);
}

#[test]
fn signed_greater_falls_through_on_equal() {
    // 5 cmp 5 -> jg must not branch.
    let machine = run(vec![
        encode(Opcode::Ldi, 5),
        encode(Opcode::St, 7),
        encode(Opcode::Ldi, 5),
        encode(Opcode::Cmp, 7),
        encode(Opcode::Jg, 6),
        encode(Opcode::Halt, 0),
        encode(Opcode::Halt, 0),
        0,
    ]);
    // Fell through: ACC still 5 from the second ldi.
    assert_eq!(machine.acc(), 5);
}

#[test]
fn unsigned_above_uses_carry() {
    // 5 cmp 3 -> C set, Z clear -> ja taken.
    let machine = run(vec![
        encode(Opcode::Ldi, 3),
        encode(Opcode::St, 8),
        encode(Opcode::Ldi, 5),
        encode(Opcode::Cmp, 8),
        encode(Opcode::Ja, 6),
        encode(Opcode::Halt, 0),
        encode(Opcode::Ldi, 1),
        encode(Opcode::Halt, 0),
        0,
    ]);
    assert_eq!(machine.acc(), 1);
}

#[test]
fn unsigned_below_on_borrow() {
    // 3 cmp 5 -> C clear -> jb taken.
    let machine = run(vec![
        encode(Opcode::Ldi, 5),
        encode(Opcode::St, 8),
        encode(Opcode::Ldi, 3),
        encode(Opcode::Cmp, 8),
        encode(Opcode::Jb, 6),
        encode(Opcode::Halt, 0),
        encode(Opcode::Ldi, 9),
        encode(Opcode::Halt, 0),
        0,
    ]);
    assert_eq!(machine.acc(), 9);
}

#[test]
fn jz_and_jnz_follow_the_zero_flag() {
    let machine = run(vec![
        encode(Opcode::Cla, 0),
        encode(Opcode::Jz, 3),
        encode(Opcode::Halt, 0),
        encode(Opcode::Ldi, 7),
        encode(Opcode::Jnz, 6),
        encode(Opcode::Halt, 0),
        encode(Opcode::Ldi, 11),
        encode(Opcode::Halt, 0),
    ]);
    assert_eq!(machine.acc(), 11);
}

#[test]
fn jmp_is_unconditional() {
    let machine = run(vec![
        encode(Opcode::Jmp, 2),
        encode(Opcode::Halt, 0),
        encode(Opcode::Ldi, 3),
        encode(Opcode::Halt, 0),
    ]);
    assert_eq!(machine.acc(), 3);
}

#[test]
fn cmp_leaves_acc_untouched() {
    let machine = run(vec![
        encode(Opcode::Ldi, 13),
        encode(Opcode::Cmp, 3),
        encode(Opcode::Halt, 0),
        5,
    ]);
    assert_eq!(machine.acc(), 13);
}
