//! End-to-end compilation scenarios: source text in, observable bytecode of
//! the script body out.

use std::{cell::RefCell, rc::Rc};

use minnow::{Config, HeapId, Opcode, Report, Reporter, Value, Vm};
use pretty_assertions::assert_eq;

/// Reporter handing diagnostics back to the test through a shared buffer.
#[derive(Clone, Default)]
struct SharedReports(Rc<RefCell<Vec<Report>>>);

impl Reporter for SharedReports {
    fn report(&mut self, report: &Report) {
        self.0.borrow_mut().push(report.clone());
    }
}

fn compile(source: &str) -> (Vm, HeapId, Vec<Report>) {
    let reports = SharedReports::default();
    let mut vm = Vm::new(Config {
        reporter: Box::new(reports.clone()),
        ..Config::default()
    });
    let script = vm.compile("<test>", source).expect("scenario sources compile");
    let collected = reports.0.borrow().clone();
    (vm, script, collected)
}

fn body_code(vm: &Vm, script: HeapId) -> Vec<u8> {
    let body = vm.heap().script(script).body();
    vm.heap().function(body).code().expect("body is scripted").opcodes().to_vec()
}

// =============================================================================
// 1. Arithmetic expression statement
// =============================================================================

#[test]
fn addition_emits_constants_then_add_then_pop() {
    let (vm, script, reports) = compile("1 + 2");
    assert!(reports.is_empty(), "{reports:?}");
    let literals = vm.heap().script(script).literals().to_vec();
    assert_eq!(literals.len(), 2);
    assert_eq!(literals[0].as_num(), Some(1.0));
    assert_eq!(literals[1].as_num(), Some(2.0));
    assert_eq!(
        body_code(&vm, script),
        vec![
            Opcode::Constant as u8,
            0x00,
            0x00,
            Opcode::Constant as u8,
            0x00,
            0x01,
            Opcode::Add as u8,
            Opcode::Pop as u8,
        ]
    );
}

// =============================================================================
// 2. String literal without a trailing newline
// =============================================================================

#[test]
fn string_statement_at_eof() {
    let (vm, script, reports) = compile("\"a\"");
    assert!(reports.is_empty(), "{reports:?}");
    let literals = vm.heap().script(script).literals().to_vec();
    assert_eq!(literals.len(), 1);
    let Value::Ref(id) = literals[0] else {
        panic!("expected a string literal");
    };
    assert_eq!(vm.heap().string(id).as_str(), "a");
    assert_eq!(
        body_code(&vm, script),
        vec![Opcode::Constant as u8, 0x00, 0x00, Opcode::Pop as u8]
    );
}

// =============================================================================
// 3. Conditional return inside a function
// =============================================================================

#[test]
fn if_patch_lands_after_the_return() {
    let (vm, script, reports) = compile("def f()\nif true do\n return 1\nend\nend\n");
    assert!(reports.is_empty(), "{reports:?}");
    let record = vm.heap().script(script);
    assert_eq!(record.functions().len(), 1);
    let func = vm.heap().function(record.functions()[0]);
    let code = func.code().expect("f is scripted");
    let opcodes = code.opcodes();
    // CONSTANT true, JUMP_IF_NOT <patch>, CONSTANT 1, RETURN, then the
    // implicit return null appended at function end.
    assert_eq!(opcodes[0], Opcode::Constant as u8);
    assert_eq!(opcodes[3], Opcode::JumpIfNot as u8);
    let patch = u16::from_be_bytes([opcodes[4], opcodes[5]]);
    assert_eq!(opcodes[6], Opcode::Constant as u8);
    assert_eq!(opcodes[9], Opcode::Return as u8);
    // The patch target is the opcode count immediately after RETURN.
    assert_eq!(patch, 10);
}

// =============================================================================
// 4. Break patching inside a while loop
// =============================================================================

#[test]
fn while_break_patches_to_the_loop_exit() {
    let (vm, script, reports) = compile("while false do\n break\n end");
    assert!(reports.is_empty(), "{reports:?}");
    let opcodes = body_code(&vm, script);
    assert_eq!(
        opcodes,
        vec![
            Opcode::Constant as u8,
            0x00,
            0x00, // false
            Opcode::JumpIfNot as u8,
            0x00,
            0x0c, // exit: after the trailing jump
            Opcode::Jump as u8,
            0x00,
            0x0c, // break: the same address as the exit
            Opcode::Jump as u8,
            0x00,
            0x00, // back to the condition
        ]
    );
}

// =============================================================================
// 5. Escape decoding in string literals
// =============================================================================

#[test]
fn escaped_newline_is_a_single_byte() {
    let (vm, script, reports) = compile("\"a\\nb\"");
    assert!(reports.is_empty(), "{reports:?}");
    let literals = vm.heap().script(script).literals().to_vec();
    assert_eq!(literals.len(), 1);
    let Value::Ref(id) = literals[0] else {
        panic!("expected a string literal");
    };
    assert_eq!(vm.heap().string(id).as_str().as_bytes(), b"a\x0ab");
}

// =============================================================================
// 6. Fractional number literal
// =============================================================================

#[test]
fn fractional_literal_round_trips() {
    let (vm, script, reports) = compile("123.45");
    assert!(reports.is_empty(), "{reports:?}");
    let literals = vm.heap().script(script).literals().to_vec();
    assert_eq!(literals.len(), 1);
    assert_eq!(literals[0].as_num(), Some(123.45));
    assert_eq!(
        body_code(&vm, script),
        vec![Opcode::Constant as u8, 0x00, 0x00, Opcode::Pop as u8]
    );
}

// =============================================================================
// Further shapes
// =============================================================================

#[test]
fn elif_chain_compiles_with_a_single_end() {
    let (_, _, reports) = compile("x = 1\nif x == 1 do\n x = 2\nelif x == 2 do\n x = 3\nelse\n x = 4\nend\n");
    assert!(reports.is_empty(), "{reports:?}");
}

#[test]
fn continue_jumps_to_the_loop_start() {
    let (vm, script, reports) = compile("while true do\n continue\n end");
    assert!(reports.is_empty(), "{reports:?}");
    let opcodes = body_code(&vm, script);
    // The continue jump targets offset 0, the condition.
    assert_eq!(opcodes[6], Opcode::Jump as u8);
    assert_eq!(u16::from_be_bytes([opcodes[7], opcodes[8]]), 0);
}

#[test]
fn literal_pool_round_trip_dedup() {
    let (vm, script, reports) = compile("\"key\"\n\"key\"\n\"key\"\n1\n1\n");
    assert!(reports.is_empty(), "{reports:?}");
    // One string literal and one number literal, each referenced repeatedly.
    assert_eq!(vm.heap().script(script).literals().len(), 2);
}

#[test]
fn stack_size_covers_the_deepest_expression() {
    let (vm, script, reports) = compile("[1, [2, [3, 4]]]");
    assert!(reports.is_empty(), "{reports:?}");
    let body = vm.heap().script(script).body();
    let code = vm.heap().function(body).code().expect("body is scripted");
    // 1, 2, 3, 4 stacked before the innermost BuildList runs.
    assert_eq!(code.stack_size(), 4);
}

#[test]
fn disassembly_names_opcodes_and_literals() {
    let (vm, script, reports) = compile("1 + 2");
    assert!(reports.is_empty(), "{reports:?}");
    let body = vm.heap().script(script).body();
    let listing = vm
        .heap()
        .function(body)
        .code()
        .expect("body is scripted")
        .disassemble(vm.heap(), script, "<body>");
    assert!(listing.contains("Constant"), "{listing}");
    assert!(listing.contains("(1)"), "{listing}");
    assert!(listing.contains("Add"), "{listing}");
}
