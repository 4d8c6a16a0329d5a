//! Unit tests for code generation: concrete programs, concrete streams.
//!
//! Streams are asserted word-for-word where the shape is the point of the
//! test, and structurally (via the disassembler) where only part of the
//! encoding matters.

use ramlog::disasm::disassemble;
use ramlog::index::{IndexAnalysis, IndexSet, SignatureAnalysis};
use ramlog::ir::{
    AggregateFn, Cond, ConstraintOp, Expr, IntrinsicOp, Op, Program, RelationDecl,
    Representation, Stmt,
};
use ramlog::ops::{MAX_DOMAIN, WORD_BITS};
use ramlog::{compile, CompileError, Compiled, IoDirective, Opcode, Options, ParallelMode, Word};

fn w(op: Opcode) -> Word {
    op as Word
}

fn te(tuple: usize, column: usize) -> Expr {
    Expr::TupleElement { tuple, column }
}

fn query(op: Op) -> Stmt {
    Stmt::Query(Box::new(op))
}

fn compile_default(program: &Program) -> Compiled {
    let analysis = SignatureAnalysis::analyze(program);
    compile(program, &analysis, &Options::default()).expect("program should compile")
}

// ============================================================================
// Whole-stream scenarios
// ============================================================================

#[test]
fn test_project_constant() {
    let program = Program::new(
        vec![RelationDecl::new("out", 1)],
        query(Op::Project {
            relation: "out".to_string(),
            values: vec![Expr::Number(42)],
        }),
    );
    let compiled = compile_default(&program);

    assert_eq!(
        compiled.code.words,
        vec![
            w(Opcode::Query),
            w(Opcode::Number),
            42,
            w(Opcode::Project),
            1, // arity
            0, // relation id
            w(Opcode::Stop),
        ]
    );
}

#[test]
fn test_scan_loop_skeleton() {
    let program = Program::new(
        vec![RelationDecl::new("edge", 2), RelationDecl::new("copy", 2)],
        query(Op::Scan {
            relation: "edge".to_string(),
            tuple: 0,
            profile_text: String::new(),
            nested: Box::new(Op::Project {
                relation: "copy".to_string(),
                values: vec![te(0, 0), te(0, 1)],
            }),
        }),
    );
    let compiled = compile_default(&program);

    assert_eq!(
        compiled.code.words,
        vec![
            w(Opcode::Query),
            w(Opcode::Scan),
            w(Opcode::InitFullIter),
            0, // iterator slot
            0, // relation id: edge
            // loop top at offset 5
            w(Opcode::IterNotAtEnd),
            0,
            w(Opcode::JumpIfZero),
            28, // past the loop
            w(Opcode::IterSelect),
            0, // iterator slot
            0, // tuple register
            w(Opcode::Search),
            0, // no profile text
            0, // interned ""
            // projected values in reverse column order
            w(Opcode::TupleElement),
            0,
            1,
            w(Opcode::TupleElement),
            0,
            0,
            w(Opcode::Project),
            2, // arity
            1, // relation id: copy
            w(Opcode::IterInc),
            0,
            w(Opcode::Goto),
            5, // back to the loop top
            w(Opcode::Stop),
        ]
    );
    assert_eq!(compiled.code.iter_slots, 1);
}

#[test]
fn test_count_aggregate_shortcut() {
    let program = Program::new(
        vec![RelationDecl::new("edge", 1)],
        query(Op::Aggregate {
            function: AggregateFn::Count,
            relation: "edge".to_string(),
            tuple: 0,
            condition: Cond::True,
            expr: Expr::Number(0),
            profile_text: String::new(),
            nested: Box::new(Op::Return {
                values: vec![te(0, 0)],
            }),
        }),
    );
    let compiled = compile_default(&program);

    assert_eq!(
        compiled.code.words,
        vec![
            w(Opcode::Query),
            w(Opcode::Aggregate),
            w(Opcode::InitFullIter),
            0, // iterator slot
            0, // relation id
            w(Opcode::AggregateCount),
            0, // reads the iterator's cardinality directly
            w(Opcode::AggregateReturn),
            0, // tuple register
            w(Opcode::Search),
            0,
            0, // interned ""
            w(Opcode::TupleElement),
            0,
            0,
            w(Opcode::ReturnValue),
            1, // value count
            1, // interned "V"
            w(Opcode::Stop),
        ]
    );
    assert_eq!(compiled.code.symbols.iter().collect::<Vec<_>>(), ["", "V"]);
}

#[test]
fn test_partial_existence_one_word() {
    let program = Program::new(
        vec![RelationDecl::new("edge", 2), RelationDecl::new("out", 1)],
        query(Op::Filter {
            condition: Cond::Exists {
                relation: "edge".to_string(),
                values: vec![Expr::Number(7), Expr::Undefined],
            },
            profile_text: String::new(),
            nested: Box::new(Op::Project {
                relation: "out".to_string(),
                values: vec![Expr::Number(1)],
            }),
        }),
    );
    let compiled = compile_default(&program);

    assert_eq!(
        compiled.code.words,
        vec![
            w(Opcode::Query),
            w(Opcode::Filter),
            0, // interned ""
            w(Opcode::Number),
            7,
            w(Opcode::ExistsOneWord),
            0,    // relation id
            0,    // index position
            0b01, // column mask: only column 0 bound
            w(Opcode::JumpIfZero),
            16, // past the body
            w(Opcode::Number),
            1,
            w(Opcode::Project),
            1,
            1, // relation id: out
            w(Opcode::Stop),
        ]
    );
}

#[test]
fn test_loop_exit_skeleton() {
    let program = Program::new(
        vec![RelationDecl::new("delta", 1)],
        Stmt::Loop(Box::new(Stmt::Sequence(vec![
            Stmt::Exit(Cond::Empty("delta".to_string())),
            query(Op::Project {
                relation: "delta".to_string(),
                values: vec![Expr::Number(1)],
            }),
        ]))),
    );
    let compiled = compile_default(&program);

    assert_eq!(
        compiled.code.words,
        vec![
            // loop top at offset 0
            w(Opcode::LoopHeader),
            w(Opcode::Sequence),
            w(Opcode::IsEmpty),
            0,
            w(Opcode::JumpIfNonZero),
            16, // the loop's exit address
            w(Opcode::Query),
            w(Opcode::Number),
            1,
            w(Opcode::Project),
            1,
            0,
            w(Opcode::IncIteration),
            w(Opcode::Goto),
            0, // back to the loop header
            w(Opcode::ResetIteration),
            w(Opcode::Stop),
        ]
    );
}

#[test]
fn test_min_aggregate_sentinel_check() {
    let program = Program::new(
        vec![RelationDecl::new("cost", 1)],
        query(Op::Aggregate {
            function: AggregateFn::Min,
            relation: "cost".to_string(),
            tuple: 0,
            condition: Cond::True,
            expr: te(0, 0),
            profile_text: String::new(),
            nested: Box::new(Op::Return {
                values: vec![te(0, 0)],
            }),
        }),
    );
    let compiled = compile_default(&program);

    assert_eq!(
        compiled.code.words,
        vec![
            w(Opcode::Query),
            w(Opcode::Aggregate),
            w(Opcode::InitFullIter),
            0,
            0,
            // accumulator seeded with the domain maximum
            w(Opcode::Number),
            MAX_DOMAIN,
            // loop top at offset 7
            w(Opcode::IterNotAtEnd),
            0,
            w(Opcode::JumpIfZero),
            23, // to the aggregate return
            w(Opcode::IterSelect),
            0,
            0,
            w(Opcode::TupleElement),
            0,
            0,
            w(Opcode::Min),
            2,
            w(Opcode::IterInc),
            0,
            w(Opcode::Goto),
            7,
            w(Opcode::AggregateReturn),
            0,
            // no-match check: written result still equals the seed?
            w(Opcode::TupleElement),
            0,
            0,
            w(Opcode::Number),
            MAX_DOMAIN,
            w(Opcode::Eq),
            w(Opcode::JumpIfNonZero),
            42, // skip the nested operation
            w(Opcode::Search),
            0,
            0,
            w(Opcode::TupleElement),
            0,
            0,
            w(Opcode::ReturnValue),
            1,
            1, // interned "V"
            w(Opcode::Stop),
        ]
    );
}

#[test]
fn test_empty_parallel_emits_nothing() {
    let program = Program::new(vec![], Stmt::Parallel(vec![]));
    let compiled = compile_default(&program);
    assert_eq!(compiled.code.words, vec![w(Opcode::Stop)]);
}

#[test]
fn test_single_child_parallel_matches_child() {
    let relations = vec![RelationDecl::new("edge", 2)];
    let child = Stmt::Create("edge".to_string());

    let parallel = Program::new(relations.clone(), Stmt::Parallel(vec![child.clone()]));
    let plain = Program::new(relations, child);

    assert_eq!(
        compile_default(&parallel).code.words,
        compile_default(&plain).code.words
    );
}

#[test]
fn test_fork_mode_parallel_scaffold() {
    let program = Program::new(
        vec![RelationDecl::new("edge", 2)],
        Stmt::Parallel(vec![
            Stmt::Create("edge".to_string()),
            Stmt::Clear("edge".to_string()),
        ]),
    );
    let analysis = SignatureAnalysis::analyze(&program);
    let options = Options {
        parallel: ParallelMode::Fork,
    };
    let compiled = compile(&program, &analysis, &options).expect("program should compile");

    assert_eq!(
        compiled.code.words,
        vec![
            w(Opcode::ForkParallel),
            2,  // children
            13, // join address
            5,  // first child start
            9,  // second child start
            w(Opcode::Create),
            0,
            w(Opcode::JoinParallel),
            w(Opcode::Nop),
            w(Opcode::Clear),
            0,
            w(Opcode::JoinParallel),
            w(Opcode::Nop),
            w(Opcode::Stop),
        ]
    );
}

// ============================================================================
// Existence-check boundaries
// ============================================================================

fn exists_program(values: Vec<Expr>, provenance: bool) -> Program {
    let condition = if provenance {
        Cond::ProvenanceExists {
            relation: "edge".to_string(),
            values,
        }
    } else {
        Cond::Exists {
            relation: "edge".to_string(),
            values,
        }
    };
    Program::new(
        vec![RelationDecl::new("edge", 4), RelationDecl::new("out", 1)],
        query(Op::Filter {
            condition,
            profile_text: String::new(),
            nested: Box::new(Op::Project {
                relation: "out".to_string(),
                values: vec![Expr::Number(1)],
            }),
        }),
    )
}

fn opcodes_of(compiled: &Compiled) -> Vec<Opcode> {
    disassemble(&compiled.code, &compiled.relations)
        .expect("stream should disassemble")
        .into_iter()
        .map(|i| i.opcode)
        .collect()
}

#[test]
fn test_all_free_existence_is_negated_emptiness() {
    let program = exists_program(vec![Expr::Undefined; 4], false);
    let compiled = compile_default(&program);
    let opcodes = opcodes_of(&compiled);

    assert!(opcodes.contains(&Opcode::IsEmpty));
    assert!(opcodes.contains(&Opcode::Not));
    assert!(!opcodes.contains(&Opcode::Exists));
    assert!(!opcodes.contains(&Opcode::ExistsOneWord));
    assert!(!opcodes.contains(&Opcode::FullExists));
}

#[test]
fn test_all_bound_existence_is_containment() {
    let values = (0..4).map(|i| Expr::Number(i)).collect();
    let program = exists_program(values, false);
    let compiled = compile_default(&program);

    let instructions =
        disassemble(&compiled.code, &compiled.relations).expect("stream should disassemble");
    let contains: Vec<_> = instructions
        .iter()
        .filter(|i| i.opcode == Opcode::FullExists)
        .collect();
    assert_eq!(contains.len(), 1);
    // Relation id only; no index position, no mask.
    assert_eq!(contains[0].operands, vec![0]);
    assert!(!instructions.iter().any(|i| i.opcode == Opcode::ExistsOneWord));
}

#[test]
fn test_provenance_existence_skips_last_two_columns() {
    // All four values supplied, but the provenance lowering only binds the
    // first arity-2 columns, including column 0.
    let values = (0..4).map(|i| Expr::Number(i)).collect();
    let program = exists_program(values, true);
    let compiled = compile_default(&program);

    let instructions =
        disassemble(&compiled.code, &compiled.relations).expect("stream should disassemble");
    let exists: Vec<_> = instructions
        .iter()
        .filter(|i| i.opcode == Opcode::ExistsOneWord)
        .collect();
    assert_eq!(exists.len(), 1);
    assert_eq!(exists[0].operands, vec![0, 0, 0b0011]);

    // Only the two bound values are emitted, in reverse column order.
    let constants: Vec<_> = instructions
        .iter()
        .filter(|i| i.opcode == Opcode::Number)
        .map(|i| i.operands[0])
        .collect();
    assert_eq!(constants[0], 1);
    assert_eq!(constants[1], 0);
}

#[test]
fn test_provenance_with_no_bound_columns_is_negated_emptiness() {
    let values = vec![
        Expr::Undefined,
        Expr::Undefined,
        Expr::Number(1),
        Expr::Number(2),
    ];
    let program = exists_program(values, true);
    let compiled = compile_default(&program);
    let opcodes = opcodes_of(&compiled);

    // Values in the provenance columns are ignored entirely; the only
    // constant left in the stream belongs to the nested projection.
    assert!(opcodes.contains(&Opcode::IsEmpty));
    assert!(!opcodes.contains(&Opcode::ExistsOneWord));
    assert_eq!(
        opcodes.iter().filter(|o| **o == Opcode::Number).count(),
        1
    );
}

#[test]
fn test_wide_existence_uses_multi_word_mask() {
    let arity = WORD_BITS + 8;
    let mut values = vec![Expr::Undefined; arity];
    values[WORD_BITS + 3] = Expr::Number(9);
    let program = Program::new(
        vec![
            RelationDecl::new("wide", arity),
            RelationDecl::new("out", 1),
        ],
        query(Op::Filter {
            condition: Cond::Exists {
                relation: "wide".to_string(),
                values,
            },
            profile_text: String::new(),
            nested: Box::new(Op::Project {
                relation: "out".to_string(),
                values: vec![Expr::Number(1)],
            }),
        }),
    );
    let compiled = compile_default(&program);

    let instructions =
        disassemble(&compiled.code, &compiled.relations).expect("stream should disassemble");
    let exists: Vec<_> = instructions
        .iter()
        .filter(|i| i.opcode == Opcode::Exists)
        .collect();
    assert_eq!(exists.len(), 1);
    // relation, index position, then two mask words
    assert_eq!(exists[0].operands, vec![0, 0, 0, 0b1000]);
}

// ============================================================================
// Loop-nest details
// ============================================================================

#[test]
fn test_index_scan_range_init() {
    let program = Program::new(
        vec![RelationDecl::new("edge", 3), RelationDecl::new("out", 1)],
        query(Op::IndexScan {
            relation: "edge".to_string(),
            tuple: 0,
            pattern: vec![Expr::Number(5), Expr::Undefined, Expr::Number(6)],
            profile_text: String::new(),
            nested: Box::new(Op::Project {
                relation: "out".to_string(),
                values: vec![te(0, 1)],
            }),
        }),
    );
    let compiled = compile_default(&program);

    let instructions =
        disassemble(&compiled.code, &compiled.relations).expect("stream should disassemble");
    let init: Vec<_> = instructions
        .iter()
        .filter(|i| i.opcode == Opcode::InitRangeIterOneWord)
        .collect();
    assert_eq!(init.len(), 1);
    // slot, relation, index position, packed mask
    assert_eq!(init[0].operands, vec![0, 0, 0, 0b101]);

    // Bound pattern values precede the init, in reverse column order.
    let constants: Vec<_> = instructions
        .iter()
        .take_while(|i| i.opcode != Opcode::InitRangeIterOneWord)
        .filter(|i| i.opcode == Opcode::Number)
        .map(|i| i.operands[0])
        .collect();
    assert_eq!(constants, vec![6, 5]);
}

#[test]
fn test_all_free_index_scan_degenerates_to_full_order() {
    let program = Program::new(
        vec![RelationDecl::new("edge", 2), RelationDecl::new("out", 1)],
        query(Op::IndexScan {
            relation: "edge".to_string(),
            tuple: 0,
            pattern: vec![Expr::Undefined, Expr::Undefined],
            profile_text: String::new(),
            nested: Box::new(Op::Project {
                relation: "out".to_string(),
                values: vec![te(0, 0)],
            }),
        }),
    );
    let compiled = compile_default(&program);
    let opcodes = opcodes_of(&compiled);

    assert!(opcodes.contains(&Opcode::InitFullIter));
    assert!(!opcodes.contains(&Opcode::InitRangeIter));
    assert!(!opcodes.contains(&Opcode::InitRangeIterOneWord));
}

#[test]
fn test_choice_jumps_over_advance_on_match() {
    let program = Program::new(
        vec![RelationDecl::new("edge", 2), RelationDecl::new("out", 1)],
        query(Op::Choice {
            relation: "edge".to_string(),
            tuple: 0,
            condition: Cond::Constraint {
                op: ConstraintOp::Eq,
                lhs: Box::new(te(0, 0)),
                rhs: Box::new(Expr::Number(3)),
            },
            profile_text: String::new(),
            nested: Box::new(Op::Project {
                relation: "out".to_string(),
                values: vec![te(0, 1)],
            }),
        }),
    );
    let compiled = compile_default(&program);
    let instructions =
        disassemble(&compiled.code, &compiled.relations).expect("stream should disassemble");

    // On a match, jump forward over the inc/goto pair into the body.
    let matched_jump = instructions
        .iter()
        .find(|i| i.opcode == Opcode::JumpIfNonZero)
        .expect("choice emits a match jump");
    let target = matched_jump.branch_targets()[0];
    let target_instruction = instructions
        .iter()
        .find(|i| i.offset == target)
        .expect("jump target starts an instruction");
    assert_eq!(target_instruction.opcode, Opcode::Search);

    // The body falls through past the loop: no Goto after the Search site.
    assert!(instructions
        .iter()
        .filter(|i| i.offset > target)
        .all(|i| i.opcode != Opcode::Goto));
}

#[test]
fn test_sum_aggregate_folds_with_add() {
    let program = Program::new(
        vec![RelationDecl::new("cost", 2), RelationDecl::new("out", 1)],
        query(Op::IndexAggregate {
            function: AggregateFn::Sum,
            relation: "cost".to_string(),
            tuple: 1,
            pattern: vec![Expr::Number(4), Expr::Undefined],
            condition: Cond::True,
            expr: te(1, 1),
            profile_text: String::new(),
            nested: Box::new(Op::Project {
                relation: "out".to_string(),
                values: vec![te(1, 0)],
            }),
        }),
    );
    let compiled = compile_default(&program);
    let opcodes = opcodes_of(&compiled);

    assert!(opcodes.contains(&Opcode::IndexAggregate));
    assert!(opcodes.contains(&Opcode::InitRangeIterOneWord));
    assert!(opcodes.contains(&Opcode::Add));
    // Sum has no sentinel check and no count shortcut.
    assert!(!opcodes.contains(&Opcode::AggregateCount));
    assert!(!opcodes.contains(&Opcode::Eq));
}

#[test]
fn test_conditional_count_skips_shortcut() {
    let program = Program::new(
        vec![RelationDecl::new("edge", 1)],
        query(Op::Aggregate {
            function: AggregateFn::Count,
            relation: "edge".to_string(),
            tuple: 0,
            condition: Cond::Constraint {
                op: ConstraintOp::Gt,
                lhs: Box::new(te(0, 0)),
                rhs: Box::new(Expr::Number(0)),
            },
            expr: Expr::Number(0),
            profile_text: String::new(),
            nested: Box::new(Op::Return {
                values: vec![te(0, 0)],
            }),
        }),
    );
    let compiled = compile_default(&program);
    let opcodes = opcodes_of(&compiled);

    assert!(!opcodes.contains(&Opcode::AggregateCount));
    // The accumulator path: seed, +1 fold, and a gate on the condition.
    assert!(opcodes.contains(&Opcode::Add));
    assert!(opcodes.contains(&Opcode::JumpIfZero));
}

#[test]
fn test_unpack_record_skip_address() {
    let program = Program::new(
        vec![RelationDecl::new("out", 1)],
        query(Op::UnpackRecord {
            expr: Expr::SubroutineArg(0),
            arity: 2,
            tuple: 1,
            profile_text: String::new(),
            nested: Box::new(Op::Project {
                relation: "out".to_string(),
                values: vec![te(1, 0)],
            }),
        }),
    );
    let compiled = compile_default(&program);
    let instructions =
        disassemble(&compiled.code, &compiled.relations).expect("stream should disassemble");

    let unpack = instructions
        .iter()
        .find(|i| i.opcode == Opcode::UnpackRecord)
        .expect("unpack instruction present");
    assert_eq!(unpack.operands[0], 2); // arity
    assert_eq!(unpack.operands[1], 1); // tuple register
    let skip = unpack.branch_targets()[0];
    // Null reference skips the whole nested body, landing on Stop.
    assert_eq!(skip, compiled.code.words.len() - 1);
}

// ============================================================================
// Expression details
// ============================================================================

#[test]
fn test_cat_arguments_reversed() {
    let program = Program::new(
        vec![RelationDecl::new("out", 1)],
        query(Op::Project {
            relation: "out".to_string(),
            values: vec![Expr::Intrinsic {
                op: IntrinsicOp::Cat,
                args: vec![Expr::Number(1), Expr::Number(2), Expr::Number(3)],
            }],
        }),
    );
    let compiled = compile_default(&program);

    assert_eq!(
        compiled.code.words,
        vec![
            w(Opcode::Query),
            w(Opcode::Number),
            3,
            w(Opcode::Number),
            2,
            w(Opcode::Number),
            1,
            w(Opcode::Cat),
            3, // arity word
            w(Opcode::Project),
            1,
            0,
            w(Opcode::Stop),
        ]
    );
}

#[test]
fn test_min_arguments_in_order() {
    let program = Program::new(
        vec![RelationDecl::new("out", 1)],
        query(Op::Project {
            relation: "out".to_string(),
            values: vec![Expr::Intrinsic {
                op: IntrinsicOp::Min,
                args: vec![Expr::Number(1), Expr::Number(2)],
            }],
        }),
    );
    let compiled = compile_default(&program);

    assert_eq!(
        compiled.code.words,
        vec![
            w(Opcode::Query),
            w(Opcode::Number),
            1,
            w(Opcode::Number),
            2,
            w(Opcode::Min),
            2,
            w(Opcode::Project),
            1,
            0,
            w(Opcode::Stop),
        ]
    );
}

#[test]
fn test_user_defined_operator() {
    let program = Program::new(
        vec![RelationDecl::new("out", 1)],
        query(Op::Project {
            relation: "out".to_string(),
            values: vec![Expr::UserDefined {
                name: "hash".to_string(),
                signature: "NN:N".to_string(),
                args: vec![Expr::Number(1), Expr::Number(2)],
            }],
        }),
    );
    let compiled = compile_default(&program);

    assert_eq!(
        compiled.code.words,
        vec![
            w(Opcode::Query),
            // arguments reversed
            w(Opcode::Number),
            2,
            w(Opcode::Number),
            1,
            w(Opcode::UserOp),
            0, // interned "hash"
            1, // interned "NN:N"
            2, // argument count
            w(Opcode::Project),
            1,
            0,
            w(Opcode::Stop),
        ]
    );
    assert_eq!(compiled.code.symbols.iter().collect::<Vec<_>>(), ["hash", "NN:N"]);
}

#[test]
fn test_return_with_placeholders() {
    let program = Program::new(
        vec![],
        query(Op::Return {
            values: vec![Expr::Number(1), Expr::Undefined, Expr::Number(2)],
        }),
    );
    let compiled = compile_default(&program);

    assert_eq!(
        compiled.code.words,
        vec![
            w(Opcode::Query),
            w(Opcode::Number),
            2,
            w(Opcode::Number),
            1,
            w(Opcode::ReturnValue),
            3, // value count includes the placeholder
            0, // interned "V_V"
            w(Opcode::Stop),
        ]
    );
    assert_eq!(compiled.code.symbols.iter().collect::<Vec<_>>(), ["V_V"]);
}

#[test]
fn test_constraint_marker_precedes_operands() {
    let program = Program::new(
        vec![RelationDecl::new("out", 1)],
        query(Op::Filter {
            condition: Cond::Constraint {
                op: ConstraintOp::Le,
                lhs: Box::new(Expr::Number(1)),
                rhs: Box::new(Expr::Number(2)),
            },
            profile_text: "t1".to_string(),
            nested: Box::new(Op::Project {
                relation: "out".to_string(),
                values: vec![Expr::Number(0)],
            }),
        }),
    );
    let compiled = compile_default(&program);

    assert_eq!(
        compiled.code.words,
        vec![
            w(Opcode::Query),
            w(Opcode::Filter),
            0, // interned "t1"
            w(Opcode::Constraint),
            w(Opcode::Number),
            1,
            w(Opcode::Number),
            2,
            w(Opcode::Le),
            w(Opcode::JumpIfZero),
            16,
            w(Opcode::Number),
            0,
            w(Opcode::Project),
            1,
            0,
            w(Opcode::Stop),
        ]
    );
}

// ============================================================================
// Statements
// ============================================================================

#[test]
fn test_relation_maintenance_statements() {
    let program = Program::new(
        vec![RelationDecl::new("a", 2), RelationDecl::new("b", 2)],
        Stmt::Sequence(vec![
            Stmt::Create("a".to_string()),
            Stmt::Merge {
                source: "a".to_string(),
                target: "b".to_string(),
            },
            Stmt::Swap {
                first: "a".to_string(),
                second: "b".to_string(),
            },
            Stmt::LogSize {
                relation: "b".to_string(),
                message: "size of b".to_string(),
            },
            Stmt::Drop("a".to_string()),
        ]),
    );
    let compiled = compile_default(&program);

    assert_eq!(
        compiled.code.words,
        vec![
            w(Opcode::Sequence),
            w(Opcode::Create),
            0,
            w(Opcode::Merge),
            0, // source
            1, // target
            w(Opcode::Swap),
            0,
            1,
            w(Opcode::LogSize),
            1,
            0, // interned "size of b"
            w(Opcode::Drop),
            0,
            w(Opcode::Stop),
        ]
    );
}

#[test]
fn test_fact_values_reversed() {
    let program = Program::new(
        vec![RelationDecl::new("edge", 2)],
        Stmt::Fact {
            relation: "edge".to_string(),
            values: vec![Expr::Number(10), Expr::Number(20)],
        },
    );
    let compiled = compile_default(&program);

    assert_eq!(
        compiled.code.words,
        vec![
            w(Opcode::Number),
            20,
            w(Opcode::Number),
            10,
            w(Opcode::Fact),
            0, // relation id
            2, // arity
            w(Opcode::Stop),
        ]
    );
}

#[test]
fn test_load_store_sidetable() {
    let load = IoDirective::new()
        .with("IO", "file")
        .with("filename", "edge.facts");
    let store = IoDirective::new().with("IO", "stdout");
    let program = Program::new(
        vec![RelationDecl::new("edge", 2)],
        Stmt::Sequence(vec![
            Stmt::Load {
                relation: "edge".to_string(),
                directives: vec![load.clone()],
            },
            Stmt::Store {
                relation: "edge".to_string(),
                directives: vec![store.clone()],
            },
        ]),
    );
    let compiled = compile_default(&program);

    assert_eq!(
        compiled.code.words,
        vec![
            w(Opcode::Sequence),
            w(Opcode::Load),
            0,
            0, // sidetable index
            w(Opcode::Store),
            0,
            1, // sidetable index
            w(Opcode::Stop),
        ]
    );
    assert_eq!(compiled.code.io_directives.len(), 2);
    assert_eq!(compiled.code.io_directives[0], vec![load]);
    assert_eq!(compiled.code.io_directives[1], vec![store]);
}

#[test]
fn test_timers_nest_and_allocate_slots() {
    let program = Program::new(
        vec![RelationDecl::new("edge", 2)],
        Stmt::LogTimer {
            message: "whole program".to_string(),
            body: Box::new(Stmt::LogRelationTimer {
                message: "loading edge".to_string(),
                relation: "edge".to_string(),
                body: Box::new(Stmt::Create("edge".to_string())),
            }),
        },
    );
    let compiled = compile_default(&program);

    assert_eq!(
        compiled.code.words,
        vec![
            w(Opcode::LogTimer),
            0, // interned "whole program"
            0, // timer slot
            w(Opcode::LogRelationTimer),
            1, // interned "loading edge"
            1, // timer slot
            0, // relation id
            w(Opcode::Create),
            0,
            w(Opcode::StopLogTimer),
            1,
            w(Opcode::StopLogTimer),
            0,
            w(Opcode::Stop),
        ]
    );
    assert_eq!(compiled.code.timer_slots, 2);
}

#[test]
fn test_stratum_and_debug_markers() {
    let program = Program::new(
        vec![RelationDecl::new("edge", 2)],
        Stmt::Stratum(Box::new(Stmt::DebugInfo {
            message: "edge(x,y).".to_string(),
            body: Box::new(Stmt::Clear("edge".to_string())),
        })),
    );
    let compiled = compile_default(&program);

    assert_eq!(
        compiled.code.words,
        vec![
            w(Opcode::Stratum),
            w(Opcode::DebugInfo),
            0,
            w(Opcode::Clear),
            0,
            w(Opcode::Stop),
        ]
    );
}

// ============================================================================
// Errors and storage kinds
// ============================================================================

#[test]
fn test_wide_relation_compiles_to_indirect_kind() {
    let program = Program::new(
        vec![
            RelationDecl::new("wide", 13).with_representation(Representation::Btree),
            RelationDecl::new("narrow", 12).with_representation(Representation::Btree),
        ],
        Stmt::Sequence(vec![]),
    );
    let compiled = compile_default(&program);

    let wide = compiled.relations.get("wide").unwrap();
    let narrow = compiled.relations.get("narrow").unwrap();
    assert_eq!(wide.kind, ramlog::StorageKind::Indirect);
    assert_eq!(narrow.kind, ramlog::StorageKind::OrderedTree);
}

#[test]
fn test_undefined_outside_pattern_is_malformed() {
    let program = Program::new(
        vec![RelationDecl::new("out", 1)],
        query(Op::Project {
            relation: "out".to_string(),
            values: vec![Expr::Undefined],
        }),
    );
    let analysis = SignatureAnalysis::analyze(&program);
    let result = compile(&program, &analysis, &Options::default());
    assert!(matches!(result, Err(CompileError::MalformedIr(_))));
}

#[test]
fn test_undeclared_relation_is_rejected() {
    let program = Program::new(
        vec![],
        query(Op::Project {
            relation: "ghost".to_string(),
            values: vec![Expr::Number(1)],
        }),
    );
    let analysis = SignatureAnalysis::analyze(&program);
    let result = compile(&program, &analysis, &Options::default());
    assert_eq!(
        result.err(),
        Some(CompileError::UnknownRelation("ghost".to_string()))
    );
}

#[test]
fn test_missing_index_aborts_compilation() {
    // An analysis that selected no indexes at all.
    struct NoIndexes;
    impl IndexAnalysis for NoIndexes {
        fn indexes_for(&self, _relation: &str) -> IndexSet {
            IndexSet::new()
        }
    }

    let program = Program::new(
        vec![RelationDecl::new("edge", 2), RelationDecl::new("out", 1)],
        query(Op::IndexScan {
            relation: "edge".to_string(),
            tuple: 0,
            pattern: vec![Expr::Number(1), Expr::Undefined],
            profile_text: String::new(),
            nested: Box::new(Op::Project {
                relation: "out".to_string(),
                values: vec![te(0, 1)],
            }),
        }),
    );
    let result = compile(&program, &NoIndexes, &Options::default());
    assert!(matches!(
        result,
        Err(CompileError::MissingIndex { signature: 0b01, .. })
    ));
}
