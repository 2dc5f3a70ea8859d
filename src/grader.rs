//! Answer grading.
//!
//! Integer kinds compare exactly against a truncating-division result. Real
//! kinds accept any answer within an absolute tolerance of the expected value.

use crate::protocol::{Answer, Assignment, Operands, Operator, Verdict};

/// Absolute tolerance for real-valued answers (strict `<`).
pub const REAL_TOLERANCE: f64 = 1e-4;

/// Expected result of an assignment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expected {
    Integer(i64),
    Real(f64),
}

/// Compute the expected result.
///
/// Integer operands are widened to `i64`, so none of the four operations can
/// overflow. Division truncates toward zero. Assignments never carry a zero
/// divisor.
pub fn expected_result(assignment: &Assignment) -> Expected {
    let operator = assignment.kind().operator();

    match assignment.operands() {
        Operands::Integer(a, b) => {
            let (a, b) = (i64::from(a), i64::from(b));
            Expected::Integer(match operator {
                Operator::Add => a + b,
                Operator::Sub => a - b,
                Operator::Mul => a * b,
                Operator::Div => a / b,
            })
        }
        Operands::Real(a, b) => Expected::Real(match operator {
            Operator::Add => a + b,
            Operator::Sub => a - b,
            Operator::Mul => a * b,
            Operator::Div => a / b,
        }),
    }
}

/// Grade a client answer against an assignment.
pub fn grade(assignment: &Assignment, answer: &Answer) -> Verdict {
    let correct = match (expected_result(assignment), *answer) {
        (Expected::Integer(expected), Answer::Integer(client)) => client == expected,
        (Expected::Real(expected), Answer::Real(client)) => reals_match(expected, client),
        _ => false,
    };

    if correct {
        Verdict::Ok
    } else {
        Verdict::Error
    }
}

fn reals_match(expected: f64, client: f64) -> bool {
    (client - expected).abs() < REAL_TOLERANCE
}
