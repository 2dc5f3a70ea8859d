//! Problem generation.
//!
//! The server owns one explicit generator instance and lends it to each
//! session in turn; there is no process-wide generator state.

use crate::protocol::{wire_real, Assignment, AssignmentError, OperationKind, Operands, Operator};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

/// Source of random operation kinds and operands.
pub trait ProblemGenerator {
    /// Uniform choice over all operation kinds.
    fn select_operation_kind(&mut self) -> OperationKind;
    fn next_integer(&mut self) -> i32;
    fn next_real(&mut self) -> f64;
}

/// Operand ranges for [`RandomProblems`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratorLimits {
    /// Integers are drawn from `0..integer_max`.
    pub integer_max: i32,
    /// Reals are drawn from `0.0..real_max`.
    pub real_max: f64,
}

impl Default for GeneratorLimits {
    fn default() -> Self {
        Self {
            integer_max: 100,
            real_max: 100.0,
        }
    }
}

/// [`ProblemGenerator`] backed by a small, optionally seeded PRNG.
pub struct RandomProblems {
    rng: SmallRng,
    limits: GeneratorLimits,
}

impl RandomProblems {
    pub fn new(seed: Option<u64>, limits: GeneratorLimits) -> Self {
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Self { rng, limits }
    }
}

impl ProblemGenerator for RandomProblems {
    fn select_operation_kind(&mut self) -> OperationKind {
        OperationKind::ALL[self.rng.gen_range(0..OperationKind::ALL.len())]
    }

    fn next_integer(&mut self) -> i32 {
        self.rng.gen_range(0..self.limits.integer_max)
    }

    fn next_real(&mut self) -> f64 {
        self.rng.gen_range(0.0..self.limits.real_max)
    }
}

/// Draw one assignment from `generator`.
///
/// Only the value generator matching the kind is used. A zero divisor is
/// redrawn until it is nonzero, so generated division problems are always
/// defined. Real operands are rounded to their wire form so the grader sees
/// the same numbers as the client.
pub fn generate_assignment<G>(generator: &mut G) -> Result<Assignment, AssignmentError>
where
    G: ProblemGenerator + ?Sized,
{
    let kind = generator.select_operation_kind();
    let divides = kind.operator() == Operator::Div;

    let operands = if kind.is_real() {
        let a = wire_real(generator.next_real());
        let mut b = wire_real(generator.next_real());
        while divides && b == 0.0 {
            trace!(%kind, "Redrawing zero divisor");
            b = wire_real(generator.next_real());
        }
        Operands::Real(a, b)
    } else {
        let a = generator.next_integer();
        let mut b = generator.next_integer();
        while divides && b == 0 {
            trace!(%kind, "Redrawing zero divisor");
            b = generator.next_integer();
        }
        Operands::Integer(a, b)
    };

    Assignment::new(kind, operands)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::{HashSet, VecDeque};

    /// Generator replaying fixed kinds and operands.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedProblems {
        pub kinds: VecDeque<OperationKind>,
        pub integers: VecDeque<i32>,
        pub reals: VecDeque<f64>,
        pub integer_calls: usize,
        pub real_calls: usize,
    }

    impl ScriptedProblems {
        pub fn integer(kind: OperationKind, values: &[i32]) -> Self {
            Self {
                kinds: VecDeque::from([kind]),
                integers: values.iter().copied().collect(),
                ..Self::default()
            }
        }

        pub fn real(kind: OperationKind, values: &[f64]) -> Self {
            Self {
                kinds: VecDeque::from([kind]),
                reals: values.iter().copied().collect(),
                ..Self::default()
            }
        }
    }

    impl ProblemGenerator for ScriptedProblems {
        fn select_operation_kind(&mut self) -> OperationKind {
            self.kinds.pop_front().expect("script ran out of kinds")
        }

        fn next_integer(&mut self) -> i32 {
            self.integer_calls += 1;
            self.integers.pop_front().expect("script ran out of integers")
        }

        fn next_real(&mut self) -> f64 {
            self.real_calls += 1;
            self.reals.pop_front().expect("script ran out of reals")
        }
    }

    #[test]
    fn test_integer_kind_uses_integer_generator_twice() {
        let mut script = ScriptedProblems::integer(OperationKind::Mul, &[6, 7]);
        let assignment = generate_assignment(&mut script).unwrap();

        assert_eq!(assignment.kind(), OperationKind::Mul);
        assert_eq!(assignment.operands(), Operands::Integer(6, 7));
        assert_eq!(script.integer_calls, 2);
        assert_eq!(script.real_calls, 0);
    }

    #[test]
    fn test_real_kind_uses_real_generator_twice() {
        let mut script = ScriptedProblems::real(OperationKind::FAdd, &[1.5, 2.5]);
        let assignment = generate_assignment(&mut script).unwrap();

        assert_eq!(assignment.operands(), Operands::Real(1.5, 2.5));
        assert_eq!(script.integer_calls, 0);
        assert_eq!(script.real_calls, 2);
    }

    #[test]
    fn test_zero_divisor_is_redrawn() {
        let mut script = ScriptedProblems::integer(OperationKind::Div, &[9, 0, 0, 3]);
        let assignment = generate_assignment(&mut script).unwrap();
        assert_eq!(assignment.operands(), Operands::Integer(9, 3));
        assert_eq!(script.integer_calls, 4);

        let mut script = ScriptedProblems::real(OperationKind::FDiv, &[1.0, 0.0, 0.5]);
        let assignment = generate_assignment(&mut script).unwrap();
        assert_eq!(assignment.operands(), Operands::Real(1.0, 0.5));
    }

    #[test]
    fn test_zero_operand_kept_outside_division() {
        let mut script = ScriptedProblems::integer(OperationKind::Sub, &[0, 0]);
        let assignment = generate_assignment(&mut script).unwrap();
        assert_eq!(assignment.operands(), Operands::Integer(0, 0));
    }

    #[test]
    fn test_real_operands_rounded_to_wire_form() {
        let mut script = ScriptedProblems::real(OperationKind::FMul, &[12.3456789, 0.123456789]);
        let assignment = generate_assignment(&mut script).unwrap();
        assert_eq!(assignment.operands(), Operands::Real(12.345679, 0.12345679));
    }

    #[test]
    fn test_seeded_generator_is_reproducible() {
        let mut first = RandomProblems::new(Some(7), GeneratorLimits::default());
        let mut second = RandomProblems::new(Some(7), GeneratorLimits::default());

        for _ in 0..32 {
            assert_eq!(
                generate_assignment(&mut first).unwrap(),
                generate_assignment(&mut second).unwrap()
            );
        }
    }

    #[test]
    fn test_random_values_stay_in_range() {
        let limits = GeneratorLimits {
            integer_max: 10,
            real_max: 2.0,
        };
        let mut generator = RandomProblems::new(Some(42), limits);

        for _ in 0..1000 {
            let i = generator.next_integer();
            assert!((0..10).contains(&i));
            let r = generator.next_real();
            assert!((0.0..2.0).contains(&r));
        }
    }

    #[test]
    fn test_all_kinds_are_selected() {
        let mut generator = RandomProblems::new(Some(1), GeneratorLimits::default());
        let seen: HashSet<OperationKind> = (0..1000)
            .map(|_| generator.select_operation_kind())
            .collect();
        assert_eq!(seen.len(), OperationKind::ALL.len());
    }
}
