//! The bundled mutation operators

use std::sync::Arc;

use super::MutationOperator;
use crate::calltree::{ENTER_FUNCTION_SYMBOL, LEAVE_FUNCTION_SYMBOL};
use crate::llir::{BinOp, Const, Instr, Operand};
#[cfg(test)]
use crate::llir::CmpOp;

/// Replaced rvalue in assignment mutations
const MAGIC_REPLACEMENT: i64 = 42;

/// `a + b` becomes `a - b`
pub struct MathAddOperator;

impl MutationOperator for MathAddOperator {
    fn id(&self) -> &'static str {
        "math_add_mutation_operator"
    }

    fn applies_to(&self, instr: &Instr) -> Option<String> {
        matches!(instr, Instr::Bin { op: BinOp::Add, .. })
            .then(|| "Math Add: replaced + with -".to_string())
    }

    fn apply(&self, instr: &mut Instr) {
        if let Instr::Bin { op, .. } = instr {
            *op = BinOp::Sub;
        }
    }
}

/// `a - b` becomes `a + b`
pub struct MathSubOperator;

impl MutationOperator for MathSubOperator {
    fn id(&self) -> &'static str {
        "math_sub_mutation_operator"
    }

    fn applies_to(&self, instr: &Instr) -> Option<String> {
        matches!(instr, Instr::Bin { op: BinOp::Sub, .. })
            .then(|| "Math Sub: replaced - with +".to_string())
    }

    fn apply(&self, instr: &mut Instr) {
        if let Instr::Bin { op, .. } = instr {
            *op = BinOp::Add;
        }
    }
}

/// A comparison predicate becomes its negation
pub struct NegateConditionOperator;

impl MutationOperator for NegateConditionOperator {
    fn id(&self) -> &'static str {
        "negate_condition_mutation_operator"
    }

    fn applies_to(&self, instr: &Instr) -> Option<String> {
        match instr {
            Instr::Cmp { op, .. } => Some(format!(
                "Negate Condition: replaced {} with {}",
                op.name(),
                op.negated().name()
            )),
            _ => None,
        }
    }

    fn apply(&self, instr: &mut Instr) {
        if let Instr::Cmp { op, .. } = instr {
            *op = op.negated();
        }
    }
}

/// A call whose result is discarded is removed
pub struct RemoveVoidFunctionOperator;

impl MutationOperator for RemoveVoidFunctionOperator {
    fn id(&self) -> &'static str {
        "remove_void_function_mutation_operator"
    }

    fn applies_to(&self, instr: &Instr) -> Option<String> {
        match instr {
            Instr::Call {
                dst: None, callee, ..
            } => {
                // Instrumentation probes are never a mutation target.
                if callee == ENTER_FUNCTION_SYMBOL || callee == LEAVE_FUNCTION_SYMBOL {
                    return None;
                }
                Some(format!("Remove Void Function: removed the call to {callee}"))
            }
            _ => None,
        }
    }

    fn apply(&self, instr: &mut Instr) {
        if matches!(instr, Instr::Call { dst: None, .. }) {
            *instr = Instr::Nop;
        }
    }
}

/// A stored rvalue becomes the constant 42
pub struct ReplaceAssignmentOperator;

impl MutationOperator for ReplaceAssignmentOperator {
    fn id(&self) -> &'static str {
        "replace_assignment_mutation_operator"
    }

    fn applies_to(&self, instr: &Instr) -> Option<String> {
        matches!(instr, Instr::Store { .. })
            .then(|| format!("Replace Assignment: replaced rvalue with {MAGIC_REPLACEMENT}"))
    }

    fn apply(&self, instr: &mut Instr) {
        if let Instr::Store { value, .. } = instr {
            *value = Operand::Const(Const::I64(MAGIC_REPLACEMENT));
        }
    }
}

/// Every bundled operator, in canonical order
#[must_use]
pub fn all_operators() -> Vec<Arc<dyn MutationOperator>> {
    vec![
        Arc::new(MathAddOperator),
        Arc::new(MathSubOperator),
        Arc::new(NegateConditionOperator),
        Arc::new(RemoveVoidFunctionOperator),
        Arc::new(ReplaceAssignmentOperator),
    ]
}

/// Look an operator up by its configuration id
#[must_use]
pub fn operator_by_id(id: &str) -> Option<Arc<dyn MutationOperator>> {
    all_operators().into_iter().find(|op| op.id() == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llir::builder::{arg, imm};

    fn add_instr() -> Instr {
        Instr::Bin {
            dst: 0,
            op: BinOp::Add,
            lhs: arg(0),
            rhs: arg(1),
        }
    }

    #[test]
    fn math_add_flips_to_sub() {
        let operator = MathAddOperator;
        let mut instr = add_instr();

        assert!(operator.applies_to(&instr).is_some());
        operator.apply(&mut instr);
        assert!(matches!(instr, Instr::Bin { op: BinOp::Sub, .. }));
        assert!(operator.applies_to(&instr).is_none());
    }

    #[test]
    fn negate_condition_flips_predicates() {
        let operator = NegateConditionOperator;
        let mut instr = Instr::Cmp {
            dst: 0,
            op: CmpOp::Lt,
            lhs: arg(0),
            rhs: imm(0),
        };

        let diagnostics = operator.applies_to(&instr).unwrap();
        assert!(diagnostics.contains("lt"));
        assert!(diagnostics.contains("ge"));

        operator.apply(&mut instr);
        assert!(matches!(instr, Instr::Cmp { op: CmpOp::Ge, .. }));
    }

    #[test]
    fn remove_void_function_skips_probes_and_valued_calls() {
        let operator = RemoveVoidFunctionOperator;

        let probe = Instr::Call {
            dst: None,
            callee: ENTER_FUNCTION_SYMBOL.to_string(),
            args: vec![],
        };
        assert!(operator.applies_to(&probe).is_none());

        let valued = Instr::Call {
            dst: Some(0),
            callee: "helper".to_string(),
            args: vec![],
        };
        assert!(operator.applies_to(&valued).is_none());

        let mut void_call = Instr::Call {
            dst: None,
            callee: "log_message".to_string(),
            args: vec![],
        };
        assert!(operator.applies_to(&void_call).is_some());
        operator.apply(&mut void_call);
        assert_eq!(void_call, Instr::Nop);
    }

    #[test]
    fn replace_assignment_stores_the_magic_constant() {
        let operator = ReplaceAssignmentOperator;
        let mut instr = Instr::Store {
            slot: 0,
            value: arg(0),
        };

        assert!(operator.applies_to(&instr).is_some());
        operator.apply(&mut instr);
        assert!(matches!(
            instr,
            Instr::Store {
                value: Operand::Const(Const::I64(MAGIC_REPLACEMENT)),
                ..
            }
        ));
    }

    #[test]
    fn ids_resolve_back_to_operators() {
        for operator in all_operators() {
            let found = operator_by_id(operator.id()).unwrap();
            assert_eq!(found.id(), operator.id());
        }
        assert!(operator_by_id("nope").is_none());
    }
}
