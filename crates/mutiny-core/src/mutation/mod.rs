//! Mutation points and the operator registry
//!
//! A mutation point pins one applicable edit: the operator, the owning
//! module, and an instruction address expressed as indices so that it stays
//! valid in any clone of the module. The point owns the policy of applying
//! itself; the driver owns when and against which clone.

pub mod operators;

use std::sync::Arc;

use thiserror::Error;

use crate::calltree::FunctionId;
use crate::llir::{Instr, Module, ModuleId};

/// Errors in mutation selection and application
#[derive(Debug, Error)]
pub enum MutationError {
    /// Configuration enabled an operator the registry does not know
    #[error("unknown mutation operator: {0}")]
    UnknownOperator(String),

    /// A point was applied to a clone of the wrong module
    #[error("mutation point belongs to module {expected}, got {got}")]
    ModuleMismatch { expected: ModuleId, got: ModuleId },

    /// A point's address does not exist in the module
    #[error("mutation address {address} is out of range in module {module}")]
    InvalidAddress {
        module: ModuleId,
        address: MutationAddress,
    },
}

/// Location of one instruction, stable under module cloning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutationAddress {
    /// Function index within the module
    pub function: usize,

    /// Block index within the function
    pub block: usize,

    /// Instruction index within the block
    pub instr: usize,
}

impl std::fmt::Display for MutationAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.function, self.block, self.instr)
    }
}

/// A rule recognising a class of instructions and producing the mutated form
pub trait MutationOperator {
    /// Stable operator identifier, used in configuration
    fn id(&self) -> &'static str;

    /// Diagnostics text if the operator applies to this instruction
    fn applies_to(&self, instr: &Instr) -> Option<String>;

    /// Rewrite the instruction in place
    fn apply(&self, instr: &mut Instr);
}

/// A test that reached the mutated function, by index into the run's tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReachableTest {
    /// Index into the driver's test list
    pub test: usize,

    /// Observed call-graph distance from that test
    pub distance: u32,
}

/// One applicable edit in one module
pub struct MutationPoint {
    operator: Arc<dyn MutationOperator>,
    module: ModuleId,
    address: MutationAddress,
    function: FunctionId,
    diagnostics: String,

    /// Tests whose call tree reached the mutated function
    pub reachable_tests: Vec<ReachableTest>,
}

impl MutationPoint {
    /// Create a point
    #[must_use]
    pub fn new(
        operator: Arc<dyn MutationOperator>,
        module: ModuleId,
        address: MutationAddress,
        function: FunctionId,
        diagnostics: String,
    ) -> Self {
        Self {
            operator,
            module,
            address,
            function,
            diagnostics,
            reachable_tests: Vec::new(),
        }
    }

    /// The operator's identifier
    #[must_use]
    pub fn operator_id(&self) -> &'static str {
        self.operator.id()
    }

    /// The owning module
    #[must_use]
    pub fn module(&self) -> &ModuleId {
        &self.module
    }

    /// The instruction address
    #[must_use]
    pub fn address(&self) -> MutationAddress {
        self.address
    }

    /// Driver-assigned id of the function hosting the mutation
    #[must_use]
    pub fn function(&self) -> FunctionId {
        self.function
    }

    /// Human-readable description of the edit
    #[must_use]
    pub fn diagnostics(&self) -> &str {
        &self.diagnostics
    }

    /// Identity for deduplication
    #[must_use]
    pub fn dedup_key(&self) -> (ModuleId, MutationAddress, &'static str) {
        (self.module.clone(), self.address, self.operator.id())
    }

    /// Apply the edit to a clone of the owning module
    pub fn apply(&self, module: &mut Module) -> Result<(), MutationError> {
        if module.id() != &self.module {
            return Err(MutationError::ModuleMismatch {
                expected: self.module.clone(),
                got: module.id().clone(),
            });
        }

        let instr = module
            .functions
            .get_mut(self.address.function)
            .and_then(|f| f.blocks.get_mut(self.address.block))
            .and_then(|b| b.instrs.get_mut(self.address.instr))
            .ok_or(MutationError::InvalidAddress {
                module: self.module.clone(),
                address: self.address,
            })?;

        self.operator.apply(instr);
        Ok(())
    }
}

impl std::fmt::Debug for MutationPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationPoint")
            .field("operator", &self.operator.id())
            .field("module", &self.module)
            .field("address", &self.address)
            .field("diagnostics", &self.diagnostics)
            .finish()
    }
}

/// Produces candidate mutation points for a function
pub trait OperatorRegistry {
    /// Enumerate points in the given function, in discovery order
    fn mutation_points(
        &self,
        module: &Module,
        function_index: usize,
        function_id: FunctionId,
    ) -> Vec<MutationPoint>;
}

impl std::fmt::Debug for StandardRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardRegistry").finish_non_exhaustive()
    }
}

/// The registry over the bundled operator set
pub struct StandardRegistry {
    operators: Vec<Arc<dyn MutationOperator>>,
}

impl StandardRegistry {
    /// A registry with every bundled operator enabled
    #[must_use]
    pub fn all() -> Self {
        Self {
            operators: operators::all_operators(),
        }
    }

    /// A registry with the configured operators, in configuration order
    pub fn from_operator_ids(ids: &[String]) -> Result<Self, MutationError> {
        let operators = ids
            .iter()
            .map(|id| {
                operators::operator_by_id(id)
                    .ok_or_else(|| MutationError::UnknownOperator(id.clone()))
            })
            .collect::<Result<_, MutationError>>()?;
        Ok(Self { operators })
    }

    /// Enabled operator ids, in order
    #[must_use]
    pub fn operator_ids(&self) -> Vec<&'static str> {
        self.operators.iter().map(|op| op.id()).collect()
    }
}

impl OperatorRegistry for StandardRegistry {
    fn mutation_points(
        &self,
        module: &Module,
        function_index: usize,
        function_id: FunctionId,
    ) -> Vec<MutationPoint> {
        let Some(function) = module.functions.get(function_index) else {
            return Vec::new();
        };

        let mut points = Vec::new();
        for (block_index, block) in function.blocks.iter().enumerate() {
            for (instr_index, instr) in block.instrs.iter().enumerate() {
                for operator in &self.operators {
                    if let Some(diagnostics) = operator.applies_to(instr) {
                        points.push(MutationPoint::new(
                            Arc::clone(operator),
                            module.id().clone(),
                            MutationAddress {
                                function: function_index,
                                block: block_index,
                                instr: instr_index,
                            },
                            function_id,
                            diagnostics,
                        ));
                    }
                }
            }
        }
        points
    }
}
