use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Stable identity of a node. Ids are handed out in construction order and
/// never reused, so comparing two ids compares their construction order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline(always)]
    pub fn index(&self) -> usize { self.0 as usize }
    pub fn new(idx: usize) -> Self { Self(idx as u32) }
}

/// Tensor dimensions. Most graphs stay at rank four or below.
pub type Shape = SmallVec<[usize; 4]>;

/// Classification tag on a node. Roles never influence discovery, only the
/// views a `ComputationGraph` exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Input,
    Output,
    Cost,
    Parameter,
    Weight,
    Bias,
    Filter,
    Auxiliary,
    Dropout,
    BatchNormPopulation,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeMetadata {
    pub name: Option<String>,
    pub roles: SmallVec<[Role; 2]>,
}

impl NodeMetadata {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: Some(name.into()), ..Default::default() }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.add_role(role);
        self
    }

    /// Adds `role` unless it is already present.
    pub fn add_role(&mut self, role: Role) {
        if !self.roles.contains(&role) {
            self.roles.push(role);
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Number of parents an operation accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    OneOf(usize, usize),
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Exact(n) => n == count,
            Arity::OneOf(a, b) => count == a || count == b,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
    Negate,
    Exp,
    Square,
    Sqrt,
    /// Copies its parent. Gives a value a new identity without changing it.
    Identity,
    Sum,
    Mean,
    MatMul,
    /// Flat range `start..end` of the flattened parent.
    Slice { start: usize, end: usize },
    Reshape { shape: Shape },
    /// Gaussian sample with the shape of its only parent.
    RandomNormal { std: f64, seed: u64 },
    /// Parents: input, gamma, beta, and optionally population mean and
    /// variance. Statistics are taken over `axes`.
    BatchNormalize { axes: SmallVec<[usize; 4]>, epsilon: f64 },
}

impl Operation {
    pub fn arity(&self) -> Arity {
        match self {
            Operation::Add
            | Operation::Subtract
            | Operation::Multiply
            | Operation::Divide
            | Operation::MatMul => Arity::Exact(2),
            Operation::BatchNormalize { .. } => Arity::OneOf(3, 5),
            _ => Arity::Exact(1),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Add => "Add",
            Operation::Subtract => "Subtract",
            Operation::Multiply => "Multiply",
            Operation::Divide => "Divide",
            Operation::Negate => "Negate",
            Operation::Exp => "Exp",
            Operation::Square => "Square",
            Operation::Sqrt => "Sqrt",
            Operation::Identity => "Identity",
            Operation::Sum => "Sum",
            Operation::Mean => "Mean",
            Operation::MatMul => "MatMul",
            Operation::Slice { .. } => "Slice",
            Operation::Reshape { .. } => "Reshape",
            Operation::RandomNormal { .. } => "RandomNormal",
            Operation::BatchNormalize { .. } => "BatchNormalize",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// A graph input, bound by position when a function is called.
    Input,
    /// Index into `Registry::tensors`.
    Constant(u32),
    /// Stateful variable; index into `Registry::tensors`.
    Shared(u32),
    Apply(Operation),
}

impl NodeKind {
    pub fn is_root(&self) -> bool { !matches!(self, NodeKind::Apply(_)) }
}
