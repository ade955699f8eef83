//! Logical plan nodes consumed by the physical planner.
//!
//! Only the node set a comparison-join subtree needs is represented here;
//! the binder and optimizer that produce these nodes live upstream.

use std::fmt;

use arrow::datatypes::DataType;

/// Join types supported by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    /// Full outer join.
    Outer,
    Semi,
    Anti,
    RightSemi,
    RightAnti,
    /// At most one match per left row; used for scalar subqueries.
    Single,
    /// Emits a boolean marker column instead of right-side columns; used for
    /// `IN`/`EXISTS` subqueries.
    Mark,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinType::Inner => "Inner",
            JoinType::Left => "Left",
            JoinType::Right => "Right",
            JoinType::Outer => "Outer",
            JoinType::Semi => "Semi",
            JoinType::Anti => "Anti",
            JoinType::RightSemi => "RightSemi",
            JoinType::RightAnti => "RightAnti",
            JoinType::Single => "Single",
            JoinType::Mark => "Mark",
        };
        write!(f, "{}", name)
    }
}

/// A resolved reference to a column of a child relation: a type and a
/// position.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundReference {
    pub data_type: DataType,
    pub index: usize,
}

impl BoundReference {
    pub fn new(data_type: DataType, index: usize) -> Self {
        Self { data_type, index }
    }
}

impl fmt::Display for BoundReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}

/// Comparison operators usable in a join condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl ComparisonOp {
    /// The operator with its sides swapped, so `a op b` ⇔ `b op.flipped() a`.
    pub fn flipped(self) -> Self {
        match self {
            ComparisonOp::Equal => ComparisonOp::Equal,
            ComparisonOp::NotEqual => ComparisonOp::NotEqual,
            ComparisonOp::LessThan => ComparisonOp::GreaterThan,
            ComparisonOp::LessThanOrEqual => ComparisonOp::GreaterThanOrEqual,
            ComparisonOp::GreaterThan => ComparisonOp::LessThan,
            ComparisonOp::GreaterThanOrEqual => ComparisonOp::LessThanOrEqual,
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            ComparisonOp::Equal => "=",
            ComparisonOp::NotEqual => "!=",
            ComparisonOp::LessThan => "<",
            ComparisonOp::LessThanOrEqual => "<=",
            ComparisonOp::GreaterThan => ">",
            ComparisonOp::GreaterThanOrEqual => ">=",
        };
        write!(f, "{}", symbol)
    }
}

/// One predicate of a comparison join: `left op right` over the two child
/// relations.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinCondition {
    pub left: BoundReference,
    pub right: BoundReference,
    pub comparison: ComparisonOp,
}

impl JoinCondition {
    pub fn new(left: BoundReference, right: BoundReference, comparison: ComparisonOp) -> Self {
        Self {
            left,
            right,
            comparison,
        }
    }

    /// Swap the sides of the condition, flipping the comparison with them.
    pub fn flip(&mut self) {
        std::mem::swap(&mut self.left, &mut self.right);
        self.comparison = self.comparison.flipped();
    }
}

/// A logical comparison join, optionally carrying the duplicate-eliminated
/// columns a correlated subquery plan needs.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalComparisonJoin {
    pub join_type: JoinType,
    pub left: Box<LogicalPlan>,
    pub right: Box<LogicalPlan>,
    pub conditions: Vec<JoinCondition>,
    /// Columns whose distinct values feed the delim scans on the opposite
    /// side. Empty for an ordinary join.
    pub duplicate_eliminated_columns: Vec<BoundReference>,
    pub estimated_cardinality: usize,
    /// Output column types of the join.
    pub output_types: Vec<DataType>,
}

impl LogicalComparisonJoin {
    /// Swap the children, adjust the condition sides to match, and record the
    /// join type that holds after the swap.
    pub fn flip_children(&mut self, join_type: JoinType) {
        std::mem::swap(&mut self.left, &mut self.right);
        for condition in &mut self.conditions {
            condition.flip();
        }
        self.join_type = join_type;
    }
}

/// A logical operator.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalPlan {
    /// Base table scan.
    TableScan {
        table_name: String,
        output_types: Vec<DataType>,
    },
    /// Placeholder reading the duplicate-eliminated stream produced by an
    /// enclosing delim join.
    DelimGet { chunk_types: Vec<DataType> },
    /// Comparison join.
    ComparisonJoin(LogicalComparisonJoin),
}

impl LogicalPlan {
    /// Output column types of this operator.
    pub fn output_types(&self) -> &[DataType] {
        match self {
            LogicalPlan::TableScan { output_types, .. } => output_types,
            LogicalPlan::DelimGet { chunk_types } => chunk_types,
            LogicalPlan::ComparisonJoin(join) => &join.output_types,
        }
    }
}
