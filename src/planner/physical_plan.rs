//! Physical plan representation for execution.

use std::fmt;

use arrow::datatypes::DataType;

use super::logical_plan::{BoundReference, JoinCondition, JoinType};

/// Which child of the wrapped join feeds the duplicate-eliminated stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelimSide {
    Left,
    Right,
}

/// Aggregate functions computable by a hash aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Min,
    Max,
}

/// An aggregate computed by a hash aggregate.
///
/// The distinct producer built for a delim join carries none: grouping on
/// the duplicate-eliminated columns is the whole computation.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpr {
    pub function: AggregateFunction,
    pub argument: BoundReference,
}

/// A physical plan node.
#[derive(Debug, Clone, PartialEq)]
pub enum PhysicalPlan {
    /// Base table scan.
    TableScan {
        table_name: String,
        output_types: Vec<DataType>,
    },

    /// Placeholder that reads the duplicate-eliminated stream produced by an
    /// enclosing delim join. `delim_id` is the key the enclosing join uses to
    /// refer to this scan without owning it.
    DelimScan {
        delim_id: usize,
        chunk_types: Vec<DataType>,
    },

    /// Hash join over equality and comparison conditions.
    HashJoin {
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        join_type: JoinType,
        conditions: Vec<JoinCondition>,
        output_types: Vec<DataType>,
    },

    /// Cross product; produced when a join has no conditions.
    CrossProduct {
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        output_types: Vec<DataType>,
    },

    /// Hash aggregate.
    HashAggregate {
        group_by: Vec<BoundReference>,
        aggregates: Vec<AggregateExpr>,
        output_types: Vec<DataType>,
        estimated_cardinality: usize,
        /// `None` when the operator is fed externally, as with the distinct
        /// producer of a delim join.
        input: Option<Box<PhysicalPlan>>,
    },

    /// A join that additionally emits a de-duplicated projection of its
    /// delimiter columns into the delim scans embedded in its own subtree.
    DelimJoin {
        side: DelimSide,
        join: Box<PhysicalPlan>,
        /// `delim_id`s of the scans, gathered from the child opposite the
        /// delimitation side, that consume the distinct stream.
        delim_scans: Vec<usize>,
        /// The hash aggregate producing the duplicate-eliminated stream.
        distinct: Box<PhysicalPlan>,
        output_types: Vec<DataType>,
        estimated_cardinality: usize,
    },
}

impl PhysicalPlan {
    /// Output column types of this operator.
    pub fn output_types(&self) -> &[DataType] {
        match self {
            PhysicalPlan::TableScan { output_types, .. } => output_types,
            PhysicalPlan::DelimScan { chunk_types, .. } => chunk_types,
            PhysicalPlan::HashJoin { output_types, .. } => output_types,
            PhysicalPlan::CrossProduct { output_types, .. } => output_types,
            PhysicalPlan::HashAggregate { output_types, .. } => output_types,
            PhysicalPlan::DelimJoin { output_types, .. } => output_types,
        }
    }

    /// Children of this operator.
    pub fn children(&self) -> Vec<&PhysicalPlan> {
        match self {
            PhysicalPlan::TableScan { .. } => vec![],
            PhysicalPlan::DelimScan { .. } => vec![],
            PhysicalPlan::HashJoin { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            PhysicalPlan::CrossProduct { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            PhysicalPlan::HashAggregate { input, .. } => {
                input.iter().map(|child| child.as_ref()).collect()
            }
            PhysicalPlan::DelimJoin { join, distinct, .. } => {
                vec![join.as_ref(), distinct.as_ref()]
            }
        }
    }

    /// Display the plan with indentation.
    pub fn display_indent(&self, indent: usize) -> String {
        let mut result = String::new();
        self.format_indent(&mut result, indent);
        result
    }

    fn format_indent(&self, f: &mut String, indent: usize) {
        let prefix = "  ".repeat(indent);
        match self {
            PhysicalPlan::TableScan { table_name, .. } => {
                f.push_str(&format!("{}TableScan: {}\n", prefix, table_name));
            }
            PhysicalPlan::DelimScan { delim_id, .. } => {
                f.push_str(&format!("{}DelimScan: id={}\n", prefix, delim_id));
            }
            PhysicalPlan::HashJoin {
                left,
                right,
                join_type,
                conditions,
                ..
            } => {
                let condition_names: Vec<String> = conditions
                    .iter()
                    .map(|c| format!("{} {} {}", c.left, c.comparison, c.right))
                    .collect();
                f.push_str(&format!(
                    "{}HashJoin: {} [{}]\n",
                    prefix,
                    join_type,
                    condition_names.join(", ")
                ));
                left.format_indent(f, indent + 1);
                right.format_indent(f, indent + 1);
            }
            PhysicalPlan::CrossProduct { left, right, .. } => {
                f.push_str(&format!("{}CrossProduct\n", prefix));
                left.format_indent(f, indent + 1);
                right.format_indent(f, indent + 1);
            }
            PhysicalPlan::HashAggregate {
                group_by,
                aggregates,
                input,
                ..
            } => {
                let group_names: Vec<String> = group_by.iter().map(|g| g.to_string()).collect();
                f.push_str(&format!(
                    "{}HashAggregate: groups=[{}], aggregates={}\n",
                    prefix,
                    group_names.join(", "),
                    aggregates.len()
                ));
                if let Some(input) = input {
                    input.format_indent(f, indent + 1);
                }
            }
            PhysicalPlan::DelimJoin {
                side,
                join,
                delim_scans,
                distinct,
                ..
            } => {
                f.push_str(&format!(
                    "{}DelimJoin: {:?} scans={:?}\n",
                    prefix, side, delim_scans
                ));
                join.format_indent(f, indent + 1);
                distinct.format_indent(f, indent + 1);
            }
        }
    }
}

impl fmt::Display for PhysicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_indent(0))
    }
}
