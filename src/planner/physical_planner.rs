//! Physical query planner.
//!
//! Lowers logical comparison-join trees into physical plans. The interesting
//! pass is delim-join construction: a join carrying duplicate-eliminated
//! columns is normalised to a left or right delimitation, the delim scans
//! embedded in the opposite subtree are discovered, and the join is wrapped
//! with the distinct aggregate that feeds them.

use arrow::datatypes::DataType;
use tracing::trace;

use crate::error::{EmberError, Result};
use crate::planner::logical_plan::{
    BoundReference, JoinType, LogicalComparisonJoin, LogicalPlan,
};
use crate::planner::physical_plan::{DelimSide, PhysicalPlan};

/// Physical query planner.
///
/// Stateful only in that it mints the `delim_id` keys that tie delim scans
/// to their enclosing delim join.
pub struct PhysicalPlanner {
    next_delim_id: usize,
}

impl PhysicalPlanner {
    /// Create a new physical planner.
    pub fn new() -> Self {
        Self { next_delim_id: 0 }
    }

    /// Create a physical plan from a logical plan.
    pub fn create_physical_plan(&mut self, plan: LogicalPlan) -> Result<PhysicalPlan> {
        match plan {
            LogicalPlan::TableScan {
                table_name,
                output_types,
            } => Ok(PhysicalPlan::TableScan {
                table_name,
                output_types,
            }),

            LogicalPlan::DelimGet { chunk_types } => {
                let delim_id = self.next_delim_id;
                self.next_delim_id += 1;
                Ok(PhysicalPlan::DelimScan {
                    delim_id,
                    chunk_types,
                })
            }

            LogicalPlan::ComparisonJoin(join) => {
                if join.duplicate_eliminated_columns.is_empty() {
                    self.plan_comparison_join(join)
                } else {
                    self.plan_delim_join(join)
                }
            }
        }
    }

    /// Plan a duplicate-eliminated join.
    ///
    /// The join side is normalised first: symmetric and flippable join types
    /// are flipped so the delimiter data ends up on the right, which lets the
    /// executor build the distinct table on the probe side. `Single` and
    /// `Mark` joins cannot be flipped and stay left-delimited.
    pub fn plan_delim_join(&mut self, mut join: LogicalComparisonJoin) -> Result<PhysicalPlan> {
        match join.join_type {
            JoinType::Single | JoinType::Mark => {
                return self.plan_left_delim_join(join);
            }
            JoinType::Inner | JoinType::Outer => {
                // These are symmetric.
                let join_type = join.join_type;
                join.flip_children(join_type);
            }
            JoinType::Left => join.flip_children(JoinType::Right),
            JoinType::Right => join.flip_children(JoinType::Left),
            JoinType::Semi => join.flip_children(JoinType::RightSemi),
            JoinType::Anti => join.flip_children(JoinType::RightAnti),
            other => {
                return Err(EmberError::not_implemented(format!(
                    "delim join planning for join type {}",
                    other
                )));
            }
        }
        self.plan_right_delim_join(join)
    }

    /// Plan a left delim join: the delim scans live in the right subtree.
    pub fn plan_left_delim_join(&mut self, join: LogicalComparisonJoin) -> Result<PhysicalPlan> {
        self.plan_delim_join_side(join, DelimSide::Left)
    }

    /// Plan a right delim join: the delim scans live in the left subtree.
    pub fn plan_right_delim_join(&mut self, join: LogicalComparisonJoin) -> Result<PhysicalPlan> {
        self.plan_delim_join_side(join, DelimSide::Right)
    }

    fn plan_delim_join_side(
        &mut self,
        join: LogicalComparisonJoin,
        side: DelimSide,
    ) -> Result<PhysicalPlan> {
        let duplicate_eliminated = join.duplicate_eliminated_columns.clone();
        let estimated_cardinality = join.estimated_cardinality;
        let output_types = join.output_types.clone();

        // First create the underlying join.
        let plan = self.plan_comparison_join(join)?;
        // This should create a join, not a cross product.
        let (left, right) = match &plan {
            PhysicalPlan::HashJoin { left, right, .. } => (left.as_ref(), right.as_ref()),
            _ => {
                return Err(EmberError::internal(
                    "delim join planning expected a comparison join, not a cross product",
                ));
            }
        };

        // Gather the scans on the duplicate-eliminated data set from the
        // subtree opposite the delimitation side.
        let opposite = match side {
            DelimSide::Left => right,
            DelimSide::Right => left,
        };
        let mut delim_scans = Vec::new();
        gather_delim_scans(opposite, &mut delim_scans);
        if delim_scans.is_empty() {
            // No duplicate-eliminated scans left in the subtree: the
            // delimitation was optimised away, push the normal join.
            trace!("delim join optimised away, keeping the plain join");
            return Ok(plan);
        }

        // The DISTINCT clause that generates the duplicate-eliminated chunk:
        // group on the delimiter columns, compute nothing.
        let group_types: Vec<DataType> = duplicate_eliminated
            .iter()
            .map(|column| column.data_type.clone())
            .collect();
        let distinct_groups: Vec<BoundReference> = duplicate_eliminated
            .iter()
            .map(|column| BoundReference::new(column.data_type.clone(), column.index))
            .collect();
        let distinct = PhysicalPlan::HashAggregate {
            group_by: distinct_groups,
            aggregates: Vec::new(),
            output_types: group_types,
            estimated_cardinality,
            input: None,
        };

        trace!(?side, scans = delim_scans.len(), "built delim join");
        Ok(PhysicalPlan::DelimJoin {
            side,
            join: Box::new(plan),
            delim_scans,
            distinct: Box::new(distinct),
            output_types,
            estimated_cardinality,
        })
    }

    /// Plan the underlying comparison join. A join without conditions
    /// degenerates into a cross product.
    pub fn plan_comparison_join(&mut self, join: LogicalComparisonJoin) -> Result<PhysicalPlan> {
        let left = self.create_physical_plan(*join.left)?;
        let right = self.create_physical_plan(*join.right)?;
        if join.conditions.is_empty() {
            return Ok(PhysicalPlan::CrossProduct {
                left: Box::new(left),
                right: Box::new(right),
                output_types: join.output_types,
            });
        }
        Ok(PhysicalPlan::HashJoin {
            left: Box::new(left),
            right: Box::new(right),
            join_type: join.join_type,
            conditions: join.conditions,
            output_types: join.output_types,
        })
    }
}

impl Default for PhysicalPlanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Collect the `delim_id`s of every delim scan in `plan`'s subtree.
fn gather_delim_scans(plan: &PhysicalPlan, delim_scans: &mut Vec<usize>) {
    if let PhysicalPlan::DelimScan { delim_id, .. } = plan {
        delim_scans.push(*delim_id);
    }
    for child in plan.children() {
        gather_delim_scans(child, delim_scans);
    }
}
