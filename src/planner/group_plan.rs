use crate::error::{AppError, AppResult};
use crate::planner::{Operation, Plan, PlanInput};

/// Schema-specific planning of group changes
pub trait GroupPlanner: Send + Sync {
    fn plan_group_create(&self, input: &PlanInput<'_>) -> AppResult<Plan>;

    /// Called with a non-empty change set
    fn plan_group_update(&self, input: &PlanInput<'_>) -> AppResult<Plan>;

    /// Called only for groups without members
    fn plan_group_delete(&self, input: &PlanInput<'_>) -> AppResult<Plan>;
}

/// Shared business logic for group plans
pub struct GroupPlanProcessor;

impl GroupPlanProcessor {
    /// At least one unique attribute must hold a value.
    pub fn validate_identity(input: &PlanInput<'_>) -> AppResult<()> {
        let defined = input
            .schema
            .unique_attributes
            .iter()
            .any(|name| input.value(name).is_some());
        if defined {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "{} needs one of {} to be set",
                input.schema.entity_type,
                input.schema.unique_attributes.join(", ")
            )))
        }
    }

    /// Only an empty group may be deleted.
    pub fn ensure_empty(input: &PlanInput<'_>) -> AppResult<()> {
        let primary = input.context.primary_members.len();
        let secondary = input.context.secondary_members.len();
        if primary + secondary == 0 {
            return Ok(());
        }
        let name = input
            .text(&input.schema.rdn_attribute)
            .unwrap_or_else(|| "group".to_string());
        Err(AppError::Integrity(format!(
            "{} still has {} primary and {} secondary members",
            name, primary, secondary
        )))
    }
}

/// Unified group planning using the adapter pattern
pub struct UnifiedGroupPlan<T: GroupPlanner> {
    planner: T,
}

impl<T: GroupPlanner> UnifiedGroupPlan<T> {
    pub fn new(planner: T) -> Self {
        Self { planner }
    }

    pub fn plan(&self, operation: Operation, input: &PlanInput<'_>) -> AppResult<Plan> {
        GroupPlanProcessor::validate_identity(input)?;

        match operation {
            Operation::Create => {
                if input.bound.is_some() {
                    return Err(AppError::Validation(format!(
                        "{} already exists in the directory",
                        input.schema.entity_type
                    )));
                }
                self.planner.plan_group_create(input)
            }
            Operation::Update => {
                input.bound_dn()?;
                if input.changes.is_empty() {
                    return Ok(Plan::new());
                }
                self.planner.plan_group_update(input)
            }
            Operation::Delete => {
                input.bound_dn()?;
                GroupPlanProcessor::ensure_empty(input)?;
                self.planner.plan_group_delete(input)
            }
        }
    }
}
