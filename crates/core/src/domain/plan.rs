use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::rule::ProjectId;
use crate::domain::string_id;
use crate::domain::transaction::OrganizationId;

string_id!(PlanId);

/// Which amount a formula is applied to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationBasis {
    /// Gross amount minus linked returns, floored at zero.
    #[default]
    Net,
    Gross,
}

impl CalculationBasis {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Net => "net",
            Self::Gross => "gross",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "net" => Some(Self::Net),
            "gross" => Some(Self::Gross),
            _ => None,
        }
    }
}

fn default_active() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionPlan {
    pub id: PlanId,
    pub organization_id: OrganizationId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Lower-band percentage for tiered rules that do not declare their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_rate: Option<Decimal>,
    #[serde(default)]
    pub basis: CalculationBasis,
}

impl CommissionPlan {
    pub fn new(id: PlanId, organization_id: OrganizationId, name: impl Into<String>) -> Self {
        Self {
            id,
            organization_id,
            name: name.into(),
            project_id: None,
            is_active: true,
            base_rate: None,
            basis: CalculationBasis::Net,
        }
    }

    pub fn with_base_rate(mut self, base_rate: Decimal) -> Self {
        self.base_rate = Some(base_rate);
        self
    }

    pub fn with_basis(mut self, basis: CalculationBasis) -> Self {
        self.basis = basis;
        self
    }

    pub fn for_project(mut self, project_id: ProjectId) -> Self {
        self.project_id = Some(project_id);
        self
    }
}
