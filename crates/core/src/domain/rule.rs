use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::plan::{CalculationBasis, PlanId};
use crate::domain::string_id;
use crate::precedence::assign_priority_from_scope;

string_id!(RuleId);
string_id!(TerritoryId);
string_id!(ClientId);
string_id!(ProjectId);
string_id!(ProductCategoryId);

/// Rule specificity. Higher wins.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Priority(pub u32);

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scope dimensions, listed in tie-break order (most significant first).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeDimension {
    Project,
    Client,
    Territory,
    ProductCategory,
}

impl ScopeDimension {
    pub const ALL: [ScopeDimension; 4] =
        [Self::Project, Self::Client, Self::Territory, Self::ProductCategory];

    /// Tie-break weight among rules with the same number of populated dimensions.
    pub fn weight(self) -> u32 {
        match self {
            Self::Project => 8,
            Self::Client => 4,
            Self::Territory => 2,
            Self::ProductCategory => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Client => "client",
            Self::Territory => "territory",
            Self::ProductCategory => "product_category",
        }
    }
}

/// The dimensions a rule is restricted to. All-`None` is the organization-wide default.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub territory_id: Option<TerritoryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_category_id: Option<ProductCategoryId>,
}

impl RuleScope {
    pub fn organization_wide() -> Self {
        Self::default()
    }

    pub fn with_territory(mut self, id: impl Into<String>) -> Self {
        self.territory_id = Some(TerritoryId(id.into()));
        self
    }

    pub fn with_client(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(ClientId(id.into()));
        self
    }

    pub fn with_project(mut self, id: impl Into<String>) -> Self {
        self.project_id = Some(ProjectId(id.into()));
        self
    }

    pub fn with_product_category(mut self, id: impl Into<String>) -> Self {
        self.product_category_id = Some(ProductCategoryId(id.into()));
        self
    }

    pub fn value(&self, dimension: ScopeDimension) -> Option<&str> {
        match dimension {
            ScopeDimension::Project => self.project_id.as_ref().map(ProjectId::as_str),
            ScopeDimension::Client => self.client_id.as_ref().map(ClientId::as_str),
            ScopeDimension::Territory => self.territory_id.as_ref().map(TerritoryId::as_str),
            ScopeDimension::ProductCategory => {
                self.product_category_id.as_ref().map(ProductCategoryId::as_str)
            }
        }
    }

    pub fn populated_dimensions(&self) -> impl Iterator<Item = ScopeDimension> + '_ {
        ScopeDimension::ALL.into_iter().filter(|dimension| self.value(*dimension).is_some())
    }

    pub fn is_organization_wide(&self) -> bool {
        self.populated_dimensions().next().is_none()
    }

    /// Canonical text form used to group rules with an identical scope.
    pub fn signature(&self) -> String {
        ScopeDimension::ALL
            .iter()
            .map(|dimension| {
                format!("{}={}", dimension.as_str(), self.value(*dimension).unwrap_or("*"))
            })
            .collect::<Vec<_>>()
            .join("|")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    Percentage,
    FlatAmount,
    Tiered,
}

impl RuleType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Percentage => "PERCENTAGE",
            Self::FlatAmount => "FLAT_AMOUNT",
            Self::Tiered => "TIERED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PERCENTAGE" => Some(Self::Percentage),
            "FLAT_AMOUNT" => Some(Self::FlatAmount),
            "TIERED" => Some(Self::Tiered),
            _ => None,
        }
    }
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Formula parameters. Percentages are expressed on a 0-100 scale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleKind {
    Percentage {
        percentage: Decimal,
    },
    FlatAmount {
        amount: Decimal,
    },
    Tiered {
        threshold: Decimal,
        tier_percentage: Decimal,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_percentage: Option<Decimal>,
    },
}

impl RuleKind {
    pub fn rule_type(&self) -> RuleType {
        match self {
            Self::Percentage { .. } => RuleType::Percentage,
            Self::FlatAmount { .. } => RuleType::FlatAmount,
            Self::Tiered { .. } => RuleType::Tiered,
        }
    }
}

fn default_active() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRule {
    pub id: RuleId,
    pub plan_id: PlanId,
    pub kind: RuleKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<Decimal>,
    #[serde(default)]
    pub scope: RuleScope,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basis: Option<CalculationBasis>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}

impl CommissionRule {
    /// Builds an active rule whose priority is derived from `scope`.
    pub fn draft(
        id: RuleId,
        plan_id: PlanId,
        kind: RuleKind,
        scope: RuleScope,
        created_at: DateTime<Utc>,
    ) -> Self {
        let priority = assign_priority_from_scope(&scope);
        Self {
            id,
            plan_id,
            kind,
            min_amount: None,
            max_amount: None,
            scope,
            priority,
            basis: None,
            is_active: true,
            created_at,
        }
    }

    pub fn with_caps(mut self, min_amount: Option<Decimal>, max_amount: Option<Decimal>) -> Self {
        self.min_amount = min_amount;
        self.max_amount = max_amount;
        self
    }

    pub fn with_basis(mut self, basis: CalculationBasis) -> Self {
        self.basis = Some(basis);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn rule_type(&self) -> RuleType {
        self.kind.rule_type()
    }

    /// Replaces the scope and re-derives the priority.
    pub fn rescope(&mut self, scope: RuleScope) {
        self.priority = assign_priority_from_scope(&scope);
        self.scope = scope;
    }

    pub fn derived_priority(&self) -> Priority {
        assign_priority_from_scope(&self.scope)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{CommissionRule, RuleId, RuleKind, RuleScope, RuleType, ScopeDimension};
    use crate::domain::plan::PlanId;

    #[test]
    fn signature_lists_every_dimension_in_tie_break_order() {
        let scope = RuleScope::default().with_client("C-1").with_product_category("hardware");
        assert_eq!(
            scope.signature(),
            "project=*|client=C-1|territory=*|product_category=hardware"
        );
        assert_eq!(
            scope.populated_dimensions().collect::<Vec<_>>(),
            vec![ScopeDimension::Client, ScopeDimension::ProductCategory]
        );
    }

    #[test]
    fn rescope_rederives_priority() {
        let mut rule = CommissionRule::draft(
            RuleId::new("R-1"),
            PlanId::new("P-1"),
            RuleKind::Percentage { percentage: Decimal::TEN },
            RuleScope::organization_wide(),
            Utc::now(),
        );
        let default_priority = rule.priority;

        rule.rescope(RuleScope::default().with_project("PRJ-1"));

        assert!(rule.priority > default_priority);
        assert_eq!(rule.priority, rule.derived_priority());
    }

    #[test]
    fn rule_kind_uses_tagged_wire_names() {
        let kind: RuleKind = serde_json::from_str(
            r#"{"type":"TIERED","threshold":"500","tier_percentage":"15"}"#,
        )
        .expect("tiered rule should deserialize");

        assert_eq!(kind.rule_type(), RuleType::Tiered);
        assert_eq!(RuleType::parse("flat_amount"), Some(RuleType::FlatAmount));
    }

    #[test]
    fn omitted_priority_and_activity_use_defaults() {
        let rule: CommissionRule = serde_json::from_str(
            r#"{"id":"R-9","plan_id":"P-1","kind":{"type":"FLAT_AMOUNT","amount":"25"}}"#,
        )
        .expect("minimal rule should deserialize");

        assert!(rule.is_active);
        assert!(rule.scope.is_organization_wide());
        assert_eq!(rule.priority.0, 0);
    }
}
