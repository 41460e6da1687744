mod params;
mod rules;

pub use params::FiveRuleParams;
pub use rules::MatchedRule;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::domain::DataWarning;
use super::structure::StructuralError;

/// Scale a policy's rule set reasons on. Scores cross the percent boundary at
/// the normalizer/aggregator seams and nowhere else; scale confusion is the
/// classic live defect this type exists to prevent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyScale {
    /// 0-10 internal scale used by the reference rule set.
    TenPoint,
    /// 0-100, identical to the percent domain.
    Percent,
}

impl PolicyScale {
    pub fn from_percent(self, percent: f64) -> f64 {
        match self {
            PolicyScale::TenPoint => percent / 10.0,
            PolicyScale::Percent => percent,
        }
    }

    pub fn to_percent(self, score: f64) -> f64 {
        match self {
            PolicyScale::TenPoint => score * 10.0,
            PolicyScale::Percent => score,
        }
    }

    /// Fraction of full marks, used for weighted contributions.
    pub fn unit_fraction(self, score: f64) -> f64 {
        match self {
            PolicyScale::TenPoint => score / 10.0,
            PolicyScale::Percent => score / 100.0,
        }
    }
}

/// Closed enumeration of supported rule sets. Adding a strategy means adding a
/// variant here; nothing is dispatched by name string at evaluation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleSet {
    WeightedMean,
    FiveRule(FiveRuleParams),
}

/// A named, versioned rule set. Versions are immutable: changing a rule set
/// registers a new version so historical computations stay reproducible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradePolicy {
    pub name: String,
    pub version: u32,
    pub scale: PolicyScale,
    pub rules: RuleSet,
}

impl GradePolicy {
    /// The reference five-rule policy on the 0-10 scale.
    pub fn five_rule_reference() -> Self {
        Self {
            name: "five-rule".to_string(),
            version: 1,
            scale: PolicyScale::TenPoint,
            rules: RuleSet::FiveRule(FiveRuleParams::default()),
        }
    }
}

/// Level a policy binding attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingScope {
    Item,
    Constituent,
    Module,
}

impl BindingScope {
    pub const fn label(self) -> &'static str {
        match self {
            BindingScope::Item => "item",
            BindingScope::Constituent => "constituent",
            BindingScope::Module => "module",
        }
    }
}

/// Associates a registered policy version with one entity. Absence of a
/// binding means the weighted arithmetic mean fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyBinding {
    pub scope: BindingScope,
    pub scope_id: String,
    pub policy_name: String,
    pub policy_version: u32,
}

/// Immutable registry of policy versions, injected into the evaluator once at
/// construction. Lookups resolve to shared handles; nothing is re-parsed per
/// evaluation and nothing mutates in place.
#[derive(Debug, Default, Clone)]
pub struct PolicyRegistry {
    policies: BTreeMap<(String, u32), Arc<GradePolicy>>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the reference five-rule policy.
    pub fn with_reference_policies() -> Self {
        let mut registry = Self::new();
        registry.register(GradePolicy::five_rule_reference());
        registry
    }

    pub fn register(&mut self, policy: GradePolicy) {
        self.policies
            .insert((policy.name.clone(), policy.version), Arc::new(policy));
    }

    pub fn resolve(&self, name: &str, version: u32) -> Option<Arc<GradePolicy>> {
        self.policies
            .get(&(name.to_string(), version))
            .map(Arc::clone)
    }

    /// Resolve a binding or report the structural error a dangling binding is.
    pub fn resolve_binding(&self, binding: &PolicyBinding) -> Result<Arc<GradePolicy>, StructuralError> {
        self.resolve(&binding.policy_name, binding.policy_version)
            .ok_or_else(|| StructuralError::UnknownPolicy {
                name: binding.policy_name.clone(),
                version: binding.policy_version,
            })
    }
}

/// Evaluation result carrying the matched rule for audit display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyVerdict {
    /// Score on the policy's declared scale.
    pub score: f64,
    pub matched: MatchedRule,
    pub warnings: Vec<DataWarning>,
}

/// Stateless evaluator applying a policy's rule set to a set of percent
/// inputs. Inputs arrive on the 0-100 percent scale and are converted to the
/// policy's declared scale before any rule looks at them.
#[derive(Debug, Default)]
pub struct PolicyEvaluator;

impl PolicyEvaluator {
    /// Evaluate a bound policy. An empty input set never reaches the rule
    /// math: the documented default is 0 on the policy scale, flagged with a
    /// warning so consumers can surface it.
    pub fn evaluate(
        &self,
        policy: &GradePolicy,
        scope_id: &str,
        percents: &[f64],
        weights: &[f64],
    ) -> PolicyVerdict {
        if percents.is_empty() {
            return PolicyVerdict {
                score: 0.0,
                matched: MatchedRule::Fallback,
                warnings: vec![DataWarning::EmptyPolicyInputs {
                    scope_id: scope_id.to_string(),
                }],
            };
        }

        let scaled: Vec<f64> = percents
            .iter()
            .map(|percent| policy.scale.from_percent(*percent))
            .collect();

        let (score, matched) = match &policy.rules {
            RuleSet::WeightedMean => (rules::weighted_mean(&scaled, weights), MatchedRule::WeightedMean),
            RuleSet::FiveRule(params) => rules::apply_five_rule(&scaled, params),
        };

        PolicyVerdict {
            score,
            matched,
            warnings: Vec::new(),
        }
    }

    /// Fallback for entities without a binding: weighted arithmetic mean on
    /// the percent scale.
    pub fn weighted_mean_percent(
        &self,
        scope_id: &str,
        percents: &[f64],
        weights: &[f64],
    ) -> PolicyVerdict {
        if percents.is_empty() {
            return PolicyVerdict {
                score: 0.0,
                matched: MatchedRule::WeightedMean,
                warnings: vec![DataWarning::EmptyPolicyInputs {
                    scope_id: scope_id.to_string(),
                }],
            };
        }

        PolicyVerdict {
            score: rules::weighted_mean(percents, weights),
            matched: MatchedRule::WeightedMean,
            warnings: Vec::new(),
        }
    }
}
