use crate::error::{PnlError, Result};
use crate::ingestion::RawMappingRow;
use crate::schema::{Kind, LineNumber, MappingRule};
use crate::template::StatementTemplate;
use log::debug;
use std::collections::{BTreeMap, HashSet};

/// Ordered, validated collection of mapping rules.
///
/// Order is user-controlled and is the only precedence the classifier knows:
/// the first active matching rule wins. Catch-all rules are legal anywhere,
/// although by convention they sit at the end.
#[derive(Debug, Clone)]
pub struct MappingRuleStore {
    rules: Vec<MappingRule>,
    leaves: BTreeMap<LineNumber, Kind>,
}

impl MappingRuleStore {
    pub fn new(template: &StatementTemplate) -> Self {
        Self {
            rules: Vec::new(),
            leaves: template.leaf_kinds(),
        }
    }

    /// Loads a persisted rule list, validating every rule. Fails on the
    /// first invalid rule and on duplicate ids.
    pub fn with_rules(template: &StatementTemplate, rules: Vec<MappingRule>) -> Result<Self> {
        let mut store = Self::new(template);
        let mut seen = HashSet::new();
        for rule in &rules {
            store.validate(rule)?;
            if !seen.insert(rule.id.clone()) {
                return Err(PnlError::ValidationError {
                    rule: rule.id.clone(),
                    details: "duplicate rule id".to_string(),
                });
            }
        }
        store.rules = rules;
        Ok(store)
    }

    pub fn list(&self) -> &[MappingRule] {
        &self.rules
    }

    pub fn get(&self, rule_id: &str) -> Option<&MappingRule> {
        self.rules.iter().find(|r| r.id == rule_id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn into_rules(self) -> Vec<MappingRule> {
        self.rules
    }

    pub fn validate(&self, rule: &MappingRule) -> Result<()> {
        if rule.id.trim().is_empty() {
            return Err(PnlError::ValidationError {
                rule: rule.id.clone(),
                details: "rule id must not be empty".to_string(),
            });
        }

        check_target(&self.leaves, rule)
    }

    /// Parses and validates a loosely-typed rule row. This is where a
    /// missing `pl_line` or an unknown kind label is rejected.
    pub fn validate_raw(&self, raw: &RawMappingRow) -> Result<MappingRule> {
        let rule = raw.to_rule()?;
        self.validate(&rule)?;
        Ok(rule)
    }

    /// Replaces the rule with the same id in place, or appends a new rule at
    /// the end. The store is left unchanged when validation fails.
    pub fn upsert(&mut self, rule: MappingRule) -> Result<()> {
        self.validate(&rule)?;

        match self.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => {
                debug!("Replacing mapping rule {}", rule.id);
                *existing = rule;
            }
            None => {
                debug!("Appending mapping rule {}", rule.id);
                self.rules.push(rule);
            }
        }

        Ok(())
    }

    pub fn remove(&mut self, rule_id: &str) -> Option<MappingRule> {
        let index = self.rules.iter().position(|r| r.id == rule_id)?;
        Some(self.rules.remove(index))
    }

    /// Reorders the rules. `ordered_ids` must be a permutation of the current
    /// rule ids.
    pub fn reorder(&mut self, ordered_ids: &[&str]) -> Result<()> {
        if ordered_ids.len() != self.rules.len() {
            return Err(PnlError::ValidationError {
                rule: String::new(),
                details: format!(
                    "reorder lists {} ids but the store holds {} rules",
                    ordered_ids.len(),
                    self.rules.len()
                ),
            });
        }

        let mut reordered = Vec::with_capacity(self.rules.len());
        let mut seen = HashSet::new();
        for id in ordered_ids {
            if !seen.insert(*id) {
                return Err(PnlError::ValidationError {
                    rule: id.to_string(),
                    details: "rule id listed twice in reorder".to_string(),
                });
            }
            let rule = self.get(id).ok_or_else(|| PnlError::ValidationError {
                rule: id.to_string(),
                details: "unknown rule id in reorder".to_string(),
            })?;
            reordered.push(rule.clone());
        }

        self.rules = reordered;
        Ok(())
    }
}

/// Checks every active rule against `template` the way
/// [`MappingRuleStore::validate`] does. Inactive rules never classify
/// anything and are skipped.
pub fn validate_active_rules(template: &StatementTemplate, rules: &[MappingRule]) -> Result<()> {
    let leaves = template.leaf_kinds();
    rules
        .iter()
        .filter(|r| r.active)
        .try_for_each(|rule| check_target(&leaves, rule))
}

/// A rule must point at a leaf line and carry that line's kind.
fn check_target(leaves: &BTreeMap<LineNumber, Kind>, rule: &MappingRule) -> Result<()> {
    let Some(kind) = leaves.get(&rule.pl_line) else {
        return Err(PnlError::ValidationError {
            rule: rule.id.clone(),
            details: format!(
                "pl_line {} is not a leaf line of the statement template",
                rule.pl_line
            ),
        });
    };

    if *kind != rule.kind {
        return Err(PnlError::ValidationError {
            rule: rule.id.clone(),
            details: format!(
                "kind {} does not match line {} ({})",
                rule.kind, rule.pl_line, kind
            ),
        });
    }

    Ok(())
}

/// The seeded rule set for [`StatementTemplate::standard`]. Specific
/// counterparty rules come first, cost-center catch-alls after them.
pub fn default_rules() -> Vec<MappingRule> {
    let specific: &[(&str, &str, &str, &str, u32, Kind)] = &[
        (
            "revenue-google",
            "Receita Google",
            "Google Play Net Revenue",
            "GOOGLE BRASIL PAGAMENTOS LTDA",
            12,
            Kind::Revenue,
        ),
        (
            "revenue-apple",
            "Receita Apple",
            "App Store Net Revenue",
            "App Store (Apple)",
            11,
            Kind::Revenue,
        ),
        (
            "cogs-aws",
            "COGS",
            "Web Services Expenses",
            "AWS",
            22,
            Kind::Cost,
        ),
        (
            "cogs-cloudflare",
            "COGS",
            "Web Services Expenses",
            "Cloudflare",
            22,
            Kind::Cost,
        ),
        (
            "cogs-heroku",
            "COGS",
            "Web Services Expenses",
            "Heroku",
            22,
            Kind::Cost,
        ),
        (
            "cogs-mailgun",
            "COGS",
            "Web Services Expenses",
            "MailGun",
            22,
            Kind::Cost,
        ),
        (
            "sga-marketing",
            "SG&A",
            "Marketing & Growth Expenses",
            "MGA MARKETING LTDA",
            41,
            Kind::Expense,
        ),
        (
            "sga-adobe",
            "SG&A",
            "Tech Support & Services",
            "Adobe",
            43,
            Kind::Expense,
        ),
        (
            "sga-canva",
            "SG&A",
            "Tech Support & Services",
            "Canva",
            43,
            Kind::Expense,
        ),
        (
            "other-bpo",
            "Outras Despesas",
            "Legal & Accounting Expenses",
            "BHUB.AI",
            44,
            Kind::Expense,
        ),
        (
            "other-rent",
            "Outras Despesas",
            "Office Expenses",
            "GO OFFICES LATAM S/A",
            44,
            Kind::Expense,
        ),
        (
            "income-conta-simples",
            "Rendimentos",
            "Rendimentos de Aplicações",
            "CONTA SIMPLES",
            14,
            Kind::Revenue,
        ),
        (
            "income-inter",
            "Rendimentos",
            "Rendimentos de Aplicações",
            "BANCO INTER",
            14,
            Kind::Revenue,
        ),
    ];

    let catch_all: &[(&str, &str, u32, Kind)] = &[
        ("cc-web-services", "Web Services Expenses", 22, Kind::Cost),
        (
            "cc-marketing",
            "Marketing & Growth Expenses",
            41,
            Kind::Expense,
        ),
        ("cc-wages", "Wages Expenses", 42, Kind::Expense),
        (
            "cc-tech-support",
            "Tech Support & Services",
            43,
            Kind::Expense,
        ),
        ("cc-legal", "Legal & Accounting Expenses", 44, Kind::Expense),
        ("cc-office", "Office Expenses", 44, Kind::Expense),
        ("cc-travel", "Travel", 44, Kind::Expense),
        ("cc-taxes", "Other Taxes", 44, Kind::Expense),
    ];

    let mut rules: Vec<MappingRule> = specific
        .iter()
        .map(|(id, group, cost_center, counterparty, line, kind)| {
            MappingRule::new(*id, *line, *kind)
                .with_financial_group(*group)
                .with_cost_center(*cost_center)
                .with_counterparty(*counterparty)
        })
        .collect();

    rules.extend(catch_all.iter().map(|(id, cost_center, line, kind)| {
        MappingRule::new(*id, *line, *kind).with_cost_center(*cost_center)
    }));

    rules
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MappingRuleStore {
        MappingRuleStore::new(&StatementTemplate::standard())
    }

    #[test]
    fn test_upsert_appends_then_replaces_in_place() {
        let mut store = store();
        store
            .upsert(MappingRule::new("a", 11, Kind::Revenue).with_counterparty("Acme"))
            .unwrap();
        store.upsert(MappingRule::new("b", 41, Kind::Expense)).unwrap();
        store
            .upsert(MappingRule::new("a", 12, Kind::Revenue).with_counterparty("Acme"))
            .unwrap();

        let ids: Vec<&str> = store.list().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.get("a").unwrap().pl_line, LineNumber(12));
    }

    #[test]
    fn test_invalid_rule_leaves_store_unchanged() {
        let mut store = store();
        store.upsert(MappingRule::new("a", 11, Kind::Revenue)).unwrap();

        let err = store
            .upsert(MappingRule::new("a", 999, Kind::Revenue))
            .unwrap_err();
        assert!(err.is_validation_error());
        assert!(err.to_string().contains("999"));
        assert_eq!(store.get("a").unwrap().pl_line, LineNumber(11));
    }

    #[test]
    fn test_rules_cannot_target_computed_lines() {
        let store = store();
        // 15 is Total Revenue, 45 is the unclassified bucket
        assert!(store.validate(&MappingRule::new("t", 15, Kind::Revenue)).is_err());
        assert!(store.validate(&MappingRule::new("u", 45, Kind::Expense)).is_err());
        assert!(store.validate(&MappingRule::new("h", 10, Kind::Revenue)).is_err());
    }

    #[test]
    fn test_rule_kind_must_match_target_line() {
        let store = store();
        // 44 is Other Expenses
        let err = store
            .validate(&MappingRule::new("r", 44, Kind::Revenue))
            .unwrap_err();
        assert!(err.is_validation_error());
        assert!(err.to_string().contains("Expense"));

        // 22 is Web Services, a cost line
        assert!(store.validate(&MappingRule::new("c", 22, Kind::Expense)).is_err());
        assert!(store.validate(&MappingRule::new("c", 22, Kind::Cost)).is_ok());
    }

    #[test]
    fn test_validate_active_rules_skips_inactive() {
        let template = StatementTemplate::standard();
        let mismatched = MappingRule::new("r", 44, Kind::Revenue);
        assert!(validate_active_rules(&template, &[mismatched.clone()]).is_err());
        assert!(validate_active_rules(&template, &[mismatched.inactive()]).is_ok());
        assert!(validate_active_rules(&template, &default_rules()).is_ok());
    }

    #[test]
    fn test_wildcard_rules_are_valid() {
        let store = store();
        let catch_all = MappingRule::new("all", 44, Kind::Expense);
        assert!(catch_all.is_catch_all());
        assert!(store.validate(&catch_all).is_ok());
    }

    #[test]
    fn test_validate_raw_rejects_unknown_kind() {
        let store = store();
        let raw = RawMappingRow {
            id: Some("r1".to_string()),
            pl_line: "11".to_string(),
            kind: "Ativo".to_string(),
            ..Default::default()
        };
        let err = store.validate_raw(&raw).unwrap_err();
        assert!(err.is_validation_error());
        assert!(err.to_string().contains("r1"));
    }

    #[test]
    fn test_remove_and_reorder() {
        let mut store = store();
        for id in ["a", "b", "c"] {
            store.upsert(MappingRule::new(id, 44, Kind::Expense)).unwrap();
        }

        store.reorder(&["c", "a", "b"]).unwrap();
        let ids: Vec<&str> = store.list().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);

        assert!(store.reorder(&["c", "a"]).is_err());
        assert!(store.reorder(&["c", "a", "a"]).is_err());
        assert!(store.reorder(&["c", "a", "z"]).is_err());

        let removed = store.remove("a").unwrap();
        assert_eq!(removed.id, "a");
        assert!(store.remove("a").is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_default_rules_validate_against_standard_template() {
        let template = StatementTemplate::standard();
        let store = MappingRuleStore::with_rules(&template, default_rules()).unwrap();
        assert!(!store.is_empty());

        // catch-alls come after every specific rule
        let first_catch_all = store
            .list()
            .iter()
            .position(|r| r.counterparty.is_empty())
            .unwrap();
        assert!(store.list()[first_catch_all..]
            .iter()
            .all(|r| r.counterparty.is_empty()));
    }

    #[test]
    fn test_with_rules_rejects_duplicate_ids() {
        let template = StatementTemplate::standard();
        let result = MappingRuleStore::with_rules(
            &template,
            vec![
                MappingRule::new("dup", 11, Kind::Revenue),
                MappingRule::new("dup", 12, Kind::Revenue),
            ],
        );
        assert!(result.is_err());
    }
}
