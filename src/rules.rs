// Category Rules - Rules as Data
// Wildcard patterns over description/counterparty that assign a category and optionally a direction

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::model::Direction;

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    /// Rule ID for tracking
    pub id: String,

    /// Pattern to match (supports wildcards with *)
    pub pattern: String,

    /// Category to assign
    pub category: String,

    /// Direction to force, e.g. transfers that look like expenses by sign
    #[serde(default)]
    pub direction: Option<Direction>,

    /// Priority (higher = applied first)
    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub description: Option<String>,
}

impl CategoryRule {
    pub fn new(id: &str, pattern: &str, category: &str, priority: i32) -> Self {
        CategoryRule {
            id: id.to_string(),
            pattern: pattern.to_string(),
            category: category.to_string(),
            direction: None,
            priority,
            description: None,
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Check if pattern matches the given text
    pub fn matches(&self, text: &str) -> bool {
        let pattern_lower = self.pattern.to_lowercase();
        let text_lower = text.to_lowercase();

        if !pattern_lower.contains('*') {
            // Plain pattern: case-insensitive substring
            return text_lower.contains(&pattern_lower);
        }

        let parts: Vec<&str> = pattern_lower.split('*').collect();
        let first = parts[0];
        let last = parts[parts.len() - 1];

        if !text_lower.starts_with(first) {
            return false;
        }
        if !text_lower[first.len()..].ends_with(last) {
            return false;
        }

        // Middle parts appear in order, between the anchored ends
        let end = text_lower.len() - last.len();
        let mut current_pos = first.len();
        for part in &parts[1..parts.len() - 1] {
            if part.is_empty() {
                continue;
            }
            match text_lower[current_pos..end].find(part) {
                Some(pos) => current_pos += pos + part.len(),
                None => return false,
            }
        }
        true
    }
}

// ============================================================================
// RULE ENGINE
// ============================================================================

/// Outcome of the first matching rule
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub category: String,
    pub direction: Option<Direction>,
    pub rule_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    rules: Vec<CategoryRule>,
}

impl RuleEngine {
    /// Create a new empty rule engine
    pub fn new() -> Self {
        RuleEngine { rules: Vec::new() }
    }

    /// Load rules from a JSON array file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let rules: Vec<CategoryRule> = serde_json::from_str(content)?;
        Ok(RuleEngine::from_rules(rules))
    }

    /// Create engine from a list of rules
    pub fn from_rules(mut rules: Vec<CategoryRule>) -> Self {
        // Stable sort keeps file order among equal priorities
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        RuleEngine { rules }
    }

    /// Keyword rules shipped with the crate
    pub fn builtin() -> Self {
        RuleEngine::from_rules(vec![
            CategoryRule::new("card-payment", "*credit card*payment", "Card Payments", 50)
                .with_direction(Direction::Transfer),
            CategoryRule::new("des-transfer", "des:transfer", "Transfers", 40)
                .with_direction(Direction::Transfer),
            CategoryRule::new("payroll", "payroll", "Salary", 30).with_direction(Direction::Income),
            CategoryRule::new("salary", "salary", "Salary", 30).with_direction(Direction::Income),
            CategoryRule::new("zarplata", "зарплата", "Salary", 30)
                .with_direction(Direction::Income),
            CategoryRule::new("uber-eats", "uber*eats*", "Restaurants", 20),
            CategoryRule::new("uber", "uber", "Transport", 10),
            CategoryRule::new("starbucks", "starbucks*", "Restaurants", 10),
            CategoryRule::new("netflix", "netflix", "Subscriptions", 10),
            CategoryRule::new("spotify", "spotify", "Subscriptions", 10),
            CategoryRule::new("amazon", "amazon*", "Shopping", 5),
            CategoryRule::new("taxi", "такси", "Transport", 5),
            CategoryRule::new("cashback", "кэшбэк", "Cashback", 20)
                .with_direction(Direction::Income),
            CategoryRule::new("ozon", "ozon", "Shopping", 5),
            CategoryRule::new("ozon-ru", "озон", "Shopping", 5),
            CategoryRule::new("pyaterochka", "пятёрочка", "Groceries", 5),
            CategoryRule::new("pyaterochka-e", "пятерочка", "Groceries", 5),
            CategoryRule::new("pharmacy", "аптек", "Health", 5),
        ])
    }

    /// Add a single rule
    pub fn add_rule(&mut self, rule: CategoryRule) {
        self.rules.push(rule);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Rules from `other` are consulted before this engine's rules of equal priority
    pub fn merged_with(self, other: RuleEngine) -> Self {
        let mut rules = other.rules;
        rules.extend(self.rules);
        RuleEngine::from_rules(rules)
    }

    /// First matching rule over any of `texts` (already sorted by priority)
    pub fn classify(&self, texts: &[&str]) -> Option<RuleMatch> {
        self.rules
            .iter()
            .find(|rule| texts.iter().any(|text| rule.matches(text)))
            .map(|rule| RuleMatch {
                category: rule.category.clone(),
                direction: rule.direction,
                rule_id: rule.id.clone(),
            })
    }

    /// Get number of rules loaded
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

// ============================================================================
// TESTS
// ============================================================================
