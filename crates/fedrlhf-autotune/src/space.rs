//! YAML search spaces.
//!
//! Top-level keys starting with `condition` describe conditions; every other key is a
//! hyperparameter with a `type` of `float`, `int` or `cate`:
//!
//! ```yaml
//! train.optimizer.lr: {type: float, lower: 0.001, upper: 0.5, log: true}
//! model.type: {type: cate, choices: [gcn, gat]}
//! model.heads: {type: int, lower: 1, upper: 8}
//! condition1: {type: equal, child: model.heads, parent: model.type, value: gat}
//! ```
//!
//! A hyperparameter is active when every condition naming it as child holds and the
//! parents involved are active themselves.

use crate::config::{Configuration, ParamValue};
use crate::error::{AutotuneError, AutotuneResult};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum Hyperparameter {
    Float { lower: f64, upper: f64, log: bool, default_value: Option<f64> },
    Int { lower: i64, upper: i64, log: bool, default_value: Option<i64> },
    Categorical { choices: Vec<ParamValue>, default_value: Option<ParamValue> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equal { child: String, parent: String, value: ParamValue },
    NotEqual { child: String, parent: String, value: ParamValue },
    Less { child: String, parent: String, value: ParamValue },
    Greater { child: String, parent: String, value: ParamValue },
    In { child: String, parent: String, values: Vec<ParamValue> },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

impl Condition {
    /// The hyperparameter this condition activates.
    #[must_use]
    pub fn child(&self) -> &str {
        match self {
            Self::Equal { child, .. }
            | Self::NotEqual { child, .. }
            | Self::Less { child, .. }
            | Self::Greater { child, .. }
            | Self::In { child, .. } => child,
            Self::And(a, _) | Self::Or(a, _) => a.child(),
        }
    }

    fn collect_parents<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Self::Equal { parent, .. }
            | Self::NotEqual { parent, .. }
            | Self::Less { parent, .. }
            | Self::Greater { parent, .. }
            | Self::In { parent, .. } => {
                out.insert(parent);
            }
            Self::And(a, b) | Self::Or(a, b) => {
                a.collect_parents(out);
                b.collect_parents(out);
            }
        }
    }

    #[must_use]
    pub fn parents(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_parents(&mut out);
        out
    }

    /// Evaluates against the values sampled so far; an inactive parent fails the test.
    #[must_use]
    pub fn holds(&self, config: &Configuration) -> bool {
        use std::cmp::Ordering;
        match self {
            Self::Equal { parent, value, .. } => config.get(parent).is_some_and(|v| v.loosely_equals(value)),
            Self::NotEqual { parent, value, .. } => config.get(parent).is_some_and(|v| !v.loosely_equals(value)),
            Self::Less { parent, value, .. } => {
                config.get(parent).is_some_and(|v| v.compare(value) == Some(Ordering::Less))
            }
            Self::Greater { parent, value, .. } => {
                config.get(parent).is_some_and(|v| v.compare(value) == Some(Ordering::Greater))
            }
            Self::In { parent, values, .. } => {
                config.get(parent).is_some_and(|v| values.iter().any(|x| v.loosely_equals(x)))
            }
            Self::And(a, b) => a.holds(config) && b.holds(config),
            Self::Or(a, b) => a.holds(config) || b.holds(config),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFloat {
    lower: f64,
    upper: f64,
    #[serde(default)]
    log: bool,
    default_value: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInt {
    lower: i64,
    upper: i64,
    #[serde(default)]
    log: bool,
    default_value: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCategorical {
    choices: Vec<ParamValue>,
    default_value: Option<ParamValue>,
}

/// Hyperparameters in file order plus their conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchSpace {
    hyperparameters: Vec<(String, Hyperparameter)>,
    conditions: Vec<Condition>,
}

impl SearchSpace {
    pub fn from_yaml_file(path: &Path) -> AutotuneResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let space = Self::from_yaml_str(&text)?;
        info!(
            path = %path.display(),
            hyperparameters = space.hyperparameters.len(),
            conditions = space.conditions.len(),
            "Loaded search space"
        );
        Ok(space)
    }

    pub fn from_yaml_str(text: &str) -> AutotuneResult<Self> {
        let raw: Mapping = serde_yaml::from_str(text)?;
        let mut space = Self::default();
        let mut raw_conditions = Vec::new();

        for (key, value) in raw {
            let name = key
                .as_str()
                .ok_or_else(|| AutotuneError::InvalidSpace(format!("non-string key {key:?}")))?
                .to_string();
            if name.starts_with("condition") {
                raw_conditions.push(value);
            } else {
                let hp = parse_hyperparameter(&name, value)?;
                space.push(name, hp)?;
            }
        }
        for value in &raw_conditions {
            let condition = parse_condition(value)?;
            space.add_condition(condition)?;
        }
        space.order()?;
        Ok(space)
    }

    /// Adds a hyperparameter after validating its bounds.
    pub fn push(&mut self, name: String, hp: Hyperparameter) -> AutotuneResult<()> {
        validate(&name, &hp)?;
        if self.get(&name).is_some() {
            return Err(AutotuneError::InvalidSpace(format!("duplicate hyperparameter '{name}'")));
        }
        self.hyperparameters.push((name, hp));
        Ok(())
    }

    /// Adds a condition; every hyperparameter it names must exist and conjunctions must
    /// share a child.
    pub fn add_condition(&mut self, condition: Condition) -> AutotuneResult<()> {
        self.check_condition(&condition)?;
        self.conditions.push(condition);
        Ok(())
    }

    fn check_condition(&self, condition: &Condition) -> AutotuneResult<()> {
        match condition {
            Condition::And(a, b) | Condition::Or(a, b) => {
                self.check_condition(a)?;
                self.check_condition(b)?;
                if a.child() != b.child() {
                    return Err(AutotuneError::InvalidSpace(format!(
                        "conjunction mixes children '{}' and '{}'",
                        a.child(),
                        b.child()
                    )));
                }
            }
            _ => {
                for name in std::iter::once(condition.child()).chain(condition.parents()) {
                    if self.get(name).is_none() {
                        return Err(AutotuneError::UnknownHyperparameter(name.to_string()));
                    }
                }
                if condition.parents().contains(condition.child()) {
                    return Err(AutotuneError::Cycle(condition.child().to_string()));
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Hyperparameter> {
        self.hyperparameters.iter().find(|(n, _)| n == name).map(|(_, hp)| hp)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.hyperparameters.iter().map(|(n, _)| n.as_str()).collect()
    }

    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hyperparameters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hyperparameters.is_empty()
    }

    /// Hyperparameter names with every parent ahead of its children.
    pub fn order(&self) -> AutotuneResult<Vec<&str>> {
        let mut parents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for condition in &self.conditions {
            parents.entry(condition.child()).or_default().extend(condition.parents());
        }

        let mut ordered: Vec<&str> = Vec::with_capacity(self.len());
        let mut placed: BTreeSet<&str> = BTreeSet::new();
        while ordered.len() < self.len() {
            let ready: Vec<&str> = self
                .names()
                .into_iter()
                .filter(|n| !placed.contains(n))
                .filter(|n| parents.get(n).is_none_or(|ps| ps.iter().all(|p| placed.contains(p))))
                .collect();
            if ready.is_empty() {
                let stuck = self.names().into_iter().find(|n| !placed.contains(n)).unwrap_or_default();
                return Err(AutotuneError::Cycle(stuck.to_string()));
            }
            for name in ready {
                placed.insert(name);
                ordered.push(name);
            }
        }
        Ok(ordered)
    }

    fn is_active(&self, name: &str, config: &Configuration) -> bool {
        self.conditions.iter().filter(|c| c.child() == name).all(|c| c.holds(config))
    }

    /// Draws one configuration; inactive hyperparameters are left out.
    pub fn sample_configuration<R: Rng + ?Sized>(&self, rng: &mut R) -> AutotuneResult<Configuration> {
        let mut config = Configuration::new();
        for name in self.order()? {
            if !self.is_active(name, &config) {
                debug!(name, "Hyperparameter inactive");
                continue;
            }
            let Some(hp) = self.get(name) else { continue };
            config.insert(name.to_string(), sample_value(hp, rng));
        }
        Ok(config)
    }

    /// Default values of the active hyperparameters; the lower bound or first choice
    /// stands in where no default is given.
    pub fn default_configuration(&self) -> AutotuneResult<Configuration> {
        let mut config = Configuration::new();
        for name in self.order()? {
            if !self.is_active(name, &config) {
                continue;
            }
            let Some(hp) = self.get(name) else { continue };
            let value = match hp {
                Hyperparameter::Float { lower, default_value, .. } => ParamValue::Float(default_value.unwrap_or(*lower)),
                Hyperparameter::Int { lower, default_value, .. } => ParamValue::Int(default_value.unwrap_or(*lower)),
                Hyperparameter::Categorical { choices, default_value } => {
                    match default_value.clone().or_else(|| choices.first().cloned()) {
                        Some(v) => v,
                        None => continue,
                    }
                }
            };
            config.insert(name.to_string(), value);
        }
        Ok(config)
    }
}

fn sample_value<R: Rng + ?Sized>(hp: &Hyperparameter, rng: &mut R) -> ParamValue {
    match hp {
        Hyperparameter::Float { lower, upper, log, .. } => {
            if lower >= upper {
                return ParamValue::Float(*lower);
            }
            if *log {
                ParamValue::Float(rng.gen_range(lower.ln()..upper.ln()).exp().clamp(*lower, *upper))
            } else {
                ParamValue::Float(rng.gen_range(*lower..*upper))
            }
        }
        Hyperparameter::Int { lower, upper, log, .. } => {
            if *log && lower < upper {
                let drawn = rng.gen_range((*lower as f64).ln()..(*upper as f64).ln()).exp().round() as i64;
                ParamValue::Int(drawn.clamp(*lower, *upper))
            } else {
                ParamValue::Int(rng.gen_range(*lower..=*upper))
            }
        }
        Hyperparameter::Categorical { choices, .. } => {
            choices.choose(rng).cloned().unwrap_or(ParamValue::Text(String::new()))
        }
    }
}

fn validate(name: &str, hp: &Hyperparameter) -> AutotuneResult<()> {
    let bad = |msg: String| Err(AutotuneError::InvalidSpace(format!("{name}: {msg}")));
    match hp {
        Hyperparameter::Float { lower, upper, log, default_value } => {
            if lower > upper {
                return bad(format!("lower {lower} exceeds upper {upper}"));
            }
            if *log && *lower <= 0.0 {
                return bad("log scale needs a positive lower bound".to_string());
            }
            if let Some(d) = default_value
                && !(lower..=upper).contains(&d)
            {
                return bad(format!("default {d} outside [{lower}, {upper}]"));
            }
        }
        Hyperparameter::Int { lower, upper, log, default_value } => {
            if lower > upper {
                return bad(format!("lower {lower} exceeds upper {upper}"));
            }
            if *log && *lower <= 0 {
                return bad("log scale needs a positive lower bound".to_string());
            }
            if let Some(d) = default_value
                && !(lower..=upper).contains(&d)
            {
                return bad(format!("default {d} outside [{lower}, {upper}]"));
            }
        }
        Hyperparameter::Categorical { choices, default_value } => {
            if choices.is_empty() {
                return bad("no choices".to_string());
            }
            if let Some(d) = default_value
                && !choices.contains(d)
            {
                return bad(format!("default {d} is not a choice"));
            }
        }
    }
    Ok(())
}

fn parse_hyperparameter(name: &str, value: Value) -> AutotuneResult<Hyperparameter> {
    let Value::Mapping(mut map) = value else {
        return Err(AutotuneError::InvalidSpace(format!("{name}: expected a mapping")));
    };
    let kind = map
        .remove("type")
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| AutotuneError::InvalidSpace(format!("{name}: missing 'type'")))?;
    let body = Value::Mapping(map);

    match kind.as_str() {
        "float" => {
            let raw: RawFloat = serde_yaml::from_value(body)?;
            Ok(Hyperparameter::Float { lower: raw.lower, upper: raw.upper, log: raw.log, default_value: raw.default_value })
        }
        "int" => {
            let raw: RawInt = serde_yaml::from_value(body)?;
            Ok(Hyperparameter::Int { lower: raw.lower, upper: raw.upper, log: raw.log, default_value: raw.default_value })
        }
        "cate" => {
            let raw: RawCategorical = serde_yaml::from_value(body)?;
            Ok(Hyperparameter::Categorical { choices: raw.choices, default_value: raw.default_value })
        }
        _ => Err(AutotuneError::UnsupportedType { name: name.to_string(), kind }),
    }
}

fn field<'a>(map: &'a Mapping, key: &str) -> AutotuneResult<&'a Value> {
    map.get(key).ok_or_else(|| AutotuneError::InvalidSpace(format!("condition without '{key}'")))
}

fn name_field(map: &Mapping, key: &str) -> AutotuneResult<String> {
    field(map, key)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| AutotuneError::InvalidSpace(format!("condition '{key}' must name a hyperparameter")))
}

fn parse_condition(value: &Value) -> AutotuneResult<Condition> {
    let map = value
        .as_mapping()
        .ok_or_else(|| AutotuneError::InvalidSpace("condition must be a mapping".to_string()))?;
    let kind = field(map, "type")?
        .as_str()
        .ok_or_else(|| AutotuneError::InvalidSpace("condition 'type' must be a string".to_string()))?;

    let scalar = || -> AutotuneResult<(String, String, ParamValue)> {
        let value: ParamValue = serde_yaml::from_value(field(map, "value")?.clone())?;
        Ok((name_field(map, "child")?, name_field(map, "parent")?, value))
    };

    let condition = match kind {
        "equal" => {
            let (child, parent, value) = scalar()?;
            Condition::Equal { child, parent, value }
        }
        "not_equal" => {
            let (child, parent, value) = scalar()?;
            Condition::NotEqual { child, parent, value }
        }
        "less" => {
            let (child, parent, value) = scalar()?;
            Condition::Less { child, parent, value }
        }
        "greater" => {
            let (child, parent, value) = scalar()?;
            Condition::Greater { child, parent, value }
        }
        "in" => {
            let values: Vec<ParamValue> = serde_yaml::from_value(field(map, "values")?.clone())?;
            Condition::In { child: name_field(map, "child")?, parent: name_field(map, "parent")?, values }
        }
        "and" | "or" => {
            let a = Box::new(parse_condition(field(map, "child")?)?);
            let b = Box::new(parse_condition(field(map, "parent")?)?);
            if kind == "and" { Condition::And(a, b) } else { Condition::Or(a, b) }
        }
        other => return Err(AutotuneError::UnknownCondition(other.to_string())),
    };
    Ok(condition)
}
