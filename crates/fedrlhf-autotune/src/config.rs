//! Trial configurations: values, command-line rendering and compact names.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A sampled or logged hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Bool(_) | Self::Text(_) => None,
        }
    }

    /// Numeric values compare numerically, text lexically; mixed kinds are unordered.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            _ => self.as_f64()?.partial_cmp(&other.as_f64()?),
        }
    }

    /// Equality across int and float (`1 == 1.0`).
    #[must_use]
    pub fn loosely_equals(&self, other: &Self) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{v:.1}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Config node name (`train.optimizer.lr`) to value.
pub type Configuration = BTreeMap<String, ParamValue>;

/// `[k1, v1, k2, v2, ...]`, ready to be merged as `--opt` overrides.
#[must_use]
pub fn config_to_cmd_args(config: &Configuration) -> Vec<String> {
    config.iter().flat_map(|(k, v)| [k.clone(), v.to_string()]).collect()
}

/// `lr_0.01_type_gcn`: the last segment of every key followed by its value.
#[must_use]
pub fn config_to_str(config: &Configuration) -> String {
    config
        .iter()
        .flat_map(|(k, v)| {
            let short = k.rsplit_once('.').map_or(k.as_str(), |(_, tail)| tail);
            [short.to_string(), v.to_string()]
        })
        .collect::<Vec<_>>()
        .join("_")
}

/// Parses a Python dict literal with scalar values, as printed into HPO logs:
/// `{'train.optimizer.lr': 0.01, 'model.type': 'gcn', 'flag': True}`.
pub fn parse_python_dict(text: &str) -> Result<Configuration, String> {
    let mut parser = LiteralParser { chars: text.trim().chars().collect(), pos: 0 };
    parser.expect('{')?;
    let mut config = Configuration::new();

    parser.skip_ws();
    if parser.eat('}') {
        return parser.finish(config);
    }
    loop {
        parser.skip_ws();
        let key = parser.string()?;
        parser.skip_ws();
        parser.expect(':')?;
        parser.skip_ws();
        let value = parser.value()?;
        config.insert(key, value);
        parser.skip_ws();
        if parser.eat(',') {
            parser.skip_ws();
            if parser.eat('}') {
                break;
            }
        } else {
            parser.expect('}')?;
            break;
        }
    }
    parser.finish(config)
}

struct LiteralParser {
    chars: Vec<char>,
    pos: usize,
}

impl LiteralParser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), String> {
        if self.eat(c) { Ok(()) } else { Err(format!("expected '{c}' at offset {}", self.pos)) }
    }

    fn finish(&self, config: Configuration) -> Result<Configuration, String> {
        if self.pos == self.chars.len() {
            Ok(config)
        } else {
            Err(format!("trailing text at offset {}", self.pos))
        }
    }

    fn string(&mut self) -> Result<String, String> {
        let quote = match self.peek() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(format!("expected a quoted string at offset {}", self.pos)),
        };
        self.pos += 1;
        let mut out = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '\\' => {
                    if let Some(next) = self.peek() {
                        out.push(next);
                        self.pos += 1;
                    }
                }
                c if c == quote => return Ok(out),
                c => out.push(c),
            }
        }
        Err("unterminated string".to_string())
    }

    fn value(&mut self) -> Result<ParamValue, String> {
        if matches!(self.peek(), Some('\'' | '"')) {
            return self.string().map(ParamValue::Text);
        }
        let start = self.pos;
        while self.peek().is_some_and(|c| !matches!(c, ',' | '}') && !c.is_whitespace()) {
            self.pos += 1;
        }
        let token: String = self.chars[start..self.pos].iter().collect();
        match token.as_str() {
            "True" => Ok(ParamValue::Bool(true)),
            "False" => Ok(ParamValue::Bool(false)),
            _ => token
                .parse::<i64>()
                .map(ParamValue::Int)
                .or_else(|_| token.parse::<f64>().map(ParamValue::Float))
                .map_err(|_| format!("unsupported literal '{token}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Configuration {
        Configuration::from([
            ("train.optimizer.lr".to_string(), ParamValue::Float(0.01)),
            ("model.type".to_string(), ParamValue::from("gcn")),
            ("federate.total_round_num".to_string(), ParamValue::Int(10)),
        ])
    }

    #[test]
    fn test_cmd_args_alternate_keys_and_values() {
        assert_eq!(
            config_to_cmd_args(&sample()),
            vec!["federate.total_round_num", "10", "model.type", "gcn", "train.optimizer.lr", "0.01"]
        );
    }

    #[test]
    fn test_config_to_str_uses_last_segment() {
        assert_eq!(config_to_str(&sample()), "total_round_num_10_type_gcn_lr_0.01");
        let bare = Configuration::from([("seed".to_string(), ParamValue::Float(2.0))]);
        assert_eq!(config_to_str(&bare), "seed_2.0");
    }

    #[test]
    fn test_parse_python_dict() {
        let parsed =
            parse_python_dict("{'train.optimizer.lr': 0.01, 'model.type': \"gcn\", 'federate.total_round_num': 10}")
                .unwrap();
        assert_eq!(parsed, sample());

        let flags = parse_python_dict("{'a': True, 'b': -3, 'c': 1e-05,}").unwrap();
        assert_eq!(flags["a"], ParamValue::Bool(true));
        assert_eq!(flags["b"], ParamValue::Int(-3));
        assert_eq!(flags["c"], ParamValue::Float(1e-5));
        assert!(parse_python_dict("{}").unwrap().is_empty());
    }

    #[test]
    fn test_parse_python_dict_rejects_garbage() {
        assert!(parse_python_dict("{'a': None}").is_err());
        assert!(parse_python_dict("{'a' 1}").is_err());
        assert!(parse_python_dict("{'a': 1} extra").is_err());
        assert!(parse_python_dict("['a']").is_err());
    }

    #[test]
    fn test_loose_comparison() {
        assert!(ParamValue::Int(1).loosely_equals(&ParamValue::Float(1.0)));
        assert_eq!(ParamValue::from("a").compare(&ParamValue::Int(1)), None);
        assert_eq!(ParamValue::Float(0.5).to_string(), "0.5");
        assert_eq!(ParamValue::Bool(false).to_string(), "False");
    }
}
