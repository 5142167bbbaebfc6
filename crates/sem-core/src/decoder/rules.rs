//! The declarative rule table that drives command classification.
//!
//! The table is an external JSON resource keyed by opcode:
//!
//! ```json
//! {
//!   "groups": {
//!     "0x02": {
//!       "name": "Gun",
//!       "matches": [
//!         { "match": { "1": "0x01", "4": "0x07" }, "name": "SetHT", "level": "INFO" }
//!       ]
//!     }
//!   }
//! }
//! ```
//!
//! Keys and byte values are strings in the resource.  They are parsed exactly
//! once, at load time, into typed `(offset, expected byte)` predicates so the
//! decoder never touches strings on the hot path.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised while loading or parsing a rule table.
#[derive(Debug, Error)]
pub enum RuleTableError {
    /// The resource file could not be read.
    #[error("I/O error reading rule table at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The resource is not valid JSON or does not have the expected shape.
    #[error("failed to parse rule table JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A group key is not a hex byte such as `"0xC6"`.
    #[error("invalid opcode key: {0:?}")]
    InvalidOpcode(String),

    /// A predicate offset is not a decimal integer.
    #[error("group {group}: invalid byte offset {value:?}")]
    InvalidOffset { group: String, value: String },

    /// A predicate value is not a hex byte.
    #[error("group {group}: invalid expected byte {value:?}")]
    InvalidByte { group: String, value: String },

    /// A rule declares a severity the decoder does not know.
    #[error("unknown severity level: {0:?}")]
    InvalidLevel(String),
}

/// Severity attached to a classified command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    /// The tag written into session log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DBG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = RuleTableError;

    fn from_str(s: &str) -> Result<Self, RuleTableError> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" | "DBG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "ERR" | "ERROR" => Ok(Self::Error),
            _ => Err(RuleTableError::InvalidLevel(s.to_string())),
        }
    }
}

/// One classification rule: every predicate must hold for the rule to match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub predicates: Vec<(usize, u8)>,
    pub name: String,
    pub severity: Severity,
}

impl Rule {
    /// Returns `true` when every `(offset, byte)` predicate holds for `cdb`.
    ///
    /// An offset past the end of the CDB is a non-match, never an error.
    pub fn matches(&self, cdb: &[u8]) -> bool {
        self.predicates
            .iter()
            .all(|&(offset, expected)| cdb.get(offset) == Some(&expected))
    }
}

/// All rules registered for one opcode, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleGroup {
    pub name: String,
    pub rules: Vec<Rule>,
}

impl RuleGroup {
    /// Returns the first rule in declaration order that matches `cdb`.
    pub fn first_match(&self, cdb: &[u8]) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.matches(cdb))
    }
}

/// The parsed rule table: opcode → group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTable {
    groups: HashMap<u8, RuleGroup>,
}

// ── Raw JSON shape ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawTable {
    #[serde(default)]
    groups: HashMap<String, RawGroup>,
}

#[derive(Deserialize)]
struct RawGroup {
    name: Option<String>,
    #[serde(default)]
    matches: Vec<RawRule>,
}

#[derive(Deserialize)]
struct RawRule {
    #[serde(default, rename = "match")]
    predicates: BTreeMap<String, String>,
    name: Option<String>,
    level: Option<String>,
}

impl RuleTable {
    /// A table with no groups.  Every decode against it is `Unknown`.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parses a rule table from its JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`RuleTableError`] if the JSON is malformed or any key, offset,
    /// byte value or level cannot be parsed.
    pub fn from_json_str(json: &str) -> Result<Self, RuleTableError> {
        let raw: RawTable = serde_json::from_str(json)?;
        let mut groups = HashMap::with_capacity(raw.groups.len());

        for (key, raw_group) in raw.groups {
            let opcode =
                parse_hex_byte(&key).ok_or_else(|| RuleTableError::InvalidOpcode(key.clone()))?;
            let name = raw_group.name.unwrap_or_else(|| "Unknown".to_string());

            let mut rules = Vec::with_capacity(raw_group.matches.len());
            for raw_rule in raw_group.matches {
                let mut predicates = Vec::with_capacity(raw_rule.predicates.len());
                for (offset, value) in raw_rule.predicates {
                    let offset: usize =
                        offset.trim().parse().map_err(|_| RuleTableError::InvalidOffset {
                            group: name.clone(),
                            value: offset.clone(),
                        })?;
                    let byte = parse_hex_byte(&value).ok_or_else(|| RuleTableError::InvalidByte {
                        group: name.clone(),
                        value: value.clone(),
                    })?;
                    predicates.push((offset, byte));
                }
                let severity = match raw_rule.level {
                    Some(level) => level.parse()?,
                    None => Severity::Info,
                };
                rules.push(Rule {
                    predicates,
                    name: raw_rule.name.unwrap_or_else(|| "UnknownGroupCmd".to_string()),
                    severity,
                });
            }

            groups.insert(opcode, RuleGroup { name, rules });
        }

        Ok(Self { groups })
    }

    /// Loads and parses the rule table at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RuleTableError::Io`] if the file cannot be read, or a parse
    /// error if its content is invalid.
    pub fn load(path: &Path) -> Result<Self, RuleTableError> {
        let json = std::fs::read_to_string(path).map_err(|source| RuleTableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Loads the rule table at `path`, degrading to an empty table when the
    /// resource is missing or invalid.  Startup never fails because of it.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(table) => {
                info!(
                    "loaded {} rule groups from {}",
                    table.groups.len(),
                    path.display()
                );
                table
            }
            Err(e) => {
                warn!("rule table unavailable, all commands decode as Unknown: {e}");
                Self::empty()
            }
        }
    }

    /// Returns the group registered for `opcode`.
    pub fn group(&self, opcode: u8) -> Option<&RuleGroup> {
        self.groups.get(&opcode)
    }

    /// Number of opcode groups in the table.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Parses `"0x1F"`, `"0X1f"` or `"1F"` into a byte.
fn parse_hex_byte(s: &str) -> Option<u8> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u8::from_str_radix(digits, 16).ok()
}
