//! Canned responses for commands that must not reach the hardware.
//!
//! Empty by default: the bridge is pass-through only unless the
//! configuration lists `[[bridge.intercept]]` entries.

use sem_server::config::{ConfigError, InterceptEntry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptRule {
    pub opcode: u8,
    pub sub_code: Option<u8>,
    pub response: Vec<u8>,
    pub label: String,
}

impl InterceptRule {
    fn matches(&self, cdb: &[u8]) -> bool {
        cdb.first() == Some(&self.opcode)
            && self.sub_code.map_or(true, |sub| cdb.get(1) == Some(&sub))
    }
}

#[derive(Debug, Clone, Default)]
pub struct InterceptionPolicy {
    rules: Vec<InterceptRule>,
}

impl InterceptionPolicy {
    pub fn pass_through() -> Self {
        Self::default()
    }

    /// Builds the policy from configuration entries.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidInterceptResponse`] if an entry's response is
    /// not valid hex.
    pub fn from_config(entries: &[InterceptEntry]) -> Result<Self, ConfigError> {
        let rules = entries
            .iter()
            .map(|entry| {
                Ok(InterceptRule {
                    opcode: entry.opcode,
                    sub_code: entry.sub_code,
                    response: entry.response_bytes()?,
                    label: entry.label.clone(),
                })
            })
            .collect::<Result<_, ConfigError>>()?;
        Ok(Self { rules })
    }

    /// First rule matching `cdb`, in configuration order.
    pub fn lookup(&self, cdb: &[u8]) -> Option<&InterceptRule> {
        self.rules.iter().find(|rule| rule.matches(cdb))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(opcode: u8, sub_code: Option<u8>, response: &str) -> InterceptEntry {
        InterceptEntry {
            opcode,
            sub_code,
            response: response.to_string(),
            label: format!("{opcode:02X}"),
        }
    }

    #[test]
    fn test_default_policy_intercepts_nothing() {
        let policy = InterceptionPolicy::pass_through();
        assert!(policy.lookup(&[0xC5, 0x01]).is_none());
        assert!(policy.is_empty());
    }

    #[test]
    fn test_sub_code_must_match_when_given() {
        let policy = InterceptionPolicy::from_config(&[entry(0xC5, Some(0x01), "00 00")]).unwrap();
        assert!(policy.lookup(&[0xC5, 0x01, 0x00]).is_some());
        assert!(policy.lookup(&[0xC5, 0x09]).is_none());
        assert!(policy.lookup(&[0xC5]).is_none());
    }

    #[test]
    fn test_missing_sub_code_matches_whole_opcode() {
        let policy = InterceptionPolicy::from_config(&[entry(0xC7, None, "FF")]).unwrap();
        let rule = policy.lookup(&[0xC7, 0x42]).unwrap();
        assert_eq!(rule.response, vec![0xFF]);
    }

    #[test]
    fn test_first_configured_rule_wins() {
        let policy = InterceptionPolicy::from_config(&[
            entry(0xC7, Some(0x01), "01"),
            entry(0xC7, None, "02"),
        ])
        .unwrap();
        assert_eq!(policy.lookup(&[0xC7, 0x01]).unwrap().response, vec![0x01]);
        assert_eq!(policy.lookup(&[0xC7, 0x02]).unwrap().response, vec![0x02]);
        assert_eq!(policy.len(), 2);
    }

    #[test]
    fn test_bad_hex_fails_policy_construction() {
        assert!(InterceptionPolicy::from_config(&[entry(0xC5, None, "zz")]).is_err());
    }
}
