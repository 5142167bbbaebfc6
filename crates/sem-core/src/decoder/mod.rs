//! Command decoder: classifies raw CDB bytes into a human-readable name and
//! a severity.
//!
//! Classification is purely table-driven (see [`rules`]).  The decoder never
//! guesses: an opcode absent from the table is reported as
//! `Unknown(0xNN)`, and a known opcode that no rule matches is reported as
//! `<Group>_Generic`.  Both are ordinary results at WARN severity, never
//! errors, for input of any length including zero.
//!
//! # Tunnelled commands
//!
//! Opcode [`TUNNEL_OPCODE`] (`0xFA`) carries another command block in its
//! outbound payload.  When decoding the command phase the inner bytes are
//! decoded once more and, if recognised, the result is labelled
//! `FA<InnerName>` with the inner severity.  The inner decode is given no
//! payload of its own, so a tunnel inside a tunnel unwraps exactly one level.
//! Responses to a tunnel command are labelled [`TUNNEL_RESPONSE_NAME`]
//! without further decoding; response bytes are not command blocks.

pub mod rules;

use std::sync::Arc;

pub use rules::{Rule, RuleGroup, RuleTable, RuleTableError, Severity};

/// Opcode of the generic tunnel command.
pub const TUNNEL_OPCODE: u8 = 0xFA;

/// Label given to every response of a tunnel command.
pub const TUNNEL_RESPONSE_NAME: &str = "FA_Response";

/// Name reported for a zero-length CDB.
pub const EMPTY_CDB_NAME: &str = "EmptyCDB";

/// Which half of a transaction is being decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The outbound command (logged as `CMD`).
    Command,
    /// The inbound response (logged as `RES`).
    Response,
}

/// How a [`Decoded`] result was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeKind {
    /// The CDB was empty.
    Empty,
    /// The opcode has no group in the rule table.
    Unknown,
    /// The opcode has a group but no rule matched.
    Generic,
    /// A rule matched.
    Matched,
    /// A tunnel command whose inner command was recognised, or a tunnel response.
    Tunnel,
}

/// Result of classifying a CDB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub name: String,
    pub severity: Severity,
    pub kind: DecodeKind,
}

impl Decoded {
    /// Returns `true` unless the CDB was empty, its opcode is unknown, or
    /// the table itself names it as unknown (unnamed groups and rules).
    pub fn is_recognised(&self) -> bool {
        !matches!(self.kind, DecodeKind::Empty | DecodeKind::Unknown)
            && !self.name.contains("Unknown")
    }
}

/// Table-driven command classifier.  Cheap to clone; the table is shared.
#[derive(Debug, Clone, Default)]
pub struct CommandDecoder {
    table: Arc<RuleTable>,
}

impl CommandDecoder {
    pub fn new(table: RuleTable) -> Self {
        Self {
            table: Arc::new(table),
        }
    }

    /// The rule table this decoder classifies against.
    pub fn table(&self) -> &RuleTable {
        &self.table
    }

    /// Classifies `cdb`.
    ///
    /// `inner` is the data that accompanies the command: the outbound payload
    /// in the command phase, or the response data in the response phase.  It
    /// is only consulted for tunnel commands.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sem_core::decoder::{CommandDecoder, Phase, RuleTable, Severity};
    ///
    /// let decoder = CommandDecoder::new(RuleTable::empty());
    /// let decoded = decoder.decode(&[0x42, 0x00], None, Phase::Command);
    /// assert_eq!(decoded.name, "Unknown(0x42)");
    /// assert_eq!(decoded.severity, Severity::Warn);
    /// ```
    pub fn decode(&self, cdb: &[u8], inner: Option<&[u8]>, phase: Phase) -> Decoded {
        let Some(&opcode) = cdb.first() else {
            return Decoded {
                name: EMPTY_CDB_NAME.to_string(),
                severity: Severity::Warn,
                kind: DecodeKind::Empty,
            };
        };

        let mut decoded = self.classify(opcode, cdb);

        if opcode == TUNNEL_OPCODE {
            match phase {
                Phase::Command => {
                    if let Some(inner) = inner.filter(|bytes| !bytes.is_empty()) {
                        // No payload for the inner decode: one level of unwrapping only.
                        let inner_decoded = self.decode(inner, None, Phase::Command);
                        if inner_decoded.is_recognised() {
                            decoded = Decoded {
                                name: format!("FA<{}>", inner_decoded.name),
                                severity: inner_decoded.severity,
                                kind: DecodeKind::Tunnel,
                            };
                        }
                    }
                }
                Phase::Response => {
                    decoded.name = TUNNEL_RESPONSE_NAME.to_string();
                    decoded.kind = DecodeKind::Tunnel;
                }
            }
        }

        decoded
    }

    fn classify(&self, opcode: u8, cdb: &[u8]) -> Decoded {
        let Some(group) = self.table.group(opcode) else {
            return Decoded {
                name: format!("Unknown(0x{opcode:02X})"),
                severity: Severity::Warn,
                kind: DecodeKind::Unknown,
            };
        };

        match group.first_match(cdb) {
            Some(rule) => Decoded {
                name: rule.name.clone(),
                severity: rule.severity,
                kind: DecodeKind::Matched,
            },
            None => Decoded {
                name: format!("{}_Generic", group.name),
                severity: Severity::Warn,
                kind: DecodeKind::Generic,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> CommandDecoder {
        let json = r#"{
            "groups": {
                "0x02": {
                    "name": "Gun",
                    "matches": [
                        { "match": { "1": "0x01", "4": "0x07" }, "name": "SetHT", "level": "INFO" },
                        { "match": { "1": "0x01", "4": "0x08", "8": "0x00" }, "name": "SetAccv", "level": "INFO" },
                        { "match": { "1": "0x01" }, "name": "GunWrite", "level": "DEBUG" }
                    ]
                },
                "0xFA": { "name": "Generic10", "matches": [] },
                "0xC6": {
                    "name": "GunRead",
                    "matches": [ { "match": { "1": "0x11" }, "name": "GetAccv", "level": "DEBUG" } ]
                }
            }
        }"#;
        CommandDecoder::new(RuleTable::from_json_str(json).unwrap())
    }

    #[test]
    fn test_empty_cdb_is_reported_not_raised() {
        let d = decoder().decode(&[], None, Phase::Command);
        assert_eq!(d.name, "EmptyCDB");
        assert_eq!(d.severity, Severity::Warn);
        assert_eq!(d.kind, DecodeKind::Empty);
    }

    #[test]
    fn test_unknown_opcode_uses_uppercase_hex() {
        let d = decoder().decode(&[0xab], None, Phase::Command);
        assert_eq!(d.name, "Unknown(0xAB)");
        assert_eq!(d.severity, Severity::Warn);
    }

    #[test]
    fn test_every_unknown_opcode_decodes_to_unknown_at_warn() {
        let decoder = decoder();
        for opcode in 0u8..=255 {
            if decoder.table().group(opcode).is_some() {
                continue;
            }
            for len in 1..=16 {
                let mut cdb = vec![0xEEu8; len];
                cdb[0] = opcode;
                let d = decoder.decode(&cdb, Some(&cdb), Phase::Command);
                assert_eq!(d.name, format!("Unknown(0x{opcode:02X})"));
                assert_eq!(d.severity, Severity::Warn);
            }
        }
    }

    #[test]
    fn test_first_declared_matching_rule_wins() {
        // Both SetHT and GunWrite match; SetHT is declared first.
        let cdb = [0x02, 0x01, 0x00, 0x00, 0x07, 0x40, 0x02, 0x00, 0x02, 0x01];
        let d = decoder().decode(&cdb, None, Phase::Command);
        assert_eq!(d.name, "SetHT");
        assert_eq!(d.severity, Severity::Info);
    }

    #[test]
    fn test_later_rule_matches_when_earlier_rule_fails() {
        let cdb = [0x02, 0x01, 0x00, 0x00, 0x05];
        let d = decoder().decode(&cdb, None, Phase::Command);
        assert_eq!(d.name, "GunWrite");
        assert_eq!(d.severity, Severity::Debug);
    }

    #[test]
    fn test_short_cdb_skips_rules_with_out_of_range_offsets() {
        // Offset 4 is out of range for a 3-byte CDB, so SetHT cannot match.
        let d = decoder().decode(&[0x02, 0x01, 0x00], None, Phase::Command);
        assert_eq!(d.name, "GunWrite");
    }

    #[test]
    fn test_known_group_without_match_is_generic_warn() {
        let d = decoder().decode(&[0x02, 0x05], None, Phase::Command);
        assert_eq!(d.name, "Gun_Generic");
        assert_eq!(d.severity, Severity::Warn);
        assert_eq!(d.kind, DecodeKind::Generic);
    }

    #[test]
    fn test_tunnel_command_takes_inner_name_and_severity() {
        let inner = [0xC6, 0x11, 0x00, 0x04];
        let d = decoder().decode(&[0xFA, 0x00], Some(&inner), Phase::Command);
        assert_eq!(d.name, "FA<GetAccv>");
        assert_eq!(d.severity, Severity::Debug);
        assert_eq!(d.kind, DecodeKind::Tunnel);
    }

    #[test]
    fn test_tunnel_with_unknown_inner_keeps_outer_name() {
        let d = decoder().decode(&[0xFA], Some(&[0x99, 0x00]), Phase::Command);
        assert_eq!(d.name, "Generic10_Generic");
    }

    #[test]
    fn test_tunnel_with_unnamed_inner_group_or_rule_keeps_outer_name() {
        // Arrange: a group without a name and a rule without a name.
        let table = RuleTable::from_json_str(
            r#"{"groups":{
                "0xFA":{"name":"Tunnel","matches":[]},
                "0x30":{"matches":[]},
                "0x31":{"name":"Aux","matches":[{"match":{"1":"0x01"}}]}
            }}"#,
        )
        .unwrap();
        let decoder = CommandDecoder::new(table);

        // Act
        let unnamed_group = decoder.decode(&[0xFA], Some(&[0x30, 0x00]), Phase::Command);
        let unnamed_rule = decoder.decode(&[0xFA], Some(&[0x31, 0x01]), Phase::Command);

        // Assert
        assert_eq!(unnamed_group.name, "Tunnel_Generic");
        assert_eq!(unnamed_rule.name, "Tunnel_Generic");
        assert!(!decoder.decode(&[0x31, 0x01], None, Phase::Command).is_recognised());
    }

    #[test]
    fn test_tunnel_without_payload_keeps_outer_name() {
        let d = decoder().decode(&[0xFA], None, Phase::Command);
        assert_eq!(d.name, "Generic10_Generic");
        let d = decoder().decode(&[0xFA], Some(&[]), Phase::Command);
        assert_eq!(d.name, "Generic10_Generic");
    }

    #[test]
    fn test_tunnel_in_tunnel_unwraps_exactly_one_level() {
        // The inner command is itself a tunnel; it is decoded without a
        // payload, so it never recurses into the innermost command.
        let inner = [0xFA, 0xC6, 0x11];
        let d = decoder().decode(&[0xFA], Some(&inner), Phase::Command);
        assert_eq!(d.name, "FA<Generic10_Generic>");
    }

    #[test]
    fn test_tunnel_response_is_labelled_without_decoding_payload() {
        let d = decoder().decode(&[0xFA], Some(&[0xC6, 0x11]), Phase::Response);
        assert_eq!(d.name, "FA_Response");
    }

    #[test]
    fn test_non_tunnel_response_uses_command_name() {
        let d = decoder().decode(&[0xC6, 0x11], Some(&[0x98, 0x3A]), Phase::Response);
        assert_eq!(d.name, "GetAccv");
    }

    #[test]
    fn test_decoder_with_empty_table_reports_unknown_for_tunnel() {
        let d = CommandDecoder::default().decode(&[0xFA], Some(&[0xC6]), Phase::Command);
        assert_eq!(d.name, "Unknown(0xFA)");
    }
}
