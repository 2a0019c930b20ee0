use crate::envelope::{CommandKind, DEVADDR_LEN};

/// Smallest MAC-command octet string accepted for queueing.
pub const MACCMD_MIN_OCTETS: usize = 2;
/// Largest MAC-command octet string accepted for queueing.
pub const MACCMD_MAX_OCTETS: usize = 12;

/// Submission fields, named as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    DevAddr,
    Downlink,
    MacCommand,
}

impl Field {
    pub const fn as_str(self) -> &'static str {
        match self {
            Field::DevAddr => "DevAddr",
            Field::Downlink => "Downlink",
            Field::MacCommand => "MACCommand",
        }
    }

    /// Payload field carried by a submission of `kind`.
    pub const fn payload_of(kind: CommandKind) -> Self {
        match kind {
            CommandKind::RawDownlink => Field::Downlink,
            CommandKind::MacCommand => Field::MacCommand,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Field must be present (it may still be empty).
    Required,
    NonEmpty,
    /// Exactly `n` octets of hex.
    HexLength(usize),
    /// Between `min` and `max` octets of hex, inclusive.
    HexLengthRange(usize, usize),
}

impl Rule {
    fn check(self, value: Option<&str>) -> bool {
        match (self, value) {
            (Rule::Required, v) => v.is_some(),
            // presence is Required's job; absent values pass the other rules
            (_, None) => true,
            (Rule::NonEmpty, Some(v)) => !v.is_empty(),
            (Rule::HexLength(n), Some(v)) => hex_octets(v) == Some(n),
            (Rule::HexLengthRange(min, max), Some(v)) => {
                hex_octets(v).is_some_and(|n| (min..=max).contains(&n))
            }
        }
    }
}

/// Octet count of a hex string, or None if it is not whole octets of hex.
fn hex_octets(s: &str) -> Option<usize> {
    if s.len() % 2 != 0 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(s.len() / 2)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRule {
    pub field: Field,
    pub rule: Rule,
}

const fn rule(field: Field, rule: Rule) -> FieldRule {
    FieldRule { field, rule }
}

pub const DOWNLINK_RULES: &[FieldRule] = &[
    rule(Field::DevAddr, Rule::Required),
    rule(Field::Downlink, Rule::Required),
    rule(Field::DevAddr, Rule::HexLength(DEVADDR_LEN)),
    rule(Field::Downlink, Rule::NonEmpty),
];

pub const MACCOMMAND_RULES: &[FieldRule] = &[
    rule(Field::DevAddr, Rule::Required),
    rule(Field::MacCommand, Rule::Required),
    rule(Field::DevAddr, Rule::HexLength(DEVADDR_LEN)),
    rule(
        Field::MacCommand,
        Rule::HexLengthRange(MACCMD_MIN_OCTETS, MACCMD_MAX_OCTETS),
    ),
];

pub const fn rules_for(kind: CommandKind) -> &'static [FieldRule] {
    match kind {
        CommandKind::RawDownlink => DOWNLINK_RULES,
        CommandKind::MacCommand => MACCOMMAND_RULES,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{} required", .0.as_str())]
    MissingField(Field),
    #[error("invalid DevAddr")]
    InvalidDeviceAddress,
    #[error("invalid {}", .0.as_str())]
    InvalidPayload(Field),
}

/// Run the rule set for `kind` in order; the first failing rule decides the
/// error. On success returns the (present) address and payload.
pub fn validate_fields<'a>(
    kind: CommandKind,
    dev_addr: Option<&'a str>,
    payload: Option<&'a str>,
) -> Result<(&'a str, &'a str), ValidationError> {
    for r in rules_for(kind) {
        let value = match r.field {
            Field::DevAddr => dev_addr,
            Field::Downlink | Field::MacCommand => payload,
        };
        if r.rule.check(value) {
            continue;
        }
        return Err(match (r.rule, r.field) {
            (Rule::Required, field) => ValidationError::MissingField(field),
            (_, Field::DevAddr) => ValidationError::InvalidDeviceAddress,
            (_, field) => ValidationError::InvalidPayload(field),
        });
    }
    match (dev_addr, payload) {
        (Some(addr), Some(payload)) => Ok((addr, payload)),
        (None, _) => Err(ValidationError::MissingField(Field::DevAddr)),
        (_, None) => Err(ValidationError::MissingField(Field::payload_of(kind))),
    }
}

/// Structural check of a submission with both fields present.
pub fn validate(kind: CommandKind, dev_addr: &str, payload: &str) -> Result<(), ValidationError> {
    validate_fields(kind, Some(dev_addr), Some(payload)).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_downlink_rules() {
        assert_eq!(validate(CommandKind::RawDownlink, "0000ABCD", "deadbeef"), Ok(()));
        assert_eq!(
            validate(CommandKind::RawDownlink, "0000ABCD", ""),
            Err(ValidationError::InvalidPayload(Field::Downlink))
        );
        // raw payloads are opaque
        assert_eq!(validate(CommandKind::RawDownlink, "0000ABCD", "hello"), Ok(()));
    }

    #[test]
    fn mac_command_length_bounds() {
        let k = CommandKind::MacCommand;
        assert!(validate(k, "10FC2942", "0203").is_ok());
        assert!(validate(k, "10FC2942", &"02".repeat(12)).is_ok());
        assert_eq!(
            validate(k, "10FC2942", "01"),
            Err(ValidationError::InvalidPayload(Field::MacCommand))
        );
        assert_eq!(
            validate(k, "10FC2942", &"02".repeat(13)),
            Err(ValidationError::InvalidPayload(Field::MacCommand))
        );
        assert_eq!(
            validate(k, "10FC2942", "020"),
            Err(ValidationError::InvalidPayload(Field::MacCommand))
        );
        assert_eq!(
            validate(k, "10FC2942", "02xx"),
            Err(ValidationError::InvalidPayload(Field::MacCommand))
        );
    }

    #[test]
    fn device_address_checked_before_payload() {
        for kind in [CommandKind::RawDownlink, CommandKind::MacCommand] {
            for addr in ["", "10FC294", "10FC29421", "10FC294Z"] {
                assert_eq!(
                    validate(kind, addr, "01"),
                    Err(ValidationError::InvalidDeviceAddress),
                    "{kind} {addr:?}"
                );
            }
        }
    }

    #[test]
    fn missing_fields_win_over_invalid_ones() {
        assert_eq!(
            validate_fields(CommandKind::MacCommand, None, None),
            Err(ValidationError::MissingField(Field::DevAddr))
        );
        assert_eq!(
            validate_fields(CommandKind::MacCommand, Some("bad"), None),
            Err(ValidationError::MissingField(Field::MacCommand))
        );
        assert_eq!(
            validate_fields(CommandKind::RawDownlink, Some("bad"), None),
            Err(ValidationError::MissingField(Field::Downlink))
        );
        assert_eq!(
            ValidationError::MissingField(Field::MacCommand).to_string(),
            "MACCommand required"
        );
        assert_eq!(
            ValidationError::InvalidPayload(Field::Downlink).to_string(),
            "invalid Downlink"
        );
    }
}
