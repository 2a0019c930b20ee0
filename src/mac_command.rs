//! Downlink MAC-command decoding.
//!
//! A MAC-command octet string is a run of back-to-back fields, each a one
//! octet CID followed by a CID-specific number of parameter octets. The CID
//! table below is the only place that knows those widths; adding a command is
//! a table edit.

use serde::{Deserialize, Serialize};

/// One named parameter inside a MAC command, `width` octets long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamField {
    pub name: &'static str,
    pub width: usize,
}

const fn field(name: &'static str, width: usize) -> ParamField {
    ParamField { name, width }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLayout {
    /// Command carries no parameter octets.
    Empty,
    /// Fixed run of named fields; total length is the sum of their widths.
    Fields(&'static [ParamField]),
}

impl ParamLayout {
    pub const fn len(&self) -> usize {
        match *self {
            ParamLayout::Empty => 0,
            ParamLayout::Fields(fields) => {
                let mut total = 0;
                let mut i = 0;
                while i < fields.len() {
                    total += fields[i].width;
                    i += 1;
                }
                total
            }
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn fields(&self) -> &'static [ParamField] {
        match *self {
            ParamLayout::Empty => &[],
            ParamLayout::Fields(fields) => fields,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacCommandSpec {
    pub cid: u8,
    pub name: &'static str,
    pub layout: ParamLayout,
}

impl MacCommandSpec {
    pub const fn param_len(&self) -> usize {
        self.layout.len()
    }
}

pub const LINK_CHECK_ANS: u8 = 0x02;
pub const LINK_ADR_REQ: u8 = 0x03;
pub const DUTY_CYCLE_REQ: u8 = 0x04;
pub const RX_PARAM_SETUP_REQ: u8 = 0x05;
pub const DEV_STATUS_REQ: u8 = 0x06;
pub const NEW_CHANNEL_REQ: u8 = 0x07;
pub const RX_TIMING_SETUP_REQ: u8 = 0x08;
pub const TX_PARAM_SETUP_REQ: u8 = 0x09;
pub const DL_CHANNEL_REQ: u8 = 0x0A;
pub const DEVICE_TIME_ANS: u8 = 0x0D;

/// Network-server-to-device MAC commands (LoRaWAN 1.0.x).
pub const DOWNLINK_COMMANDS: &[MacCommandSpec] = &[
    MacCommandSpec {
        cid: LINK_CHECK_ANS,
        name: "LinkCheckAns",
        layout: ParamLayout::Fields(&[field("Margin", 1)]),
    },
    MacCommandSpec {
        cid: LINK_ADR_REQ,
        name: "LinkADRReq",
        layout: ParamLayout::Fields(&[
            field("DataRate_TXPower", 1),
            field("ChMask", 2),
            field("Redundancy", 1),
        ]),
    },
    MacCommandSpec {
        cid: DUTY_CYCLE_REQ,
        name: "DutyCycleReq",
        layout: ParamLayout::Fields(&[field("DutyCyclePL", 1)]),
    },
    MacCommandSpec {
        cid: RX_PARAM_SETUP_REQ,
        name: "RXParamSetupReq",
        layout: ParamLayout::Fields(&[field("DLSettings", 1), field("Frequency", 3)]),
    },
    MacCommandSpec {
        cid: DEV_STATUS_REQ,
        name: "DevStatusReq",
        layout: ParamLayout::Empty,
    },
    MacCommandSpec {
        cid: NEW_CHANNEL_REQ,
        name: "NewChannelReq",
        layout: ParamLayout::Fields(&[
            field("ChIndex", 1),
            field("Freq", 3),
            field("DrRange", 1),
        ]),
    },
    MacCommandSpec {
        cid: RX_TIMING_SETUP_REQ,
        name: "RXTimingSetupReq",
        layout: ParamLayout::Fields(&[field("Settings", 1)]),
    },
    MacCommandSpec {
        cid: TX_PARAM_SETUP_REQ,
        name: "TXParamSetupReq",
        layout: ParamLayout::Fields(&[field("EIRP_DwellTime", 1)]),
    },
    MacCommandSpec {
        cid: DL_CHANNEL_REQ,
        name: "DlChannelReq",
        layout: ParamLayout::Fields(&[field("ChIndex", 1), field("Freq", 3)]),
    },
    MacCommandSpec {
        cid: DEVICE_TIME_ANS,
        name: "DeviceTimeAns",
        layout: ParamLayout::Fields(&[field("Seconds", 4), field("FractionalSec", 1)]),
    },
];

pub fn lookup(cid: u8) -> Option<&'static MacCommandSpec> {
    DOWNLINK_COMMANDS.iter().find(|spec| spec.cid == cid)
}

/// One decoded MAC command: its CID and the raw parameter octets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacCommandRequest {
    pub cid: u8,
    pub parameters: Vec<u8>,
}

impl MacCommandRequest {
    pub fn new(cid: u8, parameters: Vec<u8>) -> Self {
        Self { cid, parameters }
    }

    pub fn spec(&self) -> Option<&'static MacCommandSpec> {
        lookup(self.cid)
    }

    pub fn name(&self) -> Option<&'static str> {
        self.spec().map(|s| s.name)
    }

    /// Split the parameter octets into the named fields of this CID.
    /// Returns an empty list for a CID outside the table.
    pub fn fields(&self) -> Vec<(&'static str, &[u8])> {
        let Some(spec) = self.spec() else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(spec.layout.fields().len());
        let mut pos = 0;
        for f in spec.layout.fields() {
            let end = (pos + f.width).min(self.parameters.len());
            out.push((f.name, &self.parameters[pos.min(end)..end]));
            pos += f.width;
        }
        out
    }

    /// Wire form: CID followed by the parameters.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.parameters.len());
        out.push(self.cid);
        out.extend_from_slice(&self.parameters);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    #[error("unknown command 0x{cid:02X} at offset {offset}")]
    UnknownCommand { cid: u8, offset: usize },
    #[error("command 0x{cid:02X} at offset {offset} truncated: needs {expected} parameter octets, {available} left")]
    Truncated {
        cid: u8,
        offset: usize,
        expected: usize,
        available: usize,
    },
    #[error("payload not exist")]
    Empty,
    #[error("not a hex octet string")]
    InvalidHex,
}

impl EncodingError {
    /// Octet offset of the offending CID, when the failure has one.
    pub fn offset(&self) -> Option<usize> {
        match self {
            EncodingError::UnknownCommand { offset, .. } | EncodingError::Truncated { offset, .. } => {
                Some(*offset)
            }
            EncodingError::Empty | EncodingError::InvalidHex => None,
        }
    }
}

/// Decode a MAC-command octet string into its commands, in order.
///
/// Decoding is all or nothing: an unknown CID or a short final field rejects
/// the whole string.
pub fn encode(octets: &[u8]) -> Result<Vec<MacCommandRequest>, EncodingError> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < octets.len() {
        let cid = octets[offset];
        let spec = lookup(cid).ok_or(EncodingError::UnknownCommand { cid, offset })?;
        let start = offset + 1;
        let available = octets.len() - start;
        let expected = spec.param_len();
        if available < expected {
            return Err(EncodingError::Truncated {
                cid,
                offset,
                expected,
                available,
            });
        }
        out.push(MacCommandRequest::new(
            cid,
            octets[start..start + expected].to_vec(),
        ));
        offset = start + expected;
    }
    if out.is_empty() {
        return Err(EncodingError::Empty);
    }
    tracing::trace!(count = out.len(), "decoded mac command string");
    Ok(out)
}

/// [`encode`] over a hex-encoded octet string.
pub fn encode_hex(s: &str) -> Result<Vec<MacCommandRequest>, EncodingError> {
    let octets = hex::decode(s).map_err(|_| EncodingError::InvalidHex)?;
    encode(&octets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_unique_cids() {
        for (i, a) in DOWNLINK_COMMANDS.iter().enumerate() {
            for b in &DOWNLINK_COMMANDS[i + 1..] {
                assert_ne!(a.cid, b.cid, "duplicate cid {:02X}", a.cid);
            }
        }
    }

    #[test]
    fn parameter_lengths_follow_field_widths() {
        let lens: Vec<(u8, usize)> = DOWNLINK_COMMANDS
            .iter()
            .map(|s| (s.cid, s.param_len()))
            .collect();
        assert_eq!(
            lens,
            vec![
                (0x02, 1),
                (0x03, 4),
                (0x04, 1),
                (0x05, 4),
                (0x06, 0),
                (0x07, 5),
                (0x08, 1),
                (0x09, 1),
                (0x0A, 4),
                (0x0D, 5),
            ]
        );
    }

    #[test]
    fn link_check_single_parameter() {
        let cmds = encode_hex("0203").unwrap();
        assert_eq!(cmds, vec![MacCommandRequest::new(0x02, vec![0x03])]);
        assert_eq!(cmds[0].name(), Some("LinkCheckAns"));
    }

    #[test]
    fn packed_commands_decode_in_order() {
        let cmds = encode_hex("0321FF000106").unwrap();
        assert_eq!(
            cmds,
            vec![
                MacCommandRequest::new(0x03, vec![0x21, 0xFF, 0x00, 0x01]),
                MacCommandRequest::new(0x06, vec![]),
            ]
        );
        let cmds = encode_hex("06080104AA").unwrap();
        assert_eq!(
            cmds.iter().map(|c| c.cid).collect::<Vec<_>>(),
            vec![0x06, 0x08, 0x04]
        );
        assert_eq!(cmds[1].parameters, vec![0x01]);
        assert_eq!(cmds[2].parameters, vec![0xAA]);
    }

    #[test]
    fn unknown_cid_rejects_whole_string() {
        let err = encode_hex("0203FF").unwrap_err();
        assert_eq!(
            err,
            EncodingError::UnknownCommand {
                cid: 0xFF,
                offset: 2
            }
        );
        assert_eq!(err.offset(), Some(2));
    }

    #[test]
    fn truncated_field_is_reported_with_offset() {
        let err = encode_hex("060321FF").unwrap_err();
        assert_eq!(
            err,
            EncodingError::Truncated {
                cid: 0x03,
                offset: 1,
                expected: 4,
                available: 2
            }
        );
    }

    #[test]
    fn empty_and_bad_hex() {
        assert_eq!(encode(&[]), Err(EncodingError::Empty));
        assert_eq!(encode_hex("0"), Err(EncodingError::InvalidHex));
        assert_eq!(encode_hex("zz03"), Err(EncodingError::InvalidHex));
    }

    #[test]
    fn named_fields_split_parameters() {
        let cmd = MacCommandRequest::new(0x07, vec![0x03, 0x18, 0x4F, 0x84, 0x50]);
        let fields = cmd.fields();
        assert_eq!(
            fields,
            vec![
                ("ChIndex", &[0x03u8][..]),
                ("Freq", &[0x18u8, 0x4F, 0x84][..]),
                ("DrRange", &[0x50u8][..]),
            ]
        );
        assert_eq!(cmd.to_bytes(), vec![0x07, 0x03, 0x18, 0x4F, 0x84, 0x50]);
        assert!(MacCommandRequest::new(0x7F, vec![]).fields().is_empty());
    }
}
