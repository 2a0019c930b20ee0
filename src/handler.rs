use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::{DispatchGateway, Rejection};
use crate::envelope::{CommandEnvelope, CommandKind, DeviceAddress};
use crate::validator::{Field, ValidationError};

pub const CODE_SUCCESS: u16 = 200;
pub const CODE_MALFORMED: u16 = 400;
pub const CODE_STORE_ERROR: u16 = 500;
pub const CODE_INVALID_DEVADDR: u16 = 2107;
pub const CODE_INVALID_MACCOMMAND: u16 = 2108;
pub const CODE_INVALID_DOWNLINK: u16 = 2109;
pub const CODE_DEVADDR_REQUIRED: u16 = 3112;
pub const CODE_MACCOMMAND_REQUIRED: u16 = 3113;
pub const CODE_DOWNLINK_REQUIRED: u16 = 3114;

/// One request on the wire, tagged by `op`.
///
/// Submission field names follow the device-management API (`DevAddr`,
/// `Downlink`, `MACCommand`); fields are optional so that a missing one is
/// reported as "required" rather than as a parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DispatchRequest {
    Downlink {
        #[serde(rename = "DevAddr", default)]
        dev_addr: Option<String>,
        #[serde(rename = "Downlink", default)]
        downlink: Option<String>,
    },
    #[serde(rename = "maccommand")]
    MacCommand {
        #[serde(rename = "DevAddr", default)]
        dev_addr: Option<String>,
        #[serde(rename = "MACCommand", default)]
        maccommand: Option<String>,
    },
    Pop {
        #[serde(rename = "DevAddr", default)]
        dev_addr: Option<String>,
        kind: CommandKind,
    },
    Length {
        #[serde(rename = "DevAddr", default)]
        dev_addr: Option<String>,
        kind: CommandKind,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope: Option<CommandEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
}

impl DispatchResponse {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            id: None,
            envelope: None,
            length: None,
        }
    }

    pub fn success() -> Self {
        Self::new(CODE_SUCCESS, "success")
    }

    pub fn malformed(detail: impl std::fmt::Display) -> Self {
        Self::new(CODE_MALFORMED, format!("malformed request: {detail}"))
    }

    pub fn is_success(&self) -> bool {
        self.code == CODE_SUCCESS
    }
}

/// Response code for a rejected submission.
pub fn rejection_code(rejection: &Rejection) -> u16 {
    match rejection {
        Rejection::Invalid(ValidationError::MissingField(Field::DevAddr)) => CODE_DEVADDR_REQUIRED,
        Rejection::Invalid(ValidationError::MissingField(Field::MacCommand)) => {
            CODE_MACCOMMAND_REQUIRED
        }
        Rejection::Invalid(ValidationError::MissingField(Field::Downlink)) => CODE_DOWNLINK_REQUIRED,
        Rejection::Invalid(ValidationError::InvalidDeviceAddress) => CODE_INVALID_DEVADDR,
        Rejection::Invalid(ValidationError::InvalidPayload(Field::Downlink)) => CODE_INVALID_DOWNLINK,
        Rejection::Invalid(ValidationError::InvalidPayload(_)) | Rejection::Decode(_) => {
            CODE_INVALID_MACCOMMAND
        }
        Rejection::Store(_) => CODE_STORE_ERROR,
    }
}

impl From<Rejection> for DispatchResponse {
    fn from(rejection: Rejection) -> Self {
        Self::new(rejection_code(&rejection), rejection.to_string())
    }
}

/// Address check for the consumer ops, with the same codes as submissions.
fn consumer_address(dev_addr: Option<&str>) -> Result<DeviceAddress, DispatchResponse> {
    let Some(raw) = dev_addr else {
        return Err(Rejection::Invalid(ValidationError::MissingField(Field::DevAddr)).into());
    };
    raw.parse()
        .map_err(|_| Rejection::Invalid(ValidationError::InvalidDeviceAddress).into())
}

/// Route one decoded request onto the gateway.
pub async fn handle_request(gateway: &DispatchGateway, req: DispatchRequest) -> DispatchResponse {
    match req {
        DispatchRequest::Downlink { dev_addr, downlink } => {
            submit(gateway, CommandKind::RawDownlink, dev_addr, downlink).await
        }
        DispatchRequest::MacCommand {
            dev_addr,
            maccommand,
        } => submit(gateway, CommandKind::MacCommand, dev_addr, maccommand).await,
        DispatchRequest::Pop { dev_addr, kind } => {
            let addr = match consumer_address(dev_addr.as_deref()) {
                Ok(a) => a,
                Err(resp) => return resp,
            };
            match gateway.pop(kind, addr).await {
                Ok(Some(envelope)) => DispatchResponse {
                    id: Some(envelope.id()),
                    envelope: Some(envelope),
                    ..DispatchResponse::success()
                },
                Ok(None) => DispatchResponse::new(CODE_SUCCESS, "empty"),
                Err(e) => Rejection::Store(e).into(),
            }
        }
        DispatchRequest::Length { dev_addr, kind } => {
            let addr = match consumer_address(dev_addr.as_deref()) {
                Ok(a) => a,
                Err(resp) => return resp,
            };
            match gateway.queue_length(kind, addr).await {
                Ok(n) => DispatchResponse {
                    length: Some(n),
                    ..DispatchResponse::success()
                },
                Err(e) => Rejection::Store(e).into(),
            }
        }
    }
}

async fn submit(
    gateway: &DispatchGateway,
    kind: CommandKind,
    dev_addr: Option<String>,
    payload: Option<String>,
) -> DispatchResponse {
    match gateway
        .submit_fields(kind, dev_addr.as_deref(), payload.as_deref())
        .await
    {
        Ok(accepted) => DispatchResponse {
            id: Some(accepted.id),
            ..DispatchResponse::success()
        },
        Err(rejection) => rejection.into(),
    }
}

/// Parse one JSON request (a line or a datagram) and handle it.
pub async fn handle_frame(gateway: &DispatchGateway, frame: &[u8]) -> DispatchResponse {
    match serde_json::from_slice::<DispatchRequest>(frame) {
        Ok(req) => handle_request(gateway, req).await,
        Err(e) => {
            tracing::debug!(%e, frame = %String::from_utf8_lossy(frame), "failed to parse request");
            DispatchResponse::malformed(e)
        }
    }
}

/// Encode a response as one JSON line.
pub fn encode_response(resp: &DispatchResponse) -> Vec<u8> {
    let mut out = serde_json::to_vec(resp).unwrap_or_else(|e| {
        tracing::error!(%e, "failed to encode response");
        br#"{"code":500,"message":"response encoding failed"}"#.to_vec()
    });
    out.push(b'\n');
    out
}
