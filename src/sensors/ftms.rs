//! FTMS (Fitness Machine Service) protocol implementation.
//!
//! Control point command encoding, control point response parsing and the
//! minimal Indoor Bike Data layout used for trainer telemetry.

use crate::sensors::types::SensorError;

/// Response code prefix on control point indications.
pub const RESPONSE_CODE: u8 = 0x80;

/// FTMS Control Point op-codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FtmsOpCode {
    /// Request control of the fitness machine
    RequestControl = 0x01,
    /// Stop training
    Stop = 0x02,
    /// Set target resistance level
    SetResistance = 0x04,
    /// Set target power (ERG mode)
    SetPower = 0x05,
    /// Set target slope
    SetSlope = 0x06,
    /// Start or resume training
    StartTraining = 0x07,
}

impl FtmsOpCode {
    /// Parse an op-code byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::RequestControl),
            0x02 => Some(Self::Stop),
            0x04 => Some(Self::SetResistance),
            0x05 => Some(Self::SetPower),
            0x06 => Some(Self::SetSlope),
            0x07 => Some(Self::StartTraining),
            _ => None,
        }
    }
}

impl std::fmt::Display for FtmsOpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FtmsOpCode::RequestControl => write!(f, "Request Control"),
            FtmsOpCode::Stop => write!(f, "Stop"),
            FtmsOpCode::SetResistance => write!(f, "Set Resistance"),
            FtmsOpCode::SetPower => write!(f, "Set Power"),
            FtmsOpCode::SetSlope => write!(f, "Set Slope"),
            FtmsOpCode::StartTraining => write!(f, "Start Training"),
        }
    }
}

/// Result code carried in a control point response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    OpCodeNotSupported,
    InvalidParameter,
    OperationFailed,
    ControlNotPermitted,
    Unknown(u8),
}

impl ResultCode {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => Self::Success,
            0x02 => Self::OpCodeNotSupported,
            0x03 => Self::InvalidParameter,
            0x04 => Self::OperationFailed,
            0x05 => Self::ControlNotPermitted,
            other => Self::Unknown(other),
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            Self::Success => 0x01,
            Self::OpCodeNotSupported => 0x02,
            Self::InvalidParameter => 0x03,
            Self::OperationFailed => 0x04,
            Self::ControlNotPermitted => 0x05,
            Self::Unknown(b) => *b,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::OpCodeNotSupported => write!(f, "op code not supported"),
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::OperationFailed => write!(f, "operation failed"),
            Self::ControlNotPermitted => write!(f, "control not permitted"),
            Self::Unknown(b) => write!(f, "unknown result 0x{:02X}", b),
        }
    }
}

/// High-level trainer command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrainerCommand {
    /// Target power in watts (ERG mode)
    SetPower(u16),
    /// Target resistance level
    SetResistance(u8),
    /// Target slope in percent
    SetSlope(f32),
    /// Stop training
    Stop,
    /// Request control of the trainer
    RequestControl,
    /// Start or resume training
    StartTraining,
}

impl TrainerCommand {
    /// Op-code written for this command.
    pub fn op_code(&self) -> FtmsOpCode {
        match self {
            TrainerCommand::SetPower(_) => FtmsOpCode::SetPower,
            TrainerCommand::SetResistance(_) => FtmsOpCode::SetResistance,
            TrainerCommand::SetSlope(_) => FtmsOpCode::SetSlope,
            TrainerCommand::Stop => FtmsOpCode::Stop,
            TrainerCommand::RequestControl => FtmsOpCode::RequestControl,
            TrainerCommand::StartTraining => FtmsOpCode::StartTraining,
        }
    }

    /// Encode as a control point write: op-code followed by the parameters.
    pub fn encode(&self) -> Result<Vec<u8>, SensorError> {
        let mut cmd = vec![self.op_code() as u8];
        match *self {
            TrainerCommand::SetPower(watts) => cmd.extend_from_slice(&watts.to_le_bytes()),
            TrainerCommand::SetResistance(level) => cmd.push(level),
            TrainerCommand::SetSlope(percent) => {
                cmd.extend_from_slice(&encode_slope(percent)?.to_le_bytes())
            }
            TrainerCommand::Stop
            | TrainerCommand::RequestControl
            | TrainerCommand::StartTraining => {}
        }
        Ok(cmd)
    }
}

impl std::fmt::Display for TrainerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrainerCommand::SetPower(w) => write!(f, "Set Power {}W", w),
            TrainerCommand::SetResistance(l) => write!(f, "Set Resistance {}", l),
            TrainerCommand::SetSlope(p) => write!(f, "Set Slope {:.2}%", p),
            other => write!(f, "{}", other.op_code()),
        }
    }
}

/// Scale a slope percentage by 100 into a signed 16-bit value.
fn encode_slope(percent: f32) -> Result<i16, SensorError> {
    let scaled = (percent * 100.0).round();
    if !scaled.is_finite() || scaled < i16::MIN as f32 || scaled > i16::MAX as f32 {
        return Err(SensorError::InvalidCommand(format!(
            "slope {}% out of range",
            percent
        )));
    }
    Ok(scaled as i16)
}

/// Parsed control point response `[0x80, op-code, result]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlResponse {
    pub response_code: u8,
    pub request_op_code: u8,
    pub result: ResultCode,
}

impl ControlResponse {
    /// Parse a control point indication. Needs at least 3 bytes.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 3 {
            return None;
        }
        Some(Self {
            response_code: data[0],
            request_op_code: data[1],
            result: ResultCode::from_byte(data[2]),
        })
    }

    /// Whether this is a response frame (leading 0x80).
    pub fn is_response(&self) -> bool {
        self.response_code == RESPONSE_CODE
    }

    /// Op-code being acknowledged, if recognised.
    pub fn op_code(&self) -> Option<FtmsOpCode> {
        FtmsOpCode::from_byte(self.request_op_code)
    }

    /// Status text reported to the user.
    pub fn status_message(&self) -> String {
        if self.result.is_success() {
            "Command successful".to_string()
        } else {
            format!(
                "Command failed ({}: 0x{:02X})",
                self.result,
                self.result.as_byte()
            )
        }
    }

    /// Encode a response frame.
    pub fn encode(op_code: u8, result: ResultCode) -> Vec<u8> {
        vec![RESPONSE_CODE, op_code, result.as_byte()]
    }
}

/// Instantaneous power from an Indoor Bike Data notification (bytes 2-3).
pub fn parse_indoor_bike_power(data: &[u8]) -> Option<u16> {
    if data.len() < 4 {
        return None;
    }
    Some(u16::from_le_bytes([data[2], data[3]]))
}

/// Build an Indoor Bike Data notification carrying `power_watts` at bytes 2-3.
pub fn build_indoor_bike_data(flags: u16, power_watts: u16) -> Vec<u8> {
    let mut data = Vec::with_capacity(4);
    data.extend_from_slice(&flags.to_le_bytes());
    data.extend_from_slice(&power_watts.to_le_bytes());
    data
}
