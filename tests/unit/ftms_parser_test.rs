//! Unit tests for FTMS command encoding and response parsing.

use ridelink::sensors::ftms::{
    build_indoor_bike_data, parse_indoor_bike_power, ControlResponse, FtmsOpCode, ResultCode,
    TrainerCommand, RESPONSE_CODE,
};

#[test]
fn test_set_power_200() {
    let cmd = TrainerCommand::SetPower(200).encode().unwrap();
    assert_eq!(cmd, vec![0x05, 0xC8, 0x00]);
}

#[test]
fn test_set_power_large_value() {
    // 1500W = 0x05DC
    let cmd = TrainerCommand::SetPower(1500).encode().unwrap();
    assert_eq!(cmd, vec![0x05, 0xDC, 0x05]);
}

#[test]
fn test_set_resistance() {
    let cmd = TrainerCommand::SetResistance(40).encode().unwrap();
    assert_eq!(cmd, vec![0x04, 40]);
}

#[test]
fn test_set_slope_positive() {
    // 5.25% -> 525 = 0x020D
    let cmd = TrainerCommand::SetSlope(5.25).encode().unwrap();
    assert_eq!(cmd, vec![0x06, 0x0D, 0x02]);
}

#[test]
fn test_set_slope_rounds() {
    // 2.004% -> 200.4 -> 200
    let cmd = TrainerCommand::SetSlope(2.004).encode().unwrap();
    assert_eq!(cmd, vec![0x06, 0xC8, 0x00]);
}

#[test]
fn test_set_slope_negative() {
    // -3% -> -300 -> 0xFED4
    let cmd = TrainerCommand::SetSlope(-3.0).encode().unwrap();
    assert_eq!(cmd, vec![0x06, 0xD4, 0xFE]);
}

#[test]
fn test_commands_without_parameters() {
    assert_eq!(TrainerCommand::Stop.encode().unwrap(), vec![0x02]);
    assert_eq!(TrainerCommand::RequestControl.encode().unwrap(), vec![0x01]);
    assert_eq!(TrainerCommand::StartTraining.encode().unwrap(), vec![0x07]);
}

#[test]
fn test_op_code_round_trip() {
    for op in [
        FtmsOpCode::RequestControl,
        FtmsOpCode::Stop,
        FtmsOpCode::SetResistance,
        FtmsOpCode::SetPower,
        FtmsOpCode::SetSlope,
        FtmsOpCode::StartTraining,
    ] {
        assert_eq!(FtmsOpCode::from_byte(op as u8), Some(op));
    }
    assert_eq!(FtmsOpCode::from_byte(0x03), None);
}

#[test]
fn test_parse_failure_response() {
    let response = ControlResponse::parse(&[0x80, 0x05, 0x02]).unwrap();
    assert!(response.is_response());
    assert_eq!(response.op_code(), Some(FtmsOpCode::SetPower));
    assert_eq!(response.result, ResultCode::OpCodeNotSupported);
    assert!(!response.result.is_success());
    assert_eq!(
        response.status_message(),
        "Command failed (op code not supported: 0x02)"
    );
}

#[test]
fn test_parse_non_response_frame() {
    let frame = ControlResponse::parse(&[0x05, 0xC8, 0x00]).unwrap();
    assert!(!frame.is_response());
}

#[test]
fn test_unknown_result_code() {
    let response = ControlResponse::parse(&[RESPONSE_CODE, 0x07, 0x42]).unwrap();
    assert_eq!(response.result, ResultCode::Unknown(0x42));
    assert_eq!(response.result.as_byte(), 0x42);
}

#[test]
fn test_response_encode() {
    assert_eq!(
        ControlResponse::encode(0x01, ResultCode::Success),
        vec![0x80, 0x01, 0x01]
    );
}

#[test]
fn test_indoor_bike_data_round_trip() {
    for power in [0u16, 1, 200, 999, 2000, u16::MAX] {
        let data = build_indoor_bike_data(0x0044, power);
        assert_eq!(parse_indoor_bike_power(&data), Some(power));
    }
}

#[test]
fn test_indoor_bike_data_too_short() {
    assert_eq!(parse_indoor_bike_power(&[]), None);
    assert_eq!(parse_indoor_bike_power(&[0x44, 0x00, 0xC8]), None);
}
