//! Capture argument marshalling and readback: crop omission, frame
//! indexing, resolution plumbing and the mismatch dump policy.

mod support;

use chamelium::{calculate_fb_crc, Chamelium, ChameliumError, Crc, Rect, XrgbFrame};
use chamelium_rpc::{wire, Value};
use support::{baseline_reply, hdmi_config, FakeAppliance, FakeDut, HDMI_PORT_ID};

fn capture_reply(method: &str, args: &[Value]) -> Option<Vec<u8>> {
    match method {
        "StartCapturingVideo" | "StopCapturingVideo" | "CaptureVideo" => {
            Some(wire::encode_response(&Value::Int(0)))
        }
        "GetCapturedResolution" => Some(wire::encode_response(&Value::Array(vec![
            Value::Int(2),
            Value::Int(2),
        ]))),
        "ReadCapturedFrame" => {
            Some(wire::encode_response(&Value::Bytes(vec![0xAA; 2 * 2 * 3])))
        }
        "GetCapturedFrameCount" => Some(wire::encode_response(&Value::Int(4))),
        "DetectResolution" => Some(wire::encode_response(&Value::Array(vec![
            Value::Int(1920),
            Value::Int(1080),
        ]))),
        "GetMaxFrameLimit" => Some(wire::encode_response(&Value::Int(72))),
        "DumpPixels" => Some(wire::encode_response(&Value::Bytes(vec![0x55; 2 * 2 * 3]))),
        "ComputePixelChecksum" => Some(wire::encode_response(&Value::Array(vec![
            Value::Int(0x1111),
            Value::Int(0x2222),
            Value::Int(0x3333),
            Value::Int(0x4444),
        ]))),
        "GetCapturedChecksums" => Some(wire::encode_response(&Value::Array(vec![
            Value::Array(vec![
                Value::Int(1),
                Value::Int(2),
                Value::Int(3),
                Value::Int(4),
            ]),
            Value::Array(vec![
                Value::Int(5),
                Value::Int(6),
                Value::Int(7),
                Value::Int(8),
            ]),
        ]))),
        _ => baseline_reply(method, args),
    }
}

fn connect(appliance: &FakeAppliance) -> Chamelium {
    Chamelium::connect(&hdmi_config(appliance.url()), FakeDut::hdmi()).expect("connect")
}

#[test]
fn full_frame_capture_omits_the_crop_arguments() {
    let appliance = FakeAppliance::start(|m, a| capture_reply(m, a).expect("unexpected method"));
    let session = connect(&appliance);
    let port = &session.ports()[0];

    session.start_capture(port, None).unwrap();
    session.stop_capture(0).unwrap();

    assert_eq!(
        appliance.method_calls("StartCapturingVideo"),
        vec![vec![Value::Int(HDMI_PORT_ID)]]
    );
    assert_eq!(
        appliance.method_calls("StopCapturingVideo"),
        vec![vec![Value::Int(0)]]
    );
}

#[test]
fn cropped_capture_sends_all_four_crop_arguments() {
    let appliance = FakeAppliance::start(|m, a| capture_reply(m, a).expect("unexpected method"));
    let session = connect(&appliance);
    let port = &session.ports()[0];

    let area = Rect {
        x: 10,
        y: 20,
        width: 640,
        height: 480,
    };
    session.start_capture(port, Some(area)).unwrap();

    assert_eq!(
        appliance.method_calls("StartCapturingVideo"),
        vec![vec![
            Value::Int(HDMI_PORT_ID),
            Value::Int(10),
            Value::Int(20),
            Value::Int(640),
            Value::Int(480),
        ]]
    );
}

#[test]
fn one_shot_capture_puts_the_frame_count_before_the_crop() {
    let appliance = FakeAppliance::start(|m, a| capture_reply(m, a).expect("unexpected method"));
    let session = connect(&appliance);
    let port = &session.ports()[0];

    session.capture(port, 7, None).unwrap();
    assert_eq!(
        appliance.method_calls("CaptureVideo"),
        vec![vec![Value::Int(HDMI_PORT_ID), Value::Int(7)]]
    );
}

#[test]
fn captured_crcs_carry_their_frame_index() {
    let appliance = FakeAppliance::start(|m, a| capture_reply(m, a).expect("unexpected method"));
    let session = connect(&appliance);

    let crcs = session.read_captured_crcs().unwrap();
    assert_eq!(crcs.len(), 2);
    assert_eq!(crcs[0].words(), &[1, 2, 3, 4]);
    assert_eq!(crcs[0].frame(), Some(0));
    assert_eq!(crcs[1].words(), &[5, 6, 7, 8]);
    assert_eq!(crcs[1].frame(), Some(1));

    // The request asks for everything from index zero, count omitted.
    assert_eq!(
        appliance.method_calls("GetCapturedChecksums"),
        vec![vec![Value::Int(0)]]
    );
}

#[test]
fn captured_frames_use_the_captured_resolution_and_port() {
    let appliance = FakeAppliance::start(|m, a| capture_reply(m, a).expect("unexpected method"));
    let session = connect(&appliance);
    let port = &session.ports()[0];

    session.capture(port, 1, None).unwrap();
    let frame = session.read_captured_frame(0).unwrap();

    assert_eq!((frame.width(), frame.height()), (2, 2));
    assert_eq!(frame.port_id(), Some(HDMI_PORT_ID));
    assert_eq!(frame.bgr(), &[0xAA; 12][..]);
    assert_eq!(session.captured_frame_count().unwrap(), 4);
}

#[test]
fn pixel_dump_without_an_area_omits_the_crop_arguments() {
    let appliance = FakeAppliance::start(|m, a| capture_reply(m, a).expect("unexpected method"));
    let session = connect(&appliance);
    let port = &session.ports()[0];

    let frame = session.port_dump_pixels(port, None).unwrap();
    assert_eq!((frame.width(), frame.height()), (2, 2));
    assert_eq!(frame.port_id(), Some(HDMI_PORT_ID));
    assert_eq!(
        appliance.method_calls("DumpPixels"),
        vec![vec![Value::Int(HDMI_PORT_ID)]]
    );
}

#[test]
fn area_checksums_come_back_as_crc_words() {
    let appliance = FakeAppliance::start(|m, a| capture_reply(m, a).expect("unexpected method"));
    let session = connect(&appliance);
    let port = &session.ports()[0];

    let crc = session.get_crc_for_area(port, None).unwrap();
    assert_eq!(crc.words(), &[0x1111, 0x2222, 0x3333, 0x4444]);
    assert_eq!(crc.frame(), None);
}

#[test]
fn zero_sized_frame_limit_uses_the_detected_resolution() {
    let appliance = FakeAppliance::start(|m, a| capture_reply(m, a).expect("unexpected method"));
    let session = connect(&appliance);
    let port = &session.ports()[0];

    assert_eq!(session.frame_limit(port, 0, 0).unwrap(), 72);
    assert_eq!(
        appliance.method_calls("DetectResolution"),
        vec![vec![Value::Int(HDMI_PORT_ID)]]
    );
    assert_eq!(
        appliance.method_calls("GetMaxFrameLimit"),
        vec![vec![Value::Int(HDMI_PORT_ID), Value::Int(1920), Value::Int(1080)]]
    );
}

#[test]
fn explicit_frame_limit_skips_resolution_detection() {
    let appliance = FakeAppliance::start(|m, a| capture_reply(m, a).expect("unexpected method"));
    let session = connect(&appliance);
    let port = &session.ports()[0];

    assert_eq!(session.frame_limit(port, 800, 600).unwrap(), 72);
    assert!(appliance.method_calls("DetectResolution").is_empty());
}

#[test]
fn matching_crcs_compare_equal_without_fetching_frames() {
    let appliance = FakeAppliance::start(|m, a| capture_reply(m, a).expect("unexpected method"));
    let session = connect(&appliance);

    let fb = XrgbFrame::new(2, 2);
    let crc = calculate_fb_crc(&fb);
    session.check_crc_eq_or_dump(&crc, &crc, &fb, 0).unwrap();
    assert!(appliance.method_calls("ReadCapturedFrame").is_empty());
}

#[test]
fn mismatching_crcs_report_both_checksums() {
    let appliance = FakeAppliance::start(|m, a| capture_reply(m, a).expect("unexpected method"));
    let session = connect(&appliance);
    let port = &session.ports()[0];
    session.capture(port, 1, None).unwrap();

    let fb = XrgbFrame::new(2, 2);
    let reference = calculate_fb_crc(&fb);
    let capture = Crc::new(&[9, 9, 9, 9], Some(0));
    let err = session
        .check_crc_eq_or_dump(&reference, &capture, &fb, 0)
        .unwrap_err();
    assert!(matches!(err, ChameliumError::CrcMismatch { .. }));
}
