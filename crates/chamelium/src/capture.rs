//! Video capture: starting and stopping captures, reading back checksums
//! and frames, and the comparison helpers tests build on.

use chamelium_rpc::{Arg, Value};

use crate::crc::{calculate_fb_crc, Crc, MAX_CRC_WORDS};
use crate::error::ChameliumError;
use crate::frame::{self, FrameDump, XrgbFrame};
use crate::port::Port;
use crate::session::Chamelium;

/// Capture crop region on the emulated display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Crop arguments for the capture calls: a full-frame capture omits all four
/// parameters rather than passing zeros.
fn area_args(area: Option<Rect>) -> [Arg; 4] {
    match area {
        Some(r) => [
            Arg::Int(r.x),
            Arg::Int(r.y),
            Arg::Int(r.width),
            Arg::Int(r.height),
        ],
        None => [Arg::Omitted, Arg::Omitted, Arg::Omitted, Arg::Omitted],
    }
}

fn crc_from_value(value: &Value, method: &str, frame: Option<u32>) -> Result<Crc, ChameliumError> {
    let items = value.as_array().map_err(ChameliumError::in_call(method))?;
    if items.len() > MAX_CRC_WORDS {
        return Err(ChameliumError::Rpc {
            method: method.to_string(),
            source: chamelium_rpc::RpcError::Malformed(format!(
                "checksum of {} words exceeds the maximum of {MAX_CRC_WORDS}",
                items.len()
            )),
        });
    }
    let mut words = Vec::with_capacity(items.len());
    for item in items {
        words.push(item.as_int().map_err(ChameliumError::in_call(method))? as u32);
    }
    Ok(Crc::new(&words, frame))
}

fn resolution_from_value(value: &Value, method: &str) -> Result<(i32, i32), ChameliumError> {
    let wrap = ChameliumError::in_call;
    let items = value.as_array().map_err(wrap(method))?;
    match items {
        [w, h, ..] => Ok((w.as_int().map_err(wrap(method))?, h.as_int().map_err(wrap(method))?)),
        _ => Err(ChameliumError::Rpc {
            method: method.to_string(),
            source: chamelium_rpc::RpcError::Malformed("resolution reply too short".to_string()),
        }),
    }
}

impl Chamelium {
    /// Starts capturing frames on a port, optionally cropped. Ends with
    /// [`Chamelium::stop_capture`].
    pub fn start_capture(
        &self,
        port: &Port,
        area: Option<Rect>,
    ) -> Result<(), ChameliumError> {
        let [x, y, w, h] = area_args(area);
        self.rpc(
            Some(port),
            "StartCapturingVideo",
            &[Arg::Int(port.id()), x, y, w, h],
        )?;
        self.note_capturing_port(port.id());
        Ok(())
    }

    /// Stops capturing. A nonzero `frame_count` blocks until that many
    /// frames have been captured; zero stops immediately.
    pub fn stop_capture(&self, frame_count: i32) -> Result<(), ChameliumError> {
        self.rpc(None, "StopCapturingVideo", &[Arg::Int(frame_count)])?;
        Ok(())
    }

    /// One-shot capture: blocks until `frame_count` frames are in the
    /// appliance's buffer.
    pub fn capture(
        &self,
        port: &Port,
        frame_count: i32,
        area: Option<Rect>,
    ) -> Result<(), ChameliumError> {
        let [x, y, w, h] = area_args(area);
        self.rpc(
            Some(port),
            "CaptureVideo",
            &[Arg::Int(port.id()), Arg::Int(frame_count), x, y, w, h],
        )?;
        self.note_capturing_port(port.id());
        Ok(())
    }

    /// Reads every checksum captured so far, in capture order. Each CRC
    /// carries its frame index, so the result can be indexed back into
    /// [`Chamelium::read_captured_frame`].
    pub fn read_captured_crcs(&self) -> Result<Vec<Crc>, ChameliumError> {
        let reply = self.rpc(None, "GetCapturedChecksums", &[Arg::Int(0), Arg::Omitted])?;
        let items = reply
            .as_array()
            .map_err(ChameliumError::in_call("GetCapturedChecksums"))?;
        let mut crcs = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            crcs.push(crc_from_value(item, "GetCapturedChecksums", Some(i as u32))?);
        }
        Ok(crcs)
    }

    fn captured_resolution(&self) -> Result<(i32, i32), ChameliumError> {
        let reply = self.rpc(None, "GetCapturedResolution", &[])?;
        resolution_from_value(&reply, "GetCapturedResolution")
    }

    fn frame_from_reply(&self, reply: &Value, method: &str) -> Result<FrameDump, ChameliumError> {
        let pixels = reply
            .as_bytes()
            .map_err(ChameliumError::in_call(method))?
            .to_vec();
        let (width, height) = self.captured_resolution()?;
        FrameDump::from_bgr(pixels, width, height, self.capturing_port_id())
    }

    /// Downloads one frame from the last capture by its index.
    pub fn read_captured_frame(&self, index: u32) -> Result<FrameDump, ChameliumError> {
        let reply = self.rpc(None, "ReadCapturedFrame", &[Arg::Int(index as i32)])?;
        self.frame_from_reply(&reply, "ReadCapturedFrame")
    }

    /// Number of frames buffered by the last capture.
    pub fn captured_frame_count(&self) -> Result<i32, ChameliumError> {
        self.rpc(None, "GetCapturedFrameCount", &[])?
            .as_int()
            .map_err(ChameliumError::in_call("GetCapturedFrameCount"))
    }

    /// Grabs the image currently displayed on a port without a full capture
    /// session. Useful when pre-calculated CRCs are unreliable.
    pub fn port_dump_pixels(
        &self,
        port: &Port,
        area: Option<Rect>,
    ) -> Result<FrameDump, ChameliumError> {
        let [x, y, w, h] = area_args(area);
        let reply = self.rpc(Some(port), "DumpPixels", &[Arg::Int(port.id()), x, y, w, h])?;
        self.note_capturing_port(port.id());
        self.frame_from_reply(&reply, "DumpPixels")
    }

    /// Appliance-side checksum of the image currently displayed on a port,
    /// optionally restricted to an area.
    pub fn get_crc_for_area(
        &self,
        port: &Port,
        area: Option<Rect>,
    ) -> Result<Crc, ChameliumError> {
        let [x, y, w, h] = area_args(area);
        let reply = self.rpc(
            Some(port),
            "ComputePixelChecksum",
            &[Arg::Int(port.id()), x, y, w, h],
        )?;
        self.note_capturing_port(port.id());
        crc_from_value(&reply, "ComputePixelChecksum", None)
    }

    /// The resolution the appliance sees on a port. Reported by the
    /// appliance, not DRM, so it verifies what is actually being scanned
    /// out.
    pub fn detect_resolution(&self, port: &Port) -> Result<(i32, i32), ChameliumError> {
        let reply = self.rpc(Some(port), "DetectResolution", &[Arg::Int(port.id())])?;
        resolution_from_value(&reply, "DetectResolution")
    }

    /// Max frames the appliance can buffer for a capture at the given size.
    /// A zero-sized area means the port's currently detected resolution.
    pub fn frame_limit(&self, port: &Port, width: i32, height: i32) -> Result<i32, ChameliumError> {
        let (width, height) = if width == 0 && height == 0 {
            self.detect_resolution(port)?
        } else {
            (width, height)
        };
        self.rpc(
            Some(port),
            "GetMaxFrameLimit",
            &[Arg::Int(port.id()), Arg::Int(width), Arg::Int(height)],
        )?
        .as_int()
        .map_err(ChameliumError::in_call("GetMaxFrameLimit"))
    }

    /// Checks a captured CRC against the reference CRC of a local
    /// framebuffer. On mismatch, if frame dumping is enabled, the captured
    /// frame at `index` is fetched and both frames are written out as PNGs
    /// before the error is returned.
    pub fn check_crc_eq_or_dump(
        &self,
        reference_crc: &Crc,
        capture_crc: &Crc,
        fb: &XrgbFrame,
        index: u32,
    ) -> Result<(), ChameliumError> {
        tracing::debug!(reference = %reference_crc, capture = %capture_crc, "comparing crcs");
        if reference_crc == capture_crc {
            return Ok(());
        }
        if frame::dump_enabled() {
            match self.read_captured_frame(index) {
                Ok(capture) => {
                    frame::write_compared_frames(fb, &capture, reference_crc, capture_crc);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "could not fetch mismatching frame for dump");
                }
            }
        }
        Err(ChameliumError::CrcMismatch {
            reference: reference_crc.to_string(),
            capture: capture_crc.to_string(),
        })
    }

    /// Checks an analog capture against a local framebuffer. The capture is
    /// first cropped to the framebuffer's size, since VGA dumps include
    /// pixels sampled during blanking. On mismatch, if frame dumping is
    /// enabled, both frames are written out with their checksums.
    pub fn check_analog_frame_match(
        &self,
        port: &Port,
        frame_dump: &FrameDump,
        fb: &XrgbFrame,
    ) -> Result<(), ChameliumError> {
        let mut capture = frame_dump.clone();
        capture.crop_analog(fb.width(), fb.height())?;

        if capture.bgr() == fb.to_bgr() {
            return Ok(());
        }
        if frame::dump_enabled() {
            let reference_crc = calculate_fb_crc(fb);
            match self.get_crc_for_area(port, None) {
                Ok(capture_crc) => {
                    frame::write_compared_frames(fb, &capture, &reference_crc, &capture_crc);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "could not fetch capture crc for dump");
                }
            }
        }
        Err(ChameliumError::FrameMismatch)
    }
}
