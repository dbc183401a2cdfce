//! Pixel-level frame types: locally rendered XRGB framebuffers, captured
//! BGR frame dumps, analog cropping, and the on-mismatch PNG dump policy.

use std::path::PathBuf;
use std::sync::Mutex;

use crate::crc::Crc;
use crate::error::ChameliumError;

/// A locally rendered framebuffer in the appliance's hashing layout: four
/// bytes per pixel, ordered B, G, R, X.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XrgbFrame {
    width: i32,
    height: i32,
    data: Vec<u8>,
}

impl XrgbFrame {
    pub fn new(width: i32, height: i32) -> XrgbFrame {
        assert!(width > 0 && height > 0);
        XrgbFrame {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn from_raw(width: i32, height: i32, data: Vec<u8>) -> Result<XrgbFrame, ChameliumError> {
        // Widened before multiplying: the dimensions come off the wire, and
        // a bogus resolution must surface as a size error, not an overflow.
        if data.len() as i64 != width as i64 * height as i64 * 4 {
            return Err(ChameliumError::BadFrameSize {
                len: data.len(),
                width,
                height,
            });
        }
        Ok(XrgbFrame {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn fill(&mut self, b: u8, g: u8, r: u8) {
        for px in self.data.chunks_exact_mut(4) {
            px[0] = b;
            px[1] = g;
            px[2] = r;
            px[3] = 0;
        }
    }

    pub fn set_pixel(&mut self, x: i32, y: i32, b: u8, g: u8, r: u8) {
        assert!(x >= 0 && x < self.width && y >= 0 && y < self.height);
        let off = (y as usize * self.width as usize + x as usize) * 4;
        self.data[off] = b;
        self.data[off + 1] = g;
        self.data[off + 2] = r;
    }

    /// Repacks to the 3-byte BGR layout captured dumps use.
    pub fn to_bgr(&self) -> Vec<u8> {
        let mut bgr = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for px in self.data.chunks_exact(4) {
            bgr.extend_from_slice(&px[..3]);
        }
        bgr
    }

    pub fn write_png(&self, path: &std::path::Path) -> Result<(), image::ImageError> {
        write_bgr_png(&self.to_bgr(), self.width, self.height, path)
    }
}

/// A frame downloaded from the appliance's capture buffer: three bytes per
/// pixel, ordered B, G, R.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDump {
    bgr: Vec<u8>,
    width: i32,
    height: i32,
    port_id: Option<i32>,
}

impl FrameDump {
    pub fn from_bgr(
        bgr: Vec<u8>,
        width: i32,
        height: i32,
        port_id: Option<i32>,
    ) -> Result<FrameDump, ChameliumError> {
        // Same wire-facing widening as XrgbFrame::from_raw.
        if bgr.len() as i64 != width as i64 * height as i64 * 3 {
            return Err(ChameliumError::BadFrameSize {
                len: bgr.len(),
                width,
                height,
            });
        }
        Ok(FrameDump {
            bgr,
            width,
            height,
            port_id,
        })
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn bgr(&self) -> &[u8] {
        &self.bgr
    }

    /// Appliance port this dump was captured from, when known.
    pub fn port_id(&self) -> Option<i32> {
        self.port_id
    }

    pub fn matches(&self, other: &FrameDump) -> bool {
        self.width == other.width && self.height == other.height && self.bgr == other.bgr
    }

    /// Byte-exact comparison against a locally rendered framebuffer. Useful
    /// when pre-calculated CRCs are not reliable.
    pub fn ensure_eq(&self, fb: &XrgbFrame) -> Result<(), ChameliumError> {
        if self.width == fb.width() && self.height == fb.height() && self.bgr == fb.to_bgr() {
            Ok(())
        } else {
            Err(ChameliumError::FrameMismatch)
        }
    }

    /// Expands to the 4-byte XRGB layout so the frame can be hashed with
    /// [`crate::calculate_fb_crc`].
    pub fn to_xrgb(&self) -> XrgbFrame {
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for px in self.bgr.chunks_exact(3) {
            data.extend_from_slice(px);
            data.push(0);
        }
        XrgbFrame {
            width: self.width,
            height: self.height,
            data,
        }
    }

    fn is_content(&self, x: i32, y: i32) -> bool {
        let off = (y as usize * self.width as usize + x as usize) * 3;
        self.bgr[off] > 50 && self.bgr[off + 1] > 50 && self.bgr[off + 2] > 50
    }

    /// Crops an analog capture down to `width` x `height` by locating the
    /// top-left corner of the bright content area. Analog capture pads the
    /// frame with a dark border whose size varies per capture, so the corner
    /// must be found rather than assumed.
    pub fn crop_analog(&mut self, width: i32, height: i32) -> Result<(), ChameliumError> {
        if width > self.width || height > self.height {
            return Err(ChameliumError::CropTooLarge {
                have_w: self.width,
                have_h: self.height,
                want_w: width,
                want_h: height,
            });
        }
        if width == self.width && height == self.height {
            return Ok(());
        }

        // Rightmost/bottommost legal origin; minima over detected content
        // pull it up and to the left.
        let max_left = self.width - width;
        let max_top = self.height - height;
        let mut left = max_left;
        let mut top = max_top;
        'scan: for y in 0..self.height {
            for x in 0..self.width {
                if x >= left && y >= top {
                    continue;
                }
                if !self.is_content(x, y) {
                    continue;
                }
                // Isolated bright pixels are capture noise; require a mostly
                // bright 10x10 neighborhood before trusting this as content.
                let mut score = 0;
                for dy in 0..10 {
                    for dx in 0..10 {
                        let (nx, ny) = (x + dx, y + dy);
                        if nx < self.width && ny < self.height && self.is_content(nx, ny) {
                            score += 1;
                        }
                    }
                }
                if score >= 25 {
                    left = left.min(x).min(max_left);
                    top = top.min(y).min(max_top);
                    if left == 0 && top == 0 {
                        break 'scan;
                    }
                }
            }
        }
        tracing::debug!(left, top, width, height, "cropping analog capture");

        let mut cropped = Vec::with_capacity(width as usize * height as usize * 3);
        for y in top..top + height {
            let start = (y as usize * self.width as usize + left as usize) * 3;
            cropped.extend_from_slice(&self.bgr[start..start + width as usize * 3]);
        }
        self.bgr = cropped;
        self.width = width;
        self.height = height;
        Ok(())
    }

    pub fn write_png(&self, path: &std::path::Path) -> Result<(), image::ImageError> {
        write_bgr_png(&self.bgr, self.width, self.height, path)
    }
}

fn write_bgr_png(
    bgr: &[u8],
    width: i32,
    height: i32,
    path: &std::path::Path,
) -> Result<(), image::ImageError> {
    let mut rgb = Vec::with_capacity(bgr.len());
    for px in bgr.chunks_exact(3) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    let img = image::RgbImage::from_raw(width as u32, height as u32, rgb)
        .ok_or_else(|| {
            image::ImageError::Parameter(image::error::ParameterError::from_kind(
                image::error::ParameterErrorKind::DimensionMismatch,
            ))
        })?;
    img.save_with_format(path, image::ImageFormat::Png)
}

// Explicitly set path wins over the CHAMELIUM_FRAME_DUMP_PATH environment
// variable; Some(None) records an explicit "dumping off".
static DUMP_PATH: Mutex<Option<Option<PathBuf>>> = Mutex::new(None);

/// Overrides where mismatching frame pairs are dumped as PNGs. `None`
/// disables dumping even if `CHAMELIUM_FRAME_DUMP_PATH` is set.
pub fn set_frame_dump_path(path: Option<PathBuf>) {
    let mut guard = match DUMP_PATH.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = Some(path);
}

/// Directory mismatching frame pairs are dumped into, if dumping is enabled.
pub fn frame_dump_path() -> Option<PathBuf> {
    let explicit = {
        let guard = match DUMP_PATH.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clone()
    };
    match explicit {
        Some(path) => path,
        None => std::env::var_os("CHAMELIUM_FRAME_DUMP_PATH").map(PathBuf::from),
    }
}

pub(crate) fn dump_enabled() -> bool {
    frame_dump_path().is_some()
}

/// Writes the reference/capture pair of a failed comparison, named by their
/// respective checksums. Dump failures are logged, never propagated: the
/// comparison error is the one the caller needs to see.
pub(crate) fn write_compared_frames(
    reference: &XrgbFrame,
    capture: &FrameDump,
    reference_crc: &Crc,
    capture_crc: &Crc,
) {
    let Some(dir) = frame_dump_path() else {
        return;
    };
    let ref_path = dir.join(format!("frame-reference-{reference_crc}.png"));
    let cap_path = dir.join(format!("frame-capture-{capture_crc}.png"));
    tracing::warn!(
        reference = %ref_path.display(),
        capture = %cap_path.display(),
        "frame comparison failed, dumping both frames"
    );
    if let Err(err) = reference.write_png(&ref_path) {
        tracing::warn!(error = %err, "failed to dump reference frame");
    }
    if let Err(err) = capture.write_png(&cap_path) {
        tracing::warn!(error = %err, "failed to dump captured frame");
    }
}
