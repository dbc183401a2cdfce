//! Frame checksums, including a local implementation of the appliance's
//! pixel hash so a rendered framebuffer can be checked against a captured
//! frame without downloading the pixels.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread;

use crate::frame::XrgbFrame;

/// Largest word count a checksum reply may carry.
pub const MAX_CRC_WORDS: usize = 8;

/// Word count produced by the appliance's video checksum.
const CRC_WORDS: usize = 4;

/// A captured-frame checksum: up to [`MAX_CRC_WORDS`] 32-bit words, plus the
/// capture frame index when known.
#[derive(Debug, Clone, Copy)]
pub struct Crc {
    words: [u32; MAX_CRC_WORDS],
    n_words: usize,
    frame: Option<u32>,
}

impl Crc {
    pub fn new(words: &[u32], frame: Option<u32>) -> Crc {
        assert!(words.len() <= MAX_CRC_WORDS);
        let mut buf = [0u32; MAX_CRC_WORDS];
        buf[..words.len()].copy_from_slice(words);
        Crc {
            words: buf,
            n_words: words.len(),
            frame,
        }
    }

    pub fn words(&self) -> &[u32] {
        &self.words[..self.n_words]
    }

    /// Capture frame index this checksum belongs to, when it came from a
    /// captured stream.
    pub fn frame(&self) -> Option<u32> {
        self.frame
    }
}

// Equality is over checksum words only; two identical frames compare equal
// regardless of where in a capture they appeared.
impl PartialEq for Crc {
    fn eq(&self, other: &Crc) -> bool {
        self.words() == other.words()
    }
}

impl Eq for Crc {}

impl fmt::Display for Crc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, word) in self.words().iter().enumerate() {
            if i > 0 {
                f.write_str("-")?;
            }
            write!(f, "{word:08x}")?;
        }
        Ok(())
    }
}

/// The appliance firmware's 16-bit lane hash: over every `k`-th pixel of
/// each group of `m`, accumulate `count * value` where `value` packs the
/// R, G, B channels into the low 24 bits, then fold the 64-bit sum into 16
/// bits.
fn xrgb_hash16(data: &[u8], k: usize, m: usize) -> u32 {
    let mut sum: u64 = 0;
    let mut count: u64 = 0;
    for (i, px) in data.chunks_exact(4).enumerate() {
        if i % m != k {
            continue;
        }
        // Frame layout is B, G, R, X per pixel.
        let value = (px[2] as u64) | ((px[1] as u64) << 8) | ((px[0] as u64) << 16);
        count += 1;
        sum = sum.wrapping_add(count.wrapping_mul(value));
    }
    (((sum >> 48) ^ (sum >> 32) ^ (sum >> 16) ^ sum) & 0xffff) as u32
}

/// Computes the checksum the appliance would report for `frame`, so
/// captured CRCs can be compared against locally rendered content.
pub fn calculate_fb_crc(frame: &XrgbFrame) -> Crc {
    let mut words = [0u32; CRC_WORDS];
    for (i, word) in words.iter_mut().enumerate() {
        *word = xrgb_hash16(frame.data(), CRC_WORDS - 1 - i, CRC_WORDS);
    }
    Crc::new(&words, None)
}

/// A framebuffer checksum computed on a worker thread, so the hash can
/// overlap with the blocking capture RPC.
pub struct FbCrcJob {
    thread: thread::JoinHandle<Crc>,
}

impl FbCrcJob {
    pub fn start(frame: Arc<XrgbFrame>) -> io::Result<FbCrcJob> {
        let thread = thread::Builder::new()
            .name("chamelium-fb-crc".to_string())
            .spawn(move || calculate_fb_crc(&frame))?;
        Ok(FbCrcJob { thread })
    }

    pub fn finish(self) -> Crc {
        match self.thread.join() {
            Ok(crc) => crc,
            // The hash is pure, so the only failure mode is a panic in the
            // worker; re-raise it on the caller.
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }
}
