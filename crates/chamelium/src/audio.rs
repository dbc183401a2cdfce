//! Audio capture support.
//!
//! Not every appliance firmware can capture audio; support is probed with a
//! throwaway `GetAudioFormat` call before any audio RPC is trusted.

use chamelium_rpc::{Arg, Value};

use crate::error::ChameliumError;
use crate::port::Port;
use crate::session::Chamelium;

/// Number of capture channels every appliance reply carries; unmapped
/// channels are marked with -1 in the channel mapping.
pub const MAX_AUDIO_CHANNELS: usize = 8;

/// Fixed port id used for the audio-support probe. Any valid port works;
/// only the fault string of the reply is inspected.
const AUDIO_PROBE_PORT_ID: i32 = 3;

/// Format of captured audio data. Samples are always signed 32-bit
/// little-endian raw data; only the rate and channel count vary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub rate: i32,
    pub channels: i32,
}

/// An audio capture saved to a file on the appliance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFile {
    pub path: String,
    pub format: AudioFormat,
}

fn audio_format_from_value(value: &Value, method: &str) -> Result<AudioFormat, ChameliumError> {
    let wrap = ChameliumError::in_call;
    let file_type = value.struct_field("file_type").map_err(wrap(method))?;
    if file_type.as_str().map_err(wrap(method))? != "raw" {
        return Err(ChameliumError::AudioFormat(format!(
            "file_type {:?} is not raw",
            file_type
        )));
    }
    let sample_format = value.struct_field("sample_format").map_err(wrap(method))?;
    if sample_format.as_str().map_err(wrap(method))? != "S32_LE" {
        return Err(ChameliumError::AudioFormat(format!(
            "sample_format {:?} is not S32_LE",
            sample_format
        )));
    }
    let rate = value
        .struct_field("rate")
        .map_err(wrap(method))?
        .as_int()
        .map_err(wrap(method))?;
    let channels = value
        .struct_field("channel")
        .map_err(wrap(method))?
        .as_int()
        .map_err(wrap(method))?;
    if channels < 0 || channels as usize > MAX_AUDIO_CHANNELS {
        return Err(ChameliumError::AudioFormat(format!(
            "channel count {channels} out of range"
        )));
    }
    Ok(AudioFormat { rate, channels })
}

impl Chamelium {
    /// Whether the firmware implements the audio format query at all. Old
    /// firmware does not return the XML-RPC unsupported-method fault code,
    /// so the fault string is inspected instead.
    fn supports_get_audio_format(&self) -> Result<bool, ChameliumError> {
        match self.rpc(None, "GetAudioFormat", &[Arg::Int(AUDIO_PROBE_PORT_ID)]) {
            Ok(_) => Ok(true),
            Err(err) => match err.rpc_fault() {
                Some(fault) => Ok(!fault.message.contains("not supported")),
                None => Err(err),
            },
        }
    }

    /// Whether a port can capture audio.
    pub fn has_audio_support(&self, port: &Port) -> Result<bool, ChameliumError> {
        if !self.supports_get_audio_format()? {
            tracing::debug!("appliance firmware does not support GetAudioFormat");
            return Ok(false);
        }
        self.rpc(Some(port), "HasAudioSupport", &[Arg::Int(port.id())])?
            .as_bool()
            .map_err(ChameliumError::in_call("HasAudioSupport"))
    }

    /// Format of the data currently being captured. A signal should already
    /// be playing into the port when this is called.
    pub fn audio_format(&self, port: &Port) -> Result<AudioFormat, ChameliumError> {
        let reply = self.rpc(Some(port), "GetAudioFormat", &[Arg::Int(port.id())])?;
        audio_format_from_value(&reply, "GetAudioFormat")
    }

    /// Input-to-capture channel mapping for a port. Channels may arrive
    /// swapped; entry `i` names the input channel capture channel `i` is
    /// wired to, or -1 when unmapped.
    pub fn audio_channel_mapping(
        &self,
        port: &Port,
    ) -> Result<[i32; MAX_AUDIO_CHANNELS], ChameliumError> {
        let wrap = ChameliumError::in_call;
        let reply = self.rpc(Some(port), "GetAudioChannelMapping", &[Arg::Int(port.id())])?;
        let items = reply.as_array().map_err(wrap("GetAudioChannelMapping"))?;
        if items.len() != MAX_AUDIO_CHANNELS {
            return Err(ChameliumError::AudioFormat(format!(
                "channel mapping of length {}",
                items.len()
            )));
        }
        let mut mapping = [0i32; MAX_AUDIO_CHANNELS];
        for (slot, item) in mapping.iter_mut().zip(items) {
            *slot = item.as_int().map_err(wrap("GetAudioChannelMapping"))?;
        }
        Ok(mapping)
    }

    /// Starts capturing audio from a port. Only one port can capture audio
    /// at a time. With `save_to_file`, the appliance records to a file whose
    /// details are returned by [`Chamelium::stop_capturing_audio`].
    pub fn start_capturing_audio(
        &self,
        port: &Port,
        save_to_file: bool,
    ) -> Result<(), ChameliumError> {
        self.rpc(
            Some(port),
            "StartCapturingAudio",
            &[Arg::Int(port.id()), Arg::Bool(save_to_file)],
        )?;
        Ok(())
    }

    /// Stops the audio capture on a port; returns the recorded file's
    /// details when the capture was started with `save_to_file`.
    pub fn stop_capturing_audio(
        &self,
        port: &Port,
    ) -> Result<Option<AudioFile>, ChameliumError> {
        let wrap = ChameliumError::in_call;
        let reply = self.rpc(None, "StopCapturingAudio", &[Arg::Int(port.id())])?;
        let items = reply.as_array().map_err(wrap("StopCapturingAudio"))?;
        let [path, props, ..] = items else {
            return Err(ChameliumError::Rpc {
                method: "StopCapturingAudio".to_string(),
                source: chamelium_rpc::RpcError::Malformed(
                    "stop reply too short".to_string(),
                ),
            });
        };
        let path = path.as_str().map_err(wrap("StopCapturingAudio"))?;
        if path.is_empty() {
            return Ok(None);
        }
        let format = audio_format_from_value(props, "StopCapturingAudio")?;
        Ok(Some(AudioFile {
            path: path.to_string(),
            format,
        }))
    }
}
