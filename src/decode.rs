//! Packet decoding to interleaved f32 PCM
//!
//! One decode context per open track. Whatever the source bit depth, output
//! is normalized to interleaved 32-bit float so the resampler and ring buffer
//! deal with a single format. Corrupt packets are skipped and counted, never
//! fatal.

use crate::demux::Demuxer;
use crate::error::{Error, Result};
use crate::render::AudioSpec;
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::formats::Packet;
use tracing::{debug, warn};

/// A block of decoded audio
pub struct PcmBlock {
    /// Interleaved f32 samples
    pub samples: Vec<f32>,

    /// Format the samples were decoded at (may change at a packet boundary)
    pub spec: AudioSpec,
}

/// Decode context for the selected track
pub struct PacketDecoder {
    decoder: Box<dyn Decoder>,
    sample_buf: Option<SampleBuffer<f32>>,
    current_spec: Option<SignalSpec>,
    skipped_packets: u64,
}

impl PacketDecoder {
    pub fn new(demuxer: &Demuxer) -> Result<Self> {
        let track = demuxer
            .reader()
            .tracks()
            .iter()
            .find(|t| t.id == demuxer.track_id())
            .ok_or_else(|| Error::Format("Selected track vanished".to_string()))?;

        Self::from_params(&track.codec_params)
    }

    pub(crate) fn from_params(params: &CodecParameters) -> Result<Self> {
        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to create decoder: {e}")))?;

        Ok(Self {
            decoder,
            sample_buf: None,
            current_spec: None,
            skipped_packets: 0,
        })
    }

    /// Decode one packet. `Ok(None)` means the packet was corrupt or empty
    /// and was skipped; decoding continues with the next packet.
    pub fn decode(&mut self, packet: &Packet) -> Result<Option<PcmBlock>> {
        use symphonia::core::errors::Error as SymphoniaError;

        let decoded = match self.decoder.decode(packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                self.skipped_packets += 1;
                warn!(
                    "Skipping corrupt packet ({e}), {} skipped so far",
                    self.skipped_packets
                );
                return Ok(None);
            }
            Err(SymphoniaError::ResetRequired) => {
                // New stream parameters follow; drop buffered conversion
                // state and pick it up from the next packet.
                debug!("decoder reset required, clearing conversion state");
                self.decoder.reset();
                self.sample_buf = None;
                self.current_spec = None;
                return Ok(None);
            }
            Err(e) => return Err(Error::Decode(format!("Decoding failed: {e}"))),
        };

        if decoded.frames() == 0 {
            return Ok(None);
        }

        let spec = *decoded.spec();
        // (Re)allocate the conversion buffer on first use or when the signal
        // spec changes at a packet boundary.
        if self.current_spec != Some(spec)
            || self
                .sample_buf
                .as_ref()
                .map(|b| b.capacity() < decoded.capacity() * spec.channels.count())
                .unwrap_or(true)
        {
            self.sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
            self.current_spec = Some(spec);
        }

        let sample_buf = self.sample_buf.as_mut().unwrap();
        sample_buf.copy_interleaved_ref(decoded);

        Ok(Some(PcmBlock {
            samples: sample_buf.samples().to_vec(),
            spec: AudioSpec::new(spec.rate, spec.channels.count() as u16),
        }))
    }

    /// Reset codec state after a seek; decoders carry inter-frame state that
    /// would otherwise bleed across the discontinuity.
    pub fn reset(&mut self) {
        self.decoder.reset();
    }

    /// Packets dropped due to corruption since the context was created.
    pub fn skipped_packets(&self) -> u64 {
        self.skipped_packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::audio::Channels;
    use symphonia::core::codecs::CODEC_TYPE_MP3;

    fn mp3_decoder() -> PacketDecoder {
        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_MP3)
            .with_sample_rate(44100)
            .with_channels(Channels::FRONT_LEFT | Channels::FRONT_RIGHT);
        PacketDecoder::from_params(&params).unwrap()
    }

    #[test]
    fn test_corrupt_packets_are_skipped_not_fatal() {
        let mut decoder = mp3_decoder();

        // No sync word anywhere in this buffer; the codec rejects it as a
        // malformed frame rather than an I/O problem.
        let garbage = Packet::new_from_slice(0, 0, 0, &[0xAA; 417]);

        let result = decoder.decode(&garbage);
        assert!(matches!(result, Ok(None)), "corrupt packet aborted decode");
        assert_eq!(decoder.skipped_packets(), 1);

        // The context stays usable: further corrupt packets keep being
        // counted instead of wedging the stream.
        assert!(matches!(decoder.decode(&garbage), Ok(None)));
        assert_eq!(decoder.skipped_packets(), 2);
    }

    #[test]
    fn test_reset_preserves_skip_count() {
        let mut decoder = mp3_decoder();
        let garbage = Packet::new_from_slice(0, 0, 0, &[0x00; 128]);
        let _ = decoder.decode(&garbage);
        let skipped = decoder.skipped_packets();

        decoder.reset();
        assert_eq!(decoder.skipped_packets(), skipped);
    }
}
