//! Sample-rate and channel-layout conversion
//!
//! Stateless, deterministic transforms applied to each decoded block right
//! before the ring-buffer write. Linear interpolation keeps the cost low,
//! which is fine for speech-dominated podcast content.

use crate::render::AudioSpec;

/// Convert a block of interleaved samples from one spec to another.
///
/// Channel conversion runs first (layouts beyond stereo are downmixed to
/// stereo, then mono<->stereo as needed), followed by rate conversion.
pub fn convert(input: &[f32], from: AudioSpec, to: AudioSpec) -> Vec<f32> {
    if from.sample_rate == to.sample_rate && from.channels == to.channels {
        return input.to_vec();
    }

    let (mut samples, mut channels) = (input.to_vec(), from.channels);

    if channels > 2 {
        samples = downmix_to_stereo(&samples, channels);
        channels = 2;
    }

    if channels != to.channels {
        samples = convert_channels(&samples, channels, to.channels);
        channels = to.channels;
    }

    if from.sample_rate != to.sample_rate {
        samples = resample_linear(&samples, channels, from.sample_rate, to.sample_rate);
    }

    samples
}

/// Average surround channels onto the front pair.
fn downmix_to_stereo(input: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    let frames = input.len() / ch;
    let mut output = Vec::with_capacity(frames * 2);

    for frame in input.chunks_exact(ch) {
        let mut left = frame[0];
        let mut right = frame[1];
        // Spread the remaining channels evenly across both sides.
        for &sample in &frame[2..] {
            left += sample * 0.5;
            right += sample * 0.5;
        }
        let scale = 1.0 / (1.0 + (ch - 2) as f32 * 0.5);
        output.push(left * scale);
        output.push(right * scale);
    }

    output
}

fn convert_channels(input: &[f32], from: u16, to: u16) -> Vec<f32> {
    match (from, to) {
        (1, 2) => {
            // Mono to stereo: duplicate each sample
            let mut output = Vec::with_capacity(input.len() * 2);
            for &sample in input {
                output.push(sample);
                output.push(sample);
            }
            output
        }
        (2, 1) => {
            // Stereo to mono: average L and R
            let mut output = Vec::with_capacity(input.len() / 2);
            for frame in input.chunks_exact(2) {
                output.push((frame[0] + frame[1]) * 0.5);
            }
            output
        }
        _ => input.to_vec(),
    }
}

/// Linear-interpolation rate conversion over interleaved frames.
fn resample_linear(input: &[f32], channels: u16, from_rate: u32, to_rate: u32) -> Vec<f32> {
    let ch = channels as usize;
    let input_frames = input.len() / ch;
    if input_frames == 0 {
        return Vec::new();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let output_frames = (input_frames as f64 * ratio).round() as usize;
    let mut output = Vec::with_capacity(output_frames * ch);

    for out_idx in 0..output_frames {
        let src = out_idx as f64 / ratio;
        let lo = src.floor() as usize;
        let hi = (lo + 1).min(input_frames - 1);
        let frac = (src - lo as f64) as f32;

        for c in 0..ch {
            let a = input[lo * ch + c];
            let b = input[hi * ch + c];
            output.push(a + (b - a) * frac);
        }
    }

    output
}
