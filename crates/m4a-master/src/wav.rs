//! WAV encoding for 16-bit stereo PCM.

use m4a_ir::StereoSample;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const NUM_CHANNELS: u16 = 2;
const BITS_PER_SAMPLE: u16 = 16;
const BLOCK_ALIGN: u16 = NUM_CHANNELS * (BITS_PER_SAMPLE / 8);
const HEADER_LEN: usize = 44;

pub fn write_wav(w: &mut impl Write, samples: &[StereoSample], sample_rate: u32) -> std::io::Result<()> {
    let data_size = samples.len() as u32 * u32::from(BLOCK_ALIGN);
    w.write_all(&wav_header(data_size, sample_rate))?;
    for s in samples {
        let (left, right) = s.to_i16();
        w.write_all(&left.to_le_bytes())?;
        w.write_all(&right.to_le_bytes())?;
    }
    Ok(())
}

pub fn samples_to_wav(samples: &[StereoSample], sample_rate: u32) -> Vec<u8> {
    let data_size = samples.len() * usize::from(BLOCK_ALIGN);
    let mut buf = Vec::with_capacity(HEADER_LEN + data_size);
    buf.extend_from_slice(&wav_header(data_size as u32, sample_rate));
    for s in samples {
        let (left, right) = s.to_i16();
        buf.extend_from_slice(&left.to_le_bytes());
        buf.extend_from_slice(&right.to_le_bytes());
    }
    buf
}

pub fn write_wav_file(path: &Path, samples: &[StereoSample], sample_rate: u32) -> std::io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    write_wav(&mut w, samples, sample_rate)?;
    w.flush()
}

fn wav_header(data_size: u32, sample_rate: u32) -> [u8; HEADER_LEN] {
    let mut h = [0u8; HEADER_LEN];
    h[0..4].copy_from_slice(b"RIFF");
    h[4..8].copy_from_slice(&(36 + data_size).to_le_bytes());
    h[8..12].copy_from_slice(b"WAVE");

    h[12..16].copy_from_slice(b"fmt ");
    h[16..20].copy_from_slice(&16u32.to_le_bytes());
    h[20..22].copy_from_slice(&1u16.to_le_bytes());
    h[22..24].copy_from_slice(&NUM_CHANNELS.to_le_bytes());
    h[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    h[28..32].copy_from_slice(&(sample_rate * u32::from(BLOCK_ALIGN)).to_le_bytes());
    h[32..34].copy_from_slice(&BLOCK_ALIGN.to_le_bytes());
    h[34..36].copy_from_slice(&BITS_PER_SAMPLE.to_le_bytes());

    h[36..40].copy_from_slice(b"data");
    h[40..44].copy_from_slice(&data_size.to_le_bytes());
    h
}
