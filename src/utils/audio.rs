use anyhow::{anyhow, bail, Result};
use std::io::{Read, Seek, SeekFrom, Write};

/// Output format of the speech model: 16-bit signed little-endian mono PCM at 24 kHz.
pub const SAMPLE_RATE: u32 = 24_000;
pub const CHANNELS: u16 = 1;
pub const BITS_PER_SAMPLE: u16 = 16;
pub const WAV_HEADER_LEN: usize = 44;

/// Decoded mono audio, samples normalised to [-1.0, 1.0).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Reinterprets raw bytes as 16-bit signed little-endian PCM.
    /// A trailing odd byte is dropped.
    pub fn from_pcm16(bytes: &[u8], sample_rate: u32) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
            .collect();
        Self::new(samples, sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

fn to_pcm16(sample: f32) -> i16 {
    (sample * 32767.0).round().clamp(-32768.0, 32767.0) as i16
}

/// Concatenates `buffers` and wraps them in a canonical 44-byte PCM WAV container.
pub fn encode_wav<W: Write>(buffers: &[AudioBuffer], out: &mut W) -> Result<()> {
    let sample_count: usize = buffers.iter().map(|b| b.len()).sum();
    let data_size = u32::try_from(sample_count * 2)
        .map_err(|_| anyhow!("Audio too long for a WAV container ({} samples)", sample_count))?;

    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate = SAMPLE_RATE * block_align as u32;

    out.write_all(b"RIFF")?;
    out.write_all(&(36 + data_size).to_le_bytes())?;
    out.write_all(b"WAVE")?;

    out.write_all(b"fmt ")?;
    out.write_all(&16u32.to_le_bytes())?;
    out.write_all(&1u16.to_le_bytes())?;
    out.write_all(&CHANNELS.to_le_bytes())?;
    out.write_all(&SAMPLE_RATE.to_le_bytes())?;
    out.write_all(&byte_rate.to_le_bytes())?;
    out.write_all(&block_align.to_le_bytes())?;
    out.write_all(&BITS_PER_SAMPLE.to_le_bytes())?;

    out.write_all(b"data")?;
    out.write_all(&data_size.to_le_bytes())?;

    for buffer in buffers {
        for &sample in buffer.samples() {
            out.write_all(&to_pcm16(sample).to_le_bytes())?;
        }
    }
    Ok(())
}

pub fn wav_bytes(buffers: &[AudioBuffer]) -> Result<Vec<u8>> {
    let sample_count: usize = buffers.iter().map(|b| b.len()).sum();
    let mut out = Vec::with_capacity(WAV_HEADER_LEN + sample_count * 2);
    encode_wav(buffers, &mut out)?;
    Ok(out)
}

/// Header fields of a PCM WAV stream.
#[derive(Debug, Clone, PartialEq)]
pub struct WavInfo {
    pub riff_size: u32,
    pub fmt_size: u32,
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub data_offset: u64,
    pub data_size: u32,
}

/// Walks the RIFF chunks up to `data`, skipping unknown chunks.
pub fn scan_wav<R: Read + Seek>(reader: &mut R) -> Result<WavInfo> {
    let mut id = [0u8; 4];
    reader.read_exact(&mut id)?;
    if &id != b"RIFF" {
        bail!("Not a RIFF file");
    }

    let mut size_buf = [0u8; 4];
    reader.read_exact(&mut size_buf)?;
    let riff_size = u32::from_le_bytes(size_buf);

    reader.read_exact(&mut id)?;
    if &id != b"WAVE" {
        bail!("Not a WAVE file");
    }

    let mut fmt: Option<Vec<u8>> = None;
    loop {
        let mut chunk_id = [0u8; 4];
        let n = reader.read(&mut chunk_id)?;
        if n == 0 {
            bail!("Missing data chunk");
        }
        if n < 4 {
            reader.read_exact(&mut chunk_id[n..])?;
        }

        reader.read_exact(&mut size_buf)?;
        let chunk_size = u32::from_le_bytes(size_buf);

        if &chunk_id == b"fmt " {
            let mut buf = vec![0u8; chunk_size as usize];
            reader.read_exact(&mut buf)?;
            fmt = Some(buf);
        } else if &chunk_id == b"data" {
            let fmt = fmt.ok_or_else(|| anyhow!("Missing fmt chunk"))?;
            if fmt.len() < 16 {
                bail!("fmt chunk too short ({} bytes)", fmt.len());
            }
            let u16_at = |i: usize| u16::from_le_bytes([fmt[i], fmt[i + 1]]);
            let u32_at = |i: usize| u32::from_le_bytes([fmt[i], fmt[i + 1], fmt[i + 2], fmt[i + 3]]);
            return Ok(WavInfo {
                riff_size,
                fmt_size: fmt.len() as u32,
                audio_format: u16_at(0),
                channels: u16_at(2),
                sample_rate: u32_at(4),
                byte_rate: u32_at(8),
                block_align: u16_at(12),
                bits_per_sample: u16_at(14),
                data_offset: reader.stream_position()?,
                data_size: chunk_size,
            });
        } else {
            reader.seek(SeekFrom::Current(chunk_size as i64))?;
        }
    }
}

/// Reads the 16-bit samples of a PCM WAV stream.
pub fn read_wav_samples<R: Read + Seek>(reader: &mut R) -> Result<(WavInfo, Vec<i16>)> {
    let info = scan_wav(reader)?;
    if info.audio_format != 1 || info.bits_per_sample != 16 {
        bail!(
            "Unsupported WAV encoding (format {}, {} bits)",
            info.audio_format,
            info.bits_per_sample
        );
    }
    reader.seek(SeekFrom::Start(info.data_offset))?;
    let mut data = Vec::with_capacity(info.data_size as usize);
    reader.take(info.data_size as u64).read_to_end(&mut data)?;
    let samples = data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok((info, samples))
}
