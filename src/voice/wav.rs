//! WAV assembly for captured segments.
//!
//! Drains one speaker's subscription, decodes the packets to raw PCM,
//! prepends any pre-roll bytes, and writes a standard uncompressed WAV
//! container. The header layout is byte-exact; downstream tooling and the
//! transcription service both parse it.

use crate::error::{Result, ScribeError};
use crate::voice::capture::{AudioSubscription, PacketDecoder};
use std::path::Path;

/// Size of the RIFF/WAVE header in bytes.
pub const WAV_HEADER_LEN: usize = 44;

/// Writes decoded segment audio as 16-bit PCM WAV files.
#[derive(Debug, Clone)]
pub struct WavWriter {
    sample_rate: u32,
    channels: u16,
}

impl WavWriter {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Decodes a subscription's packets and saves them as a WAV file.
    ///
    /// `pre_roll` PCM bytes, if any, are prepended before the decoded
    /// stream. A stream or decode error abandons the segment: the error is
    /// returned and the caller is responsible for removing any partial file.
    pub async fn process_and_save(
        &self,
        mut subscription: AudioSubscription,
        decoder: &mut dyn PacketDecoder,
        output_path: &Path,
        pre_roll: Option<Vec<u8>>,
    ) -> Result<()> {
        let mut pcm = pre_roll.unwrap_or_default();

        while let Some(packet) = subscription.next_packet().await {
            let packet = packet.map_err(|e| ScribeError::Decode {
                message: format!("audio stream error: {e}"),
            })?;
            pcm.extend_from_slice(&decoder.decode(&packet)?);
        }

        self.write_wav(output_path, &pcm).await
    }

    /// Writes raw PCM bytes to `output_path` with a WAV header.
    pub async fn write_wav(&self, output_path: &Path, pcm: &[u8]) -> Result<()> {
        let mut file = Vec::with_capacity(WAV_HEADER_LEN + pcm.len());
        file.extend_from_slice(&self.header(pcm.len() as u32));
        file.extend_from_slice(pcm);
        tokio::fs::write(output_path, file).await?;
        Ok(())
    }

    /// Builds the 44-byte RIFF/WAVE header for `data_size` bytes of PCM.
    pub fn header(&self, data_size: u32) -> [u8; WAV_HEADER_LEN] {
        let mut header = [0u8; WAV_HEADER_LEN];
        let bits_per_sample: u16 = 16;
        let byte_rate = self.sample_rate * u32::from(self.channels) * u32::from(bits_per_sample / 8);
        let block_align = self.channels * (bits_per_sample / 8);

        // RIFF chunk descriptor
        header[0..4].copy_from_slice(b"RIFF");
        header[4..8].copy_from_slice(&(36 + data_size).to_le_bytes());
        header[8..12].copy_from_slice(b"WAVE");

        // fmt sub-chunk
        header[12..16].copy_from_slice(b"fmt ");
        header[16..20].copy_from_slice(&16u32.to_le_bytes());
        header[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
        header[22..24].copy_from_slice(&self.channels.to_le_bytes());
        header[24..28].copy_from_slice(&self.sample_rate.to_le_bytes());
        header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
        header[32..34].copy_from_slice(&block_align.to_le_bytes());
        header[34..36].copy_from_slice(&bits_per_sample.to_le_bytes());

        // data sub-chunk
        header[36..40].copy_from_slice(b"data");
        header[40..44].copy_from_slice(&data_size.to_le_bytes());

        header
    }
}
