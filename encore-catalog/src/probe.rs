//! Media duration probing.
//!
//! Raw media uploads record their playback duration alongside the blob key.
//! [`Mp3DurationProbe`] demuxes the stream with symphonia and sums packet
//! durations; it never decodes audio.

use std::io::Cursor;
use std::time::Duration;

use bytes::Bytes;
use encore_core::ValidationError;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Computes the playback duration of an uploaded payload.
pub trait DurationProbe: Send + Sync {
    fn probe(&self, content: Bytes) -> Result<Duration, ValidationError>;
}

/// Packet-counting probe for MPEG audio streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mp3DurationProbe;

fn undecodable(reason: impl Into<String>) -> ValidationError {
    ValidationError::UndecodableMedia {
        reason: reason.into(),
    }
}

impl DurationProbe for Mp3DurationProbe {
    fn probe(&self, content: Bytes) -> Result<Duration, ValidationError> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(content)), Default::default());
        let mut hint = Hint::new();
        hint.with_extension("mp3");

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| undecodable(format!("unrecognized stream: {}", e)))?;
        let mut format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| undecodable("no audio track"))?;
        let track_id = track.id;
        let time_base = track
            .codec_params
            .time_base
            .or_else(|| {
                track
                    .codec_params
                    .sample_rate
                    .map(|rate| symphonia::core::units::TimeBase::new(1, rate))
            })
            .ok_or_else(|| undecodable("no sample rate"))?;

        let mut ticks: u64 = 0;
        let mut packets = 0usize;
        loop {
            match format.next_packet() {
                Ok(packet) if packet.track_id() == track_id => {
                    ticks += packet.dur;
                    packets += 1;
                }
                Ok(_) => {}
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break
                }
                Err(SymphoniaError::ResetRequired) => break,
                // A damaged tail still leaves the leading frames playable.
                Err(e) if packets > 0 => {
                    tracing::debug!(error = %e, packets, "stopping probe at unreadable frame");
                    break;
                }
                Err(e) => return Err(undecodable(e.to_string())),
            }
        }

        if packets == 0 {
            return Err(undecodable("no MPEG audio frames found"));
        }

        let time = time_base.calc_time(ticks);
        Ok(Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One MPEG-1 Layer III frame, 128 kbps, 44.1 kHz, no padding (417 bytes).
    fn frame() -> Vec<u8> {
        let mut f = vec![0u8; 417];
        f[..4].copy_from_slice(&[0xff, 0xfb, 0x90, 0x00]);
        f
    }

    fn frames(n: usize) -> Vec<u8> {
        (0..n).flat_map(|_| frame()).collect()
    }

    fn micros(n: u64) -> i64 {
        (n * 1152 * 1_000_000 / 44_100) as i64
    }

    #[test]
    fn test_duration_sums_frames() {
        let duration = Mp3DurationProbe.probe(Bytes::from(frames(100))).unwrap();
        assert!((duration.as_micros() as i64 - micros(100)).abs() <= 100);
    }

    #[test]
    fn test_skips_id3v2_tag() {
        let mut content = b"ID3\x04\x00\x00\x00\x00\x00\x0a".to_vec();
        content.extend_from_slice(&[0u8; 10]);
        content.extend(frames(2));
        let duration = Mp3DurationProbe.probe(Bytes::from(content)).unwrap();
        assert!((duration.as_micros() as i64 - micros(2)).abs() <= 10);
    }

    #[test]
    fn test_truncated_last_frame_is_ignored() {
        let mut content = frames(3);
        content.extend_from_slice(&frame()[..100]);
        let whole = Mp3DurationProbe.probe(Bytes::from(frames(3))).unwrap();
        assert_eq!(Mp3DurationProbe.probe(Bytes::from(content)).unwrap(), whole);
    }

    #[test]
    fn test_non_audio_is_rejected() {
        let err = Mp3DurationProbe
            .probe(Bytes::from_static(b"definitely not audio"))
            .unwrap_err();
        assert!(matches!(err, ValidationError::UndecodableMedia { .. }));
        assert!(Mp3DurationProbe.probe(Bytes::new()).is_err());
    }
}
