/// One luminance plane (the Y plane of a camera frame) with capture metadata.
///
/// Binary record format (replay files and raw `.luma` dumps), big-endian:
///
///   [0..8]   captured_at_ms  (i64, Unix millis)
///   [8..16]  seq             (u64, sequence number)
///   [16..20] width           (u32, pixels per row)
///   [20..24] sample_len      (u32)
///   [24..24+sample_len] samples (row-major 8-bit luminance)
///
/// Records are self-delimiting, so a replay file is simply records back to back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LumaFrame {
    pub samples: Vec<u8>,
    pub width: u32,
    pub captured_at_ms: i64,
    pub seq: u64,
}

const HEADER_SIZE: usize = 24;

impl LumaFrame {
    pub fn new(samples: Vec<u8>, width: u32, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            samples,
            width,
            captured_at_ms,
            seq,
        }
    }

    /// Number of complete rows. Zero when `width` is zero.
    pub fn height(&self) -> u32 {
        if self.width == 0 {
            return 0;
        }
        (self.samples.len() / self.width as usize) as u32
    }

    // -- Serialization ----------------------------------------------------------

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.samples.len());
        buf.extend_from_slice(&self.captured_at_ms.to_be_bytes());
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.extend_from_slice(&self.width.to_be_bytes());
        buf.extend_from_slice(&(self.samples.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.samples);
        buf
    }

    /// Decode one record from the front of `data`.
    /// Returns the frame and the number of bytes consumed.
    pub fn deserialize(data: &[u8]) -> Result<(Self, usize), FrameError> {
        if data.len() < HEADER_SIZE {
            return Err(FrameError::TooShort {
                got: data.len(),
                expected: HEADER_SIZE,
            });
        }
        let captured_at_ms = i64::from_be_bytes(array8(&data[0..8]));
        let seq = u64::from_be_bytes(array8(&data[8..16]));
        let width = u32::from_be_bytes(array4(&data[16..20]));
        let sample_len = u32::from_be_bytes(array4(&data[20..24])) as usize;
        let end = HEADER_SIZE + sample_len;
        if data.len() < end {
            return Err(FrameError::TooShort {
                got: data.len(),
                expected: end,
            });
        }
        let frame = Self {
            samples: data[HEADER_SIZE..end].to_vec(),
            width,
            captured_at_ms,
            seq,
        };
        Ok((frame, end))
    }

    /// Decode every record in a buffer of concatenated records.
    pub fn deserialize_all(mut data: &[u8]) -> Result<Vec<Self>, FrameError> {
        let mut frames = Vec::new();
        while !data.is_empty() {
            let (frame, used) = Self::deserialize(data)?;
            frames.push(frame);
            data = &data[used..];
        }
        Ok(frames)
    }

    /// Storage-relative file name for this frame, grouped by capture date.
    /// e.g. "2026-02-18/radiograph_1739871000000.jpg"
    pub fn file_name(&self, prefix: &str, ext: &str) -> String {
        let dt = chrono::DateTime::from_timestamp_millis(self.captured_at_ms)
            .unwrap_or_else(chrono::Utc::now);
        format!(
            "{date}/{prefix}{ms}.{ext}",
            date = dt.format("%Y-%m-%d"),
            ms = self.captured_at_ms
        )
    }
}

fn array8(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(bytes);
    out
}

fn array4(bytes: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(bytes);
    out
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame record too short: got {got} bytes, expected at least {expected}")]
    TooShort { got: usize, expected: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_roundtrip() {
        let frame = LumaFrame::new(vec![0, 12, 31, 255, 7, 9], 3, 1708300000000, 42);
        let bytes = frame.serialize();
        assert_eq!(bytes.len(), HEADER_SIZE + 6);
        let (decoded, used) = LumaFrame::deserialize(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(decoded, frame);
        assert_eq!(decoded.height(), 2);
    }

    #[test]
    fn concatenated_records() {
        let a = LumaFrame::new(vec![1, 2], 2, 1000, 1);
        let b = LumaFrame::new(vec![3, 4, 5, 6], 2, 1100, 2);
        let mut bytes = a.serialize();
        bytes.extend(b.serialize());
        let frames = LumaFrame::deserialize_all(&bytes).unwrap();
        assert_eq!(frames, vec![a, b]);
    }

    #[test]
    fn truncated_header() {
        let result = LumaFrame::deserialize(&[0; 10]);
        assert!(matches!(
            result,
            Err(FrameError::TooShort { got: 10, expected: HEADER_SIZE })
        ));
    }

    #[test]
    fn truncated_samples() {
        let mut bytes = LumaFrame::new(vec![9; 16], 4, 1000, 1).serialize();
        bytes.truncate(bytes.len() - 3);
        assert!(LumaFrame::deserialize(&bytes).is_err());
        assert!(LumaFrame::deserialize_all(&bytes).is_err());
    }

    #[test]
    fn zero_width_has_no_rows() {
        let frame = LumaFrame::new(vec![1, 2, 3], 0, 0, 0);
        assert_eq!(frame.height(), 0);
    }

    #[test]
    fn file_name_is_grouped_by_date() {
        // 2025-02-18T09:30:00.000Z
        let frame = LumaFrame::new(vec![], 1, 1739871000000, 7);
        let name = frame.file_name("radiograph_", "jpg");
        assert_eq!(name, "2025-02-18/radiograph_1739871000000.jpg");
    }
}
