//! Lossy quantized snapshot codec
//!
//! One entity's transient state packs into a fixed 10-byte record:
//! `entity_id u16 | pos_x i16 | pos_y i16 | pos_z i16 | yaw u16`, all
//! little-endian. Position axes scale by a configurable compression ratio
//! (default 50 per unit = 2 cm resolution, roughly +/-655 units of range);
//! yaw maps the full circle onto the u16 range. Axes outside the
//! representable range saturate instead of wrapping.
//!
//! Encoding is pure: a snapshot is a transmission artifact produced fresh
//! each broadcast tick, never stored as authoritative state.

use crate::game::entity::{Entity, EntityId};
use crate::util::vec3::{wrap_degrees, Vec3};

/// Bytes per encoded entity record
pub const RECORD_SIZE: usize = 10;

/// Bytes of batch header (record count, u16 LE)
pub const BATCH_HEADER_SIZE: usize = 2;

/// Default position scale: 50 steps per distance unit (2 cm)
pub const DEFAULT_COMPRESSION_RATIO: f32 = 50.0;

const YAW_SCALE: f32 = 65535.0 / 360.0;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CodecError {
    #[error("batch payload truncated: {0} bytes, need at least {BATCH_HEADER_SIZE}")]
    TruncatedBatch(usize),
}

/// Quantized wire form of one entity's state at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub entity_id: u16,
    pub pos: [i16; 3],
    pub yaw: u16,
}

/// Recovered approximate state after decode
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedSnapshot {
    pub entity_id: EntityId,
    pub position: Vec3,
    pub yaw: f32,
}

/// Decoded batch plus how many malformed trailing records were dropped
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBatch {
    pub snapshots: Vec<DecodedSnapshot>,
    pub skipped: usize,
}

/// Stateless encoder/decoder parameterized by the position scale
#[derive(Debug, Clone, Copy)]
pub struct SnapshotCodec {
    ratio: f32,
}

impl SnapshotCodec {
    pub fn new(compression_ratio: f32) -> Self {
        Self {
            ratio: compression_ratio,
        }
    }

    pub fn compression_ratio(&self) -> f32 {
        self.ratio
    }

    /// Quantize one entity's position and yaw. Pure; no side effects.
    pub fn encode(&self, entity_id: EntityId, position: Vec3, yaw: f32) -> SnapshotRecord {
        SnapshotRecord {
            entity_id: entity_id.0,
            pos: [
                self.quantize_axis(position.x),
                self.quantize_axis(position.y),
                self.quantize_axis(position.z),
            ],
            yaw: (wrap_degrees(yaw) * YAW_SCALE).round() as u16,
        }
    }

    /// Convenience over `encode` for live entities
    pub fn snapshot(&self, entity: &Entity) -> SnapshotRecord {
        self.encode(entity.id, entity.position, entity.yaw())
    }

    /// Reverse the scale to recover an approximate state
    pub fn decode(&self, record: SnapshotRecord) -> DecodedSnapshot {
        DecodedSnapshot {
            entity_id: EntityId(record.entity_id),
            position: Vec3::new(
                record.pos[0] as f32 / self.ratio,
                record.pos[1] as f32 / self.ratio,
                record.pos[2] as f32 / self.ratio,
            ),
            yaw: record.yaw as f32 / YAW_SCALE,
        }
    }

    #[inline]
    fn quantize_axis(&self, v: f32) -> i16 {
        // Scale and round in f64 so values at a .5 boundary stay within
        // half a step; saturate at the representable range rather than wrap
        (v as f64 * self.ratio as f64)
            .round()
            .clamp(i16::MIN as f64, i16::MAX as f64) as i16
    }

    /// Append a batch (count header plus records) to `buf`. The buffer is
    /// caller-owned so the broadcaster can reuse its allocation each tick.
    pub fn encode_batch(&self, records: &[SnapshotRecord], buf: &mut Vec<u8>) {
        debug_assert!(records.len() <= u16::MAX as usize);
        buf.clear();
        buf.reserve(BATCH_HEADER_SIZE + records.len() * RECORD_SIZE);
        buf.extend_from_slice(&(records.len() as u16).to_le_bytes());
        for record in records {
            buf.extend_from_slice(&record.entity_id.to_le_bytes());
            for axis in record.pos {
                buf.extend_from_slice(&axis.to_le_bytes());
            }
            buf.extend_from_slice(&record.yaw.to_le_bytes());
        }
    }

    /// Decode a batch payload. A count inconsistent with the payload
    /// length drops the incomplete trailing records and reports them in
    /// `skipped`; one corrupt message never takes the receiver down.
    pub fn decode_batch(&self, payload: &[u8]) -> Result<DecodedBatch, CodecError> {
        if payload.len() < BATCH_HEADER_SIZE {
            return Err(CodecError::TruncatedBatch(payload.len()));
        }
        let declared = u16::from_le_bytes([payload[0], payload[1]]) as usize;
        let body = &payload[BATCH_HEADER_SIZE..];
        let available = body.len() / RECORD_SIZE;
        let usable = declared.min(available);

        let mut snapshots = Vec::with_capacity(usable);
        for i in 0..usable {
            let rec = &body[i * RECORD_SIZE..(i + 1) * RECORD_SIZE];
            let record = SnapshotRecord {
                entity_id: u16::from_le_bytes([rec[0], rec[1]]),
                pos: [
                    i16::from_le_bytes([rec[2], rec[3]]),
                    i16::from_le_bytes([rec[4], rec[5]]),
                    i16::from_le_bytes([rec[6], rec[7]]),
                ],
                yaw: u16::from_le_bytes([rec[8], rec[9]]),
            };
            snapshots.push(self.decode(record));
        }

        Ok(DecodedBatch {
            snapshots,
            skipped: declared - usable,
        })
    }
}

impl Default for SnapshotCodec {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_RATIO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_round_trip_within_half_step() {
        let codec = SnapshotCodec::default();
        // Half a quantization step, plus slack for the f32 decode division
        let bound = 0.5 / codec.compression_ratio() + 1e-4;
        let mut rng = rand::thread_rng();

        for _ in 0..200 {
            let pos = Vec3::new(
                rng.gen_range(-600.0..600.0),
                rng.gen_range(-600.0..600.0),
                rng.gen_range(-600.0..600.0),
            );
            let yaw = rng.gen_range(0.0..360.0);

            let decoded = codec.decode(codec.encode(EntityId(1), pos, yaw));
            assert!((decoded.position.x - pos.x).abs() <= bound);
            assert!((decoded.position.y - pos.y).abs() <= bound);
            assert!((decoded.position.z - pos.z).abs() <= bound);

            let yaw_err = (decoded.yaw - yaw).abs().min((decoded.yaw - yaw + 360.0).abs());
            assert!(yaw_err <= 0.5 * 360.0 / 65535.0 + 1e-4);
        }
    }

    #[test]
    fn test_round_trip_bound_scales_with_ratio() {
        let codec = SnapshotCodec::new(10.0);
        let pos = Vec3::new(123.456, -78.91, 0.049);
        let decoded = codec.decode(codec.encode(EntityId(3), pos, 0.0));
        assert!((decoded.position.x - pos.x).abs() <= 0.05);
        assert!((decoded.position.y - pos.y).abs() <= 0.05);
        assert!((decoded.position.z - pos.z).abs() <= 0.05);
    }

    #[test]
    fn test_out_of_range_axis_saturates() {
        let codec = SnapshotCodec::default();
        let record = codec.encode(EntityId(0), Vec3::new(10_000.0, -10_000.0, 0.0), 0.0);
        assert_eq!(record.pos[0], i16::MAX);
        assert_eq!(record.pos[1], i16::MIN);
        assert_eq!(record.pos[2], 0);
    }

    #[test]
    fn test_yaw_wraps_before_quantization() {
        let codec = SnapshotCodec::default();
        let a = codec.encode(EntityId(0), Vec3::ZERO, 450.0);
        let b = codec.encode(EntityId(0), Vec3::ZERO, 90.0);
        assert_eq!(a.yaw, b.yaw);
    }

    #[test]
    fn test_batch_layout_is_ten_bytes_per_record() {
        let codec = SnapshotCodec::default();
        let records = vec![
            codec.encode(EntityId(1), Vec3::new(1.0, 2.0, 3.0), 10.0),
            codec.encode(EntityId(2), Vec3::new(-1.0, 0.0, 5.5), 200.0),
        ];
        let mut buf = Vec::new();
        codec.encode_batch(&records, &mut buf);
        assert_eq!(buf.len(), BATCH_HEADER_SIZE + 2 * RECORD_SIZE);
        assert_eq!(u16::from_le_bytes([buf[0], buf[1]]), 2);
    }

    #[test]
    fn test_batch_round_trip() {
        let codec = SnapshotCodec::default();
        let records: Vec<_> = (0..5)
            .map(|i| codec.encode(EntityId(i), Vec3::new(i as f32 * 3.0, 0.0, -2.0), i as f32 * 30.0))
            .collect();
        let mut buf = Vec::new();
        codec.encode_batch(&records, &mut buf);

        let batch = codec.decode_batch(&buf).unwrap();
        assert_eq!(batch.skipped, 0);
        assert_eq!(batch.snapshots.len(), 5);
        for (i, snap) in batch.snapshots.iter().enumerate() {
            assert_eq!(snap.entity_id, EntityId(i as u16));
        }
    }

    #[test]
    fn test_malformed_batch_skips_incomplete_records() {
        let codec = SnapshotCodec::default();
        let records: Vec<_> = (0..3)
            .map(|i| codec.encode(EntityId(i), Vec3::ZERO, 0.0))
            .collect();
        let mut buf = Vec::new();
        codec.encode_batch(&records, &mut buf);

        // Chop the last record in half: count says 3, payload holds 2.5
        buf.truncate(buf.len() - RECORD_SIZE / 2);
        let batch = codec.decode_batch(&buf).unwrap();
        assert_eq!(batch.snapshots.len(), 2);
        assert_eq!(batch.skipped, 1);
    }

    #[test]
    fn test_overdeclared_count_does_not_overread() {
        let codec = SnapshotCodec::default();
        let mut buf = Vec::new();
        codec.encode_batch(&[codec.encode(EntityId(9), Vec3::ZERO, 0.0)], &mut buf);
        // Corrupt the count upward
        buf[0] = 200;
        let batch = codec.decode_batch(&buf).unwrap();
        assert_eq!(batch.snapshots.len(), 1);
        assert_eq!(batch.skipped, 199);
    }

    #[test]
    fn test_truncated_header_rejected() {
        let codec = SnapshotCodec::default();
        assert_eq!(
            codec.decode_batch(&[0x01]),
            Err(CodecError::TruncatedBatch(1))
        );
    }

    #[test]
    fn test_empty_batch() {
        let codec = SnapshotCodec::default();
        let mut buf = Vec::new();
        codec.encode_batch(&[], &mut buf);
        let batch = codec.decode_batch(&buf).unwrap();
        assert!(batch.snapshots.is_empty());
        assert_eq!(batch.skipped, 0);
    }
}
