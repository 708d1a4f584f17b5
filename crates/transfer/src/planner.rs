use std::fmt;

use crate::{GIB, KIB, MIB, TransferError};

/// Baseline chunk size.
const BASE_CHUNK_SIZE: u64 = 5 * MIB;
/// Chunk size for files above [`LARGE_FILE_THRESHOLD`].
const LARGE_CHUNK_SIZE: u64 = 10 * MIB;
/// Chunk size for files above [`HUGE_FILE_THRESHOLD`].
const HUGE_CHUNK_SIZE: u64 = 20 * MIB;

const LARGE_FILE_THRESHOLD: u64 = GIB;
const HUGE_FILE_THRESHOLD: u64 = 5 * GIB;

/// Half-open byte range `[start, end)` within the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Size limits imposed by the backend, plus an optional caller request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkConstraints {
    pub min_file_size: u64,
    pub max_file_size: u64,
    /// Hard floor for a chunk.
    pub min_chunk_size: u64,
    /// Hard ceiling for a chunk.
    pub max_chunk_size: u64,
    /// Chunks smaller than this work but are slow and hammer the backend.
    pub recommended_min_chunk_size: u64,
    /// Chunk size asked for by the caller or negotiated by the backend.
    pub requested_chunk_size: Option<u64>,
}

impl Default for ChunkConstraints {
    fn default() -> Self {
        Self {
            min_file_size: KIB,
            max_file_size: 10 * GIB,
            min_chunk_size: MIB,
            max_chunk_size: 50 * MIB,
            recommended_min_chunk_size: BASE_CHUNK_SIZE,
            requested_chunk_size: None,
        }
    }
}

impl ChunkConstraints {
    /// Returns a copy with a requested chunk size.
    pub fn with_requested(mut self, chunk_size: Option<u64>) -> Self {
        self.requested_chunk_size = chunk_size;
        self
    }
}

/// Non-fatal observations made while planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanWarning {
    /// Requested size is allowed but under the recommended minimum.
    BelowRecommended { requested: u64, recommended: u64 },
    /// Requested size was outside the hard bounds and got clamped.
    Clamped { requested: u64, applied: u64 },
}

impl fmt::Display for PlanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanWarning::BelowRecommended {
                requested,
                recommended,
            } => write!(
                f,
                "chunk size {requested} bytes is below the recommended minimum of {recommended} bytes"
            ),
            PlanWarning::Clamped { requested, applied } => write!(
                f,
                "chunk size {requested} bytes is outside the allowed range, using {applied} bytes"
            ),
        }
    }
}

/// Result of planning: chunk size, count, and the exact range of every part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunk_size: u64,
    pub total_chunks: u32,
    /// `ranges[i]` belongs to part number `i + 1`.
    pub ranges: Vec<ByteRange>,
    pub warnings: Vec<PlanWarning>,
}

impl ChunkPlan {
    /// Size of the final part.
    pub fn last_chunk_size(&self) -> u64 {
        self.ranges.last().map(ByteRange::len).unwrap_or(0)
    }
}

/// Picks the default chunk size for a file, before clamping.
pub fn default_chunk_size(file_size: u64) -> u64 {
    if file_size > HUGE_FILE_THRESHOLD {
        HUGE_CHUNK_SIZE
    } else if file_size > LARGE_FILE_THRESHOLD {
        LARGE_CHUNK_SIZE
    } else {
        BASE_CHUNK_SIZE
    }
}

/// Splits `file_size` bytes into contiguous parts.
///
/// Pure: the same inputs always produce the same plan.
pub fn plan_chunks(
    file_size: u64,
    constraints: &ChunkConstraints,
) -> Result<ChunkPlan, TransferError> {
    if constraints.min_chunk_size == 0 || constraints.min_chunk_size > constraints.max_chunk_size
    {
        return Err(TransferError::InvalidInput(format!(
            "inconsistent chunk bounds: {}..={}",
            constraints.min_chunk_size, constraints.max_chunk_size
        )));
    }
    if file_size == 0 {
        return Err(TransferError::InvalidInput("file is empty".into()));
    }
    if file_size < constraints.min_file_size {
        return Err(TransferError::InvalidInput(format!(
            "file is {file_size} bytes, minimum supported size is {} bytes",
            constraints.min_file_size
        )));
    }
    if file_size > constraints.max_file_size {
        return Err(TransferError::InvalidInput(format!(
            "file is {file_size} bytes, maximum supported size is {} bytes",
            constraints.max_file_size
        )));
    }

    let mut warnings = Vec::new();
    let wanted = constraints
        .requested_chunk_size
        .unwrap_or_else(|| default_chunk_size(file_size));
    let chunk_size = wanted.clamp(constraints.min_chunk_size, constraints.max_chunk_size);

    if let Some(requested) = constraints.requested_chunk_size {
        if chunk_size != requested {
            warnings.push(PlanWarning::Clamped {
                requested,
                applied: chunk_size,
            });
        } else if requested < constraints.recommended_min_chunk_size {
            warnings.push(PlanWarning::BelowRecommended {
                requested,
                recommended: constraints.recommended_min_chunk_size,
            });
        }
    }

    let total = file_size.div_ceil(chunk_size);
    let total_chunks = u32::try_from(total).map_err(|_| {
        TransferError::InvalidInput(format!("{total} chunks exceed the part number space"))
    })?;

    let ranges = (0..total)
        .map(|i| ByteRange::new(i * chunk_size, ((i + 1) * chunk_size).min(file_size)))
        .collect();

    Ok(ChunkPlan {
        chunk_size,
        total_chunks,
        ranges,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(size: u64) -> ChunkPlan {
        plan_chunks(size, &ChunkConstraints::default()).unwrap()
    }

    fn assert_covers(plan: &ChunkPlan, file_size: u64) {
        let mut cursor = 0;
        for range in &plan.ranges {
            assert_eq!(range.start, cursor, "gap or overlap at {cursor}");
            assert!(!range.is_empty(), "zero-length range {range}");
            assert!(range.len() <= plan.chunk_size);
            cursor = range.end;
        }
        assert_eq!(cursor, file_size);
        assert_eq!(
            plan.total_chunks as u64,
            file_size.div_ceil(plan.chunk_size)
        );
        assert_eq!(plan.ranges.len(), plan.total_chunks as usize);
    }

    #[test]
    fn twelve_mib_uses_three_parts() {
        let p = plan(12 * MIB);
        assert_eq!(p.chunk_size, 5 * MIB);
        assert_eq!(p.total_chunks, 3);
        assert_eq!(p.last_chunk_size(), 2 * MIB);
        assert!(p.warnings.is_empty());
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        let p = plan(10 * MIB);
        assert_eq!(p.total_chunks, 2);
        assert_eq!(p.last_chunk_size(), 5 * MIB);
    }

    #[test]
    fn single_byte_final_chunk() {
        let p = plan(5 * MIB + 1);
        assert_eq!(p.total_chunks, 2);
        assert_eq!(p.last_chunk_size(), 1);
    }

    #[test]
    fn one_byte_short_of_multiple() {
        let p = plan(10 * MIB - 1);
        assert_eq!(p.total_chunks, 2);
        assert_eq!(p.last_chunk_size(), 5 * MIB - 1);
    }

    #[test]
    fn small_file_is_one_part() {
        let p = plan(KIB);
        assert_eq!(p.total_chunks, 1);
        assert_eq!(p.ranges[0], ByteRange::new(0, KIB));
    }

    #[test]
    fn chunk_size_escalates_with_file_size() {
        assert_eq!(plan(GIB).chunk_size, 5 * MIB);
        assert_eq!(plan(GIB + 1).chunk_size, 10 * MIB);
        assert_eq!(plan(5 * GIB).chunk_size, 10 * MIB);
        assert_eq!(plan(5 * GIB + 1).chunk_size, 20 * MIB);
    }

    #[test]
    fn coverage_over_boundary_sizes() {
        let sizes = [
            KIB,
            KIB + 1,
            MIB - 1,
            MIB,
            5 * MIB - 1,
            5 * MIB,
            5 * MIB + 1,
            12 * MIB,
            123_456_789,
            GIB,
            GIB + 1,
            5 * GIB + 7,
            10 * GIB,
        ];
        for size in sizes {
            assert_covers(&plan(size), size);
        }
    }

    #[test]
    fn coverage_with_odd_requested_sizes() {
        for requested in [MIB, MIB + 3, 7 * MIB + 11, 50 * MIB] {
            let constraints = ChunkConstraints::default().with_requested(Some(requested));
            for size in [KIB, 3 * MIB + 5, 99 * MIB + 1] {
                let p = plan_chunks(size, &constraints).unwrap();
                assert_eq!(p.chunk_size, requested);
                assert_covers(&p, size);
            }
        }
    }

    #[test]
    fn rejects_empty_file() {
        let err = plan_chunks(0, &ChunkConstraints::default()).unwrap_err();
        assert!(matches!(err, TransferError::InvalidInput(_)));
    }

    #[test]
    fn rejects_too_small_file() {
        let err = plan_chunks(KIB - 1, &ChunkConstraints::default()).unwrap_err();
        assert!(err.to_string().contains("minimum"));
    }

    #[test]
    fn rejects_too_large_file() {
        let err = plan_chunks(10 * GIB + 1, &ChunkConstraints::default()).unwrap_err();
        assert!(err.to_string().contains("maximum"));
    }

    #[test]
    fn requested_below_recommended_warns() {
        let constraints = ChunkConstraints::default().with_requested(Some(2 * MIB));
        let p = plan_chunks(12 * MIB, &constraints).unwrap();
        assert_eq!(p.chunk_size, 2 * MIB);
        assert_eq!(p.total_chunks, 6);
        assert_eq!(
            p.warnings,
            vec![PlanWarning::BelowRecommended {
                requested: 2 * MIB,
                recommended: 5 * MIB,
            }]
        );
    }

    #[test]
    fn requested_below_floor_is_clamped() {
        let constraints = ChunkConstraints::default().with_requested(Some(64 * KIB));
        let p = plan_chunks(12 * MIB, &constraints).unwrap();
        assert_eq!(p.chunk_size, MIB);
        assert_eq!(
            p.warnings,
            vec![PlanWarning::Clamped {
                requested: 64 * KIB,
                applied: MIB,
            }]
        );
    }

    #[test]
    fn requested_above_ceiling_is_clamped() {
        let constraints = ChunkConstraints::default().with_requested(Some(80 * MIB));
        let p = plan_chunks(200 * MIB, &constraints).unwrap();
        assert_eq!(p.chunk_size, 50 * MIB);
        assert_eq!(p.total_chunks, 4);
        assert!(matches!(p.warnings[0], PlanWarning::Clamped { .. }));
    }

    #[test]
    fn inconsistent_bounds_rejected() {
        let constraints = ChunkConstraints {
            min_chunk_size: 10 * MIB,
            max_chunk_size: MIB,
            ..Default::default()
        };
        assert!(plan_chunks(12 * MIB, &constraints).is_err());
    }

    #[test]
    fn warning_display() {
        let w = PlanWarning::Clamped {
            requested: 1,
            applied: MIB,
        };
        assert!(w.to_string().contains("1048576"));
    }
}
