use std::ops::Range;

use crate::error::UploadError;

const MEGABYTE: u64 = 1024 * 1024; // 1MB
pub const MIN_PART_SIZE_BYTES: u64 = 5 * MEGABYTE;
const MAX_PART_SIZE_BYTES: u64 = 5 * 1024 * MEGABYTE;
const MAX_PARTS_COUNT: u64 = 10000;

/// Picks the part size to request for a payload of `file_size` bytes.
///
/// Starts from `preferred` (never below the 5 MiB storage minimum) and grows
/// it when the payload would otherwise need more than 10 000 parts.
pub fn choose_part_size(file_size: u64, preferred: u64) -> Result<u64, UploadError> {
    let mut part_size = preferred.max(MIN_PART_SIZE_BYTES);

    if file_size.div_ceil(part_size) > MAX_PARTS_COUNT {
        part_size = file_size.div_ceil(MAX_PARTS_COUNT);

        if part_size > MAX_PART_SIZE_BYTES {
            let max_file_size = MAX_PART_SIZE_BYTES * MAX_PARTS_COUNT;
            return Err(UploadError::Planning(format!(
                "file size ({} bytes) exceeds maximum uploadable size ({} bytes = {} parts * {} bytes)",
                file_size, max_file_size, MAX_PARTS_COUNT, MAX_PART_SIZE_BYTES
            )));
        }
    }

    Ok(part_size)
}

/// Byte ranges of a payload split into fixed-size parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    size: u64,
    part_size: u64,
    total_parts: u32,
}

impl PartPlan {
    pub fn new(size: u64, part_size: u64) -> Result<Self, UploadError> {
        if part_size == 0 {
            return Err(UploadError::Planning("part size must be positive".to_string()));
        }

        let total_parts = u32::try_from(size.div_ceil(part_size)).map_err(|_| {
            UploadError::Planning(format!(
                "{} bytes in {} byte parts is too many parts",
                size, part_size
            ))
        })?;

        Ok(Self {
            size,
            part_size,
            total_parts,
        })
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn total_parts(&self) -> u32 {
        self.total_parts
    }

    /// Half-open byte range of the 1-based `part_number`.
    pub fn range(&self, part_number: u32) -> Option<Range<u64>> {
        if part_number == 0 || part_number > self.total_parts {
            return None;
        }

        let start = u64::from(part_number - 1) * self.part_size;
        let end = (start + self.part_size).min(self.size);
        Some(start..end)
    }

    /// Every part in ascending order, paired with its 1-based number.
    pub fn parts(&self) -> impl Iterator<Item = (u32, Range<u64>)> + '_ {
        (1..=self.total_parts).filter_map(|n| self.range(n).map(|r| (n, r)))
    }
}
