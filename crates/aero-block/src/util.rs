use crate::{DeviceError, Result};

/// Validate that `[offset, offset + len)` lies within a device of `capacity` bytes.
pub fn checked_range(offset: u32, len: usize, capacity: u32) -> Result<()> {
    let end = (offset as u64)
        .checked_add(len as u64)
        .ok_or(DeviceError::OffsetOverflow)?;
    if end > capacity as u64 {
        return Err(DeviceError::OutOfRange {
            offset,
            len,
            capacity,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_ending_at_capacity_is_accepted() {
        checked_range(0, 512, 512).unwrap();
        checked_range(512, 0, 512).unwrap();
    }

    #[test]
    fn range_past_capacity_is_rejected() {
        let err = checked_range(500, 13, 512).unwrap_err();
        assert!(matches!(
            err,
            DeviceError::OutOfRange {
                offset: 500,
                len: 13,
                capacity: 512
            }
        ));
    }

    #[test]
    fn range_does_not_wrap_at_u32_max() {
        assert!(checked_range(u32::MAX, 2, u32::MAX).is_err());
    }
}
