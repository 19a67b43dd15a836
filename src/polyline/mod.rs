use crate::error::AppError;
use crate::models::location::GeoPoint;

const CHAR_OFFSET: u8 = 63;
const CHUNK_MASK: i64 = 0x1f;
const CONTINUATION_BIT: i64 = 0x20;
const PRECISION: f64 = 1e5;
// 7 chunks carry 35 bits, enough for any 32-bit delta.
const MAX_SHIFT: u32 = 30;

pub fn decode(encoded: &str) -> Result<Vec<GeoPoint>, AppError> {
    let bytes = encoded.as_bytes();
    let mut points = Vec::with_capacity(bytes.len() / 4);
    let mut index = 0;
    let mut lat: i64 = 0;
    let mut lng: i64 = 0;

    while index < bytes.len() {
        lat += next_delta(bytes, &mut index)?;

        if index >= bytes.len() {
            return Err(malformed(index, "latitude without longitude"));
        }
        lng += next_delta(bytes, &mut index)?;

        points.push(GeoPoint::new(lat as f64 / PRECISION, lng as f64 / PRECISION));
    }

    Ok(points)
}

fn next_delta(bytes: &[u8], index: &mut usize) -> Result<i64, AppError> {
    let mut result: i64 = 0;
    let mut shift: u32 = 0;

    loop {
        let Some(&byte) = bytes.get(*index) else {
            return Err(malformed(*index, "truncated group"));
        };
        if !(CHAR_OFFSET..0x7f).contains(&byte) {
            return Err(malformed(*index, "character outside encoding alphabet"));
        }
        if shift > MAX_SHIFT {
            return Err(malformed(*index, "group too long"));
        }
        *index += 1;

        let chunk = i64::from(byte - CHAR_OFFSET);
        result |= (chunk & CHUNK_MASK) << shift;
        shift += 5;

        if chunk < CONTINUATION_BIT {
            break;
        }
    }

    if result & 1 == 1 {
        Ok(!(result >> 1))
    } else {
        Ok(result >> 1)
    }
}

fn malformed(position: usize, reason: &str) -> AppError {
    AppError::MalformedPolyline {
        position,
        reason: reason.to_string(),
    }
}
