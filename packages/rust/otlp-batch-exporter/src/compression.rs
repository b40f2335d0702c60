use flate2::{write::GzEncoder, Compression};
use std::io::Write;

/// Compresses `payload` with GZIP at `level` (0-9).
pub(crate) fn gzip(payload: &[u8], level: u8) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(payload.len() / 2),
        Compression::new(u32::from(level.min(9))),
    );
    encoder.write_all(payload)?;
    encoder.finish()
}
