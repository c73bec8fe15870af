//! gzip compression/decompression helpers (spec §2 C8, out of the hard
//! core). Grounded in `framework/http2/framework/compress.hpp` /
//! `decompress.hpp` in `original_source/`: the whole buffer is compressed in
//! one shot (no streaming), and compression failure falls back to the
//! uncompressed body rather than erroring (spec §7 "Compression failure").

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Compresses `data` with gzip. Returns `None` on failure so callers can
/// fall back to sending the uncompressed body (spec §7).
pub fn try_compress(data: &[u8]) -> Option<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).ok()?;
    encoder.finish().ok()
}

/// Decompresses a gzip-encoded buffer, for use by the client half (spec §6)
/// when reading a `content-encoding: gzip` response.
pub fn decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_identity() {
        let cases: &[&[u8]] = &[b"", b"hello world", &[0u8; 4096], b"{\"a\":1}"];
        for case in cases {
            let compressed = try_compress(case).expect("compress");
            let restored = decompress(&compressed).expect("decompress");
            assert_eq!(&restored, case);
        }
    }

    #[test]
    fn compressed_is_gzip_framed() {
        let compressed = try_compress(b"hello").unwrap();
        // gzip magic number
        assert_eq!(&compressed[0..2], &[0x1f, 0x8b]);
    }
}
