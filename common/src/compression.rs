//! Gzip compression helpers for the photometry/redshift CSV blobs stored on
//! a Job, the same way this codebase's capture path gzip-encodes payloads
//! before persisting them.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

pub fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

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
    fn round_trips_arbitrary_bytes() {
        let original = b"mjd,filter,mag,magerr\n59000.1,ps1__g,20.1,0.05\n";
        let compressed = compress(original).unwrap();
        assert_ne!(compressed, original);
        let restored = decompress(&compressed).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn decompress_rejects_garbage() {
        assert!(decompress(b"not gzip data").is_err());
    }
}
