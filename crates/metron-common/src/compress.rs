use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Gzip-compresses a request or response body.
pub fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Inflates a gzip stream. Fails on anything that is not a complete gzip member.
pub fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_stream_inflates_to_original() {
        let body = br#"[{"id":"testGauge","type":"gauge","value":100.0015}]"#;
        let packed = gzip(body).unwrap();
        assert_eq!(&packed[..2], &[0x1f, 0x8b]);
        assert_eq!(gunzip(&packed).unwrap(), body);
    }

    #[test]
    fn plain_body_is_not_gzip() {
        assert!(gunzip(b"{\"id\":\"x\"}").is_err());
    }
}
