//! Delivered-artifact decoding: gzip → JSON records → frame.

use std::io::{Cursor, Read};

use flate2::read::GzDecoder;
use polars::prelude::DataFrame;
use tracing::debug;

use crate::error::{DataLicenseError, Result};
use crate::http::{HttpResponse, ResponseBody};
use crate::tabular::records_to_frame;

/// The only content encoding the provider is allowed to use.
pub const SUPPORTED_ENCODING: &str = "gzip";

/// Decompress and parse a downloaded artifact.
///
/// A `content-encoding` other than `gzip` is rejected before any bytes are
/// read. With no header at all the body is still treated as gzip.
pub fn decode_payload(response: HttpResponse) -> Result<DataFrame> {
    if let Some(encoding) = response.header("content-encoding") {
        if encoding != SUPPORTED_ENCODING {
            return Err(DataLicenseError::UnsupportedEncoding(encoding.to_string()));
        }
    }

    let reader: Box<dyn Read + Send> = match response.body {
        ResponseBody::Buffered(bytes) => Box::new(Cursor::new(bytes)),
        ResponseBody::Streamed(reader) => reader,
    };
    let mut decoder = GzDecoder::new(reader);
    let mut data = Vec::new();
    decoder
        .read_to_end(&mut data)
        .map_err(|e| DataLicenseError::Decompression(e.to_string()))?;
    debug!(bytes = data.len(), "decompressed payload");

    records_to_frame(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(bytes).unwrap();
        enc.finish().unwrap()
    }

    const RECORDS: &[u8] = br#"[{"TICKER": "IBM", "PX_LAST": 182.5}]"#;

    #[test]
    fn gzip_header_decodes() {
        let resp = HttpResponse::new(200, gzip(RECORDS)).with_header("Content-Encoding", "gzip");
        let df = decode_payload(resp).unwrap();
        assert_eq!(df.shape(), (1, 2));
    }

    #[test]
    fn missing_header_still_gunzips() {
        let df = decode_payload(HttpResponse::new(200, gzip(RECORDS))).unwrap();
        assert_eq!(df.height(), 1);
    }

    #[test]
    fn other_encodings_are_fatal() {
        let resp = HttpResponse::new(200, gzip(RECORDS)).with_header("content-encoding", "br");
        match decode_payload(resp) {
            Err(DataLicenseError::UnsupportedEncoding(enc)) => assert_eq!(enc, "br"),
            other => panic!("expected UnsupportedEncoding, got {other:?}"),
        }
    }

    #[test]
    fn streamed_bodies_decode() {
        let resp = HttpResponse {
            status: 200,
            headers: Default::default(),
            body: ResponseBody::Streamed(Box::new(Cursor::new(gzip(RECORDS)))),
        };
        assert_eq!(decode_payload(resp).unwrap().height(), 1);
    }

    #[test]
    fn plain_bytes_fail_decompression() {
        let resp = HttpResponse::new(200, RECORDS.to_vec());
        assert!(matches!(
            decode_payload(resp),
            Err(DataLicenseError::Decompression(_))
        ));
    }
}
