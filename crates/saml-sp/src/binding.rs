//! HTTP-Redirect binding codec: SAML messages travel in the query string as
//! raw-deflate-compressed, base64-encoded XML. The HTTP-POST binding needs no
//! helper here; it is plain base64 handled at the ACS.

use std::io::{Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use crate::error::Error;

/// Decompressed size cap when decoding, to stop deflate bombs.
const MAX_DECODED_SIZE: u64 = 64 * 1024;

pub fn encode_redirect(xml: &[u8]) -> Result<String, Error> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(xml)?;
    let compressed = encoder.finish()?;
    Ok(STANDARD.encode(compressed))
}

pub fn decode_redirect(encoded: &str) -> Result<Vec<u8>, Error> {
    let compressed = STANDARD
        .decode(encoded)
        .map_err(|e| Error::Malformed(format!("base64 decode failed: {e}")))?;

    let mut xml = Vec::new();
    DeflateDecoder::new(&compressed[..])
        .take(MAX_DECODED_SIZE)
        .read_to_end(&mut xml)
        .map_err(|e| Error::Malformed(format!("deflate decompress failed: {e}")))?;

    if xml.len() as u64 >= MAX_DECODED_SIZE {
        return Err(Error::Malformed("decompressed message exceeds size limit".into()));
    }

    Ok(xml)
}

/// Builds the `Location` value for the login redirect. Parameter order
/// (RelayState first, then SAMLRequest) follows the original wire format.
pub fn redirect_url(sso_url: &str, relay_state: &str, message: &str) -> String {
    format!(
        "{sso_url}?RelayState={}&SAMLRequest={}",
        urlencoding::encode(relay_state),
        urlencoding::encode(message)
    )
}
