//! Conversion between `npub`/`nsec` bech32 strings and raw hex keys.

use bech32::{primitives::decode::CheckedHrpstring, Bech32, Hrp};
use secp256k1::{Keypair, Secp256k1, SecretKey};

use crate::error::{Error, Result};

/// Human-readable part for public keys.
pub const NPUB_HRP: &str = "npub";
/// Human-readable part for private keys.
pub const NSEC_HRP: &str = "nsec";

/// Decode a bech32 string whose prefix must equal `expected_hrp`
/// (compared case-insensitively) into 32 raw bytes.
fn decode_bech32(expected_hrp: &str, encoded: &str) -> std::result::Result<[u8; 32], String> {
    let prefix = format!("{expected_hrp}1");
    if !encoded.to_ascii_lowercase().starts_with(&prefix) {
        return Err(format!("expected a {expected_hrp} string"));
    }
    let checked = CheckedHrpstring::new::<Bech32>(encoded).map_err(|e| e.to_string())?;
    let hrp = checked.hrp();
    if hrp.to_lowercase() != expected_hrp {
        return Err(format!("expected prefix {expected_hrp}, got {hrp}"));
    }
    let data: Vec<u8> = checked.byte_iter().collect();
    <[u8; 32]>::try_from(data.as_slice())
        .map_err(|_| format!("expected 32 bytes, got {}", data.len()))
}

fn encode_bech32(hrp: &str, data: &[u8; 32]) -> String {
    // Both prefixes are constants and 32 bytes is far below the length limit.
    let hrp = Hrp::parse_unchecked(hrp);
    bech32::encode::<Bech32>(hrp, data).unwrap_or_default()
}

/// Decode an `npub` string into its hex public key.
pub fn decode_npub(input: &str) -> Result<String> {
    decode_bech32(NPUB_HRP, input.trim())
        .map(hex::encode)
        .map_err(Error::InvalidEncoding)
}

/// Encode a hex public key as `npub`.
pub fn encode_npub(hex_key: &str) -> Result<String> {
    let bytes = hex32(hex_key).ok_or_else(|| {
        Error::InvalidEncoding(format!("expected 64 hex characters, got {hex_key:?}"))
    })?;
    Ok(encode_bech32(NPUB_HRP, &bytes))
}

/// Encode a raw private key as `nsec`.
pub fn encode_nsec(secret: &[u8; 32]) -> String {
    encode_bech32(NSEC_HRP, secret)
}

/// True iff `input` is exactly 64 hex characters, in either case.
pub fn is_hex64(input: &str) -> bool {
    input.len() == 64 && input.bytes().all(|b| b.is_ascii_hexdigit())
}

fn hex32(input: &str) -> Option<[u8; 32]> {
    if !is_hex64(input) {
        return None;
    }
    let bytes = hex::decode(input).ok()?;
    <[u8; 32]>::try_from(bytes.as_slice()).ok()
}

/// Normalize an identity given as `npub` or hex into lowercase hex, the
/// canonical comparison form.
pub fn normalize_identity(input: &str) -> Result<String> {
    let input = input.trim();
    if input.to_ascii_lowercase().starts_with(NPUB_HRP) {
        return decode_npub(input);
    }
    if is_hex64(input) {
        return Ok(input.to_ascii_lowercase());
    }
    Err(Error::InvalidEncoding(format!(
        "{input:?} is neither an npub nor a 64 character hex key"
    )))
}

/// Parse a private key given as `nsec` or raw hex.
pub fn parse_secret_key(input: &str) -> Result<SecretKey> {
    let input = input.trim();
    let bytes = if input.to_ascii_lowercase().starts_with(NSEC_HRP) {
        decode_bech32(NSEC_HRP, input).map_err(Error::InvalidKeyFormat)?
    } else {
        hex32(input).ok_or_else(|| {
            Error::InvalidKeyFormat("expected an nsec or 64 hex characters".into())
        })?
    };
    SecretKey::from_slice(&bytes).map_err(|e| Error::InvalidKeyFormat(e.to_string()))
}

/// Derive the x-only public key (hex) for a private key.
pub fn derive_public_key(secret: &SecretKey) -> String {
    let secp = Secp256k1::signing_only();
    let (xonly, _) = Keypair::from_secret_key(&secp, secret).x_only_public_key();
    hex::encode(xonly.serialize())
}

/// Parse a private key in either encoding and derive its hex public key.
pub fn public_key_for(private_key: &str) -> Result<String> {
    parse_secret_key(private_key).map(|sk| derive_public_key(&sk))
}
