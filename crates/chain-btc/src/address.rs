use bech32::{Fe32, Hrp};
use crypto_utils::{base58, hash::hash160};

use crate::error::BtcError;
use crate::network::CoinParams;
use crate::script;

/// Reject anything but a 33-byte compressed secp256k1 public key.
pub fn check_compressed(pubkey: &[u8]) -> Result<&[u8; 33], BtcError> {
    match pubkey.first() {
        Some(0x04) => Err(BtcError::UncompressedKeyNotSupported),
        Some(0x02 | 0x03) => pubkey.try_into().map_err(|_| {
            BtcError::InvalidPublicKey(format!("expected 33 bytes, got {}", pubkey.len()))
        }),
        _ => Err(BtcError::InvalidPublicKey(format!(
            "unexpected prefix in {}",
            hex::encode(pubkey)
        ))),
    }
}

/// Minimal big-endian encoding of an address version prefix.
pub fn version_bytes(version: u32) -> Vec<u8> {
    let bytes = version.to_be_bytes();
    let skip = bytes.iter().take(3).take_while(|&&b| b == 0).count();
    bytes[skip..].to_vec()
}

fn base58_address(version: u32, hash: &[u8]) -> String {
    let mut payload = version_bytes(version);
    payload.extend_from_slice(hash);
    base58::encode_check(&payload)
}

/// Legacy pay-to-pubkey-hash address.
pub fn address_p2pkh(version: u32, pubkey: &[u8]) -> Result<String, BtcError> {
    let pubkey = check_compressed(pubkey)?;
    Ok(base58_address(version, &hash160(pubkey)))
}

/// Redeem script of a P2SH-wrapped P2WPKH output.
pub fn p2wpkh_redeem_script(pubkey: &[u8]) -> Result<Vec<u8>, BtcError> {
    let pubkey = check_compressed(pubkey)?;
    Ok(script::p2wpkh_script(&hash160(pubkey)))
}

/// P2SH address wrapping a version 0 key-hash witness program.
pub fn address_p2sh_p2wpkh(version: u32, pubkey: &[u8]) -> Result<String, BtcError> {
    let redeem_script = p2wpkh_redeem_script(pubkey)?;
    Ok(base58_address(version, &hash160(&redeem_script)))
}

/// Native segwit (bech32) key-hash address.
pub fn address_p2wpkh(hrp: &str, pubkey: &[u8]) -> Result<String, BtcError> {
    let pubkey = check_compressed(pubkey)?;
    encode_segwit(hrp, 0, &hash160(pubkey))
}

fn encode_segwit(hrp: &str, version: u8, program: &[u8]) -> Result<String, BtcError> {
    let hrp = Hrp::parse(hrp)
        .map_err(|e| BtcError::UnsupportedScript(format!("invalid bech32 prefix {hrp}: {e}")))?;
    let version = Fe32::try_from(version)
        .map_err(|e| BtcError::UnsupportedScript(format!("witness version: {e}")))?;
    bech32::segwit::encode(hrp, version, program)
        .map_err(|e| BtcError::UnsupportedScript(format!("bech32 encoding failed: {e}")))
}

fn decode_segwit(params: &CoinParams, address: &str) -> Option<Vec<u8>> {
    let prefix = params.bech32_prefix?;
    let (hrp, version, program) = bech32::segwit::decode(address).ok()?;
    if hrp.to_lowercase() != prefix {
        return None;
    }
    script::witness_script(version.to_u8(), &program).ok()
}

fn decode_base58(params: &CoinParams, address: &str) -> Option<Vec<u8>> {
    let payload = base58::decode_check(address).ok()?;
    let hash_of = |version: u32| -> Option<[u8; 20]> {
        let prefix = version_bytes(version);
        payload.strip_prefix(prefix.as_slice())?.try_into().ok()
    };
    if let Some(hash) = hash_of(params.address_type) {
        return Some(script::p2pkh_script(&hash));
    }
    hash_of(params.address_type_p2sh).map(|hash| script::p2sh_script(&hash))
}

/// Output script paying to `address`.
///
/// Bech32 is tried first, then Base58Check against the coin's version bytes.
pub fn derive_output_script(params: &CoinParams, address: &str) -> Result<Vec<u8>, BtcError> {
    decode_segwit(params, address)
        .or_else(|| decode_base58(params, address))
        .ok_or_else(|| BtcError::UnrecognizedAddress(address.to_string()))
}

/// Address string for a standard output script.
pub fn derive_address(params: &CoinParams, script_pubkey: &[u8]) -> Result<String, BtcError> {
    if script::is_p2pkh(script_pubkey) {
        return Ok(base58_address(params.address_type, &script_pubkey[3..23]));
    }
    if script::is_p2sh(script_pubkey) {
        return Ok(base58_address(params.address_type_p2sh, &script_pubkey[2..22]));
    }
    if let Some((version, program)) = script::witness_program(script_pubkey) {
        let hrp = params.bech32_prefix.ok_or_else(|| {
            BtcError::UnsupportedScript(format!("{} has no segwit addresses", params.coin_name))
        })?;
        return encode_segwit(hrp, version, program);
    }
    Err(BtcError::UnsupportedScript(hex::encode(script_pubkey)))
}

/// Validate an address string for the given coin.
pub fn validate_address(params: &CoinParams, address: &str) -> bool {
    derive_output_script(params, address).is_ok()
}
