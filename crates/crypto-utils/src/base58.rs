use crate::error::CryptoError;

/// Base58Check-encode `payload` (4-byte double SHA-256 checksum appended).
pub fn encode_check(payload: &[u8]) -> String {
    bs58::encode(payload).with_check().into_string()
}

/// Decode a Base58Check string, verifying and stripping the checksum.
pub fn decode_check(encoded: &str) -> Result<Vec<u8>, CryptoError> {
    bs58::decode(encoded)
        .with_check(None)
        .into_vec()
        .map_err(|e| match e {
            bs58::decode::Error::InvalidChecksum { .. } => CryptoError::InvalidChecksum,
            other => CryptoError::InvalidBase58(other.to_string()),
        })
}
