//! Standard output script templates and their exact-match classifiers.

use crate::error::BtcError;

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;

/// `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`
pub fn p2pkh_script(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    script.push(20);
    script.extend_from_slice(pubkey_hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

/// `OP_HASH160 <20> OP_EQUAL`
pub fn p2sh_script(script_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(23);
    script.push(OP_HASH160);
    script.push(20);
    script.extend_from_slice(script_hash);
    script.push(OP_EQUAL);
    script
}

/// Opcode pushing a witness version: 0 is `OP_0`, 1..=16 are `OP_1..OP_16`.
pub fn witness_version_opcode(version: u8) -> Result<u8, BtcError> {
    match version {
        0 => Ok(OP_0),
        1..=16 => Ok(0x50 + version),
        _ => Err(BtcError::UnsupportedScript(format!(
            "witness version {version} out of range"
        ))),
    }
}

/// `<version> <program>`
pub fn witness_script(version: u8, program: &[u8]) -> Result<Vec<u8>, BtcError> {
    if !(2..=40).contains(&program.len()) {
        return Err(BtcError::UnsupportedScript(format!(
            "witness program of {} bytes",
            program.len()
        )));
    }
    let mut script = Vec::with_capacity(program.len() + 2);
    script.push(witness_version_opcode(version)?);
    script.push(program.len() as u8);
    script.extend_from_slice(program);
    Ok(script)
}

/// Version 0 witness program paying to a key hash.
pub fn p2wpkh_script(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(22);
    script.push(OP_0);
    script.push(20);
    script.extend_from_slice(pubkey_hash);
    script
}

pub fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == 25
        && script[..3] == [OP_DUP, OP_HASH160, 20]
        && script[23..] == [OP_EQUALVERIFY, OP_CHECKSIG]
}

pub fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[..2] == [OP_HASH160, 20] && script[22] == OP_EQUAL
}

pub fn is_witness(script: &[u8]) -> bool {
    witness_program(script).is_some()
}

/// Split a witness output script into its version and program.
pub fn witness_program(script: &[u8]) -> Option<(u8, &[u8])> {
    if !(4..=42).contains(&script.len()) {
        return None;
    }
    let version = match script[0] {
        OP_0 => 0,
        op @ OP_1..=OP_16 => op - 0x50,
        _ => return None,
    };
    if usize::from(script[1]) != script.len() - 2 {
        return None;
    }
    Some((version, &script[2..]))
}

/// The 20-byte hash committed to by a P2PKH or P2SH script.
pub fn script_hash160(script: &[u8]) -> Option<&[u8]> {
    if is_p2pkh(script) {
        Some(&script[3..23])
    } else if is_p2sh(script) {
        Some(&script[2..22])
    } else {
        None
    }
}

/// Minimal push of `data` onto the script stack.
pub fn push_data(data: &[u8]) -> Vec<u8> {
    let len = data.len();
    let mut out = Vec::with_capacity(len + 5);
    if len < usize::from(OP_PUSHDATA1) {
        out.push(len as u8);
    } else if len <= 0xff {
        out.push(OP_PUSHDATA1);
        out.push(len as u8);
    } else if len <= 0xffff {
        out.push(OP_PUSHDATA2);
        out.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        out.push(OP_PUSHDATA4);
        out.extend_from_slice(&(len as u32).to_le_bytes());
    }
    out.extend_from_slice(data);
    out
}

/// Payload of an `OP_RETURN <push>` script, or `None` for any other script.
///
/// A bare `OP_RETURN` carries an empty payload.
pub fn get_op_return_data(script: &[u8]) -> Option<Vec<u8>> {
    let (&first, rest) = script.split_first()?;
    if first != OP_RETURN {
        return None;
    }
    if rest.is_empty() {
        return Some(Vec::new());
    }

    let (&op, rest) = rest.split_first()?;
    let (len, data) = match op {
        0x00..=0x4b => (usize::from(op), rest),
        OP_PUSHDATA1 => (usize::from(*rest.first()?), rest.get(1..)?),
        OP_PUSHDATA2 => {
            let bytes: [u8; 2] = rest.get(..2)?.try_into().ok()?;
            (usize::from(u16::from_le_bytes(bytes)), rest.get(2..)?)
        }
        OP_PUSHDATA4 => {
            let bytes: [u8; 4] = rest.get(..4)?.try_into().ok()?;
            (usize::try_from(u32::from_le_bytes(bytes)).ok()?, rest.get(4..)?)
        }
        _ => return None,
    };
    (data.len() == len).then(|| data.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: [u8; 20] = [0xab; 20];

    #[test]
    fn p2pkh_script_format() {
        let script = p2pkh_script(&HASH);
        assert_eq!(script.len(), 25);
        assert_eq!(script[0], OP_DUP);
        assert_eq!(script[1], OP_HASH160);
        assert_eq!(script[2], 20);
        assert_eq!(&script[3..23], &HASH);
        assert_eq!(script[23], OP_EQUALVERIFY);
        assert_eq!(script[24], OP_CHECKSIG);
        assert!(is_p2pkh(&script));
        assert!(!is_p2sh(&script));
        assert!(!is_witness(&script));
    }

    #[test]
    fn p2sh_script_format() {
        let script = p2sh_script(&HASH);
        assert_eq!(hex::encode(&script), format!("a914{}87", hex::encode(HASH)));
        assert!(is_p2sh(&script));
        assert!(!is_p2pkh(&script));
        assert_eq!(script_hash160(&script), Some(&HASH[..]));
    }

    #[test]
    fn witness_version_opcodes() {
        assert_eq!(witness_version_opcode(0).unwrap(), 0x00);
        assert_eq!(witness_version_opcode(1).unwrap(), 0x51);
        assert_eq!(witness_version_opcode(16).unwrap(), 0x60);
        assert!(witness_version_opcode(17).is_err());
    }

    #[test]
    fn witness_program_roundtrip() {
        let v0 = p2wpkh_script(&HASH);
        assert_eq!(v0, witness_script(0, &HASH).unwrap());
        assert_eq!(witness_program(&v0), Some((0, &HASH[..])));

        let taproot = witness_script(1, &[0x11; 32]).unwrap();
        assert_eq!(taproot[0], OP_1);
        assert_eq!(witness_program(&taproot), Some((1, &[0x11u8; 32][..])));
    }

    #[test]
    fn classifiers_reject_near_misses() {
        let mut script = p2pkh_script(&HASH);
        script.push(0);
        assert!(!is_p2pkh(&script));

        let mut script = p2sh_script(&HASH);
        script[22] = OP_EQUALVERIFY;
        assert!(!is_p2sh(&script));

        // Push length disagrees with the program size.
        let mut script = p2wpkh_script(&HASH);
        script[1] = 19;
        assert!(!is_witness(&script));

        // OP_PUSHDATA1 is not a witness version.
        assert!(!is_witness(&[OP_PUSHDATA1, 2, 0, 0]));
        assert!(!is_witness(&[OP_0, 1, 0]));
    }

    #[test]
    fn witness_script_rejects_bad_program_length() {
        assert!(witness_script(0, &[0; 1]).is_err());
        assert!(witness_script(0, &[0; 41]).is_err());
    }

    #[test]
    fn push_data_widths() {
        assert_eq!(push_data(&[1, 2]), vec![2, 1, 2]);
        assert_eq!(push_data(&[0; 75])[0], 75);
        assert_eq!(push_data(&[0; 76])[..2], [OP_PUSHDATA1, 76]);
        assert_eq!(push_data(&[0; 256])[..3], [OP_PUSHDATA2, 0x00, 0x01]);
    }

    #[test]
    fn op_return_data() {
        let mut script = vec![OP_RETURN];
        script.extend(push_data(b"hello"));
        assert_eq!(get_op_return_data(&script), Some(b"hello".to_vec()));

        let mut long = vec![OP_RETURN];
        long.extend(push_data(&[7; 80]));
        assert_eq!(get_op_return_data(&long), Some(vec![7; 80]));

        assert_eq!(get_op_return_data(&[OP_RETURN]), Some(vec![]));
    }

    #[test]
    fn op_return_data_rejects_other_scripts() {
        assert_eq!(get_op_return_data(&p2pkh_script(&HASH)), None);
        assert_eq!(get_op_return_data(&[]), None);
        // Push longer than the remaining script.
        assert_eq!(get_op_return_data(&[OP_RETURN, 5, 1, 2]), None);
        // Two pushes.
        assert_eq!(get_op_return_data(&[OP_RETURN, 1, 1, 1, 1]), None);
    }
}
