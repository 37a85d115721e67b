//! EAP-AKA and EAP-AKA' key derivation
//!
//! EAP-AKA (RFC 4187 Appendix A): the master key is
//! `MK = SHA-1(Identity | IK | CK)` and key material is expanded with the
//! FIPS 186-2 pseudo-random generator (change notice 1, no XSEED), giving
//! K_encr (16), K_aut (16), MSK (64) and EMSK (64).
//!
//! EAP-AKA' (RFC 5448): CK'/IK' are derived from CK/IK with the
//! HMAC-SHA-256 KDF of TS 33.402 over the serving network name and
//! SQN XOR AK, then `MK = PRF'(IK'|CK', "EAP-AKA'" | Identity)` yields
//! K_encr (16), K_aut (32), K_re (32), MSK (64) and EMSK (64).

use hmac::{Hmac, Mac};
use sha1::digest::core_api::Block;
use sha1::{Digest, Sha1, Sha1Core};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// FC value for the CK'/IK' derivation (TS 33.402 Annex A.2)
const FC_CK_IK_PRIME: u8 = 0x20;

/// Key material produced by the EAP-AKA(') key derivation.
#[derive(Debug, Clone)]
pub struct EapAkaKeys {
    pub k_encr: [u8; 16],
    /// 16 bytes for EAP-AKA, 32 bytes for EAP-AKA'
    pub k_aut: Vec<u8>,
    pub msk: [u8; 64],
    pub emsk: [u8; 64],
}

/// EAP-AKA key derivation (RFC 4187 Appendix A).
pub fn derive_keys_aka(identity: &str, ck: &[u8; 16], ik: &[u8; 16]) -> EapAkaKeys {
    let mut hasher = Sha1::new();
    hasher.update(identity.as_bytes());
    hasher.update(ik);
    hasher.update(ck);
    let mk: [u8; 20] = hasher.finalize().into();

    let mut stream = [0u8; 160];
    fips186_2_prf(&mk, &mut stream);

    let mut keys = EapAkaKeys {
        k_encr: [0u8; 16],
        k_aut: vec![0u8; 16],
        msk: [0u8; 64],
        emsk: [0u8; 64],
    };
    keys.k_encr.copy_from_slice(&stream[0..16]);
    keys.k_aut.copy_from_slice(&stream[16..32]);
    keys.msk.copy_from_slice(&stream[32..96]);
    keys.emsk.copy_from_slice(&stream[96..160]);
    keys
}

/// Derive CK' and IK' per RFC 5448 Section 3.3 / TS 33.402 Annex A.2.
///
/// Key = CK || IK;
/// S = FC || SN-name || len(SN-name) || (SQN xor AK) || len(SQN xor AK).
pub fn derive_ck_ik_prime(
    ck: &[u8; 16],
    ik: &[u8; 16],
    network_name: &str,
    sqn_xor_ak: &[u8; 6],
) -> ([u8; 16], [u8; 16]) {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(ck);
    key[16..].copy_from_slice(ik);

    let name = network_name.as_bytes();
    let mut s = Vec::with_capacity(1 + name.len() + 2 + 6 + 2);
    s.push(FC_CK_IK_PRIME);
    s.extend_from_slice(name);
    s.extend_from_slice(&(name.len() as u16).to_be_bytes());
    s.extend_from_slice(sqn_xor_ak);
    s.extend_from_slice(&6u16.to_be_bytes());

    let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC can take key of any size");
    mac.update(&s);
    let out = mac.finalize().into_bytes();

    let mut ck_prime = [0u8; 16];
    let mut ik_prime = [0u8; 16];
    ck_prime.copy_from_slice(&out[..16]);
    ik_prime.copy_from_slice(&out[16..]);
    (ck_prime, ik_prime)
}

/// EAP-AKA' key derivation (RFC 5448 Section 3.3).
pub fn derive_keys_aka_prime(
    identity: &str,
    ck_prime: &[u8; 16],
    ik_prime: &[u8; 16],
) -> EapAkaKeys {
    // PRF' key is IK' | CK'; data is "EAP-AKA'" | Identity.
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(ik_prime);
    key[16..].copy_from_slice(ck_prime);

    let mut data = Vec::with_capacity(8 + identity.len());
    data.extend_from_slice(b"EAP-AKA'");
    data.extend_from_slice(identity.as_bytes());

    // K_encr | K_aut | K_re | MSK | EMSK = 16+32+32+64+64 = 208 bytes
    let mut stream = [0u8; 208];
    prf_prime(&key, &data, &mut stream);

    let mut keys = EapAkaKeys {
        k_encr: [0u8; 16],
        k_aut: vec![0u8; 32],
        msk: [0u8; 64],
        emsk: [0u8; 64],
    };
    keys.k_encr.copy_from_slice(&stream[0..16]);
    keys.k_aut.copy_from_slice(&stream[16..48]);
    keys.msk.copy_from_slice(&stream[80..144]);
    keys.emsk.copy_from_slice(&stream[144..208]);
    keys
}

/// PRF' from RFC 5448 Section 3.4:
/// T1 = HMAC-SHA-256(K, S | 0x01), Tn = HMAC-SHA-256(K, Tn-1 | S | n).
fn prf_prime(key: &[u8], s: &[u8], out: &mut [u8]) {
    let mut prev: Vec<u8> = Vec::new();
    let mut counter = 1u8;
    let mut written = 0;
    while written < out.len() {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(&prev);
        mac.update(s);
        mac.update(&[counter]);
        let block = mac.finalize().into_bytes();

        let n = (out.len() - written).min(block.len());
        out[written..written + n].copy_from_slice(&block[..n]);
        written += n;
        prev = block.to_vec();
        counter = counter.wrapping_add(1);
    }
}

/// FIPS 186-2 pseudo-random generator (change notice 1) with the SHA-1 G
/// function and XSEED = 0, as required by RFC 4187 Appendix A.
///
/// `out` must be a multiple of 20 bytes.
fn fips186_2_prf(seed: &[u8; 20], out: &mut [u8]) {
    debug_assert_eq!(out.len() % 20, 0);

    // SHA-1 initial chaining values; G runs a single compression over the
    // 160-bit XVAL zero-padded to one block, with no length padding.
    const SHA1_IV: [u32; 5] = [0x6745_2301, 0xEFCD_AB89, 0x98BA_DCFE, 0x1032_5476, 0xC3D2_E1F0];

    let mut xkey = *seed;
    for chunk in out.chunks_mut(20) {
        let mut state = SHA1_IV;
        let mut block = Block::<Sha1Core>::default();
        block[..20].copy_from_slice(&xkey);
        sha1::compress(&mut state, core::slice::from_ref(&block));

        for (i, word) in state.iter().enumerate() {
            chunk[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
        }

        // XKEY = (1 + XKEY + w) mod 2^160
        let mut carry = 1u16;
        for k in (0..20).rev() {
            let sum = xkey[k] as u16 + chunk[k] as u16 + carry;
            xkey[k] = sum as u8;
            carry = sum >> 8;
        }
    }
}
