//! Milenage authentication algorithm (3GPP TS 35.205/35.206)
//!
//! Provides the f1/f1*/f2-f5/f5* functions used to verify network
//! authentication tokens and to build the AUTS resynchronisation token.
//! Conformance vectors come from 3GPP TS 35.208.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;

fn xor16(a: &[u8; 16], b: &[u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// Lower 48 bits of `sqn` as the 6-byte big-endian form used on the wire.
pub fn sqn_bytes(sqn: u64) -> [u8; 6] {
    let be = sqn.to_be_bytes();
    let mut out = [0u8; 6];
    out.copy_from_slice(&be[2..8]);
    out
}

/// Milenage function set bound to one subscriber's K and OPc.
#[derive(Debug, Clone)]
pub struct Milenage {
    k: [u8; 16],
    opc: [u8; 16],
}

impl Milenage {
    /// Build from K and the operator variant OP; OPc is derived as
    /// E_K(OP) XOR OP.
    pub fn new_with_op(k: [u8; 16], op: [u8; 16]) -> Self {
        let mut m = Milenage { k, opc: [0u8; 16] };
        m.opc = xor16(&m.encrypt(&op), &op);
        m
    }

    /// Build from K and a precomputed OPc.
    pub fn new_with_opc(k: [u8; 16], opc: [u8; 16]) -> Self {
        Milenage { k, opc }
    }

    pub fn opc(&self) -> &[u8; 16] {
        &self.opc
    }

    /// f1: network authentication code MAC-A from RAND, SQN and AMF.
    pub fn f1(&self, rand: &[u8; 16], sqn: &[u8; 6], amf: &[u8; 2]) -> [u8; 8] {
        let out1 = self.f1_base(rand, sqn, amf);
        let mut mac_a = [0u8; 8];
        mac_a.copy_from_slice(&out1[..8]);
        mac_a
    }

    /// f1*: resynchronisation authentication code MAC-S.
    pub fn f1star(&self, rand: &[u8; 16], sqn: &[u8; 6], amf: &[u8; 2]) -> [u8; 8] {
        let out1 = self.f1_base(rand, sqn, amf);
        let mut mac_s = [0u8; 8];
        mac_s.copy_from_slice(&out1[8..]);
        mac_s
    }

    fn f1_base(&self, rand: &[u8; 16], sqn: &[u8; 6], amf: &[u8; 2]) -> [u8; 16] {
        let temp = self.encrypt(&xor16(&self.opc, rand));

        let mut in1 = [0u8; 16];
        in1[..6].copy_from_slice(sqn);
        in1[6..8].copy_from_slice(amf);
        in1[8..14].copy_from_slice(sqn);
        in1[14..16].copy_from_slice(amf);

        // XOR OPc and IN1, rotate by r1=64 bits; the constant c1 is zero.
        let mut block = [0u8; 16];
        for i in 0..16 {
            block[(i + 8) % 16] = in1[i] ^ self.opc[i];
        }
        for i in 0..16 {
            block[i] ^= temp[i];
        }

        let mut out1 = self.encrypt(&block);
        for i in 0..16 {
            out1[i] ^= self.opc[i];
        }
        out1
    }

    /// f2-f5: RES, CK, IK and AK from RAND.
    pub fn f2345(&self, rand: &[u8; 16]) -> ([u8; 8], [u8; 16], [u8; 16], [u8; 6]) {
        let temp = self.encrypt(&xor16(&self.opc, rand));

        // OUT2: rotate by r2=0, constant c2 = ...01.
        let mut block = xor16(&temp, &self.opc);
        block[15] ^= 1;
        let tmp = xor16(&self.encrypt(&block), &self.opc);

        let mut res = [0u8; 8];
        let mut ak = [0u8; 6];
        res.copy_from_slice(&tmp[8..]);
        ak.copy_from_slice(&tmp[..6]);

        // OUT3: rotate by r3=32, constant c3 = ...10.
        let mut block = [0u8; 16];
        for i in 0..16 {
            block[(i + 12) % 16] = temp[i] ^ self.opc[i];
        }
        block[15] ^= 2;
        let ck = xor16(&self.encrypt(&block), &self.opc);

        // OUT4: rotate by r4=64, constant c4 = ...100.
        let mut block = [0u8; 16];
        for i in 0..16 {
            block[(i + 8) % 16] = temp[i] ^ self.opc[i];
        }
        block[15] ^= 4;
        let ik = xor16(&self.encrypt(&block), &self.opc);

        (res, ck, ik, ak)
    }

    /// f5*: anonymity key for the resynchronisation message.
    pub fn f5star(&self, rand: &[u8; 16]) -> [u8; 6] {
        let temp = self.encrypt(&xor16(&self.opc, rand));

        // OUT5: rotate by r5=96, constant c5 = ...1000.
        let mut block = [0u8; 16];
        for i in 0..16 {
            block[(i + 4) % 16] = temp[i] ^ self.opc[i];
        }
        block[15] ^= 8;

        let out = self.encrypt(&block);
        let mut ak = [0u8; 6];
        for i in 0..6 {
            ak[i] = out[i] ^ self.opc[i];
        }
        ak
    }

    /// Build the AUTS resynchronisation token for `sqn_ms`:
    /// `AUTS = (SQNms XOR AK*) || MAC-S`, where AK* = f5*(RAND) and MAC-S is
    /// computed with the dummy management field 0x0000 (TS 33.102 6.3.3).
    pub fn generate_auts(&self, rand: &[u8; 16], sqn_ms: u64) -> [u8; 14] {
        let sqn = sqn_bytes(sqn_ms);
        let ak = self.f5star(rand);
        let mac_s = self.f1star(rand, &sqn, &[0u8; 2]);

        let mut auts = [0u8; 14];
        for i in 0..6 {
            auts[i] = sqn[i] ^ ak[i];
        }
        auts[6..].copy_from_slice(&mac_s);
        auts
    }

    fn encrypt(&self, input: &[u8; 16]) -> [u8; 16] {
        let cipher = Aes128::new(GenericArray::from_slice(&self.k));
        let mut block = GenericArray::clone_from_slice(input);
        cipher.encrypt_block(&mut block);
        let mut out = [0u8; 16];
        out.copy_from_slice(&block);
        out
    }
}
