//! Crypto primitives consumed (not implemented from scratch) by the SCP02
//! engine. The engine itself only ever calls through [`CryptoProvider`];
//! [`Scp02Crypto`] is the default implementation backed by the `des` crate
//! (2-key EDE Triple-DES), matching the way this crate's teacher lineage
//! treats block ciphers as an injected capability rather than hand-rolling
//! them.

use cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use des::TdesEde2;

/// Block-cipher operations the SCP02 engine needs. Implementations are
/// swappable so a test harness can inject a known-broken cipher to
/// exercise error paths, or a hardware-backed one in a future port.
pub trait CryptoProvider {
    /// Triple-DES CBC encryption, no padding -- `data.len()` must be a
    /// multiple of 8.
    fn tdes_cbc_encrypt(&self, key: &[u8; 16], iv: &[u8; 8], data: &[u8]) -> Vec<u8>;

    /// Triple-DES ECB encryption of exactly one 8-byte block.
    fn tdes_ecb_encrypt_block(&self, key: &[u8; 16], block: &[u8; 8]) -> [u8; 8];

    /// Single-DES encryption of exactly one 8-byte block, used internally
    /// by the Retail-MAC construction.
    fn des_encrypt_block(&self, key: &[u8; 8], block: &[u8; 8]) -> [u8; 8];

    /// Single-DES decryption of exactly one 8-byte block.
    fn des_decrypt_block(&self, key: &[u8; 8], block: &[u8; 8]) -> [u8; 8];

    /// ISO 9797-1 MAC Algorithm 3 ("Retail MAC"): CBC-MAC the padded input
    /// under the first 8 bytes of `key`, then apply the standard
    /// decrypt/encrypt finishing step under the second 8 bytes / first 8
    /// bytes. `iv` seeds the CBC-MAC chain (the SCP02 `mac_chaining_value`
    /// for C-MAC, or all-zero for the initial cryptogram checks).
    fn retail_mac(&self, key: &[u8; 16], iv: &[u8; 8], data: &[u8]) -> [u8; 8] {
        let k1: [u8; 8] = key[..8].try_into().unwrap();
        let k2: [u8; 8] = key[8..].try_into().unwrap();

        let padded = iso9797_method2_pad(data);

        let mut chain = *iv;
        for block in padded.chunks(8) {
            let mut xored = [0u8; 8];
            for i in 0..8 {
                xored[i] = chain[i] ^ block[i];
            }
            chain = self.des_encrypt_block(&k1, &xored);
        }

        let decrypted = self.des_decrypt_block(&k2, &chain);
        self.des_encrypt_block(&k1, &decrypted)
    }
}

/// Pad `data` per ISO 9797-1 padding method 2: append `0x80`, then zero
/// bytes up to the next multiple of 8 (always appends at least one byte).
pub fn iso9797_method2_pad(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    out.push(0x80);
    while out.len() % 8 != 0 {
        out.push(0x00);
    }
    out
}

/// Default [`CryptoProvider`] backed by the `des` crate's 2-key Triple-DES
/// (EDE2) implementation.
#[derive(Copy, Clone, Default, Debug)]
pub struct Scp02Crypto;

impl CryptoProvider for Scp02Crypto {
    fn tdes_cbc_encrypt(&self, key: &[u8; 16], iv: &[u8; 8], data: &[u8]) -> Vec<u8> {
        assert_eq!(data.len() % 8, 0, "tdes_cbc_encrypt requires block-aligned input");
        let cipher = TdesEde2::new_from_slice(key).expect("16-byte key");

        let mut chain = *iv;
        let mut out = Vec::with_capacity(data.len());
        for block in data.chunks(8) {
            let mut xored: cipher::generic_array::GenericArray<u8, cipher::consts::U8> = Default::default();
            for i in 0..8 {
                xored[i] = chain[i] ^ block[i];
            }
            cipher.encrypt_block(&mut xored);
            chain.copy_from_slice(xored.as_slice());
            out.extend_from_slice(&chain);
        }
        out
    }

    fn tdes_ecb_encrypt_block(&self, key: &[u8; 16], block: &[u8; 8]) -> [u8; 8] {
        let cipher = TdesEde2::new_from_slice(key).expect("16-byte key");
        let mut buf: cipher::generic_array::GenericArray<u8, cipher::consts::U8> = (*block).into();
        cipher.encrypt_block(&mut buf);
        buf.into()
    }

    fn des_encrypt_block(&self, key: &[u8; 8], block: &[u8; 8]) -> [u8; 8] {
        let cipher = des::Des::new_from_slice(key).expect("8-byte key");
        let mut buf: cipher::generic_array::GenericArray<u8, cipher::consts::U8> = (*block).into();
        cipher.encrypt_block(&mut buf);
        buf.into()
    }

    fn des_decrypt_block(&self, key: &[u8; 8], block: &[u8; 8]) -> [u8; 8] {
        let cipher = des::Des::new_from_slice(key).expect("8-byte key");
        let mut buf: cipher::generic_array::GenericArray<u8, cipher::consts::U8> = (*block).into();
        cipher.decrypt_block(&mut buf);
        buf.into()
    }
}
