//! Twofish-CBC with a feedback register that spans the whole container.
//!
//! Unlike a per-message CBC, the register is never reset between fields: the
//! last ciphertext block of one field is the chaining input of the next. A
//! writer and a reader therefore have to process the same blocks in the same
//! order from the same IV.

use pwat_core::PwatResult;
use twofish::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt};
use twofish::Twofish;
use zeroize::Zeroize;

use crate::keys::{twofish, DataKey};
use crate::BLOCK_SIZE;

pub struct CbcChain {
    cipher: Twofish,
    register: [u8; BLOCK_SIZE],
}

impl CbcChain {
    /// Key material is copied into the Twofish key schedule; `key` itself
    /// can be dropped by the caller right after this returns.
    pub fn new(key: &DataKey, iv: &[u8; BLOCK_SIZE]) -> PwatResult<Self> {
        Ok(Self {
            cipher: twofish(key.as_bytes())?,
            register: *iv,
        })
    }

    pub fn encrypt_block(&mut self, block: &mut [u8; BLOCK_SIZE]) {
        for (b, r) in block.iter_mut().zip(self.register.iter()) {
            *b ^= r;
        }
        self.cipher.encrypt_block(GenericArray::from_mut_slice(block));
        self.register.copy_from_slice(block);
    }

    pub fn decrypt_block(&mut self, block: &mut [u8; BLOCK_SIZE]) {
        let ciphertext = *block;
        self.cipher.decrypt_block(GenericArray::from_mut_slice(block));
        for (b, r) in block.iter_mut().zip(self.register.iter()) {
            *b ^= r;
        }
        self.register = ciphertext;
    }
}

impl Drop for CbcChain {
    fn drop(&mut self) {
        self.register.zeroize();
    }
}

impl std::fmt::Debug for CbcChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CbcChain")
            .field("register", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chain() -> CbcChain {
        CbcChain::new(&DataKey::from_bytes([11u8; 32]), &[22u8; BLOCK_SIZE]).unwrap()
    }

    #[test]
    fn repeated_plaintext_encrypts_differently() {
        let mut enc = chain();
        let mut a = [0x41u8; BLOCK_SIZE];
        let mut b = [0x41u8; BLOCK_SIZE];
        enc.encrypt_block(&mut a);
        enc.encrypt_block(&mut b);
        assert_ne!(a, b, "feedback must carry from one block to the next");
    }

    #[test]
    fn decrypt_out_of_order_fails() {
        let mut enc = chain();
        let mut first = [1u8; BLOCK_SIZE];
        let mut second = [2u8; BLOCK_SIZE];
        enc.encrypt_block(&mut first);
        enc.encrypt_block(&mut second);

        // skipping the first block leaves the register at the IV
        let mut dec = chain();
        dec.decrypt_block(&mut second);
        assert_ne!(second, [2u8; BLOCK_SIZE]);
    }

    proptest! {
        #[test]
        fn chain_inverts(blocks in proptest::collection::vec(any::<[u8; BLOCK_SIZE]>(), 1..32)) {
            let mut enc = chain();
            let mut dec = chain();
            for plain in &blocks {
                let mut block = *plain;
                enc.encrypt_block(&mut block);
                dec.decrypt_block(&mut block);
                prop_assert_eq!(&block, plain);
            }
        }
    }
}
