//!
//! Payload encryption for the onboard link.
//!
//! Encryption is per-frame opt-in and applies only to the payload bytes;
//! the header and trailing CRC are always sent in the clear. The cipher is
//! AES-128 in ECB mode, the single fixed algorithm both peers must agree
//! on ahead of time — there is no negotiation.
//!
//! The codec pads plaintext to a block boundary with zero bytes itself and
//! records the pad count in the header, so this module is handed data that
//! is already a whole number of [`crate::CIPHER_BLOCK_SIZE`] blocks and
//! never applies padding of its own (`NoPadding`).
//!

use aes::Aes128;
use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};
use ecb::{Decryptor, Encryptor};

use crate::private::*;

/// AES-128-ECB key length in bytes.
pub const KEY_SIZE: usize = 16;

type Aes128EcbEnc = Encryptor<Aes128>;
type Aes128EcbDec = Decryptor<Aes128>;

///
/// An installed symmetric key.
///
/// The core never inspects the key material beyond its length; it exists
/// purely to drive AES-128-ECB encrypt/decrypt over a whole number of
/// 16-byte blocks.
///
#[derive(Clone, Copy)]
pub struct Key([u8; KEY_SIZE]);

impl Key {
    /// Build a key from exactly 16 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKeyLength`] if `bytes` is not 16 bytes long.
    pub fn new(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(Error::InvalidKeyLength { got: bytes.len() });
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    ///
    /// Encrypt `data` in place.
    ///
    /// `data.len()` must already be a multiple of [`crate::CIPHER_BLOCK_SIZE`];
    /// callers are responsible for zero-padding first (the codec does this
    /// and records the pad count in the frame header).
    ///
    pub fn encrypt_blocks(&self, data: &mut [u8]) {
        debug_assert!(data.len() % KEY_SIZE == 0);
        let len = data.len();
        Aes128EcbEnc::new(self.0.as_slice().into())
            .encrypt_padded_mut::<NoPadding>(data, len)
            .expect("data length is a multiple of the block size");
    }

    /// Decrypt `data` in place. Same block-alignment contract as [`Key::encrypt_blocks`].
    pub fn decrypt_blocks(&self, data: &mut [u8]) {
        debug_assert!(data.len() % KEY_SIZE == 0);
        Aes128EcbDec::new(self.0.as_slice().into())
            .decrypt_padded_mut::<NoPadding>(data)
            .expect("data length is a multiple of the block size");
    }
}
