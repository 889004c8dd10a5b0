//! AES-CCM payload decryption for BTHome.
//!
//! Encrypted payloads end with a 4-byte counter and a 4-byte MIC:
//! `ciphertext || counter || mic`.

use aes::Aes128;
use ccm::Ccm;
use ccm::aead::generic_array::GenericArray;
use ccm::aead::{Aead, KeyInit};
use ccm::consts::{U4, U12, U13};

use crate::config::KEY_LEN;
use crate::mac_address::MacAddress;

type CcmV1 = Ccm<Aes128, U4, U12>;
type CcmV2 = Ccm<Aes128, U4, U13>;

pub const COUNTER_LEN: usize = 4;
pub const MIC_LEN: usize = 4;

/// The pieces of an encrypted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sealed<'a> {
    pub ciphertext: &'a [u8],
    pub counter: [u8; COUNTER_LEN],
    pub mic: &'a [u8],
}

impl<'a> Sealed<'a> {
    pub fn split(payload: &'a [u8]) -> Option<Self> {
        let body_len = payload.len().checked_sub(COUNTER_LEN + MIC_LEN)?;
        let (ciphertext, trailer) = payload.split_at(body_len);
        let (counter, mic) = trailer.split_at(COUNTER_LEN);
        Some(Self {
            ciphertext,
            counter: counter.try_into().ok()?,
            mic,
        })
    }

    pub fn counter_value(&self) -> u32 {
        u32::from_le_bytes(self.counter)
    }

    fn with_tag(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.ciphertext.len() + MIC_LEN);
        buf.extend_from_slice(self.ciphertext);
        buf.extend_from_slice(self.mic);
        buf
    }
}

/// v1 nonce: MAC, UUID (little-endian), counter.
pub fn nonce_v1(mac: MacAddress, uuid16: u16, counter: [u8; COUNTER_LEN]) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..6].copy_from_slice(&mac.0);
    nonce[6..8].copy_from_slice(&uuid16.to_le_bytes());
    nonce[8..].copy_from_slice(&counter);
    nonce
}

/// v2 nonce: MAC, UUID (little-endian), device information byte, counter.
pub fn nonce_v2(mac: MacAddress, uuid16: u16, info: u8, counter: [u8; COUNTER_LEN]) -> [u8; 13] {
    let mut nonce = [0u8; 13];
    nonce[..6].copy_from_slice(&mac.0);
    nonce[6..8].copy_from_slice(&uuid16.to_le_bytes());
    nonce[8] = info;
    nonce[9..].copy_from_slice(&counter);
    nonce
}

pub fn decrypt_v1(key: &[u8; KEY_LEN], nonce: &[u8; 12], sealed: &Sealed<'_>) -> Option<Vec<u8>> {
    let cipher = CcmV1::new(GenericArray::from_slice(key));
    cipher
        .decrypt(GenericArray::from_slice(nonce), sealed.with_tag().as_slice())
        .ok()
}

pub fn decrypt_v2(key: &[u8; KEY_LEN], nonce: &[u8; 13], sealed: &Sealed<'_>) -> Option<Vec<u8>> {
    let cipher = CcmV2::new(GenericArray::from_slice(key));
    cipher
        .decrypt(GenericArray::from_slice(nonce), sealed.with_tag().as_slice())
        .ok()
}

/// Encrypt a v2 payload; the inverse of [`decrypt_v2`], used to build fixtures.
#[cfg(test)]
pub fn seal_v2(
    key: &[u8; KEY_LEN],
    mac: MacAddress,
    uuid16: u16,
    info: u8,
    counter: [u8; COUNTER_LEN],
    plaintext: &[u8],
) -> Vec<u8> {
    let nonce = nonce_v2(mac, uuid16, info, counter);
    let cipher = CcmV2::new(GenericArray::from_slice(key));
    let sealed = cipher
        .encrypt(GenericArray::from_slice(&nonce), plaintext)
        .expect("encryption failed");
    // `sealed` is ciphertext || mic; the counter sits between them on the air.
    let (ciphertext, mic) = sealed.split_at(sealed.len() - MIC_LEN);
    let mut payload = ciphertext.to_vec();
    payload.extend_from_slice(&counter);
    payload.extend_from_slice(mic);
    payload
}

/// Encrypt a v1 payload; the inverse of [`decrypt_v1`].
#[cfg(test)]
pub fn seal_v1(
    key: &[u8; KEY_LEN],
    mac: MacAddress,
    uuid16: u16,
    counter: [u8; COUNTER_LEN],
    plaintext: &[u8],
) -> Vec<u8> {
    let nonce = nonce_v1(mac, uuid16, counter);
    let cipher = CcmV1::new(GenericArray::from_slice(key));
    let sealed = cipher
        .encrypt(GenericArray::from_slice(&nonce), plaintext)
        .expect("encryption failed");
    let (ciphertext, mic) = sealed.split_at(sealed.len() - MIC_LEN);
    let mut payload = ciphertext.to_vec();
    payload.extend_from_slice(&counter);
    payload.extend_from_slice(mic);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TEST_MAC;

    const KEY: [u8; KEY_LEN] = [
        0x23, 0x1d, 0x39, 0xc1, 0xd7, 0xcc, 0x1a, 0xb1, 0xae, 0xe2, 0x24, 0xcd, 0x09, 0x6d, 0xb9,
        0x32,
    ];

    #[test]
    fn test_split() {
        let payload = [1, 2, 3, 0x10, 0x00, 0x00, 0x00, 9, 9, 9, 9];
        let sealed = Sealed::split(&payload).unwrap();
        assert_eq!(sealed.ciphertext, &[1, 2, 3]);
        assert_eq!(sealed.counter_value(), 0x10);
        assert_eq!(sealed.mic, &[9, 9, 9, 9]);
        assert!(Sealed::split(&payload[..7]).is_none());
    }

    #[test]
    fn test_nonce_layout() {
        let nonce = nonce_v2(TEST_MAC, 0xFCD2, 0x41, [1, 0, 0, 0]);
        assert_eq!(
            nonce,
            [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0xD2, 0xFC, 0x41, 1, 0, 0, 0]
        );
    }

    #[test]
    fn test_v2_wrong_key_fails() {
        let payload = seal_v2(&KEY, TEST_MAC, 0xFCD2, 0x41, [1, 0, 0, 0], &[0x02, 0x66, 0x08]);
        let sealed = Sealed::split(&payload).unwrap();
        let nonce = nonce_v2(TEST_MAC, 0xFCD2, 0x41, sealed.counter);

        assert_eq!(
            decrypt_v2(&KEY, &nonce, &sealed),
            Some(vec![0x02, 0x66, 0x08])
        );
        assert_eq!(decrypt_v2(&[0u8; KEY_LEN], &nonce, &sealed), None);
    }

    #[test]
    fn test_v1_tampered_counter_fails() {
        let payload = seal_v1(&KEY, TEST_MAC, 0x181E, [7, 0, 0, 0], &[0x23, 0x02, 0x66, 0x08]);
        let mut sealed = Sealed::split(&payload).unwrap();
        sealed.counter = [8, 0, 0, 0];
        let nonce = nonce_v1(TEST_MAC, 0x181E, sealed.counter);
        assert_eq!(decrypt_v1(&KEY, &nonce, &sealed), None);
    }
}
