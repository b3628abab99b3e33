//! Crypto-PAn prefix-preserving IP address pseudonymization.
//!
//! Anonymizing the same address with the same key always produces the
//! same output, and two addresses that share a network prefix produce
//! outputs that share the same length prefix too - so subnet structure
//! survives anonymization even though individual addresses don't.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{RefineryError, Result};

const BLOCK_SIZE: usize = 16;
const KEY_SIZE: usize = 16;

/// Length of the keying material: a 16 byte AES-128 key followed by a
/// 16 byte pad source.
pub const KEY_MATERIAL_SIZE: usize = KEY_SIZE + BLOCK_SIZE;

type BitVector = [u8; BLOCK_SIZE];

fn bit(v: &BitVector, idx: usize) -> u8 {
    let byte_idx = idx / 8;
    let bit_idx = 7 - (idx & 7);
    (v[byte_idx] >> bit_idx) & 1
}

fn set_bit(v: &mut BitVector, idx: usize, value: u8) {
    let byte_idx = idx / 8;
    let bit_idx = 7 - (idx & 7);
    if value != 0 {
        v[byte_idx] |= 1 << bit_idx;
    } else {
        v[byte_idx] &= !(1 << bit_idx);
    }
}

pub struct CryptoPan {
    cipher: Aes128,
    pad: BitVector,
}

impl CryptoPan {
    /// Builds a Crypto-PAn instance from 32 bytes of keying material: the
    /// first 16 bytes are the AES-128 key, the last 16 are encrypted once
    /// at construction time to derive the pad used to seed every address.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_MATERIAL_SIZE {
            return Err(RefineryError::InvalidAnonymizeKey(key.len()));
        }

        let cipher = Aes128::new(GenericArray::from_slice(&key[..KEY_SIZE]));
        let mut pad_block = GenericArray::clone_from_slice(&key[KEY_SIZE..]);
        cipher.encrypt_block(&mut pad_block);
        let mut pad = [0u8; BLOCK_SIZE];
        pad.copy_from_slice(pad_block.as_slice());

        Ok(Self { cipher, pad })
    }

    fn encrypt_block(&self, block: &BitVector) -> BitVector {
        let mut buf = GenericArray::clone_from_slice(block);
        self.cipher.encrypt_block(&mut buf);
        let mut out = [0u8; BLOCK_SIZE];
        out.copy_from_slice(buf.as_slice());
        out
    }

    pub fn anonymize(&self, addr: IpAddr) -> IpAddr {
        match addr {
            IpAddr::V4(v4) => {
                let out = self.anonymize_bytes(&v4.octets());
                IpAddr::V4(Ipv4Addr::new(out[0], out[1], out[2], out[3]))
            }
            IpAddr::V6(v6) => {
                let out = self.anonymize_bytes(&v6.octets());
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(&out);
                IpAddr::V6(Ipv6Addr::from(bytes))
            }
        }
    }

    fn anonymize_bytes(&self, addr: &[u8]) -> Vec<u8> {
        let addr_bits = addr.len() * 8;

        let mut orig_addr: BitVector = [0u8; BLOCK_SIZE];
        orig_addr[..addr.len()].copy_from_slice(addr);

        let mut input: BitVector = self.pad;
        let mut to_xor: BitVector = [0u8; BLOCK_SIZE];

        // The first bit does not take any bits from orig_addr.
        let output = self.encrypt_block(&input);
        set_bit(&mut to_xor, 0, bit(&output, 0));

        // The rest of the one time pad is built by copying orig_addr into
        // the AES input bit by bit (MSB first) and encrypting with
        // ECB-AES128. Only bit 0 of each encryption is used, which is a
        // deliberate match to the reference Crypto-PAn implementations:
        // using bit `pos` instead would be cryptographically stronger but
        // incompatible with every other Crypto-PAn output.
        for pos in 1..addr_bits {
            set_bit(&mut input, pos - 1, bit(&orig_addr, pos - 1));
            let output = self.encrypt_block(&input);
            set_bit(&mut to_xor, pos, bit(&output, 0));
        }

        let mut result = vec![0u8; addr.len()];
        for i in 0..addr.len() {
            result[i] = to_xor[i] ^ orig_addr[i];
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> Vec<u8> {
        (0..KEY_MATERIAL_SIZE as u8).collect()
    }

    #[test]
    fn test_rejects_wrong_key_size() {
        assert!(CryptoPan::new(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_deterministic() {
        let cp = CryptoPan::new(&test_key()).unwrap();
        let addr: IpAddr = "192.168.1.1".parse().unwrap();
        assert_eq!(cp.anonymize(addr), cp.anonymize(addr));
    }

    #[test]
    fn test_changes_the_address() {
        let cp = CryptoPan::new(&test_key()).unwrap();
        let addr: IpAddr = "192.168.1.1".parse().unwrap();
        assert_ne!(cp.anonymize(addr), addr);
    }

    #[test]
    fn test_preserves_prefix_structure() {
        let cp = CryptoPan::new(&test_key()).unwrap();
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        let c: IpAddr = "172.16.0.1".parse().unwrap();

        let anon_a = cp.anonymize(a);
        let anon_b = cp.anonymize(b);
        let anon_c = cp.anonymize(c);

        // a and b share a /24; their anonymized forms should share a
        // longer common prefix with each other than with an address
        // from an unrelated network.
        let (IpAddr::V4(aa), IpAddr::V4(ab), IpAddr::V4(ac)) = (anon_a, anon_b, anon_c) else {
            panic!("expected IPv4 output");
        };
        assert_eq!(aa.octets()[0], ab.octets()[0]);
        assert_ne!(aa.octets()[0], ac.octets()[0]);
    }

    #[test]
    fn test_ipv6() {
        let cp = CryptoPan::new(&test_key()).unwrap();
        let addr: IpAddr = "2001:db8::1".parse().unwrap();
        let anon = cp.anonymize(addr);
        assert!(anon.is_ipv6());
        assert_ne!(anon, addr);
    }
}
