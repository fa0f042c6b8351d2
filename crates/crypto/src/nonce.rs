//! Nonce derivation for relay layers

/// Size of the derived nonce buffer
pub const NONCE_LEN: usize = 32;

/// Combine a packet salt with a hop's embryo salt and secret.
///
/// Layout (little-endian):
/// `[packet salt: 4][hop salt: 8][hop secret: 8][packet salt ^ secret lo: 4][hop salt ^ hop secret: 8]`
///
/// Encrypt and decrypt of a layer must call this with identical inputs.
pub fn derive_nonce(packet_salt: u32, hop_salt: u64, hop_secret: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[0..4].copy_from_slice(&packet_salt.to_le_bytes());
    nonce[4..12].copy_from_slice(&hop_salt.to_le_bytes());
    nonce[12..20].copy_from_slice(&hop_secret.to_le_bytes());
    nonce[20..24].copy_from_slice(&(packet_salt ^ hop_secret as u32).to_le_bytes());
    nonce[24..32].copy_from_slice(&(hop_salt ^ hop_secret).to_le_bytes());
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_is_deterministic() {
        assert_eq!(derive_nonce(7, 11, 13), derive_nonce(7, 11, 13));
    }

    #[test]
    fn test_nonce_depends_on_every_input() {
        let base = derive_nonce(7, 11, 13);
        assert_ne!(base, derive_nonce(8, 11, 13));
        assert_ne!(base, derive_nonce(7, 12, 13));
        assert_ne!(base, derive_nonce(7, 11, 14));
    }

    #[test]
    fn test_nonce_layout() {
        let nonce = derive_nonce(0x0102_0304, 0, 0);
        assert_eq!(&nonce[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&nonce[20..24], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&nonce[24..32], &[0u8; 8]);
    }
}
