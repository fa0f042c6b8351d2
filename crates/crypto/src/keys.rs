use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use hopcraft_core::EmbryoKey;

const EMBRYO_KEY_CONTEXT: &[u8] = b"hopcraft-embryo-key";
const EMBRYO_NONCE_CONTEXT: &[u8] = b"hopcraft-embryo-nonce";

/// Keypair for the hop handshake (X25519)
pub struct EncryptionKeypair {
    pub secret: StaticSecret,
    pub public: X25519PublicKey,
}

impl EncryptionKeypair {
    /// Generate a new random encryption keypair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Perform Diffie-Hellman key exchange
    pub fn diffie_hellman(&self, their_public: &[u8; 32]) -> [u8; 32] {
        let their_public = X25519PublicKey::from(*their_public);
        *self.secret.diffie_hellman(&their_public).as_bytes()
    }

    /// Embryo material shared with the owner of `their_public`
    pub fn embryo_with(&self, their_public: &[u8; 32]) -> EmbryoKey {
        derive_embryo(&self.diffie_hellman(their_public))
    }
}

fn hash_with_context(context: &[u8], data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(context);
    hasher.update(data);
    hasher.finalize().into()
}

/// Expand a handshake shared secret into per-connection embryo material
pub fn derive_embryo(shared_secret: &[u8; 32]) -> EmbryoKey {
    let key = hash_with_context(EMBRYO_KEY_CONTEXT, shared_secret);
    let nonce_seed = hash_with_context(EMBRYO_NONCE_CONTEXT, shared_secret);

    let mut salt = [0u8; 8];
    let mut secret = [0u8; 8];
    salt.copy_from_slice(&nonce_seed[0..8]);
    secret.copy_from_slice(&nonce_seed[8..16]);

    EmbryoKey::new(key, u64::from_le_bytes(salt), u64::from_le_bytes(secret))
}

/// Fresh random embryo material, for transports that negotiate it elsewhere
pub fn random_embryo() -> EmbryoKey {
    let mut seed = [0u8; 32];
    rand::RngCore::fill_bytes(&mut OsRng, &mut seed);
    derive_embryo(&seed)
}
