//! Minimal RSA for the key exchange: PKCS#1 v1.5 encryption of the
//! pre-master secret, and the raw-digest signatures CertificateVerify
//! uses (MD5+SHA1 concatenated, no DigestInfo wrapper).

use crate::errors::TlsError;

use num_bigint::{BigUint, ModInverse, RandPrime};
use num_traits::{One, Zero};

const PUBLIC_EXPONENT: u32 = 65537;
/// PKCS#1 v1.5 overhead: leading zero, block type, and the separator.
const PADDING_OVERHEAD: usize = 11;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RsaPublicKey {
    n: BigUint,
    e: BigUint,
}

#[derive(Clone, Debug)]
pub struct RsaPrivateKey {
    public: RsaPublicKey,
    d: BigUint,
}

fn left_pad(bytes: &[u8], len: usize) -> Result<Vec<u8>, TlsError> {
    if bytes.len() > len {
        return Err(TlsError::Rsa("value longer than modulus"));
    }
    let mut out = vec![0u8; len - bytes.len()];
    out.extend_from_slice(bytes);
    Ok(out)
}

impl RsaPublicKey {
    pub fn new(modulus: &[u8], exponent: &[u8]) -> Result<RsaPublicKey, TlsError> {
        let n = BigUint::from_bytes_be(modulus);
        let e = BigUint::from_bytes_be(exponent);
        if n.is_zero() || e.is_zero() {
            return Err(TlsError::Rsa("degenerate public key"));
        }
        Ok(RsaPublicKey { n, e })
    }

    pub fn modulus_len(&self) -> usize {
        (self.n.bits() + 7) / 8
    }

    pub fn modulus_bytes(&self) -> Vec<u8> {
        self.n.to_bytes_be()
    }

    pub fn exponent_bytes(&self) -> Vec<u8> {
        self.e.to_bytes_be()
    }

    /// PKCS#1 v1.5 block type 2. `padding` must hold at least
    /// `modulus_len - message_len - 3` nonzero bytes.
    pub fn encrypt(&self, message: &[u8], padding: &[u8]) -> Result<Vec<u8>, TlsError> {
        let k = self.modulus_len();
        if message.len() + PADDING_OVERHEAD > k {
            return Err(TlsError::Rsa("message too long"));
        }
        let pad_len = k - message.len() - 3;
        if padding.len() < pad_len || padding[..pad_len].iter().any(|b| *b == 0) {
            return Err(TlsError::Rsa("bad encryption padding"));
        }

        let mut block = Vec::with_capacity(k);
        block.push(0x00);
        block.push(0x02);
        block.extend_from_slice(&padding[..pad_len]);
        block.push(0x00);
        block.extend_from_slice(message);

        let m = BigUint::from_bytes_be(&block);
        let c = m.modpow(&self.e, &self.n);
        left_pad(&c.to_bytes_be(), k)
    }

    /// Verify a block-type-1 signature over a raw digest.
    pub fn verify(&self, digest: &[u8], signature: &[u8]) -> Result<(), TlsError> {
        let k = self.modulus_len();
        if signature.len() != k {
            return Err(TlsError::Rsa("signature length"));
        }
        let s = BigUint::from_bytes_be(signature);
        if s >= self.n {
            return Err(TlsError::Rsa("signature out of range"));
        }
        let em = left_pad(&s.modpow(&self.e, &self.n).to_bytes_be(), k)?;

        if em.len() < PADDING_OVERHEAD || em[0] != 0x00 || em[1] != 0x01 {
            return Err(TlsError::Rsa("signature padding"));
        }
        let mut at = 2;
        while at < em.len() && em[at] == 0xff {
            at += 1;
        }
        if at < 10 || at >= em.len() || em[at] != 0x00 {
            return Err(TlsError::Rsa("signature padding"));
        }
        if &em[at + 1..] != digest {
            return Err(TlsError::Rsa("signature mismatch"));
        }
        Ok(())
    }
}

impl RsaPrivateKey {
    pub fn from_components(
        modulus: &[u8],
        public_exponent: &[u8],
        private_exponent: &[u8],
    ) -> Result<RsaPrivateKey, TlsError> {
        let public = RsaPublicKey::new(modulus, public_exponent)?;
        let d = BigUint::from_bytes_be(private_exponent);
        if d.is_zero() {
            return Err(TlsError::Rsa("degenerate private key"));
        }
        Ok(RsaPrivateKey { public, d })
    }

    /// Generate a fresh key pair. Intended for tests and self-signed
    /// server identities; small moduli keep the loopback tests fast.
    pub fn generate(bits: usize) -> Result<RsaPrivateKey, TlsError> {
        if bits < 128 || bits % 2 != 0 {
            return Err(TlsError::Rsa("unsupported key size"));
        }
        let mut rng = rand::thread_rng();
        let e = BigUint::from(PUBLIC_EXPONENT);
        loop {
            let p: BigUint = rng.gen_prime(bits / 2);
            let q: BigUint = rng.gen_prime(bits / 2);
            if p == q {
                continue;
            }
            let n = &p * &q;
            let phi = (&p - BigUint::one()) * (&q - BigUint::one());
            let d = match (&e).mod_inverse(&phi).and_then(|d| d.to_biguint()) {
                Some(d) => d,
                None => continue,
            };
            return Ok(RsaPrivateKey {
                public: RsaPublicKey { n, e },
                d,
            });
        }
    }

    pub fn public(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Invert block-type-2 encryption.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, TlsError> {
        let k = self.public.modulus_len();
        if ciphertext.len() != k {
            return Err(TlsError::Rsa("ciphertext length"));
        }
        let c = BigUint::from_bytes_be(ciphertext);
        if c >= self.public.n {
            return Err(TlsError::Rsa("ciphertext out of range"));
        }
        let em = left_pad(&c.modpow(&self.d, &self.public.n).to_bytes_be(), k)?;

        if em.len() < PADDING_OVERHEAD || em[0] != 0x00 || em[1] != 0x02 {
            return Err(TlsError::Rsa("decryption padding"));
        }
        let mut at = 2;
        while at < em.len() && em[at] != 0x00 {
            at += 1;
        }
        if at < 10 || at >= em.len() {
            return Err(TlsError::Rsa("decryption padding"));
        }
        Ok(em[at + 1..].to_vec())
    }

    /// Block-type-1 signature over a raw digest.
    pub fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, TlsError> {
        let k = self.public.modulus_len();
        if digest.len() + PADDING_OVERHEAD > k {
            return Err(TlsError::Rsa("digest too long"));
        }
        let mut block = Vec::with_capacity(k);
        block.push(0x00);
        block.push(0x01);
        block.resize(k - digest.len() - 1, 0xff);
        block.push(0x00);
        block.extend_from_slice(digest);

        let m = BigUint::from_bytes_be(&block);
        let s = m.modpow(&self.d, &self.public.n);
        left_pad(&s.to_bytes_be(), k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> RsaPrivateKey {
        RsaPrivateKey::generate(512).expect("keygen")
    }

    #[test]
    fn encrypt_decrypt_round_trips() {
        let key = test_key();
        let padding = vec![0xaa; key.public().modulus_len()];
        let message = b"premaster secret bytes";
        let ciphertext = key
            .public()
            .encrypt(message, &padding)
            .expect("encrypt");
        assert_eq!(ciphertext.len(), key.public().modulus_len());
        assert_eq!(key.decrypt(&ciphertext).expect("decrypt"), message);
    }

    #[test]
    fn sign_verify_round_trips() {
        let key = test_key();
        let digest = [0x5au8; 36];
        let signature = key.sign(&digest).expect("sign");
        key.public().verify(&digest, &signature).expect("verify");

        let mut wrong = digest;
        wrong[0] ^= 1;
        assert!(key.public().verify(&wrong, &signature).is_err());
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let key = test_key();
        let padding = vec![0x11; key.public().modulus_len()];
        let mut ciphertext = key.public().encrypt(b"data", &padding).expect("encrypt");
        ciphertext[10] ^= 0xff;
        // Either the padding parse fails or the plaintext differs.
        match key.decrypt(&ciphertext) {
            Ok(plain) => assert_ne!(plain, b"data"),
            Err(_) => {}
        }
    }

    #[test]
    fn zero_padding_bytes_are_refused() {
        let key = test_key();
        let padding = vec![0x00; key.public().modulus_len()];
        assert!(key.public().encrypt(b"data", &padding).is_err());
    }
}
