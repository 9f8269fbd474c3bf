//! Encrypted envelope and the keyed-hash proof of key possession
//!
//! Envelope: ChaCha20-Poly1305 under the 32-byte key secret, a fresh random
//! 12-byte IV per call and the key id bytes as associated data, serialized
//! as `iv || ciphertext || tag`.
//!
//! Authentication: `HMAC-SHA256(secret, key_id || nonce)` with a 16-byte
//! nonce, verified in constant time. There is no replay cache here.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key as CipherKey, Nonce};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use uuid::Uuid;

use crate::model::{KeyCredentials, KeyData};
use crate::tlv::{TlvDecode, TlvEncode, TlvReader, TlvWriter};
use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const NONCE_LEN: usize = 16;
pub const DIGEST_LEN: usize = 32;

/// AEAD output: `iv` followed by ciphertext with its tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedData {
    iv: [u8; IV_LEN],
    ciphertext: Vec<u8>,
}

impl EncryptedData {
    pub fn encrypt(plaintext: &[u8], secret: &KeyData, key_id: &Uuid) -> Result<Self> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let cipher = ChaCha20Poly1305::new(CipherKey::from_slice(secret.as_bytes()));
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: plaintext,
                    aad: key_id.as_bytes(),
                },
            )
            .map_err(|_| Error::Encryption)?;

        Ok(Self { iv, ciphertext })
    }

    /// Fails closed: no plaintext unless the tag verifies under both
    /// `secret` and `key_id`
    pub fn decrypt(&self, secret: &KeyData, key_id: &Uuid) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new(CipherKey::from_slice(secret.as_bytes()));
        cipher
            .decrypt(
                Nonce::from_slice(&self.iv),
                Payload {
                    msg: &self.ciphertext,
                    aad: key_id.as_bytes(),
                },
            )
            .map_err(|_| Error::Decryption)
    }

    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(IV_LEN + self.ciphertext.len());
        bytes.extend_from_slice(&self.iv);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < IV_LEN + TAG_LEN {
            return Err(Error::invalid(format!(
                "encrypted data needs at least {} bytes, got {}",
                IV_LEN + TAG_LEN,
                bytes.len()
            )));
        }
        let (iv, ciphertext) = bytes.split_at(IV_LEN);
        let iv = <[u8; IV_LEN]>::try_from(iv)
            .map_err(|_| Error::invalid("encrypted data iv"))?;

        Ok(Self {
            iv,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// The message an authentication digest covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticationMessage {
    pub key_id: Uuid,
    pub nonce: [u8; NONCE_LEN],
}

impl AuthenticationMessage {
    fn mac(&self, secret: &KeyData) -> HmacSha256 {
        let mut mac = match <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC accepts keys of any length"),
        };
        mac.update(self.key_id.as_bytes());
        mac.update(&self.nonce);
        mac
    }
}

/// Proof that the sender holds the secret of `message.key_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authentication {
    pub message: AuthenticationMessage,
    pub digest: [u8; DIGEST_LEN],
}

impl Authentication {
    const KEY_ID: u8 = 0x01;
    const NONCE: u8 = 0x02;
    const DIGEST: u8 = 0x03;

    /// Authenticate with a fresh random nonce
    pub fn new(credentials: &KeyCredentials) -> Self {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        Self::with_nonce(credentials.id, nonce, &credentials.secret)
    }

    pub fn with_nonce(key_id: Uuid, nonce: [u8; NONCE_LEN], secret: &KeyData) -> Self {
        let message = AuthenticationMessage { key_id, nonce };
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&message.mac(secret).finalize().into_bytes());
        Self { message, digest }
    }

    pub fn key_id(&self) -> Uuid {
        self.message.key_id
    }

    pub fn verify(&self, secret: &KeyData) -> bool {
        self.message.mac(secret).verify_slice(&self.digest).is_ok()
    }
}

impl TlvEncode for Authentication {
    fn encode_tlv(&self, writer: &mut TlvWriter<'_>) {
        writer.uuid(Self::KEY_ID, &self.message.key_id);
        writer.bytes(Self::NONCE, &self.message.nonce);
        writer.bytes(Self::DIGEST, &self.digest);
    }
}

impl TlvDecode for Authentication {
    fn decode_tlv(reader: &TlvReader<'_>) -> Result<Self> {
        Ok(Self {
            message: AuthenticationMessage {
                key_id: reader.uuid(Self::KEY_ID)?,
                nonce: reader.array(Self::NONCE)?,
            },
            digest: reader.array(Self::DIGEST)?,
        })
    }
}

/// Value written to an encrypted characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedRequest {
    pub authentication: Authentication,
    pub encrypted: EncryptedData,
}

impl EncryptedRequest {
    const AUTHENTICATION: u8 = 0x01;
    const ENCRYPTED: u8 = 0x02;

    pub fn seal(plaintext: &[u8], credentials: &KeyCredentials) -> Result<Self> {
        Ok(Self {
            authentication: Authentication::new(credentials),
            encrypted: EncryptedData::encrypt(plaintext, &credentials.secret, &credentials.id)?,
        })
    }

    pub fn key_id(&self) -> Uuid {
        self.authentication.key_id()
    }

    /// Verify the authentication, then decrypt under the same key
    ///
    /// Both failures are reported as `Decryption`.
    pub fn open(&self, secret: &KeyData) -> Result<Vec<u8>> {
        if !self.authentication.verify(secret) {
            return Err(Error::Decryption);
        }
        self.encrypted.decrypt(secret, &self.key_id())
    }
}

impl TlvEncode for EncryptedRequest {
    fn encode_tlv(&self, writer: &mut TlvWriter<'_>) {
        writer.nested(Self::AUTHENTICATION, &self.authentication);
        writer.bytes(Self::ENCRYPTED, &self.encrypted.to_bytes());
    }
}

impl TlvDecode for EncryptedRequest {
    fn decode_tlv(reader: &TlvReader<'_>) -> Result<Self> {
        Ok(Self {
            authentication: reader.nested(Self::AUTHENTICATION)?,
            encrypted: EncryptedData::from_bytes(reader.bytes(Self::ENCRYPTED)?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UnlockAction;
    use crate::request::UnlockRequest;
    use crate::tlv::{self, TlvConfig};
    use proptest::prelude::*;

    fn credentials() -> KeyCredentials {
        KeyCredentials::new(Uuid::from_u128(0xabcd), KeyData::from_bytes([7; 32]))
    }

    #[test]
    fn test_encrypted_unlock_starts_with_iv() {
        let config = TlvConfig::default();
        let creds = credentials();
        let plaintext = tlv::encode(&UnlockRequest::default(), &config);

        let wire = EncryptedData::encrypt(&plaintext, &creds.secret, &creds.id)
            .unwrap()
            .to_bytes();
        assert_eq!(wire.len(), IV_LEN + plaintext.len() + TAG_LEN);

        let envelope = EncryptedData::from_bytes(&wire).unwrap();
        assert_eq!(envelope.iv().as_slice(), &wire[..IV_LEN]);

        let decrypted = envelope.decrypt(&creds.secret, &creds.id).unwrap();
        let request: UnlockRequest = tlv::decode(&decrypted, &config).unwrap();
        assert_eq!(request.action, UnlockAction::Default);
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let creds = credentials();
        let a = EncryptedData::encrypt(b"same", &creds.secret, &creds.id).unwrap();
        let b = EncryptedData::encrypt(b"same", &creds.secret, &creds.id).unwrap();
        assert_ne!(a.iv(), b.iv());
        assert_ne!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn test_decrypt_with_other_key_id_fails() {
        let creds = credentials();
        let envelope = EncryptedData::encrypt(b"open", &creds.secret, &creds.id).unwrap();
        assert_eq!(
            envelope.decrypt(&creds.secret, &Uuid::from_u128(1)),
            Err(Error::Decryption)
        );
    }

    #[test]
    fn test_tampered_or_truncated_envelope_fails_closed() {
        let creds = credentials();
        let wire = EncryptedData::encrypt(b"open the door", &creds.secret, &creds.id)
            .unwrap()
            .to_bytes();

        for i in 0..wire.len() {
            let mut tampered = wire.clone();
            tampered[i] ^= 0x01;
            let envelope = EncryptedData::from_bytes(&tampered).unwrap();
            assert_eq!(envelope.decrypt(&creds.secret, &creds.id), Err(Error::Decryption));
        }

        let truncated = EncryptedData::from_bytes(&wire[..wire.len() - 1]).unwrap();
        assert_eq!(truncated.decrypt(&creds.secret, &creds.id), Err(Error::Decryption));
        assert!(matches!(
            EncryptedData::from_bytes(&wire[..IV_LEN + TAG_LEN - 1]),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn test_authentication_verify() {
        let creds = credentials();
        let auth = Authentication::with_nonce(creds.id, [3; NONCE_LEN], &creds.secret);
        assert!(auth.verify(&creds.secret));
        assert!(!auth.verify(&KeyData::from_bytes([8; 32])));

        let mut replaced_nonce = auth.clone();
        replaced_nonce.message.nonce[0] ^= 1;
        assert!(!replaced_nonce.verify(&creds.secret));

        let mut replaced_id = auth.clone();
        replaced_id.message.key_id = Uuid::from_u128(1);
        assert!(!replaced_id.verify(&creds.secret));

        assert_ne!(Authentication::new(&creds).message.nonce, auth.message.nonce);
    }

    #[test]
    fn test_encrypted_request_tlv_and_open() {
        let config = TlvConfig::default();
        let creds = credentials();
        let request = EncryptedRequest::seal(b"payload", &creds).unwrap();

        let decoded: EncryptedRequest =
            tlv::decode(&tlv::encode(&request, &config), &config).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.key_id(), creds.id);
        assert_eq!(decoded.open(&creds.secret).unwrap(), b"payload");
        assert_eq!(
            decoded.open(&KeyData::from_bytes([9; 32])),
            Err(Error::Decryption)
        );
    }

    #[test]
    fn test_encrypted_request_carries_envelope_as_opaque_bytes() {
        let config = TlvConfig::default();
        let creds = credentials();
        let request = EncryptedRequest::seal(b"payload", &creds).unwrap();
        let wire = tlv::encode(&request, &config);

        let reader = TlvReader::parse(&wire, &config).unwrap();
        let envelope = reader.bytes(EncryptedRequest::ENCRYPTED).unwrap();
        assert_eq!(envelope, request.encrypted.to_bytes().as_slice());
        assert_eq!(&envelope[..IV_LEN], request.encrypted.iv().as_slice());
        assert_eq!(envelope.len(), IV_LEN + b"payload".len() + TAG_LEN);
    }

    proptest! {
        #[test]
        fn prop_envelope_roundtrip(
            plaintext in proptest::collection::vec(any::<u8>(), 0..512),
            secret in any::<[u8; 32]>(),
            other in any::<[u8; 32]>(),
            id in any::<u128>(),
        ) {
            let secret = KeyData::from_bytes(secret);
            let id = Uuid::from_u128(id);
            let wire = EncryptedData::encrypt(&plaintext, &secret, &id).unwrap().to_bytes();
            let envelope = EncryptedData::from_bytes(&wire).unwrap();

            prop_assert_eq!(envelope.decrypt(&secret, &id).unwrap(), plaintext);

            let other = KeyData::from_bytes(other);
            if other != secret {
                prop_assert_eq!(envelope.decrypt(&other, &id), Err(Error::Decryption));
            }
        }
    }
}
