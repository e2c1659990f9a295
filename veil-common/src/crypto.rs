use crate::types::{Hash, MemberId};

use std::io;

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine};
use borsh::BorshSerialize;
use ed25519::pkcs8::{DecodePrivateKey, EncodePrivateKey, KeypairBytes};
use ed25519_dalek::{Keypair, PublicKey, SecretKey, Signature, Signer, Verifier};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

pub fn generate_keypair() -> Keypair {
    let mut rng = OsRng {};
    Keypair::generate(&mut rng)
}

pub fn keypair_to_pem(keypair: &Keypair) -> Result<String> {
    let kpb = keypair_to_bytes(keypair);
    let pem = kpb
        .to_pkcs8_pem(pkcs8::LineEnding::LF)
        .map_err(|e| anyhow!("encode keypair as pem failed: {e}"))?;
    Ok(pem.to_string())
}

pub fn keypair_from_pem(pem: &str) -> Result<Keypair> {
    let kpb = KeypairBytes::from_pkcs8_pem(pem.trim())
        .map_err(|e| anyhow!("decode keypair from pem failed: {e}"))?;
    keypair_from_bytes(kpb)
}

pub fn publickey_to_base64(pubkey: MemberId) -> String {
    general_purpose::STANDARD.encode(pubkey)
}

pub fn publickey_from_base64(b64: &str) -> Result<MemberId> {
    let key_vec = general_purpose::STANDARD.decode(b64.trim())?;
    Ok(key_vec.as_slice().try_into()?)
}

/// Short printable form of a key or hash for log lines.
pub fn short(bytes: &[u8; 32]) -> String {
    general_purpose::STANDARD.encode(&bytes[..6])
}

pub fn keypair_to_bytes(keypair: &Keypair) -> KeypairBytes {
    KeypairBytes {
        secret_key: keypair.secret.to_bytes(),
        public_key: Some(keypair.public.to_bytes()),
    }
}

pub fn keypair_from_bytes(kpb: KeypairBytes) -> Result<Keypair> {
    let secret = SecretKey::from_bytes(&kpb.secret_key)?;
    let public = match kpb.public_key {
        Some(pubkey) => PublicKey::from_bytes(&pubkey)?,
        None => (&secret).into(),
    };
    Ok(Keypair { secret, public })
}

pub fn sign(keypair: &Keypair, msg: &[u8]) -> Vec<u8> {
    keypair.sign(msg).to_bytes().to_vec()
}

pub fn verify(signer: &MemberId, msg: &[u8], signature: &[u8]) -> bool {
    let Ok(public) = PublicKey::from_bytes(signer) else {
        return false;
    };
    let Ok(signature) = Signature::try_from(signature) else {
        return false;
    };
    public.verify(msg, &signature).is_ok()
}

pub fn hash_bytes(bytes: &[u8]) -> Hash {
    Sha256::digest(bytes).into()
}

/// SHA-256 over the borsh encoding, streamed straight into the hasher.
pub fn hash_of<T: BorshSerialize + ?Sized>(value: &T) -> Hash {
    let mut writer = HashWriter(Sha256::new());
    // HashWriter never fails a write.
    let _ = value.serialize(&mut writer);
    writer.0.finalize().into()
}

struct HashWriter(Sha256);

impl io::Write for HashWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
