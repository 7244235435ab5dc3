//! Event id derivation, Schnorr signing and key handling.

use std::fmt;

use anyhow::{anyhow, Result};
use bech32::{Bech32, Hrp};
use secp256k1::{schnorr::Signature, Keypair, Message, Secp256k1, XOnlyPublicKey};
use sha2::{Digest, Sha256};

use crate::error::BotError;
use crate::event::{Event, Tag};

/// The bot's signing identity, decoded once from the configured secret key.
#[derive(Clone)]
pub struct Keys {
    keypair: Keypair,
    public_key: String,
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keys")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

impl Keys {
    /// Decode a secret key given as `nsec1…` bech32 or 64 hex characters.
    pub fn parse(secret: &str) -> Result<Self, BotError> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(BotError::Key("secret key is empty".into()));
        }
        let bytes = if secret.starts_with("nsec1") {
            decode_bech32("nsec", secret).map_err(|e| BotError::Key(e.to_string()))?
        } else {
            hex::decode(secret).map_err(|e| BotError::Key(e.to_string()))?
        };
        Self::from_bytes(&bytes)
    }

    /// Build keys from raw 32-byte secret key material.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BotError> {
        if bytes.len() != 32 {
            return Err(BotError::Key(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let secp = Secp256k1::new();
        let keypair =
            Keypair::from_seckey_slice(&secp, bytes).map_err(|e| BotError::Key(e.to_string()))?;
        let public_key = hex::encode(keypair.x_only_public_key().0.serialize());
        Ok(Self {
            keypair,
            public_key,
        })
    }

    /// Hex-encoded x-only public key paired with the secret key.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Schnorr signature over a hex event id.
    pub fn sign(&self, id: &str) -> Result<String, BotError> {
        let digest = hex::decode(id).map_err(|e| BotError::Encoding(e.to_string()))?;
        let msg =
            Message::from_digest_slice(&digest).map_err(|e| BotError::Encoding(e.to_string()))?;
        let secp = Secp256k1::new();
        let sig = secp.sign_schnorr_no_aux_rand(&msg, &self.keypair);
        Ok(hex::encode(sig.as_ref()))
    }
}

/// SHA-256 over the canonical `[0, pubkey, created_at, kind, tags, content]` array.
///
/// `serde_json` writes compact output, keeps non-ASCII text as raw UTF-8 and
/// only escapes quotes, backslashes and control characters, which is the form
/// every Nostr verifier expects.
pub fn event_hash(
    pubkey: &str,
    created_at: u64,
    kind: u32,
    tags: &[Tag],
    content: &str,
) -> Result<[u8; 32], BotError> {
    let arr = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
    let data = serde_json::to_vec(&arr).map_err(|e| BotError::Encoding(e.to_string()))?;
    Ok(Sha256::digest(&data).into())
}

/// Hex event id for the given signable fields.
pub fn derive_id(
    pubkey: &str,
    created_at: u64,
    kind: u32,
    tags: &[Tag],
    content: &str,
) -> Result<String, BotError> {
    event_hash(pubkey, created_at, kind, tags, content).map(hex::encode)
}

/// Assemble an event authored by `keys`, computing `id` and `sig` last.
pub fn finalize(
    keys: &Keys,
    created_at: u64,
    kind: u32,
    tags: Vec<Tag>,
    content: String,
) -> Result<Event, BotError> {
    let pubkey = keys.public_key().to_string();
    let id = derive_id(&pubkey, created_at, kind, &tags, &content)?;
    let sig = keys.sign(&id)?;
    Ok(Event {
        id,
        pubkey,
        kind,
        created_at,
        tags,
        content,
        sig,
    })
}

/// Verify an event's ID and Schnorr signature.
pub fn verify_event(ev: &Event) -> Result<()> {
    let hash = event_hash(&ev.pubkey, ev.created_at, ev.kind, &ev.tags, &ev.content)?;
    let calc_id = hex::encode(hash);
    if calc_id != ev.id {
        return Err(anyhow!("id mismatch"));
    }
    let sig = Signature::from_slice(&hex::decode(&ev.sig)?)?;
    let pk = XOnlyPublicKey::from_slice(&hex::decode(&ev.pubkey)?)?;
    let secp = Secp256k1::verification_only();
    let msg = Message::from_digest_slice(&hash)?;
    secp.verify_schnorr(&sig, &msg, &pk)?;
    Ok(())
}

/// Normalize a public key given as `npub1…` or hex into lowercase hex.
pub fn parse_pubkey(input: &str) -> Result<String, BotError> {
    let bytes = if input.starts_with("npub1") {
        decode_bech32("npub", input).map_err(|e| BotError::Decode(e.to_string()))?
    } else {
        hex::decode(input).map_err(|e| BotError::Decode(format!("bad pubkey {input}: {e}")))?
    };
    if bytes.len() != 32 {
        return Err(BotError::Decode(format!("bad pubkey length: {}", bytes.len())));
    }
    Ok(hex::encode(bytes))
}

/// Encode a hex public key as `npub1…`.
pub fn encode_npub(pubkey: &str) -> Result<String> {
    let bytes = hex::decode(pubkey)?;
    let hrp = Hrp::parse("npub")?;
    Ok(bech32::encode::<Bech32>(hrp, &bytes)?)
}

fn decode_bech32(expected: &str, input: &str) -> Result<Vec<u8>> {
    let (hrp, data) = bech32::decode(input)?;
    if hrp.as_str() != expected {
        return Err(anyhow!("expected {expected} prefix, got {}", hrp.as_str()));
    }
    Ok(data)
}
