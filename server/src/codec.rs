//! Wire codec for the obfuscated chat channel
//!
//! The chat service speaks AES-256-CBC with a per-message random key/IV,
//! both transmitted inline after a fixed character-substitution ("morph")
//! pass. The format must match the service's client implementation
//! bit-for-bit:
//!
//! `morph(key) + SEP + morph(iv) + SEP + padding + base64(ciphertext)`
//!
//! where `padding` is a 12-character random alphanumeric prefix with no
//! decoding role.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::distr::{Alphanumeric, SampleString};
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Separator between the three wire parts
const SEPARATOR: &str = "rE7pRxTGlqT6";

/// Length of the throwaway random prefix on the ciphertext part
const DYNAMIC_PADDING_LENGTH: usize = 12;

/// AES-256 key length (raw bytes of the alphanumeric key string)
const KEY_LENGTH: usize = 32;

/// AES block / IV length
const IV_LENGTH: usize = 16;

/// Width of every morph replacement token
const MORPH_TOKEN_LENGTH: usize = 12;

/// Character substitution table applied to the key and IV strings.
/// Characters without an entry pass through unchanged.
const MORPH_RULES: &[(char, &str)] = &[
    ('R', "Ef4YsO2cbQZ2"),
    ('W', "U4Bai5Qn1ZCp"),
    ('q', "zR2H8Cd5maEc"),
    ('a', "yUz4P1a7Dz6v"),
    ('E', "Xm5VaT2B7c9a"),
];

/// Errors produced while decoding a wire string
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid wire format: expected 3 parts separated by '{SEPARATOR}'")]
    Format,

    #[error("demorphed key/iv has wrong length (key={key_len}, iv={iv_len})")]
    KeyLength { key_len: usize, iv_len: usize },

    #[error("failed to decode base64 ciphertext: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("failed to strip PKCS7 padding")]
    Padding,

    #[error("decrypted payload is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Verify the morph table is reversible: every token has the fixed
/// width and no token is a prefix of another. The reference scheme
/// happens to satisfy this but nothing enforces it structurally, so
/// the binary checks it once at startup.
pub fn morph_rules_are_reversible() -> bool {
    for (_, token) in MORPH_RULES {
        if token.len() != MORPH_TOKEN_LENGTH {
            return false;
        }
    }
    for (i, (_, a)) in MORPH_RULES.iter().enumerate() {
        for (j, (_, b)) in MORPH_RULES.iter().enumerate() {
            if i != j && b.starts_with(a) {
                return false;
            }
        }
    }
    true
}

fn random_alphanumeric(length: usize) -> String {
    Alphanumeric.sample_string(&mut rand::rng(), length)
}

/// Replace each mapped character with its fixed-width token
fn morph(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match MORPH_RULES.iter().find(|(c, _)| *c == ch) {
            Some((_, token)) => out.push_str(token),
            None => out.push(ch),
        }
    }
    out
}

/// Reverse the morph pass: scan for replacement tokens (all the same
/// width, mutually non-prefixing), falling back to pass-through per
/// character.
fn demorph(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    // Advance by whole characters; the wire string comes from an
    // untrusted peer and may contain multi-byte UTF-8
    while let Some(ch) = rest.chars().next() {
        match MORPH_RULES.iter().find(|(_, token)| rest.starts_with(token)) {
            Some((original, token)) => {
                out.push(*original);
                rest = &rest[token.len()..];
            }
            None => {
                out.push(ch);
                rest = &rest[ch.len_utf8()..];
            }
        }
    }
    out
}

/// Encrypt a payload for the wire. When `enabled` is false the input
/// passes through untouched.
pub fn encrypt(plaintext: &str, enabled: bool) -> String {
    if !enabled {
        return plaintext.to_string();
    }

    let key_string = random_alphanumeric(KEY_LENGTH);
    let iv_string = random_alphanumeric(IV_LENGTH);

    // Alphanumeric strings are ASCII, so the byte lengths are exact
    let key: [u8; KEY_LENGTH] = key_string
        .as_bytes()
        .try_into()
        .unwrap_or([b'0'; KEY_LENGTH]);
    let iv: [u8; IV_LENGTH] = iv_string.as_bytes().try_into().unwrap_or([b'0'; IV_LENGTH]);

    let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
    let encoded = BASE64.encode(ciphertext);

    let dynamic_padding = random_alphanumeric(DYNAMIC_PADDING_LENGTH);

    format!(
        "{}{SEPARATOR}{}{SEPARATOR}{}{}",
        morph(&key_string),
        morph(&iv_string),
        dynamic_padding,
        encoded
    )
}

/// Decrypt a wire string produced by [`encrypt`] (or the service's own
/// counterpart). When `enabled` is false the input passes through.
pub fn decrypt(wire: &str, enabled: bool) -> Result<String, CodecError> {
    if !enabled {
        return Ok(wire.to_string());
    }

    let parts: Vec<&str> = wire.split(SEPARATOR).collect();
    let [morphed_key, morphed_iv, padded_ciphertext] = parts.as_slice() else {
        return Err(CodecError::Format);
    };

    if padded_ciphertext.len() < DYNAMIC_PADDING_LENGTH
        || !padded_ciphertext.is_char_boundary(DYNAMIC_PADDING_LENGTH)
    {
        return Err(CodecError::Format);
    }
    let encoded = &padded_ciphertext[DYNAMIC_PADDING_LENGTH..];

    let key_string = demorph(morphed_key);
    let iv_string = demorph(morphed_iv);

    let key: [u8; KEY_LENGTH] =
        key_string
            .as_bytes()
            .try_into()
            .map_err(|_| CodecError::KeyLength {
                key_len: key_string.len(),
                iv_len: iv_string.len(),
            })?;
    let iv: [u8; IV_LENGTH] =
        iv_string
            .as_bytes()
            .try_into()
            .map_err(|_| CodecError::KeyLength {
                key_len: key_string.len(),
                iv_len: iv_string.len(),
            })?;

    let ciphertext = BASE64.decode(encoded)?;
    let plaintext = Aes256CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| CodecError::Padding)?;

    Ok(String::from_utf8(plaintext)?)
}
