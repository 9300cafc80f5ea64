use crate::util::config::random_seed_disabled;
use base64::engine::general_purpose::STANDARD as Base64;
use base64::Engine;
use rand::distr::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::sync::Mutex;

pub const ACCESS_KEY_LEN: usize = 20;
pub const SECRET_KEY_LEN: usize = 40;

// 30 random bytes encode to exactly 40 base64 characters, no padding.
const SECRET_RAW_LEN: usize = 30;
const RECORD_ID_RAW_LEN: usize = 12;

static SEEDED_RNG: Mutex<Option<StdRng>> = Mutex::new(None);

pub fn generate_access_key() -> String {
    with_rng(|rng| {
        (0..ACCESS_KEY_LEN)
            .map(|_| rng.sample(Alphanumeric) as char)
            .collect()
    })
}

pub fn generate_secret_key() -> String {
    with_rng(|rng| {
        let mut bytes = [0u8; SECRET_RAW_LEN];
        rng.fill_bytes(&mut bytes);
        Base64.encode(bytes)
    })
}

pub fn new_record_id() -> String {
    with_rng(|rng| {
        let mut bytes = [0u8; RECORD_ID_RAW_LEN];
        rng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    })
}

pub fn is_valid_access_key(key: &str) -> bool {
    key.len() == ACCESS_KEY_LEN && key.chars().all(|ch| ch.is_ascii_alphanumeric())
}

pub fn is_valid_secret_key(key: &str) -> bool {
    key.len() == SECRET_KEY_LEN
        && key
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '+' || ch == '/')
}

fn with_rng<T>(generate: impl FnOnce(&mut dyn RngCore) -> T) -> T {
    if random_seed_disabled() {
        let mut guard = SEEDED_RNG.lock().expect("rng lock");
        let rng = guard.get_or_insert_with(|| StdRng::seed_from_u64(0));
        generate(rng)
    } else {
        generate(&mut rand::rng())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        generate_access_key, generate_secret_key, is_valid_access_key, is_valid_secret_key,
        new_record_id,
    };

    #[test]
    fn generated_access_keys_match_the_account_format() {
        for _ in 0..32 {
            let key = generate_access_key();
            assert!(is_valid_access_key(&key), "{key}");
        }
    }

    #[test]
    fn generated_secret_keys_match_the_account_format() {
        for _ in 0..32 {
            let secret = generate_secret_key();
            assert!(is_valid_secret_key(&secret), "{secret}");
        }
    }

    #[test]
    fn consecutive_keys_differ() {
        assert_ne!(generate_access_key(), generate_access_key());
        assert_ne!(generate_secret_key(), generate_secret_key());
        assert_ne!(new_record_id(), new_record_id());
    }

    #[test]
    fn record_ids_are_hex() {
        let id = new_record_id();
        assert_eq!(id.len(), 24);
        assert!(id.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn access_key_validation_rejects_bad_shapes() {
        assert!(is_valid_access_key(&"A".repeat(20)));
        assert!(!is_valid_access_key(&"A".repeat(19)));
        assert!(!is_valid_access_key(&"A".repeat(21)));
        assert!(!is_valid_access_key("ABCDEFGHIJKLMNOPQRS+"));
        assert!(!is_valid_access_key(""));
    }

    #[test]
    fn secret_key_validation_allows_base64_alphabet_only() {
        assert!(is_valid_secret_key(&"a".repeat(40)));
        assert!(is_valid_secret_key(&format!("{}+/", "a".repeat(38))));
        assert!(!is_valid_secret_key(&format!("{}==", "a".repeat(38))));
        assert!(!is_valid_secret_key(&"a".repeat(39)));
        assert!(!is_valid_secret_key(&"a".repeat(41)));
    }
}
