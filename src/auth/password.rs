use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use tracing::error;

lazy_static! {
    // hash of a random value nobody knows, built with the live parameters
    static ref DUMMY_HASH: Option<String> = hash_password(&super::tokens::generate_token()).ok();
}

/// Salted argon2id hash in PHC string form.
pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!("password hashing failed: {e}")
        })
}

/// `Ok(false)` on mismatch; only an unparsable stored hash is an error.
pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "stored password hash is malformed");
        anyhow::anyhow!("invalid password hash: {e}")
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// Spends one verification on a password that cannot match. Keeps the unknown
/// account path as slow as the wrong password path.
pub fn verify_against_dummy(plain: &str) {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(plain, hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let hash = hash_password("Password123").expect("hashing should succeed");
        assert!(verify_password("Password123", &hash).expect("verify should succeed"));
    }

    #[test]
    fn mutated_passwords_are_rejected() {
        let hash = hash_password("Password123").unwrap();
        for wrong in ["password123", "Password1234", "Password12", "", " Password123"] {
            assert!(!verify_password(wrong, &hash).unwrap(), "{wrong:?} should not verify");
        }
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let a = hash_password("Password123").unwrap();
        let b = hash_password("Password123").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("$argon2id$"));
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(verify_password("anything", "not-a-valid-hash").is_err());
    }

    #[test]
    fn dummy_hash_is_a_real_argon2_hash() {
        let hash = DUMMY_HASH.as_deref().expect("dummy hash built");
        assert!(hash.starts_with("$argon2id$"));
        assert!(!verify_password("Password123", hash).unwrap());
        verify_against_dummy("Password123");
    }
}
