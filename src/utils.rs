use rand::Rng;

/// 8 random bytes, hex-encoded. Used for session and message ids.
pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}
