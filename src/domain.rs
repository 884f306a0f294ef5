//! Prefixed identifiers shared across the data model.
//!
//! Every row in the store gets an id shaped `<prefix>_<16 random bytes,
//! URL-safe base64, unpadded>`. UUIDs are 16 bytes; we're using the same.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

use crate::prefixed_id;

pub fn generate_prefixed_id(prefix: &str) -> String {
    debug_assert!(!prefix.ends_with('_'), "prefix must not end with '_'");

    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);

    format!("{prefix}_{}", URL_SAFE_NO_PAD.encode(bytes))
}

prefixed_id!(DiscoveryFeedId, "feed");
prefixed_id!(FeedTaskId, "feedtask");
prefixed_id!(ArticleId, "article");
prefixed_id!(OutboundNotificationId, "outboundnotif");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_their_prefix() {
        let id = DiscoveryFeedId::default();
        assert!(id.0.starts_with("feed_"));
    }

    #[test]
    fn generated_ids_are_not_trivially_equal() {
        let a = ArticleId::default();
        let b = ArticleId::default();
        assert_ne!(a, b);
    }
}
