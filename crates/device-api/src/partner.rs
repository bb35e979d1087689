//! Partner-token authentication (§4.7: "All mutations are authenticated by
//! a partner-scoped token; `deviceID` must belong to that partner").

use dashmap::DashMap;
use dooh_core::types::PartnerId;

/// Maps a partner's opaque bearer token to its `PartnerId`. In-memory,
/// development mode — seeded via `register` at startup or by the `seed`
/// CLI subcommand; swap for a durable credential store in production.
#[derive(Default)]
pub struct PartnerRegistry {
    tokens: DashMap<String, PartnerId>,
}

impl PartnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: impl Into<String>, partner_id: PartnerId) {
        self.tokens.insert(token.into(), partner_id);
    }

    pub fn resolve(&self, token: &str) -> Option<PartnerId> {
        self.tokens.get(token).map(|r| *r.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn resolves_registered_token() {
        let registry = PartnerRegistry::new();
        let partner_id = Uuid::new_v4();
        registry.register("tok-abc", partner_id);
        assert_eq!(registry.resolve("tok-abc"), Some(partner_id));
        assert_eq!(registry.resolve("unknown"), None);
    }
}
