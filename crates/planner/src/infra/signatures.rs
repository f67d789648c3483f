//! The three idempotency stores backing resumable plans: marketplace auth
//! tokens, ERC20 permits and per-order taker pre-signatures. All of them
//! are content-addressed over the canonical request payload, so a client
//! that POSTed a signature to the companion endpoint and polls again with
//! the identical request observes the step as complete.

use {
    crate::domain::eth::{Address, U256},
    anyhow::Result,
    chrono::{DateTime, Utc},
    moka::{future::Cache, Expiry},
    sha2::{Digest, Sha256},
    std::{
        collections::HashMap,
        sync::Mutex,
        time::{Duration, Instant},
    },
};

/// Hash of a canonical JSON document. serde_json maps are backed by a
/// BTreeMap, so serializing a [`serde_json::Value`] yields sorted keys;
/// amounts are serialized as decimal strings upstream, which takes care of
/// numeric normalization. Without both, two equivalent requests would hash
/// differently and the resume-after-signing contract would break.
fn canonical_hash(payload: &serde_json::Value, salt: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    for part in salt {
        hasher.update([0u8]);
        hasher.update(part.as_bytes());
    }
    alloy_primitives::hex::encode(hasher.finalize())
}

/// Correlates every poll of the same request: identical payloads produce
/// identical request ids.
pub fn request_id(payload: &serde_json::Value) -> String {
    canonical_hash(payload, &[])
}

/// Pure function of the request payload and the permit's (token, amount)
/// salt tuple.
pub fn permit_id(payload: &serde_json::Value, token: Address, amount: U256) -> String {
    canonical_hash(payload, &[&token.to_string(), &amount.to_string()])
}

/// Pure function of the request payload and the order's unique id.
pub fn pre_signature_id(payload: &serde_json::Value, unique_id: &str) -> String {
    canonical_hash(payload, &[unique_id])
}

/// Which marketplace authentication a cached credential belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthScope {
    /// Blur signed-login.
    Blur,
    /// ERC721-C EOA-verification challenge for one transfer validator.
    Erc721c { validator: Address },
}

/// Grace subtracted from a challenge's stated expiration so a credential
/// never dies between the poll that emitted it and the fill.
pub const AUTH_TTL_BUFFER: Duration = Duration::from_secs(60);

/// ERC721-C challenges carry no expiration; cache them briefly.
pub const ERC721C_AUTH_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct CachedAuth {
    /// The signature (or access token) the client POSTed back.
    pub signature: String,
    pub ttl: Duration,
}

/// An ERC20 permit waiting for (or already carrying) the taker's signature.
#[derive(Debug, Clone)]
pub struct CachedPermit {
    pub token: Address,
    pub amount: U256,
    pub spender: Address,
    pub deadline: DateTime<Utc>,
    /// EIP712 pieces the client signs.
    pub domain: serde_json::Value,
    pub types: serde_json::Value,
    pub value: serde_json::Value,
    pub signature: Option<String>,
}

#[async_trait::async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait SignatureStore: Send + Sync {
    async fn auth(&self, scope: AuthScope, taker: Address) -> Result<Option<CachedAuth>>;

    async fn save_auth(&self, scope: AuthScope, taker: Address, auth: CachedAuth) -> Result<()>;

    async fn permit(&self, id: String) -> Result<Option<CachedPermit>>;

    /// First write wins: a permit that already carries a signature is
    /// never clobbered by a fresh unsigned one.
    async fn save_permit(&self, id: String, permit: CachedPermit) -> Result<()>;

    async fn pre_signature(&self, id: String) -> Result<Option<String>>;

    async fn save_pre_signature(&self, id: String, signature: String) -> Result<()>;
}

struct AuthExpiry;

impl Expiry<(AuthScope, Address), CachedAuth> for AuthExpiry {
    fn expire_after_create(
        &self,
        _key: &(AuthScope, Address),
        value: &CachedAuth,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Process-local store. Production deployments back this trait with a
/// shared cache so plans survive instance restarts; the semantics are the
/// same.
pub struct InMemorySignatureStore {
    auth: Cache<(AuthScope, Address), CachedAuth>,
    permits: Mutex<HashMap<String, CachedPermit>>,
    pre_signatures: Mutex<HashMap<String, String>>,
}

impl Default for InMemorySignatureStore {
    fn default() -> Self {
        Self {
            auth: Cache::builder()
                .max_capacity(10_000)
                .expire_after(AuthExpiry)
                .build(),
            permits: Mutex::new(HashMap::new()),
            pre_signatures: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait::async_trait]
impl SignatureStore for InMemorySignatureStore {
    async fn auth(&self, scope: AuthScope, taker: Address) -> Result<Option<CachedAuth>> {
        Ok(self.auth.get(&(scope, taker)).await)
    }

    async fn save_auth(&self, scope: AuthScope, taker: Address, auth: CachedAuth) -> Result<()> {
        self.auth.insert((scope, taker), auth).await;
        Ok(())
    }

    async fn permit(&self, id: String) -> Result<Option<CachedPermit>> {
        Ok(self.permits.lock().unwrap().get(&id).cloned())
    }

    async fn save_permit(&self, id: String, permit: CachedPermit) -> Result<()> {
        let mut permits = self.permits.lock().unwrap();
        match permits.get(&id) {
            Some(existing) if existing.signature.is_some() => (),
            _ => {
                permits.insert(id, permit);
            }
        }
        Ok(())
    }

    async fn pre_signature(&self, id: String) -> Result<Option<String>> {
        Ok(self.pre_signatures.lock().unwrap().get(&id).cloned())
    }

    async fn save_pre_signature(&self, id: String, signature: String) -> Result<()> {
        self.pre_signatures.lock().unwrap().insert(id, signature);
        Ok(())
    }
}

/// Produces the signing challenges for marketplaces that gate fills behind
/// an authenticated taker. The actual challenge comes from the marketplace
/// SDK, an external collaborator.
#[async_trait::async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait AuthChallenger: Send + Sync {
    async fn blur_challenge(&self, taker: Address) -> Result<AuthChallenge>;

    async fn erc721c_challenge(&self, validator: Address, taker: Address) -> Result<AuthChallenge>;

    /// The on-chain EOA-verification call embedding the signed challenge.
    async fn erc721c_verification_tx(
        &self,
        validator: Address,
        taker: Address,
        signature: String,
    ) -> Result<crate::domain::eth::Transaction>;
}

#[derive(Debug, Clone)]
pub struct AuthChallenge {
    /// Opaque id the companion endpoint uses to route the POSTed
    /// signature back into the store.
    pub id: String,
    /// EIP191 message to sign.
    pub message: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthChallenge {
    /// Cache lifetime of the credential produced from this challenge.
    pub fn ttl(&self, now: DateTime<Utc>) -> Duration {
        match self.expires_at {
            Some(expires_at) => (expires_at - now)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .saturating_sub(AUTH_TTL_BUFFER),
            None => ERC721C_AUTH_TTL,
        }
    }
}
