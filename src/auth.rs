use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base64::prelude::*;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use warp::{reject, Filter, Rejection};

const KEY_PREFIX: &str = "wozmon_";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ReadSessions,
    WriteSessions,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub name: String,
    pub key_hash: String,
    pub permissions: Vec<Permission>,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl ApiKey {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |exp| exp > now)
    }

    pub fn allows(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission) || self.permissions.contains(&Permission::Admin)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    pub permissions: Vec<Permission>,
    pub expires_in_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyResponse {
    pub id: String,
    pub name: String,
    pub key: String, // Only returned on creation
    pub permissions: Vec<Permission>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Keys by hash. The raw key is never stored.
pub type KeyStore = Arc<Mutex<HashMap<String, ApiKey>>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingKey,
    #[error("invalid API key")]
    InvalidApiKey,
    #[error("API key lacks permission")]
    InsufficientPermissions,
}

impl reject::Reject for AuthError {}

pub fn generate_api_key() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    format!("{}{}", KEY_PREFIX, BASE64_STANDARD.encode(bytes))
}

pub fn hash_api_key(key: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Create a key and store its hash. The response carries the raw key.
pub fn create_api_key(keys: &KeyStore, request: CreateApiKeyRequest) -> ApiKeyResponse {
    let raw_key = generate_api_key();
    let expires_at = request
        .expires_in_days
        .map(|days| Utc::now() + Duration::days(days as i64));

    let api_key = ApiKey {
        id: Uuid::new_v4().to_string(),
        name: request.name,
        key_hash: hash_api_key(&raw_key),
        permissions: request.permissions,
        created_at: Utc::now(),
        last_used: None,
        expires_at,
        is_active: true,
    };
    let response = ApiKeyResponse {
        id: api_key.id.clone(),
        name: api_key.name.clone(),
        key: raw_key,
        permissions: api_key.permissions.clone(),
        expires_at,
    };

    let mut keys_lock = keys.lock().unwrap_or_else(|e| e.into_inner());
    keys_lock.insert(api_key.key_hash.clone(), api_key);
    response
}

/// Check `key` against the store and record its use.
pub fn authenticate_api_key(keys: &KeyStore, key: &str, permission: Permission) -> Result<(), AuthError> {
    let now = Utc::now();
    let mut keys_lock = keys.lock().unwrap_or_else(|e| e.into_inner());

    let api_key = keys_lock
        .get_mut(&hash_api_key(key))
        .filter(|k| k.is_valid(now))
        .ok_or(AuthError::InvalidApiKey)?;
    api_key.last_used = Some(now);

    if api_key.allows(permission) {
        Ok(())
    } else {
        Err(AuthError::InsufficientPermissions)
    }
}

/// Require `Authorization: ApiKey <key>` with `permission`. When `required`
/// is false every request passes.
pub fn with_api_key(
    keys: KeyStore,
    permission: Permission,
    required: bool,
) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and_then(move |auth_header: Option<String>| {
            let keys = keys.clone();
            async move {
                if !required {
                    return Ok(());
                }
                let header = auth_header.ok_or_else(|| reject::custom(AuthError::MissingKey))?;
                let key = header
                    .strip_prefix("ApiKey ")
                    .ok_or_else(|| reject::custom(AuthError::InvalidApiKey))?;
                authenticate_api_key(&keys, key.trim(), permission).map_err(reject::custom)
            }
        })
        .untuple_one()
}

/// Install an admin key and return it in the clear for the operator.
pub fn init_default_key(keys: &KeyStore) -> String {
    let response = create_api_key(
        keys,
        CreateApiKeyRequest {
            name: "Default Admin Key".to_string(),
            permissions: vec![Permission::Admin],
            expires_in_days: None,
        },
    );
    response.key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> KeyStore {
        Arc::new(Mutex::new(HashMap::new()))
    }

    #[test]
    fn test_generated_keys_are_distinct() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert!(a.starts_with(KEY_PREFIX));
        assert_ne!(a, b);
        assert_eq!(hash_api_key(&a).len(), 64);
    }

    #[test]
    fn test_only_hash_is_stored() {
        let keys = store();
        let raw = init_default_key(&keys);
        let keys_lock = keys.lock().unwrap();
        assert!(keys_lock.contains_key(&hash_api_key(&raw)));
        assert!(keys_lock.values().all(|k| k.key_hash != raw));
    }

    #[test]
    fn test_permissions() {
        let keys = store();
        let reader = create_api_key(
            &keys,
            CreateApiKeyRequest {
                name: "reader".to_string(),
                permissions: vec![Permission::ReadSessions],
                expires_in_days: Some(1),
            },
        );
        assert_eq!(authenticate_api_key(&keys, &reader.key, Permission::ReadSessions), Ok(()));
        assert_eq!(
            authenticate_api_key(&keys, &reader.key, Permission::WriteSessions),
            Err(AuthError::InsufficientPermissions)
        );

        let admin = init_default_key(&keys);
        assert_eq!(authenticate_api_key(&keys, &admin, Permission::WriteSessions), Ok(()));
        assert_eq!(
            authenticate_api_key(&keys, "wozmon_nope", Permission::ReadSessions),
            Err(AuthError::InvalidApiKey)
        );
    }

    #[test]
    fn test_use_is_recorded() {
        let keys = store();
        let raw = init_default_key(&keys);
        authenticate_api_key(&keys, &raw, Permission::Admin).unwrap();
        let keys_lock = keys.lock().unwrap();
        assert!(keys_lock[&hash_api_key(&raw)].last_used.is_some());
    }

    #[tokio::test]
    async fn test_filter() {
        let keys = store();
        let raw = init_default_key(&keys);
        let filter = with_api_key(keys.clone(), Permission::WriteSessions, true).map(|| "ok");

        let ok = warp::test::request()
            .header("authorization", format!("ApiKey {}", raw))
            .filter(&filter)
            .await;
        assert!(ok.is_ok());

        let missing = warp::test::request().filter(&filter).await;
        assert!(missing.is_err());

        let open = with_api_key(keys, Permission::WriteSessions, false).map(|| "ok");
        assert!(warp::test::request().filter(&open).await.is_ok());
    }
}
