//! API key validation against the configured key list.

use crate::domain::error::AuthError;
use crate::domain::types::ApiKeyInfo;
use crate::ports::outbound::ApiKeyValidator;
use async_trait::async_trait;
use subtle::ConstantTimeEq;

/// Validator over a fixed set of keys.
///
/// Every stored key is compared on each lookup so the time taken does not
/// depend on which key (if any) matched.
#[derive(Debug, Clone, Default)]
pub struct StaticKeyValidator {
    keys: Vec<ApiKeyInfo>,
}

impl StaticKeyValidator {
    pub fn new(keys: Vec<ApiKeyInfo>) -> Self {
        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl ApiKeyValidator for StaticKeyValidator {
    async fn validate(&self, key: &str) -> Result<ApiKeyInfo, AuthError> {
        let mut found = None;
        for info in &self.keys {
            if constant_time_compare(&info.key, key) && found.is_none() {
                found = Some(info);
            }
        }
        found.cloned().ok_or(AuthError::UnknownKey)
    }
}

/// Constant-time string comparison.
///
/// Both inputs are padded to the same length with different fill bytes, so
/// neither the content nor the length difference leaks through timing.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    let max_len = a.len().max(b.len());
    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0xFFu8; max_len];
    a_padded[..a.len()].copy_from_slice(a.as_bytes());
    b_padded[..b.len()].copy_from_slice(b.as_bytes());

    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.ct_eq(&b_padded);
    (lengths_equal & contents_equal).into()
}
