//! Deterministic storage address of an archived attachment

use std::fmt;

/// `{namespace}/{tenant}/{channel}/{ts}/{file_id}`
///
/// The same inputs always produce the same key, which is what makes
/// re-delivered records detectable as already archived.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetKey(String);

impl TargetKey {
    pub fn new(namespace: &str, tenant_id: &str, channel_id: &str, ts: &str, file_id: &str) -> Self {
        Self(format!(
            "{}/{}/{}/{}/{}",
            namespace, tenant_id, channel_id, ts, file_id
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TargetKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
