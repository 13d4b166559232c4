//! Request normalization, cache fingerprints and URL construction

use super::Credential;
use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// Normalized query parameters; ordered so insertion order never matters.
pub type Params = BTreeMap<String, String>;

/// API namespaces a request may address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiRoot {
    User,
    Faction,
    Market,
    Racing,
    Torn,
    Key,
    Property,
    Forum,
}

impl ApiRoot {
    pub const ALL: [ApiRoot; 8] = [
        ApiRoot::User,
        ApiRoot::Faction,
        ApiRoot::Market,
        ApiRoot::Racing,
        ApiRoot::Torn,
        ApiRoot::Key,
        ApiRoot::Property,
        ApiRoot::Forum,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ApiRoot::User => "user",
            ApiRoot::Faction => "faction",
            ApiRoot::Market => "market",
            ApiRoot::Racing => "racing",
            ApiRoot::Torn => "torn",
            ApiRoot::Key => "key",
            ApiRoot::Property => "property",
            ApiRoot::Forum => "forum",
        }
    }

    /// Resolve a root name against the allow-list
    pub fn parse(raw: &str) -> Result<Self> {
        let wanted = raw.trim().to_ascii_lowercase();
        ApiRoot::ALL
            .into_iter()
            .find(|r| r.as_str() == wanted)
            .ok_or_else(|| Error::InvalidArgument(format!("'{}' is not an allowed API root", raw)))
    }
}

impl fmt::Display for ApiRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collapse slashes and reject anything that would smuggle query or
/// traversal syntax into the request path.
pub fn normalize_path(path: &str) -> Result<String> {
    if path.chars().any(|c| c.is_whitespace() || c.is_control() || matches!(c, '?' | '#' | '&' | '\\')) {
        return Err(Error::InvalidArgument(format!("illegal character in path '{}'", path)));
    }
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.iter().any(|s| *s == "." || *s == "..") {
        return Err(Error::InvalidArgument(format!("relative segment in path '{}'", path)));
    }
    Ok(segments.join("/"))
}

/// Collect caller parameters into their canonical order.
///
/// A repeated name keeps its last value; the reserved `key` and `comment`
/// names are owned by the client and rejected here.
pub fn normalize_params(params: &[(&str, &str)]) -> Result<Params> {
    let mut out = Params::new();
    for (k, v) in params {
        let k = k.trim();
        if k.is_empty() {
            return Err(Error::InvalidArgument("empty parameter name".into()));
        }
        if k == "key" || k == "comment" {
            return Err(Error::InvalidArgument(format!("parameter '{}' is reserved", k)));
        }
        out.insert(k.to_string(), v.to_string());
    }
    Ok(out)
}

/// Deterministic cache key for one logical request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    pub fn new(root: ApiRoot, path: &str, params: &Params, key: Option<&Credential>) -> Self {
        // every field is length-prefixed so no value can spill into the next
        fn field(hasher: &mut Sha256, bytes: &[u8]) {
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        }
        let mut hasher = Sha256::new();
        field(&mut hasher, root.as_str().as_bytes());
        field(&mut hasher, path.as_bytes());
        hasher.update((params.len() as u64).to_le_bytes());
        for (k, v) in params {
            field(&mut hasher, k.as_bytes());
            field(&mut hasher, v.as_bytes());
        }
        match key {
            Some(key) => {
                hasher.update([1u8]);
                field(&mut hasher, key.as_str().as_bytes());
            }
            None => hasher.update([0u8]),
        }
        RequestFingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0[..12])
    }
}

/// `{base}{root}/{path}?comment=..&key=..&{params}`
pub fn build_url(
    base: &Url,
    root: ApiRoot,
    path: &str,
    params: &Params,
    comment: &str,
    key: Option<&Credential>,
) -> Result<Url> {
    let relative = if path.is_empty() { root.as_str().to_string() } else { format!("{}/{}", root, path) };
    let mut url = base
        .join(&relative)
        .map_err(|e| Error::InvalidArgument(format!("cannot build URL for '{}': {}", relative, e)))?;
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        query.append_pair("comment", comment);
        if let Some(key) = key {
            query.append_pair("key", key.as_str());
        }
        for (k, v) in params {
            query.append_pair(k, v);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> Credential {
        Credential::parse("AbCd1234EfGh5678").unwrap()
    }

    #[test]
    fn roots_outside_allow_list_are_rejected() {
        assert_eq!(ApiRoot::parse("Racing").unwrap(), ApiRoot::Racing);
        assert!(matches!(ApiRoot::parse("admin"), Err(Error::InvalidArgument(_))));
        assert!(ApiRoot::parse("").is_err());
    }

    #[test]
    fn paths_are_normalized() {
        assert_eq!(normalize_path("/123//personalstats/").unwrap(), "123/personalstats");
        assert_eq!(normalize_path("").unwrap(), "");
        assert!(normalize_path("a?b=1").is_err());
        assert!(normalize_path("../secret").is_err());
        assert!(normalize_path("a b").is_err());
    }

    #[test]
    fn reserved_params_are_rejected() {
        assert!(normalize_params(&[("key", "x")]).is_err());
        assert!(normalize_params(&[("", "x")]).is_err());
    }

    #[test]
    fn fingerprint_ignores_parameter_order() {
        let a = normalize_params(&[("selections", "races"), ("limit", "10")]).unwrap();
        let b = normalize_params(&[("limit", "10"), ("selections", "races")]).unwrap();
        let k = key();
        assert_eq!(
            RequestFingerprint::new(ApiRoot::User, "races", &a, Some(&k)),
            RequestFingerprint::new(ApiRoot::User, "races", &b, Some(&k))
        );
    }

    #[test]
    fn fingerprint_depends_on_credential_and_path() {
        let p = Params::new();
        let k = key();
        let with_key = RequestFingerprint::new(ApiRoot::User, "basic", &p, Some(&k));
        let without = RequestFingerprint::new(ApiRoot::User, "basic", &p, None);
        let other_path = RequestFingerprint::new(ApiRoot::User, "profile", &p, Some(&k));
        assert_ne!(with_key, without);
        assert_ne!(with_key, other_path);
    }

    #[test]
    fn values_cannot_forge_extra_parameters() {
        let smuggled = normalize_params(&[("a", "b&c=d")]).unwrap();
        let split = normalize_params(&[("a", "b"), ("c", "d")]).unwrap();
        assert_ne!(
            RequestFingerprint::new(ApiRoot::User, "x", &smuggled, None),
            RequestFingerprint::new(ApiRoot::User, "x", &split, None)
        );

        let shifted = normalize_params(&[("a=b", "")]).unwrap();
        let plain = normalize_params(&[("a", "b=")]).unwrap();
        assert_ne!(
            RequestFingerprint::new(ApiRoot::User, "x", &shifted, None),
            RequestFingerprint::new(ApiRoot::User, "x", &plain, None)
        );
    }

    #[test]
    fn url_carries_comment_key_and_sorted_params() {
        let base = Url::parse("https://api.example.com/v2/").unwrap();
        let params = normalize_params(&[("stat", "racingskill"), ("cat", "all")]).unwrap();
        let url = build_url(&base, ApiRoot::User, "42/personalstats", &params, "racewatch", Some(&key())).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v2/user/42/personalstats?comment=racewatch&key=AbCd1234EfGh5678&cat=all&stat=racingskill"
        );
    }
}
