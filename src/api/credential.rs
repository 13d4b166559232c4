use crate::{Error, Result};
use std::fmt;

/// An API key string that passed the local shape check.
///
/// Holding a `Credential` says nothing about whether the upstream service
/// accepts it; that is what `ApiClient::validate` probes for.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    /// Keys are exactly this many ASCII alphanumerics
    pub const LEN: usize = 16;

    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.len() != Self::LEN {
            return Err(Error::InvalidCredential(format!(
                "expected {} characters, got {}",
                Self::LEN,
                raw.chars().count()
            )));
        }
        if !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidCredential("key must be alphanumeric".into()));
        }
        Ok(Credential(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    // never print the full key
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({}…)", &self.0[..4])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_sixteen_alphanumerics() {
        let c = Credential::parse(" AbCd1234EfGh5678 ").unwrap();
        assert_eq!(c.as_str(), "AbCd1234EfGh5678");
    }

    #[test]
    fn rejects_bad_shapes() {
        for bad in ["", "short", "AbCd1234EfGh56789", "AbCd1234EfGh567!", "AbCd 234EfGh5678", "ÄbCd1234EfGh567"] {
            assert!(matches!(Credential::parse(bad), Err(Error::InvalidCredential(_))), "{bad:?}");
        }
    }

    #[test]
    fn debug_redacts_key() {
        let c = Credential::parse("AbCd1234EfGh5678").unwrap();
        let shown = format!("{:?}", c);
        assert!(!shown.contains("5678"));
    }
}
