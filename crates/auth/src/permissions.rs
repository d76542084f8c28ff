use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are `"<resource>.<action>"` strings (e.g. `"goods_receipt.approve"`).
/// Two wildcard forms are understood: `"<resource>.*"` grants every action on a
/// resource, and `"*"` grants everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }

    pub fn grants(&self, resource: &str, action: &str) -> bool {
        if self.is_wildcard() {
            return true;
        }
        match self.as_str().split_once('.') {
            Some((r, "*")) => r == resource,
            Some((r, a)) => r == resource && a == action,
            None => false,
        }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_wildcard_grants() {
        assert!(Permission::new("goods_receipt.approve").grants("goods_receipt", "approve"));
        assert!(!Permission::new("goods_receipt.approve").grants("goods_receipt", "cancel"));
        assert!(Permission::new("material_issue.*").grants("material_issue", "issue"));
        assert!(!Permission::new("material_issue.*").grants("material_return", "issue"));
        assert!(Permission::new("*").grants("anything", "at_all"));
        assert!(!Permission::new("garbage").grants("garbage", "read"));
    }
}
