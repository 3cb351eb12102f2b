use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier (`"<module>.<action>"`).
///
/// `"*"` grants everything and is only handed out to administrators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const RELEASES_CREATE: Permission = Permission(Cow::Borrowed("releases.create"));
    /// Elevated: cancel a release.
    pub const RELEASES_CANCEL: Permission = Permission(Cow::Borrowed("releases.cancel"));
    pub const SCHEDULES_CREATE: Permission = Permission(Cow::Borrowed("schedules.create"));
    /// Elevated: edit or cancel schedules booked by someone else.
    pub const SCHEDULES_MANAGE_ANY: Permission = Permission(Cow::Borrowed("schedules.manage_any"));
    /// Operational: drive loadings and attach evidence.
    pub const LOADINGS_OPERATE: Permission = Permission(Cow::Borrowed("loadings.operate"));
    pub const STOCK_ADJUST: Permission = Permission(Cow::Borrowed("stock.adjust"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn wildcard() -> Self {
        Self(Cow::Borrowed("*"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
