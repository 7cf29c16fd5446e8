//! Value Objects for the catalog

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `#RGB` or `#RRGGBB`.
pub static HEX_COLOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#([0-9A-Fa-f]{3}){1,2}$").expect("valid hex color pattern"));

/// Role hierarchy, lowest first. Ordering is the rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Staff,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::User, Role::Staff, Role::Admin];

    pub fn rank(self) -> u8 {
        match self { Self::User => 0, Self::Staff => 1, Self::Admin => 2 }
    }

    pub fn as_str(self) -> &'static str {
        match self { Self::User => "user", Self::Staff => "staff", Self::Admin => "admin" }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub struct UnknownRole(pub String);
impl std::error::Error for UnknownRole {}
impl fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "unknown role `{}`", self.0) }
}

impl FromStr for Role {
    type Err = UnknownRole;

    /// Exact, lowercase names only.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "staff" => Ok(Self::Staff),
            "admin" => Ok(Self::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// Hex color code value object
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColorHex(String);

impl ColorHex {
    pub fn new(value: impl Into<String>) -> Result<Self, ColorHexError> {
        let value = value.into().trim().to_string();
        if value.is_empty() { return Err(ColorHexError::Empty); }
        if !HEX_COLOR.is_match(&value) { return Err(ColorHexError::Malformed); }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
    /// Lowercase form used for uniqueness comparisons.
    pub fn folded(&self) -> String { self.0.to_lowercase() }
    pub fn into_inner(self) -> String { self.0 }
}

impl fmt::Display for ColorHex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum ColorHexError { Empty, Malformed }
impl std::error::Error for ColorHexError {}
impl fmt::Display for ColorHexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Self::Empty => write!(f, "Hex code is required."), Self::Malformed => write!(f, "Invalid hexadecimal color code.") }
    }
}

/// Reference to a child row in a submitted tree: a row to insert, or an
/// existing row to patch. Travels as an optional id on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<Id>", into = "Option<Id>")]
pub enum RowRef<Id: Clone> {
    New,
    Existing(Id),
}

impl<Id: Clone> RowRef<Id> {
    pub fn existing(&self) -> Option<&Id> {
        match self { Self::New => None, Self::Existing(id) => Some(id) }
    }
    pub fn is_new(&self) -> bool { matches!(self, Self::New) }
}

impl<Id: Clone> Default for RowRef<Id> {
    fn default() -> Self { Self::New }
}

impl<Id: Clone> From<Option<Id>> for RowRef<Id> {
    fn from(value: Option<Id>) -> Self {
        match value { Some(id) => Self::Existing(id), None => Self::New }
    }
}

impl<Id: Clone> From<RowRef<Id>> for Option<Id> {
    fn from(value: RowRef<Id>) -> Self {
        match value { RowRef::New => None, RowRef::Existing(id) => Some(id) }
    }
}
