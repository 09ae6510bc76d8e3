use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Known receiver addresses and the receiver name each one maps to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiverRegistry {
    name_by_address: HashMap<String, String>,
}

impl ReceiverRegistry {
    pub fn new(name_by_address: HashMap<String, String>) -> Self {
        Self { name_by_address }
    }

    pub fn insert(&mut self, address: impl Into<String>, name: impl Into<String>) {
        self.name_by_address.insert(address.into(), name.into());
    }

    pub fn contains(&self, address: &str) -> bool {
        self.name_by_address.contains_key(address)
    }

    /// `true` only for a present address that is registered.
    pub fn contains_opt(&self, address: Option<&str>) -> bool {
        address.is_some_and(|address| self.contains(address))
    }

    pub fn name_of(&self, address: &str) -> Option<&str> {
        self.name_by_address.get(address).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.name_by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name_by_address.is_empty()
    }
}

impl FromIterator<(String, String)> for ReceiverRegistry {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
