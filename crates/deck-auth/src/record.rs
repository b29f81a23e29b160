//! Helpers for reading hash records.

use std::str::FromStr;

use deck_store::{Fields, StoreError, StoreResult};

/// A hash record being decoded, for error reporting.
pub(crate) struct Record<'a> {
    key: &'a str,
    fields: &'a Fields,
}

impl<'a> Record<'a> {
    pub(crate) fn new(key: &'a str, fields: &'a Fields) -> Self {
        Self { key, fields }
    }

    pub(crate) fn str(&self, name: &str) -> StoreResult<&'a str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| StoreError::corrupt(self.key, format!("missing field '{}'", name)))
    }

    pub(crate) fn opt_str(&self, name: &str) -> Option<&'a str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub(crate) fn parse<T: FromStr>(&self, name: &str) -> StoreResult<T> {
        let raw = self.str(name)?;
        raw.parse().map_err(|_| {
            StoreError::corrupt(self.key, format!("unparsable field '{}': {:?}", name, raw))
        })
    }

    pub(crate) fn parse_or<T: FromStr>(&self, name: &str, default: T) -> StoreResult<T> {
        match self.opt_str(name) {
            Some(_) => self.parse(name),
            None => Ok(default),
        }
    }

    pub(crate) fn opt_parse<T: FromStr>(&self, name: &str) -> StoreResult<Option<T>> {
        match self.opt_str(name) {
            Some(_) => self.parse(name).map(Some),
            None => Ok(None),
        }
    }
}

/// Build a field map from name/value pairs.
pub(crate) fn fields<I, K, V>(pairs: I) -> Fields
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
