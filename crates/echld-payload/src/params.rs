//! Bulk `name\0value\0…` parameter lists.

use std::fmt;

use crate::error::{DecodeError, Result};
use crate::wire::{PayloadReader, PayloadWriter};

/// Ordered list of name/value pairs, as carried by `NewWorker` and
/// `StartCapture`. Duplicate names are kept; later entries win on lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pair.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Builder-style [`Params::push`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    /// Last value set for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn encode_into(&self, out: &mut PayloadWriter) {
        for (name, value) in &self.0 {
            out.put_str(name).put_str(value);
        }
    }

    pub(crate) fn decode_from(reader: &mut PayloadReader<'_>) -> Result<Self> {
        let mut params = Vec::new();
        while !reader.is_empty() {
            let name = reader.read_string()?;
            if reader.is_empty() {
                return Err(DecodeError::UnpairedParam { name });
            }
            let value = reader.read_string()?;
            params.push((name, value));
        }
        Ok(Self(params))
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        )
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}
