use smallvec::SmallVec;

use crate::value::Value;

static UNDEFINED: Value = Value::Undefined;

/// Arguments of a builtin call.
///
/// Script calls never fail on arity: a missing argument reads as `undefined`
/// and surplus arguments are ignored. Every builtin defined here takes at most
/// three arguments, so they are stored inline.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ArgValues(SmallVec<[Value; 3]>);

impl ArgValues {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The argument at `index`, or `undefined` when fewer were passed.
    #[must_use]
    pub fn get(&self, index: usize) -> &Value {
        self.0.get(index).unwrap_or(&UNDEFINED)
    }

    /// Whether the argument at `index` was passed at all, even as `undefined`.
    #[must_use]
    pub fn is_present(&self, index: usize) -> bool {
        index < self.0.len()
    }

    /// Number of arguments actually passed.
    #[must_use]
    pub fn count(&self) -> usize {
        self.0.len()
    }

    pub fn push(&mut self, value: Value) {
        self.0.push(value);
    }
}

impl<const N: usize> From<[Value; N]> for ArgValues {
    fn from(values: [Value; N]) -> Self {
        values.into_iter().collect()
    }
}

impl From<Vec<Value>> for ArgValues {
    fn from(values: Vec<Value>) -> Self {
        Self(SmallVec::from_vec(values))
    }
}

impl From<()> for ArgValues {
    fn from((): ()) -> Self {
        Self::default()
    }
}

impl FromIterator<Value> for ArgValues {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_arguments_read_as_undefined() {
        let args = ArgValues::from([Value::from(1)]);
        assert_eq!(args.get(0), &Value::from(1));
        assert_eq!(args.get(2), &Value::Undefined);
        assert_eq!(args.count(), 1);
        assert!(args.is_present(0));
        assert!(!args.is_present(1));
        assert_eq!(ArgValues::from(()).count(), 0);
    }
}
