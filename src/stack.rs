//! Named Multi-Stack
//!
//! A mapping from variable name to a LIFO stack of `NumericValue`s. Insertion
//! order of names is irrelevant; per-name order is strict push/pop.

use std::collections::HashMap;

use thiserror::Error;

use crate::value::NumericValue;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("stack for variable {0:?} is empty")]
pub struct EmptyStack(pub String);

/// Mapping from variable name to its value stack, used both for script
/// FOR-loop variables and as the per-ECHO working stack's backing store.
#[derive(Debug, Default)]
pub struct NamedMultiStack {
    stacks: HashMap<String, Vec<NumericValue>>,
}

impl NamedMultiStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, v: NumericValue) {
        self.stacks.entry(name.to_string()).or_default().push(v);
    }

    pub fn pop(&mut self, name: &str) -> Result<NumericValue, EmptyStack> {
        match self.stacks.get_mut(name) {
            Some(s) if !s.is_empty() => Ok(s.pop().unwrap()),
            _ => Err(EmptyStack(name.to_string())),
        }
    }

    pub fn peek(&self, name: &str) -> Result<NumericValue, EmptyStack> {
        self.stacks
            .get(name)
            .and_then(|s| s.last().cloned())
            .ok_or_else(|| EmptyStack(name.to_string()))
    }

    pub fn is_empty(&self, name: &str) -> bool {
        self.stacks.get(name).map(Vec::is_empty).unwrap_or(true)
    }

    /// Depth of the stack for `name`, used to assert the push/pop bracketing
    /// invariant around FOR loops in tests.
    pub fn depth(&self, name: &str) -> usize {
        self.stacks.get(name).map(Vec::len).unwrap_or(0)
    }
}
