//! The chain of methods currently being prepared.
//!
//! Preparation recurses from a method into everything it calls. The stack records that chain
//! so a cycle stops at the first repeated method and every diagnostic can show how the
//! builder got there.

use std::collections::HashSet;

use crate::{
    metadata::{universe::Universe, MethodId},
    Error, Result,
};

/// Default bound on the preparation depth.
pub const DEFAULT_MAX_DEPTH: usize = 1024;

/// The methods under preparation, outermost first.
#[derive(Debug, Clone)]
pub struct AnalysisStack {
    chain: Vec<MethodId>,
    members: HashSet<MethodId>,
    max_depth: usize,
}

impl Default for AnalysisStack {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl AnalysisStack {
    /// Creates an empty stack bounded to `max_depth` entries.
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        AnalysisStack {
            chain: Vec::new(),
            members: HashSet::new(),
            max_depth,
        }
    }

    /// Enters `method`. Returns false if it is already on the stack, in which case nothing is
    /// pushed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecursionLimit`] once the chain reaches the configured depth.
    pub fn push(&mut self, method: MethodId) -> Result<bool> {
        if self.members.contains(&method) {
            return Ok(false);
        }
        if self.chain.len() >= self.max_depth {
            return Err(Error::RecursionLimit(self.max_depth));
        }
        self.chain.push(method);
        self.members.insert(method);
        Ok(true)
    }

    /// Leaves the innermost method.
    pub fn pop(&mut self) -> Option<MethodId> {
        let method = self.chain.pop()?;
        self.members.remove(&method);
        Some(method)
    }

    /// Returns true if `method` is being prepared.
    #[must_use]
    pub fn contains(&self, method: MethodId) -> bool {
        self.members.contains(&method)
    }

    /// The innermost method.
    #[must_use]
    pub fn current(&self) -> Option<MethodId> {
        self.chain.last().copied()
    }

    /// Current depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.chain.len()
    }

    /// Returns true if nothing is being prepared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// The chain as method signatures, outermost first.
    #[must_use]
    pub fn trace(&self, universe: &Universe) -> Vec<String> {
        self.chain
            .iter()
            .map(|m| universe.method_signature(*m))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::method::MethodAttributes;

    #[test]
    fn cycles_are_reported_once() {
        let universe = Universe::with_core_library();
        let program = universe.define_type("Demo", "Program").build();
        let a = universe
            .define_method(program, "A")
            .attributes(MethodAttributes::STATIC)
            .build();
        let b = universe
            .define_method(program, "B")
            .attributes(MethodAttributes::STATIC)
            .build();

        let mut stack = AnalysisStack::default();
        assert!(stack.push(a).unwrap());
        assert!(stack.push(b).unwrap());
        assert!(!stack.push(a).unwrap());
        assert_eq!(stack.depth(), 2);
        assert_eq!(
            stack.trace(&universe),
            vec![
                "System.Void Demo.Program::A()".to_string(),
                "System.Void Demo.Program::B()".to_string(),
            ]
        );

        assert_eq!(stack.pop(), Some(b));
        assert!(!stack.contains(b));
        assert_eq!(stack.current(), Some(a));
    }

    #[test]
    fn depth_is_bounded() {
        let universe = Universe::with_core_library();
        let program = universe.define_type("Demo", "Deep").build();
        let mut stack = AnalysisStack::new(2);
        for name in ["A", "B"] {
            let m = universe.define_method(program, name).build();
            assert!(stack.push(m).unwrap());
        }
        let third = universe.define_method(program, "C").build();
        assert!(matches!(stack.push(third), Err(Error::RecursionLimit(2))));
    }
}
