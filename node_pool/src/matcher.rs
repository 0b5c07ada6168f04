//! Name matchers for filtered iteration over a pool.
//!
//! A string accepts names containing it, a [`Regex`] names it matches, a
//! name set or slice its members. Anything else can be wrapped in [`FnMatcher`].

use std::collections::{BTreeSet, HashSet};

use regex::Regex;

pub trait NodeMatcher {
    fn accepts(&self, name: &str) -> bool;
}

impl<M: NodeMatcher + ?Sized> NodeMatcher for &M {
    fn accepts(&self, name: &str) -> bool {
        (**self).accepts(name)
    }
}

impl NodeMatcher for str {
    fn accepts(&self, name: &str) -> bool {
        name.contains(self)
    }
}

impl NodeMatcher for String {
    fn accepts(&self, name: &str) -> bool {
        name.contains(self.as_str())
    }
}

impl NodeMatcher for Regex {
    fn accepts(&self, name: &str) -> bool {
        self.is_match(name)
    }
}

impl NodeMatcher for HashSet<String> {
    fn accepts(&self, name: &str) -> bool {
        self.contains(name)
    }
}

impl NodeMatcher for BTreeSet<String> {
    fn accepts(&self, name: &str) -> bool {
        self.contains(name)
    }
}

impl NodeMatcher for [&str] {
    fn accepts(&self, name: &str) -> bool {
        self.iter().any(|candidate| *candidate == name)
    }
}

impl NodeMatcher for [String] {
    fn accepts(&self, name: &str) -> bool {
        self.iter().any(|candidate| candidate.as_str() == name)
    }
}

/// Matches every name.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyNode;

impl NodeMatcher for AnyNode {
    fn accepts(&self, _name: &str) -> bool {
        true
    }
}

/// Adapts a predicate closure.
#[derive(Debug, Clone, Copy)]
pub struct FnMatcher<F>(pub F);

impl<F: Fn(&str) -> bool> NodeMatcher for FnMatcher<F> {
    fn accepts(&self, name: &str) -> bool {
        (self.0)(name)
    }
}
