//! Fully qualified names for tree nodes
//!
//! An [`Fqn`] is an immutable, ordered sequence of path elements that
//! addresses one location in the cache tree. The empty sequence is the root
//! and is an ancestor of every other Fqn.
//!
//! ## Ordering
//!
//! Fqns compare element by element, so an Fqn always sorts immediately before
//! all of its descendants and the descendants of a node form a contiguous
//! range. `BTreeMap<Fqn, _>` range scans rely on this.
//!
//! ## Elements
//!
//! An element is never empty and never contains [`SEPARATOR`], so every Fqn
//! prints as a path that parses back to the same Fqn. The lenient
//! constructors ([`Fqn::from_elements`], [`Fqn::child`]) split names on the
//! separator and drop empty pieces; the `try_` variants reject such names.
//!
//! ```
//! use treecache_core::Fqn;
//!
//! let a = Fqn::from_elements(["a"]);
//! let ab: Fqn = "/a/b".parse().unwrap();
//! assert!(a.is_ancestor_of(&ab));
//! assert!(ab.is_direct_child_of(&a));
//! assert_eq!(ab.to_string(), "/a/b");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separator used by the string form of an Fqn
pub const SEPARATOR: char = '/';

/// Error type for Fqn parsing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FqnParseError {
    /// Two separators with nothing between them
    #[error("empty element in fqn at position {0}")]
    EmptyElement(usize),

    /// A single element that contains the separator
    #[error("element {0:?} contains the separator")]
    SeparatorInElement(String),

    /// A single element that is empty
    #[error("empty element")]
    EmptyName,
}

fn check_element(element: &str) -> Result<(), FqnParseError> {
    if element.is_empty() {
        Err(FqnParseError::EmptyName)
    } else if element.contains(SEPARATOR) {
        Err(FqnParseError::SeparatorInElement(element.to_string()))
    } else {
        Ok(())
    }
}

fn split_element(element: String, into: &mut Vec<String>) {
    if element.is_empty() {
        return;
    }
    if element.contains(SEPARATOR) {
        into.extend(
            element
                .split(SEPARATOR)
                .filter(|piece| !piece.is_empty())
                .map(str::to_string),
        );
    } else {
        into.push(element);
    }
}

/// Hierarchical name of a tree node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Fqn {
    elements: Vec<String>,
}

impl Fqn {
    /// The root Fqn (no elements)
    pub fn root() -> Self {
        Fqn {
            elements: Vec::new(),
        }
    }

    /// Build an Fqn from its elements, outermost first
    ///
    /// Elements containing the separator are split, empty ones are dropped.
    pub fn from_elements<I, S>(elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = Vec::new();
        for element in elements {
            split_element(element.into(), &mut out);
        }
        Fqn { elements: out }
    }

    /// Build an Fqn from its elements, rejecting empty or separator-bearing ones
    pub fn try_from_elements<I, S>(elements: I) -> Result<Self, FqnParseError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let elements = elements
            .into_iter()
            .map(|element| {
                let element = element.into();
                check_element(&element).map(|()| element)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Fqn { elements })
    }

    /// Build the Fqn of `relative` underneath `base`
    pub fn from_relative(base: &Fqn, relative: &Fqn) -> Self {
        let mut elements = base.elements.clone();
        elements.extend(relative.elements.iter().cloned());
        Fqn { elements }
    }

    /// Path elements, outermost first
    pub fn elements(&self) -> &[String] {
        &self.elements
    }

    /// Element at `index`, if any
    pub fn element(&self, index: usize) -> Option<&str> {
        self.elements.get(index).map(String::as_str)
    }

    /// Number of elements (0 for root)
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// True for the root Fqn
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// True for the root Fqn
    pub fn is_root(&self) -> bool {
        self.elements.is_empty()
    }

    /// Child Fqn with one more element (builder pattern)
    ///
    /// A name containing the separator adds one element per piece; an empty
    /// name adds nothing.
    pub fn child(&self, name: impl Into<String>) -> Fqn {
        let mut elements = Vec::with_capacity(self.elements.len() + 1);
        elements.extend(self.elements.iter().cloned());
        split_element(name.into(), &mut elements);
        Fqn { elements }
    }

    /// Child Fqn with exactly one more element
    pub fn try_child(&self, name: impl Into<String>) -> Result<Fqn, FqnParseError> {
        let name = name.into();
        check_element(&name)?;
        let mut elements = Vec::with_capacity(self.elements.len() + 1);
        elements.extend(self.elements.iter().cloned());
        elements.push(name);
        Ok(Fqn { elements })
    }

    /// Parent Fqn (None for root)
    pub fn parent(&self) -> Option<Fqn> {
        if self.elements.is_empty() {
            None
        } else {
            Some(Fqn {
                elements: self.elements[..self.elements.len() - 1].to_vec(),
            })
        }
    }

    /// Last element, i.e. the node's name under its parent (None for root)
    pub fn last_element(&self) -> Option<&str> {
        self.elements.last().map(String::as_str)
    }

    /// Strict ancestors of this Fqn, root first. Empty for root.
    pub fn ancestors(&self) -> Vec<Fqn> {
        (0..self.elements.len())
            .map(|n| Fqn {
                elements: self.elements[..n].to_vec(),
            })
            .collect()
    }

    /// Strict prefix check: `self` is a proper ancestor of `other`
    pub fn is_ancestor_of(&self, other: &Fqn) -> bool {
        self.elements.len() < other.elements.len()
            && self
                .elements
                .iter()
                .zip(other.elements.iter())
                .all(|(a, b)| a == b)
    }

    /// `self` is a proper descendant of `other`
    pub fn is_descendant_of(&self, other: &Fqn) -> bool {
        other.is_ancestor_of(self)
    }

    /// `self` equals `other` or descends from it
    pub fn is_descendant_of_or_equal(&self, other: &Fqn) -> bool {
        self == other || self.is_descendant_of(other)
    }

    /// `self` is exactly one level below `parent`
    pub fn is_direct_child_of(&self, parent: &Fqn) -> bool {
        self.elements.len() == parent.elements.len() + 1 && parent.is_ancestor_of(self)
    }

    /// Rewrite the `old_ancestor` prefix of this Fqn to `new_ancestor`
    ///
    /// Returns `None` when `old_ancestor` is not equal to or an ancestor of `self`.
    pub fn replace_ancestor(&self, old_ancestor: &Fqn, new_ancestor: &Fqn) -> Option<Fqn> {
        if !self.is_descendant_of_or_equal(old_ancestor) {
            return None;
        }
        let mut elements = new_ancestor.elements.clone();
        elements.extend(self.elements[old_ancestor.len()..].iter().cloned());
        Some(Fqn { elements })
    }
}

impl fmt::Display for Fqn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.elements.is_empty() {
            return write!(f, "{}", SEPARATOR);
        }
        for element in &self.elements {
            write!(f, "{}{}", SEPARATOR, element)?;
        }
        Ok(())
    }
}

impl FromStr for Fqn {
    type Err = FqnParseError;

    /// Parse `/a/b/c`. The leading separator is optional, a trailing one is
    /// ignored, and `/` or the empty string is root.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix(SEPARATOR).unwrap_or(s);
        let trimmed = trimmed.strip_suffix(SEPARATOR).unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Ok(Fqn::root());
        }

        let mut elements = Vec::new();
        let mut position = s.len() - s.strip_prefix(SEPARATOR).map_or(s.len(), str::len);
        for element in trimmed.split(SEPARATOR) {
            if element.is_empty() {
                return Err(FqnParseError::EmptyElement(position));
            }
            position += element.len() + 1;
            elements.push(element.to_string());
        }
        Ok(Fqn { elements })
    }
}

impl From<&str> for Fqn {
    /// Lenient conversion: empty elements are dropped.
    fn from(s: &str) -> Self {
        Fqn::from_elements(s.split(SEPARATOR).filter(|e| !e.is_empty()))
    }
}
