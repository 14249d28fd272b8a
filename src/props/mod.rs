//! Dead-property storage.
//!
//! A dead property is client-defined XML stored verbatim and keyed by
//! `(resource path, namespace, name)`. The engine talks to a
//! `PropertyStore`; two backends are bundled (in-memory and
//! hidden-sibling JSON files) and custom ones can be injected.

pub mod fileprops;
pub mod memprops;

use std::collections::BTreeMap;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub type PropResult<T> = std::io::Result<T>;
pub type PropFuture<'a, T> = BoxFuture<'a, PropResult<T>>;

/// One stored dead property. The value is the exact inner text the
/// client sent; XML escaping is a presentation concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadProp {
    pub namespace: String,
    pub name: String,
    pub value: String,
}

impl DeadProp {
    pub fn qname(&self) -> String {
        qualified_name(&self.namespace, &self.name)
    }
}

/// `"{ns}name"`, or just `name` when the namespace is empty.
pub fn qualified_name(ns: &str, name: &str) -> String {
    if ns.is_empty() {
        name.to_string()
    } else {
        format!("{{{}}}{}", ns, name)
    }
}

/// Properties of one resource, keyed by qualified name.
pub type PropMap = BTreeMap<String, DeadProp>;

/// Store of dead properties, keyed by internal resource path.
///
/// `move_props` must behave like `copy_props` followed by
/// `remove_all(from)`, though implementations may rename. Corrupt stored
/// data is treated as empty, never surfaced as an error.
pub trait PropertyStore: Send + Sync {
    fn get_all<'a>(&'a self, path: &'a str) -> PropFuture<'a, PropMap>;
    fn get<'a>(&'a self, path: &'a str, ns: &'a str, name: &'a str)
        -> PropFuture<'a, Option<DeadProp>>;
    fn set<'a>(&'a self, path: &'a str, prop: DeadProp) -> PropFuture<'a, ()>;
    /// Returns whether the property existed.
    fn remove<'a>(&'a self, path: &'a str, ns: &'a str, name: &'a str) -> PropFuture<'a, bool>;
    fn remove_all<'a>(&'a self, path: &'a str) -> PropFuture<'a, ()>;
    fn move_props<'a>(&'a self, from: &'a str, to: &'a str) -> PropFuture<'a, ()>;
    fn copy_props<'a>(&'a self, from: &'a str, to: &'a str) -> PropFuture<'a, ()>;
    fn has<'a>(&'a self, path: &'a str) -> PropFuture<'a, bool>;
    fn count<'a>(&'a self, path: &'a str) -> PropFuture<'a, usize>;
    fn close<'a>(&'a self) -> PropFuture<'a, ()>;
}
