// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::collections::HashMap;

/// Metadata attached to an [OSM element](https://wiki.openstreetmap.org/wiki/Elements)
/// (node, way or relation).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Info {
    /// The version of this element, or `-1` if unknown.
    pub version: i16,

    /// Milliseconds since the Unix epoch, or `None` if the block carried no `DenseInfo`/`Info`.
    pub timestamp: Option<i64>,

    /// The changeset id that last touched this element.
    pub changeset: u64,

    /// The user id that last touched this element.
    pub uid: i32,

    /// The user name that last touched this element. Empty if unrecorded.
    pub user: String,

    /// `false` if this element was deleted. Only meaningful for files carrying
    /// historical information; defaults to `true`.
    pub visible: bool,
}

impl Info {
    pub(crate) fn unknown() -> Self {
        Self {
            version: -1,
            timestamp: None,
            changeset: 0,
            uid: 0,
            user: String::new(),
            visible: true,
        }
    }
}

/// Represents an [OSM node](https://wiki.openstreetmap.org/wiki/Node): a single point in space.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
    pub tags: HashMap<String, String>,
    pub info: Info,
}

/// Represents an [OSM way](https://wiki.openstreetmap.org/wiki/Way): an ordered list of nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Way {
    pub id: i64,
    pub nodes: Vec<i64>,
    pub tags: HashMap<String, String>,
    pub info: Info,
}

/// Type of element a [relation member](Member) refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Node,
    Way,
    Relation,
}

impl std::fmt::Display for MemberKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node => write!(f, "node"),
            Self::Way => write!(f, "way"),
            Self::Relation => write!(f, "relation"),
        }
    }
}

/// A single member of an [OSM relation](https://wiki.openstreetmap.org/wiki/Relation).
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub id: i64,
    pub kind: MemberKind,
    pub role: String,
}

/// Represents an [OSM relation](https://wiki.openstreetmap.org/wiki/Relation):
/// a typed collection of other elements.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub id: i64,
    pub members: Vec<Member>,
    pub tags: HashMap<String, String>,
    pub info: Info,
}

/// Union over the three kinds of element a PBF stream can produce.
///
/// This is the item type carried through the dispatch ring (§4.4) and handed
/// back from [Decoder::next](crate::Decoder::next): workers, the collector
/// and the serializer never need to know which variant they're moving.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl Entity {
    /// Returns `(id, kind)` as used by the order-preservation property tests.
    pub fn id_and_kind(&self) -> (i64, MemberKind) {
        match self {
            Entity::Node(n) => (n.id, MemberKind::Node),
            Entity::Way(w) => (w.id, MemberKind::Way),
            Entity::Relation(r) => (r.id, MemberKind::Relation),
        }
    }
}
