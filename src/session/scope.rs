//! Variable-inspection tree built from the debuggee's `scopes` response.
//!
//! Each scope value is a tagged node `{"type": "...", "value": ...}` whose
//! `array`/`object` values nest further nodes. The tree is flattened into a
//! table keyed by synthetic reference ids so `variables` requests resolve a
//! node's children without walking the tree again.

use std::collections::{HashMap, VecDeque};

use serde_json::Value;

/// Deepest level (0-based) that still produces nodes.
pub const MAX_SCOPE_DEPTH: usize = 5;

/// First synthetic reference id handed out after a reset.
pub const FIRST_SCOPE_ID: i64 = 1000;

/// One inspectable value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeNode {
    /// Synthetic reference id.
    pub id: i64,
    /// Display name (property name, array index or scope label).
    pub name: String,
    /// Lower-cased type tag.
    pub kind: String,
    /// Display value.
    pub value: String,
    /// Child ids in debuggee order.
    pub children: Vec<i64>,
}

/// Flat id → node table for the frame currently inspected.
#[derive(Debug, Clone)]
pub struct ScopeTable {
    nodes: HashMap<i64, ScopeNode>,
    roots: Vec<i64>,
    next_id: i64,
}

impl Default for ScopeTable {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            roots: Vec::new(),
            next_id: FIRST_SCOPE_ID,
        }
    }
}

struct Pending<'a> {
    id: i64,
    name: String,
    data: &'a Value,
    depth: usize,
}

impl ScopeTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every node and restart ids at [`FIRST_SCOPE_ID`].
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.roots.clear();
        self.next_id = FIRST_SCOPE_ID;
    }

    /// Rebuild the table from a `scopes` response and return the root ids.
    ///
    /// The first root is labelled `Local` and, with two or more roots, the
    /// last one `Global`.
    pub fn build(&mut self, scopes: &[Value]) -> &[i64] {
        self.reset();

        let mut queue = VecDeque::new();
        for data in scopes {
            if let Some(id) = self.admit(data, 0) {
                self.roots.push(id);
                queue.push_back(Pending {
                    id,
                    name: "Scope".to_owned(),
                    data,
                    depth: 0,
                });
            }
        }

        while let Some(item) = queue.pop_front() {
            self.expand(item, &mut queue);
        }

        if let Some(first) = self.roots.first().copied() {
            self.rename(first, "Local");
        }
        if self.roots.len() >= 2 {
            if let Some(last) = self.roots.last().copied() {
                self.rename(last, "Global");
            }
        }
        &self.roots
    }

    /// Root ids of the current table.
    #[must_use]
    pub fn roots(&self) -> &[i64] {
        &self.roots
    }

    /// Node by reference id.
    #[must_use]
    pub fn get(&self, id: i64) -> Option<&ScopeNode> {
        self.nodes.get(&id)
    }

    /// Children of node `id`, in order; empty for unknown ids.
    pub fn children(&self, id: i64) -> impl Iterator<Item = &ScopeNode> {
        self.nodes
            .get(&id)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|child| self.nodes.get(child))
    }

    /// Number of nodes in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn allocate(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn rename(&mut self, id: i64, name: &str) {
        if let Some(node) = self.nodes.get_mut(&id) {
            name.clone_into(&mut node.name);
        }
    }

    /// Reserve an id for `data` at `depth`, or `None` if it yields no node.
    fn admit(&mut self, data: &Value, depth: usize) -> Option<i64> {
        if depth > MAX_SCOPE_DEPTH || data.is_null() || is_suppressed(data) {
            return None;
        }
        Some(self.allocate())
    }

    /// Create the node for `item` and queue its children.
    fn expand<'a>(&mut self, item: Pending<'a>, queue: &mut VecDeque<Pending<'a>>) {
        let kind = type_tag(item.data);
        let raw = item.data.get("value");
        let mut node = ScopeNode {
            id: item.id,
            name: item.name,
            kind,
            value: String::new(),
            children: Vec::new(),
        };

        match node.kind.as_str() {
            "string" => node.value = scalar_text(raw),
            "number" => {
                node.value = match raw {
                    // Special values such as "[NaN]" arrive bracketed.
                    Some(Value::String(text)) if text.starts_with('[') => {
                        let mut inner = text.chars();
                        inner.next();
                        inner.next_back();
                        inner.as_str().to_owned()
                    }
                    other => scalar_text(other),
                };
            }
            "function" => {
                node.value = match raw {
                    Some(location @ Value::Object(_)) => format!(
                        "{}:{}",
                        scalar_text(location.get("file")),
                        scalar_text(location.get("line"))
                    ),
                    _ => String::new(),
                };
            }
            "cfunction" => {
                "function".clone_into(&mut node.kind);
                "[native]".clone_into(&mut node.value);
            }
            "userdata" => {
                "native".clone_into(&mut node.kind);
                "[native]".clone_into(&mut node.value);
            }
            "array" => {
                if let Some(Value::Array(elements)) = raw {
                    for (index, element) in elements.iter().enumerate() {
                        if element.is_null() && item.depth < MAX_SCOPE_DEPTH {
                            let placeholder = self.placeholder();
                            node.children.push(placeholder);
                        } else if let Some(id) = self.admit(element, item.depth + 1) {
                            node.children.push(id);
                            queue.push_back(Pending {
                                id,
                                name: index.to_string(),
                                data: element,
                                depth: item.depth + 1,
                            });
                        }
                    }
                }
            }
            "object" => match raw {
                Some(Value::Object(properties)) => {
                    for (name, property) in properties {
                        if let Some(id) = self.admit(property, item.depth + 1) {
                            node.children.push(id);
                            queue.push_back(Pending {
                                id,
                                name: name.clone(),
                                data: property,
                                depth: item.depth + 1,
                            });
                        }
                    }
                }
                _ => "undefined".clone_into(&mut node.value),
            },
            "script" => "[script]".clone_into(&mut node.value),
            "eval" => "[eval]".clone_into(&mut node.value),
            "error" => "[error]".clone_into(&mut node.value),
            _ => node.value = scalar_text(raw),
        }

        self.nodes.insert(node.id, node);
    }

    /// Stand-in for a missing array element.
    fn placeholder(&mut self) -> i64 {
        let id = self.allocate();
        self.nodes.insert(
            id,
            ScopeNode {
                id,
                name: "undefined".to_owned(),
                kind: "undefined".to_owned(),
                value: String::new(),
                children: Vec::new(),
            },
        );
        id
    }
}

fn type_tag(data: &Value) -> String {
    data.get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase()
}

/// `arguments` and `iterator` values are never shown.
fn is_suppressed(data: &Value) -> bool {
    matches!(type_tag(data).as_str(), "arguments" | "iterator")
}

fn scalar_text(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_owned(),
        Some(Value::Null) => "null".to_owned(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}
