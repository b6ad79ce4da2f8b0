//! Lazily expanded JSON trees for browsing captured bodies.
//!
//! Numbers keep the text they were written with, object members are ordered
//! by key and array elements are labeled `[i]`. Children of a node are built
//! the first time they are asked for and reused afterwards.
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use serde_json::Value;

/// Longest string preview, in characters, before it is cut with `…`.
pub const PREVIEW_LIMIT: usize = 120;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Structural kind of a JSON value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonKind {
  /// `{ … }`
  Object,
  /// `[ … ]`
  Array,
  /// a string
  String(String),
  /// a number, as written in the source
  Number(String),
  /// `true` or `false`
  Bool(bool),
  /// `null`
  Null,
}

/// A node of a JSON tree.
///
/// A container keeps its members until its children are first built; they
/// are then moved into the children, so every value is held exactly once.
#[derive(Debug)]
pub struct JsonNode {
  id: u64,
  key: Option<String>,
  kind: JsonKind,
  members: Mutex<Option<Value>>,
  children: OnceLock<Vec<JsonNode>>,
}

impl JsonNode {
  /// Build the root node of a decoded value.
  pub fn new(raw: Value) -> JsonNode {
    JsonNode::with_key(None, raw)
  }

  fn with_key(key: Option<String>, raw: Value) -> JsonNode {
    let (kind, members) = match raw {
      raw @ Value::Object(_) => (JsonKind::Object, Some(raw)),
      raw @ Value::Array(_) => (JsonKind::Array, Some(raw)),
      Value::String(s) => (JsonKind::String(s), None),
      Value::Number(n) => (JsonKind::Number(n.to_string()), None),
      Value::Bool(b) => (JsonKind::Bool(b), None),
      Value::Null => (JsonKind::Null, None),
    };
    JsonNode {
      id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
      key,
      kind,
      members: Mutex::new(members),
      children: OnceLock::new(),
    }
  }
  /// Identifier of this node, unique within the process.
  pub fn id(&self) -> u64 {
    self.id
  }
  /// Member name, `[i]` for array elements, `None` for the root.
  pub fn key(&self) -> Option<&str> {
    self.key.as_deref()
  }
  /// What kind of value this node holds.
  pub fn kind(&self) -> &JsonKind {
    &self.kind
  }
  /// Whether this node is an object or an array.
  pub fn is_container(&self) -> bool {
    matches!(self.kind, JsonKind::Object | JsonKind::Array)
  }
  /// Child nodes, built on first access.
  pub fn children(&self) -> &[JsonNode] {
    self.children.get_or_init(|| {
      let members = self
        .members
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
      match members {
        Some(Value::Object(map)) => {
          let mut entries: Vec<(String, Value)> = map.into_iter().collect();
          entries.sort_by(|a, b| a.0.cmp(&b.0));
          entries
            .into_iter()
            .map(|(k, v)| JsonNode::with_key(Some(k), v))
            .collect()
        }
        Some(Value::Array(items)) => items
          .into_iter()
          .enumerate()
          .map(|(i, v)| JsonNode::with_key(Some(format!("[{}]", i)), v))
          .collect(),
        _ => Vec::new(),
      }
    })
  }
  /// Short rendering of the value for a single row.
  pub fn value_preview(&self) -> String {
    match &self.kind {
      JsonKind::Object => "{…}".to_string(),
      JsonKind::Array => "[…]".to_string(),
      JsonKind::String(s) => {
        if s.chars().count() > PREVIEW_LIMIT {
          let head: String = s.chars().take(PREVIEW_LIMIT).collect();
          format!("\"{}…\"", head)
        } else {
          format!("\"{}\"", s)
        }
      }
      JsonKind::Number(n) => n.clone(),
      JsonKind::Bool(b) => b.to_string(),
      JsonKind::Null => "null".to_string(),
    }
  }
}

/// Outcome of decoding a body.
#[derive(Debug)]
pub enum JsonState {
  /// The body decoded; this is the root.
  Parsed(JsonNode),
  /// The body is not JSON.
  ParseError {
    /// decoder message
    message: String,
    /// the body as text
    raw: String,
  },
}

/// One visible row of a flattened tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatRow {
  /// node id
  pub id: u64,
  /// node key
  pub key: Option<String>,
  /// value preview
  pub preview: String,
  /// nesting depth, `0` for the root
  pub depth: usize,
  /// whether the node is expanded
  pub is_expanded: bool,
  /// whether the node is a non-empty container
  pub has_children: bool,
}

/// A decoded body plus which of its nodes are expanded.
#[derive(Debug)]
pub struct JsonViewer {
  state: JsonState,
  expanded: HashSet<u64>,
}

impl JsonViewer {
  /// Decode `data`; fragments such as a bare string or number are accepted.
  ///
  /// Empty input and invalid JSON yield [`JsonState::ParseError`]. A
  /// container root starts out expanded.
  pub fn parse(data: &[u8]) -> JsonViewer {
    let mut expanded = HashSet::new();
    if data.is_empty() {
      return JsonViewer {
        state: JsonState::ParseError {
          message: "empty JSON data".to_string(),
          raw: String::new(),
        },
        expanded,
      };
    }
    let state = match serde_json::from_slice::<Value>(data) {
      Ok(value) => {
        let root = JsonNode::new(value);
        if root.is_container() {
          expanded.insert(root.id());
        }
        JsonState::Parsed(root)
      }
      Err(err) => {
        tracing::debug!("body is not JSON: {}", err);
        JsonState::ParseError {
          message: err.to_string(),
          raw: String::from_utf8_lossy(data).into_owned(),
        }
      }
    };
    JsonViewer { state, expanded }
  }
  /// The decoded tree or the decode failure.
  pub fn state(&self) -> &JsonState {
    &self.state
  }
  /// The root node, if decoding succeeded.
  pub fn root(&self) -> Option<&JsonNode> {
    match &self.state {
      JsonState::Parsed(root) => Some(root),
      JsonState::ParseError { .. } => None,
    }
  }
  /// Whether the node with `id` is expanded.
  pub fn is_expanded(&self, id: u64) -> bool {
    self.expanded.contains(&id)
  }
  /// Flip a visible container between expanded and collapsed.
  ///
  /// Returns the new expansion state; leaves, hidden nodes and unknown ids
  /// stay collapsed.
  pub fn toggle(&mut self, id: u64) -> bool {
    let is_container = self
      .root()
      .and_then(|root| self.find_visible(root, id))
      .is_some_and(JsonNode::is_container);
    if !is_container {
      return false;
    }
    if !self.expanded.remove(&id) {
      self.expanded.insert(id);
      return true;
    }
    false
  }
  /// Expand every container in the tree.
  pub fn expand_all(&mut self) {
    let mut ids = HashSet::new();
    if let Some(root) = self.root() {
      collect_containers(root, &mut ids);
    }
    self.expanded = ids;
  }
  /// Collapse everything except the root.
  pub fn collapse_all(&mut self) {
    let root = self.root().filter(|r| r.is_container()).map(JsonNode::id);
    self.expanded.clear();
    if let Some(id) = root {
      self.expanded.insert(id);
    }
  }
  /// The visible rows, depth first.
  pub fn flattened(&self) -> Vec<FlatRow> {
    let mut rows = Vec::new();
    if let Some(root) = self.root() {
      self.walk(root, 0, &mut rows);
    }
    rows
  }
  /// Search only below expanded containers, whose children exist already.
  fn find_visible<'a>(&self, node: &'a JsonNode, id: u64) -> Option<&'a JsonNode> {
    if node.id == id {
      return Some(node);
    }
    if !node.is_container() || !self.expanded.contains(&node.id) {
      return None;
    }
    node.children().iter().find_map(|c| self.find_visible(c, id))
  }
  fn walk(&self, node: &JsonNode, depth: usize, rows: &mut Vec<FlatRow>) {
    let is_expanded = self.expanded.contains(&node.id);
    rows.push(FlatRow {
      id: node.id,
      key: node.key.clone(),
      preview: node.value_preview(),
      depth,
      is_expanded,
      has_children: node.is_container() && !node.children().is_empty(),
    });
    if node.is_container() && is_expanded {
      for child in node.children() {
        self.walk(child, depth + 1, rows);
      }
    }
  }
}

fn collect_containers(node: &JsonNode, ids: &mut HashSet<u64>) {
  if node.is_container() {
    ids.insert(node.id);
    for child in node.children() {
      collect_containers(child, ids);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parsed(text: &str) -> JsonViewer {
    let viewer = JsonViewer::parse(text.as_bytes());
    assert!(viewer.root().is_some(), "{:?}", viewer.state());
    viewer
  }

  #[test]
  fn object_members_sorted_and_arrays_indexed() {
    let viewer = parsed(r#"{"b":1,"a":[true,null]}"#);
    let root = viewer.root().unwrap();
    let keys: Vec<_> = root.children().iter().map(|c| c.key().unwrap()).collect();
    assert_eq!(keys, ["a", "b"]);
    let a = &root.children()[0];
    let items: Vec<_> = a
      .children()
      .iter()
      .map(|c| (c.key().unwrap().to_string(), c.value_preview()))
      .collect();
    assert_eq!(
      items,
      [
        ("[0]".to_string(), "true".to_string()),
        ("[1]".to_string(), "null".to_string())
      ]
    );
  }

  #[test]
  fn children_are_built_once() {
    let root = JsonNode::new(serde_json::json!({"x": {"y": 1}}));
    let first = root.children().as_ptr();
    let ids: Vec<_> = root.children().iter().map(JsonNode::id).collect();
    assert_eq!(first, root.children().as_ptr());
    assert_eq!(ids, root.children().iter().map(JsonNode::id).collect::<Vec<_>>());
  }

  #[test]
  fn members_move_into_children() {
    let root = JsonNode::new(serde_json::json!({"x": {"y": [1, 2]}}));
    assert!(root.members.lock().unwrap().is_some());
    let x = &root.children()[0];
    assert!(root.members.lock().unwrap().is_none());
    assert!(x.members.lock().unwrap().is_some());
    assert_eq!(x.children()[0].key(), Some("y"));
    assert_eq!(x.children()[0].children().len(), 2);
  }

  #[test]
  fn toggling_unknown_ids_stays_lazy() {
    let mut viewer = parsed(r#"{"a":{"b":{"c":[1]}},"d":{"e":2}}"#);
    assert!(!viewer.toggle(u64::MAX));
    let root = viewer.root().unwrap();
    assert!(root.children()[0].children.get().is_none(), "collapsed subtree was built");
    let visible = root.children()[1].id();
    let hidden = root.children()[0].children()[0].id();
    assert!(viewer.toggle(visible));
    assert!(!viewer.toggle(hidden), "node under a collapsed parent toggled");
  }

  #[test]
  fn numbers_keep_source_text() {
    let viewer = parsed(r#"[1.50, 12345678901234567890123]"#);
    let previews: Vec<_> = viewer
      .root()
      .unwrap()
      .children()
      .iter()
      .map(JsonNode::value_preview)
      .collect();
    assert_eq!(previews, ["1.50", "12345678901234567890123"]);
  }

  #[test]
  fn long_strings_are_truncated() {
    let long = "é".repeat(130);
    let node = JsonNode::new(Value::String(long));
    let preview = node.value_preview();
    assert_eq!(preview.chars().count(), 1 + PREVIEW_LIMIT + 1 + 1);
    assert!(preview.ends_with("…\""));
    let exact = JsonNode::new(Value::String("x".repeat(PREVIEW_LIMIT)));
    assert!(!exact.value_preview().contains('…'));
  }

  #[test]
  fn fragments_and_errors() {
    let viewer = parsed(r#""just text""#);
    assert_eq!(viewer.root().unwrap().value_preview(), "\"just text\"");
    assert!(viewer.flattened()[0].depth == 0);
    match JsonViewer::parse(b"{oops").state() {
      JsonState::ParseError { raw, .. } => assert_eq!(raw, "{oops"),
      state => panic!("unexpected {:?}", state),
    }
    assert!(matches!(JsonViewer::parse(b"").state(), JsonState::ParseError { .. }));
  }

  #[test]
  fn expansion_controls_flattening() {
    let mut viewer = parsed(r#"{"a":{"b":[1,2]},"c":3}"#);
    let rows = viewer.flattened();
    assert_eq!(rows.len(), 3);
    assert!(rows[0].is_expanded);
    assert!(rows[1].has_children && !rows[1].is_expanded);
    assert!(!rows[2].has_children);

    assert!(viewer.toggle(rows[1].id));
    assert_eq!(viewer.flattened().len(), 4);
    assert!(!viewer.toggle(rows[2].id));

    viewer.expand_all();
    let rows = viewer.flattened();
    assert_eq!(rows.len(), 6);
    assert_eq!(rows.iter().map(|r| r.depth).max(), Some(3));

    viewer.collapse_all();
    assert_eq!(viewer.flattened().len(), 3);
    assert!(viewer.is_expanded(rows[0].id));
  }
}
