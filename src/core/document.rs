use anyhow::{bail, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::ControlFlow;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    #[serde(rename = "novel")]
    RootWork,
    Part,
    Chapter,
    Act,
    Section,
    Beat,
}

impl NodeKind {
    /// Lenient mapping for kinds coming back from the architect model.
    /// A second `novel` would break the single-root rule, so it becomes a part.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "part" | "novel" | "root-work" => NodeKind::Part,
            "chapter" => NodeKind::Chapter,
            "act" => NodeKind::Act,
            "beat" => NodeKind::Beat,
            _ => NodeKind::Section,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::RootWork => "novel",
            NodeKind::Part => "part",
            NodeKind::Chapter => "chapter",
            NodeKind::Act => "act",
            NodeKind::Section => "section",
            NodeKind::Beat => "beat",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Pacing {
    Slow,
    Moderate,
    Fast,
    Climax,
}

impl Pacing {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "slow" => Some(Pacing::Slow),
            "moderate" => Some(Pacing::Moderate),
            "fast" => Some(Pacing::Fast),
            "climax" => Some(Pacing::Climax),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct NodeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pacing: Option<Pacing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<NodeMetadata>,
    #[serde(default)]
    pub children: Vec<DocumentNode>,
    #[serde(rename = "isExpanded", default)]
    pub expanded: bool,
}

/// Field-wise replacement applied by [`DocumentNode::update`].
/// `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct NodePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub metadata: Option<Option<NodeMetadata>>,
    pub expanded: Option<bool>,
}

impl NodePatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    fn apply(&self, node: &mut DocumentNode) {
        if let Some(title) = &self.title {
            node.title = title.clone();
        }
        if let Some(content) = &self.content {
            node.content = content.clone();
        }
        if let Some(summary) = &self.summary {
            node.summary = summary.clone();
        }
        if let Some(metadata) = &self.metadata {
            node.metadata = metadata.clone();
        }
        if let Some(expanded) = self.expanded {
            node.expanded = expanded;
        }
    }
}

/// Generates an id of the form `{prefix}-{millis}-{random hex}`.
pub fn new_id(prefix: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let salt: u32 = rand::rng().random_range(0..0x100_0000);
    format!("{}-{}-{:06x}", prefix, millis, salt)
}

impl DocumentNode {
    pub fn new(kind: NodeKind, title: impl Into<String>) -> Self {
        let prefix = match kind {
            NodeKind::RootWork => "root",
            _ => "node",
        };
        Self {
            id: new_id(prefix),
            kind,
            title: title.into(),
            content: String::new(),
            summary: String::new(),
            metadata: None,
            children: Vec::new(),
            expanded: false,
        }
    }

    /// A fresh root for a new work.
    pub fn new_root(title: impl Into<String>) -> Self {
        let mut root = Self::new(NodeKind::RootWork, title);
        root.summary = "The skeleton of a great work.".to_string();
        root.expanded = true;
        root
    }

    /// Pre-order traversal; stops as soon as `visit` breaks.
    pub fn walk<'a, B>(
        &'a self,
        visit: &mut impl FnMut(&'a DocumentNode) -> ControlFlow<B>,
    ) -> ControlFlow<B> {
        visit(self)?;
        for child in &self.children {
            child.walk(visit)?;
        }
        ControlFlow::Continue(())
    }

    pub fn walk_mut<B>(
        &mut self,
        visit: &mut impl FnMut(&mut DocumentNode) -> ControlFlow<B>,
    ) -> ControlFlow<B> {
        visit(self)?;
        for child in &mut self.children {
            child.walk_mut(visit)?;
        }
        ControlFlow::Continue(())
    }

    pub fn find(&self, id: &str) -> Option<&DocumentNode> {
        match self.walk(&mut |node| {
            if node.id == id {
                ControlFlow::Break(node)
            } else {
                ControlFlow::Continue(())
            }
        }) {
            ControlFlow::Break(node) => Some(node),
            ControlFlow::Continue(()) => None,
        }
    }

    /// Applies `patch` in place to the node matching `id`. Returns whether a node matched.
    pub fn patch_in_place(&mut self, id: &str, patch: &NodePatch) -> bool {
        self.walk_mut(&mut |node| {
            if node.id == id {
                patch.apply(node);
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .is_break()
    }

    /// Returns a copy of the tree with `patch` merged into the node `id`.
    /// Unknown ids leave the copy identical to `self`.
    pub fn update(&self, id: &str, patch: &NodePatch) -> DocumentNode {
        let mut tree = self.clone();
        tree.patch_in_place(id, patch);
        tree
    }

    /// Returns a copy of the tree with every descendant of `id` removed.
    pub fn clear_children(&self, id: &str) -> DocumentNode {
        let mut tree = self.clone();
        let _ = tree.walk_mut(&mut |node| {
            if node.id == id {
                node.children.clear();
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        tree
    }

    /// Returns a copy of the tree with `nodes` appended after the existing
    /// children of `parent_id`.
    pub fn append_children(
        &self,
        parent_id: &str,
        nodes: Vec<DocumentNode>,
    ) -> Result<DocumentNode> {
        let mut seen = self.ids();
        for node in &nodes {
            let clash = node.walk(&mut |n| {
                if n.kind == NodeKind::RootWork {
                    return ControlFlow::Break(format!("node '{}' has kind novel", n.id));
                }
                if !seen.insert(n.id.clone()) {
                    return ControlFlow::Break(format!("duplicate node id '{}'", n.id));
                }
                ControlFlow::Continue(())
            });
            if let ControlFlow::Break(reason) = clash {
                bail!("Cannot append under '{}': {}", parent_id, reason);
            }
        }

        let mut tree = self.clone();
        let mut pending = Some(nodes);
        let _ = tree.walk_mut(&mut |node| {
            if node.id == parent_id {
                if let Some(nodes) = pending.take() {
                    node.children.extend(nodes);
                }
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        Ok(tree)
    }

    /// Pre-order rendering of every title (uppercased heading) and content.
    pub fn collect_text(&self) -> String {
        let mut out = String::new();
        let _ = self.walk(&mut |node| -> ControlFlow<()> {
            out.push_str("\n\n# ");
            out.push_str(&node.title.to_uppercase());
            out.push_str("\n\n");
            out.push_str(&node.content);
            ControlFlow::Continue(())
        });
        out
    }

    pub fn count_nodes(&self) -> usize {
        let mut count = 0;
        let _ = self.walk(&mut |_| -> ControlFlow<()> {
            count += 1;
            ControlFlow::Continue(())
        });
        count
    }

    fn ids(&self) -> HashSet<String> {
        let mut ids = HashSet::new();
        let _ = self.walk(&mut |node| -> ControlFlow<()> {
            ids.insert(node.id.clone());
            ControlFlow::Continue(())
        });
        ids
    }

    /// Checks the tree invariants: unique ids and a single root-work node at the root.
    pub fn validate(&self) -> Result<()> {
        if self.kind != NodeKind::RootWork {
            bail!("Root node '{}' is a {}, expected novel", self.id, self.kind.label());
        }
        let mut seen = HashSet::new();
        let mut depth_first = vec![(self, true)];
        while let Some((node, is_root)) = depth_first.pop() {
            if !seen.insert(node.id.as_str()) {
                bail!("Duplicate node id '{}'", node.id);
            }
            if !is_root && node.kind == NodeKind::RootWork {
                bail!("Node '{}' has kind novel below the root", node.id);
            }
            depth_first.extend(node.children.iter().map(|c| (c, false)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(id: &str, kind: NodeKind, title: &str, content: &str) -> DocumentNode {
        DocumentNode {
            id: id.to_string(),
            kind,
            title: title.to_string(),
            content: content.to_string(),
            summary: String::new(),
            metadata: None,
            children: vec![],
            expanded: false,
        }
    }

    fn sample_tree() -> DocumentNode {
        let mut root = leaf("root", NodeKind::RootWork, "Saga", "Prologue text");
        let mut part = leaf("p1", NodeKind::Part, "Rise", "");
        part.children = vec![
            leaf("c1", NodeKind::Chapter, "Dawn", "First light."),
            leaf("c2", NodeKind::Chapter, "Noon", "High sun."),
        ];
        root.children = vec![part, leaf("c3", NodeKind::Chapter, "Dusk", "Last light.")];
        root
    }

    #[test]
    fn test_find_is_depth_first() {
        let tree = sample_tree();
        assert_eq!(tree.find("c2").map(|n| n.title.as_str()), Some("Noon"));
        assert_eq!(tree.find("root").map(|n| n.kind), Some(NodeKind::RootWork));
        assert!(tree.find("missing").is_none());
    }

    #[test]
    fn test_update_changes_only_target() {
        let tree = sample_tree();
        for id in ["root", "p1", "c1", "c2", "c3"] {
            let updated = tree.update(id, &NodePatch::title("Renamed"));
            assert_eq!(updated.find(id).unwrap().title, "Renamed");

            let _ = tree.walk(&mut |original| -> ControlFlow<()> {
                if original.id != id {
                    let after = updated.find(&original.id).unwrap();
                    assert_eq!(after.title, original.title);
                    assert_eq!(after.content, original.content);
                    assert_eq!(after.children.len(), original.children.len());
                }
                ControlFlow::Continue(())
            });
        }
        // The input tree is untouched.
        assert_eq!(tree, sample_tree());
    }

    #[test]
    fn test_update_unknown_id_is_noop() {
        let tree = sample_tree();
        assert_eq!(tree.update("nope", &NodePatch::content("x")), tree);
    }

    #[test]
    fn test_append_children_preserves_order() {
        let tree = sample_tree();
        let appended = tree
            .append_children(
                "p1",
                vec![
                    leaf("c4", NodeKind::Chapter, "Eve", ""),
                    leaf("c5", NodeKind::Chapter, "Night", ""),
                ],
            )
            .unwrap();
        let titles: Vec<_> = appended
            .find("p1")
            .unwrap()
            .children
            .iter()
            .map(|c| c.title.as_str())
            .collect();
        assert_eq!(titles, vec!["Dawn", "Noon", "Eve", "Night"]);
        assert!(appended.validate().is_ok());
    }

    #[test]
    fn test_append_children_rejects_duplicate_ids() {
        let tree = sample_tree();
        let err = tree
            .append_children("p1", vec![leaf("c1", NodeKind::Beat, "Again", "")])
            .unwrap_err();
        assert!(err.to_string().contains("duplicate node id 'c1'"));

        let err = tree
            .append_children("p1", vec![leaf("x", NodeKind::RootWork, "Second root", "")])
            .unwrap_err();
        assert!(err.to_string().contains("kind novel"));
    }

    #[test]
    fn test_clear_children_then_reuse_ids() {
        let tree = sample_tree();
        let cleared = tree.clear_children("p1");
        assert!(cleared.find("p1").unwrap().children.is_empty());
        assert!(cleared.find("c1").is_none());
        assert_eq!(cleared.count_nodes(), 3);
        assert_eq!(tree, sample_tree());

        // Ids freed by the clear may be appended again; live ids may not.
        let refilled = cleared
            .append_children("p1", vec![leaf("c1", NodeKind::Chapter, "Dawn again", "")])
            .unwrap();
        assert!(refilled.validate().is_ok());
        assert!(cleared
            .append_children("p1", vec![leaf("c3", NodeKind::Chapter, "Dusk again", "")])
            .is_err());
        assert_eq!(tree.clear_children("missing"), tree);
    }

    #[test]
    fn test_collect_text_preorder_and_idempotent() {
        let tree = sample_tree();
        let text = tree.collect_text();
        assert_eq!(
            text,
            "\n\n# SAGA\n\nPrologue text\n\n# RISE\n\n\n\n# DAWN\n\nFirst light.\n\n# NOON\n\nHigh sun.\n\n# DUSK\n\nLast light."
        );
        assert_eq!(text, tree.collect_text());
    }

    #[test]
    fn test_validate_detects_duplicates() {
        let mut tree = sample_tree();
        tree.children.push(leaf("c1", NodeKind::Chapter, "Copy", ""));
        assert!(tree.validate().is_err());
        assert!(sample_tree().validate().is_ok());
        assert_eq!(sample_tree().count_nodes(), 5);
    }

    #[test]
    fn test_serialized_shape() {
        let mut root = DocumentNode::new_root("Saga");
        root.id = "root-1".to_string();
        root.metadata = Some(NodeMetadata {
            pacing: Some(Pacing::Climax),
            ..Default::default()
        });
        let json = serde_json::to_value(&root).unwrap();
        assert_eq!(json["type"], "novel");
        assert_eq!(json["isExpanded"], true);
        assert_eq!(json["metadata"]["pacing"], "climax");

        let parsed: DocumentNode = serde_json::from_str(
            r#"{"id":"a","type":"beat","title":"T","content":"","summary":"","children":[]}"#,
        )
        .unwrap();
        assert_eq!(parsed.kind, NodeKind::Beat);
        assert!(!parsed.expanded);
    }

    #[test]
    fn test_kind_from_label() {
        assert_eq!(NodeKind::from_label("Chapter"), NodeKind::Chapter);
        assert_eq!(NodeKind::from_label("novel"), NodeKind::Part);
        assert_eq!(NodeKind::from_label("scene"), NodeKind::Section);
        assert_eq!(Pacing::from_label("FAST"), Some(Pacing::Fast));
    }
}
