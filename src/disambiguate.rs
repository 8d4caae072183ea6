//! Disambiguation of identically-labeled test nodes.
//!
//! Two nodes can end up with the same label, e.g. a `TestLogin` class in both
//! `app.web` and `app.api`, or `test_utils.py` in two directories. To tell them
//! apart, each colliding node gets a description made of the id segments just
//! above its label, peeled off one at a time until every label in the group
//! is unique:
//!
//! ```text
//! app.web.TestLogin  ──►  TestLogin  (web)
//! app.api.TestLogin  ──►  TestLogin  (api)
//! ```
//!
//! Nodes whose label is not a literal suffix of their id (pseudo-tests such as
//! `Error in test_a.py`) cannot be peeled and are left untouched.

use crate::framework::TestNode;
use crate::util::{group_by, split_on_last};

/// An `(id, label)` pair to disambiguate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabeledId<'a> {
    pub id: &'a str,
    pub label: &'a str,
}

impl<'a> LabeledId<'a> {
    pub fn new(id: &'a str, label: &'a str) -> Self {
        Self { id, label }
    }
}

/// Per-item state while peeling. Lives in a flat arena indexed by position.
#[derive(Debug, Clone, Default)]
struct Candidate {
    prefix: String,
}

/// Computes a description for every item that shares its label with another.
///
/// The returned vector is parallel to `items`. An entry is `Some` only when
/// the item collided with another and at least one id segment could be
/// revealed for it; unique labels, ineligible items, and items whose id ran
/// out of segments get `None`.
///
/// ```
/// use testlens::disambiguate::{LabeledId, compute_descriptions};
///
/// let items = [LabeledId::new("a.M1.T", "T"), LabeledId::new("a.M2.T", "T")];
/// assert_eq!(
///     compute_descriptions(&items, "."),
///     vec![Some("M1".to_string()), Some("M2".to_string())]
/// );
/// ```
pub fn compute_descriptions(items: &[LabeledId<'_>], separator: &str) -> Vec<Option<String>> {
    let mut candidates = vec![Candidate::default(); items.len()];
    let mut collided = vec![false; items.len()];

    let eligible = (0..items.len()).filter(|&i| items[i].id.ends_with(items[i].label));
    let mut worklist: Vec<Vec<usize>> = group_by(eligible, |&i| items[i].label)
        .into_iter()
        .map(|(_, members)| members)
        .filter(|members| members.len() > 1)
        .collect();

    while let Some(group) = worklist.pop() {
        let mut advanced = false;
        for &i in &group {
            collided[i] = true;
            advanced |= reveal_next_segment(&mut candidates[i], items[i], separator);
        }

        // every member is out of segments: the remaining ambiguity is irreducible
        if !advanced {
            continue;
        }

        let regrouped = group_by(group, |&i| {
            effective_label(&candidates[i], items[i].label, separator)
        });
        worklist.extend(
            regrouped
                .into_iter()
                .map(|(_, members)| members)
                .filter(|members| members.len() > 1),
        );
    }

    candidates
        .into_iter()
        .zip(collided)
        .map(|(candidate, collided)| {
            (collided && !candidate.prefix.is_empty()).then_some(candidate.prefix)
        })
        .collect()
}

fn effective_label(candidate: &Candidate, label: &str, separator: &str) -> String {
    if candidate.prefix.is_empty() {
        label.to_string()
    } else {
        format!("{}{}{}", candidate.prefix, separator, label)
    }
}

/// Moves the next id segment above the effective label into the prefix.
///
/// Returns `false` when the id has no segment left to reveal.
fn reveal_next_segment(candidate: &mut Candidate, item: LabeledId<'_>, separator: &str) -> bool {
    let current = effective_label(candidate, item.label, separator);
    let Some(head_len) = item.id.len().checked_sub(current.len() + separator.len()) else {
        return false;
    };
    let Some(head) = item.id.get(..head_len) else {
        return false;
    };
    if !item.id[head_len..].starts_with(separator) || head.is_empty() {
        return false;
    }

    let token = split_on_last(head, separator).map_or(head, |(_, last)| last);
    if token.is_empty() {
        return false;
    }

    candidate.prefix = if candidate.prefix.is_empty() {
        token.to_string()
    } else {
        format!("{}{}{}", token, separator, candidate.prefix)
    };
    true
}

/// Disambiguates a flat list of sibling-level nodes in place.
///
/// Only nodes that needed disambiguation are touched; all other descriptions
/// are left as they were.
pub fn disambiguate_nodes(nodes: &mut [TestNode], separator: &str) {
    let descriptions = {
        let items: Vec<_> = nodes
            .iter()
            .map(|node| LabeledId::new(node.id(), node.label()))
            .collect();
        compute_descriptions(&items, separator)
    };

    for (node, description) in nodes.iter_mut().zip(descriptions) {
        if let Some(description) = description {
            node.set_description(description);
        }
    }
}

/// Disambiguates every descendant of `root` as one flat collection.
pub fn disambiguate_tree(root: &mut TestNode, separator: &str) {
    let descriptions = {
        let mut items = Vec::new();
        for child in root.children() {
            child.walk(&mut |node| items.push(LabeledId::new(node.id(), node.label())));
        }
        compute_descriptions(&items, separator)
    };

    let mut descriptions = descriptions.into_iter();
    if let TestNode::Suite(suite) = root {
        for child in &mut suite.children {
            child.walk_mut(&mut |node| {
                if let Some(Some(description)) = descriptions.next() {
                    node.set_description(description);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::{SuiteNode, TestLeaf};

    fn describe(pairs: &[(&str, &str)], separator: &str) -> Vec<Option<String>> {
        let items: Vec<_> = pairs
            .iter()
            .map(|(id, label)| LabeledId::new(id, label))
            .collect();
        compute_descriptions(&items, separator)
    }

    fn some(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn test_two_level_collision() {
        assert_eq!(
            describe(&[("a.M1.T", "T"), ("a.M2.T", "T")], "."),
            vec![some("M1"), some("M2")]
        );
    }

    #[test]
    fn test_unique_label_gets_nothing() {
        assert_eq!(describe(&[("a.M1.T", "T")], "."), vec![None]);
        assert_eq!(
            describe(&[("a.M1.T", "T"), ("a.M1.U", "U")], "."),
            vec![None, None]
        );
    }

    #[test]
    fn test_deep_collision_peels_until_unique() {
        let descriptions = describe(
            &[
                ("x.core.tests.T", "T"),
                ("y.core.tests.T", "T"),
                ("z.other.T", "T"),
            ],
            ".",
        );
        assert_eq!(
            descriptions,
            vec![some("x.core.tests"), some("y.core.tests"), some("other")]
        );
    }

    #[test]
    fn test_path_separator() {
        assert_eq!(
            describe(
                &[
                    ("/proj/api/test_utils.py", "test_utils.py"),
                    ("/proj/web/test_utils.py", "test_utils.py"),
                    ("/proj/web/test_views.py", "test_views.py"),
                ],
                "/",
            ),
            vec![some("api"), some("web"), None]
        );
    }

    #[test]
    fn test_exhausted_id_gets_no_description() {
        assert_eq!(describe(&[("T", "T"), ("pkg.T", "T")], "."), vec![None, some("pkg")]);
    }

    #[test]
    fn test_exhausted_after_partial_reveal() {
        assert_eq!(
            describe(&[("M.T", "T"), ("x.M.T", "T")], "."),
            vec![some("M"), some("x.M")]
        );
    }

    #[test]
    fn test_label_not_suffix_is_excluded() {
        assert_eq!(
            describe(
                &[
                    ("/proj/a/test_x.py", "Error in test_x.py"),
                    ("/proj/b/test_x.py", "Error in test_x.py"),
                ],
                "/",
            ),
            vec![None, None]
        );
    }

    #[test]
    fn test_separator_must_precede_label() {
        // "ab" ends with "b" but there is no separator between the segments
        assert_eq!(describe(&[("x.ab", "b"), ("y.b", "b")], "."), vec![None, some("y")]);
    }

    #[test]
    fn test_disambiguate_nodes_keeps_existing_descriptions() {
        let mut nodes: Vec<TestNode> = vec![
            SuiteNode::new("app.web.Login", "Login").into(),
            SuiteNode::new("app.api.Login", "Login").into(),
            TestLeaf::new("/proj/a.py", "Error in a.py")
                .with_description("kept")
                .into(),
            SuiteNode::new("app.Other", "Other").into(),
        ];

        disambiguate_nodes(&mut nodes, ".");

        assert_eq!(nodes[0].description(), Some("web"));
        assert_eq!(nodes[1].description(), Some("api"));
        assert_eq!(nodes[2].description(), Some("kept"));
        assert_eq!(nodes[3].description(), None);
    }

    #[test]
    fn test_disambiguate_tree_across_depths() {
        let mut root: TestNode = SuiteNode::new("root", "root")
            .with_child(
                SuiteNode::new("a.Case", "Case").with_child(TestLeaf::new("a.Case.test", "test")),
            )
            .with_child(
                SuiteNode::new("b.Case", "Case").with_child(TestLeaf::new("b.Case.test", "test")),
            )
            .into();

        disambiguate_tree(&mut root, ".");

        assert_eq!(root.description(), None);
        assert_eq!(root.find("a.Case").and_then(|n| n.description()), Some("a"));
        assert_eq!(root.find("b.Case").and_then(|n| n.description()), Some("b"));
        assert_eq!(
            root.find("a.Case.test").and_then(|n| n.description()),
            Some("a.Case")
        );
        assert_eq!(
            root.find("b.Case.test").and_then(|n| n.description()),
            Some("b.Case")
        );
    }
}
