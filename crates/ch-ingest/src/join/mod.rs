//! Join graph validation and linearization.
//!
//! A [`JoinSpec`] is a set of tables plus pairwise equi-join edges. It is
//! validated once and frozen into a [`JoinPlan`]: a root table followed by
//! one [`JoinStep`] per remaining table. Planning is pure and deterministic,
//! so equal specs always produce equal plans (and equal fingerprints).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::ValidationError;

/// Join flavour of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
}

impl JoinType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER",
            JoinType::Left => "LEFT",
            JoinType::Right => "RIGHT",
        }
    }

    /// The same join seen from the other side.
    pub fn flipped(&self) -> Self {
        match self {
            JoinType::Inner => JoinType::Inner,
            JoinType::Left => JoinType::Right,
            JoinType::Right => JoinType::Left,
        }
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// `left_table.left_key = right_table.right_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinEdge {
    pub left_table: String,
    pub right_table: String,
    pub left_key: String,
    pub right_key: String,
    #[serde(default)]
    pub join_type: JoinType,
}

impl JoinEdge {
    pub fn new(
        left_table: impl Into<String>,
        right_table: impl Into<String>,
        left_key: impl Into<String>,
        right_key: impl Into<String>,
        join_type: JoinType,
    ) -> Self {
        Self {
            left_table: left_table.into(),
            right_table: right_table.into(),
            left_key: left_key.into(),
            right_key: right_key.into(),
            join_type,
        }
    }

    fn other(&self, table: &str) -> &str {
        if self.left_table == table {
            &self.right_table
        } else {
            &self.left_table
        }
    }
}

/// Caller-built join description.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JoinSpec {
    /// Participating tables.
    pub tables: Vec<String>,
    /// Edges, in priority order.
    #[serde(default)]
    pub edges: Vec<JoinEdge>,
}

impl JoinSpec {
    pub fn new(tables: Vec<String>, edges: Vec<JoinEdge>) -> Self {
        Self { tables, edges }
    }

    /// Validate and linearize. See [`build_plan`].
    pub fn plan(&self) -> Result<JoinPlan, ValidationError> {
        build_plan(&self.edges, &self.tables)
    }
}

/// `{join_type} JOIN table ON on_table.on_key = table.key`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinStep {
    pub table: String,
    pub join_type: JoinType,
    /// Already-joined table the new table attaches to.
    pub on_table: String,
    pub on_key: String,
    /// Key column in the new table.
    pub key: String,
}

/// Validated, ordered join execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinPlan {
    pub root: String,
    pub steps: Vec<JoinStep>,
}

impl JoinPlan {
    /// Plan over a single table.
    pub fn single(table: impl Into<String>) -> Self {
        Self {
            root: table.into(),
            steps: Vec::new(),
        }
    }

    /// Tables in join order, root first.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.root.as_str()).chain(self.steps.iter().map(|s| s.table.as_str()))
    }

    /// SHA256 of the canonical plan text, usable as a cache key.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Display for JoinPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root)?;
        for step in &self.steps {
            write!(
                f,
                " {} JOIN {} ON {}.{} = {}.{}",
                step.join_type, step.table, step.on_table, step.on_key, step.table, step.key
            )?;
        }
        Ok(())
    }
}

/// Validate a join graph and linearize it into a [`JoinPlan`].
///
/// Checks, in order: names are non-empty and listed once, every edge
/// references a participating table, no self-joins, no duplicate edge for an
/// unordered pair, and the graph is connected. The spanning tree takes edges in input
/// order (first seen wins, cycle-closing edges are dropped). The tree is then
/// walked from the smallest table name, always attaching the smallest-named
/// table reachable from the joined set.
pub fn build_plan(edges: &[JoinEdge], tables: &[String]) -> Result<JoinPlan, ValidationError> {
    let participating: BTreeSet<&str> = tables.iter().map(String::as_str).collect();

    let root = match participating.iter().next() {
        Some(root) => *root,
        None => {
            return Err(ValidationError::InvalidConfig(
                "a join needs at least one table".into(),
            ))
        }
    };
    if participating.iter().any(|t| t.trim().is_empty()) {
        return Err(ValidationError::InvalidConfig(
            "join table names must not be empty".into(),
        ));
    }
    if participating.len() != tables.len() {
        let mut seen = BTreeSet::new();
        let repeated = tables.iter().find(|t| !seen.insert(t.as_str()));
        return Err(ValidationError::InvalidConfig(format!(
            "join table {} is listed more than once",
            repeated.map_or("", String::as_str)
        )));
    }

    let mut pairs = BTreeSet::new();
    for edge in edges {
        for table in [&edge.left_table, &edge.right_table] {
            if !participating.contains(table.as_str()) {
                return Err(ValidationError::UnknownTable {
                    table: table.clone(),
                });
            }
        }
        if edge.left_key.trim().is_empty() || edge.right_key.trim().is_empty() {
            return Err(ValidationError::InvalidConfig(format!(
                "join between {} and {} is missing a key column",
                edge.left_table, edge.right_table
            )));
        }
        if edge.left_table == edge.right_table {
            return Err(ValidationError::SelfJoin {
                table: edge.left_table.clone(),
            });
        }
        let pair = ordered_pair(&edge.left_table, &edge.right_table);
        if !pairs.insert(pair) {
            return Err(ValidationError::DuplicateEdge {
                left: pair.0.to_string(),
                right: pair.1.to_string(),
            });
        }
    }

    // Spanning tree via union-find, edges in input order.
    let mut components: BTreeMap<&str, &str> = participating.iter().map(|t| (*t, *t)).collect();
    let mut tree: BTreeMap<&str, Vec<&JoinEdge>> = BTreeMap::new();
    for edge in edges {
        let a = find(&mut components, &edge.left_table);
        let b = find(&mut components, &edge.right_table);
        if a == b {
            debug!(
                "Dropping join edge {} - {}: closes a cycle",
                edge.left_table, edge.right_table
            );
            continue;
        }
        components.insert(a.max(b), a.min(b));
        tree.entry(edge.left_table.as_str()).or_default().push(edge);
        tree.entry(edge.right_table.as_str()).or_default().push(edge);
    }

    let root_component = find(&mut components, root);
    let unreachable = participating
        .iter()
        .copied()
        .find(|t| find(&mut components, *t) != root_component);
    if let Some(table) = unreachable {
        return Err(ValidationError::DisjointTable {
            table: table.to_string(),
        });
    }

    let mut joined: BTreeSet<&str> = BTreeSet::new();
    joined.insert(root);
    let mut steps = Vec::with_capacity(participating.len() - 1);

    while joined.len() < participating.len() {
        // Smallest-named table adjacent (in the tree) to the joined set.
        let next = joined
            .iter()
            .flat_map(|t| tree.get(t).into_iter().flatten().map(move |e| (*t, *e)))
            .filter(|(from, edge)| !joined.contains(edge.other(from)))
            .min_by(|(fa, ea), (fb, eb)| ea.other(fa).cmp(eb.other(fb)));

        let (from, edge) = match next {
            Some(found) => found,
            None => break,
        };
        let step = orient(edge, from);
        joined.insert(edge.other(from));
        steps.push(step);
    }

    Ok(JoinPlan {
        root: root.to_string(),
        steps,
    })
}

fn ordered_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn find<'a>(components: &mut BTreeMap<&'a str, &'a str>, table: &'a str) -> &'a str {
    let mut current = table;
    while let Some(parent) = components.get(current).copied() {
        if parent == current {
            break;
        }
        current = parent;
    }
    components.insert(table, current);
    current
}

/// Step attaching the far side of `edge`, seen from the joined table `from`.
fn orient(edge: &JoinEdge, from: &str) -> JoinStep {
    if edge.left_table == from {
        JoinStep {
            table: edge.right_table.clone(),
            join_type: edge.join_type,
            on_table: edge.left_table.clone(),
            on_key: edge.left_key.clone(),
            key: edge.right_key.clone(),
        }
    } else {
        JoinStep {
            table: edge.left_table.clone(),
            join_type: edge.join_type.flipped(),
            on_table: edge.right_table.clone(),
            on_key: edge.right_key.clone(),
            key: edge.left_key.clone(),
        }
    }
}
