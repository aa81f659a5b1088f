//! The arena-backed channel forest and its MPTT numbering.
//!
//! [`ChannelTree`] stores channels in a `Vec` with index links to parent and
//! children. Index `0` is the synthetic root (channel id [`ROOT_CHANNEL`]);
//! every top-level channel is a child of it.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use cmap_store::{Backend, ChannelRow, Statement};
use cmap_types::ChannelId;

use crate::error::{ChannelError, ChannelResult};

/// Id of the synthetic root channel. Never persisted.
pub const ROOT_CHANNEL: ChannelId = 0;

const ROOT: usize = 0;

/// A channel node with its MPTT boundaries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub left: i32,
    pub right: i32,
    parent: Option<usize>,
    children: Vec<usize>,
}

impl Channel {
    fn new(id: ChannelId, name: String, parent: Option<usize>) -> Self {
        Self {
            id,
            name,
            left: 0,
            right: 0,
            parent,
            children: Vec::new(),
        }
    }

    /// Returns `true` for the synthetic root.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Returns `true` if `other` lies strictly inside this channel's interval.
    pub fn is_ancestor_of(&self, other: &Channel) -> bool {
        self.left < other.left && other.right < self.right
    }

    /// Number of direct children.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }
}

/// A forest of channels under a synthetic root.
#[derive(Clone, Debug)]
pub struct ChannelTree {
    nodes: Vec<Channel>,
}

impl Default for ChannelTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelTree {
    /// An empty tree holding only the synthetic root.
    pub fn new() -> Self {
        let mut tree = Self {
            nodes: vec![Channel::new(ROOT_CHANNEL, String::new(), None)],
        };
        tree.number();
        tree
    }

    /// Rebuild the forest from rows in one linear pass.
    ///
    /// Rows are visited by ascending left boundary with a stack of open
    /// intervals: intervals that do not enclose the current row are closed
    /// (popped), and the row becomes a child of whatever remains on top.
    /// The result is renumbered, so gaps in the stored boundaries vanish.
    pub fn from_rows(rows: impl IntoIterator<Item = ChannelRow>) -> Self {
        let mut rows: Vec<ChannelRow> = rows.into_iter().collect();
        rows.sort_by_key(|r| r.left);

        let mut tree = Self {
            nodes: vec![Channel::new(ROOT_CHANNEL, String::new(), None)],
        };
        let mut stack: Vec<(usize, i32)> = vec![(ROOT, i32::MAX)];
        for row in rows {
            while let Some(&(idx, right)) = stack.last() {
                if idx != ROOT && right < row.right {
                    stack.pop();
                } else {
                    break;
                }
            }
            let parent = stack.last().map_or(ROOT, |&(idx, _)| idx);
            let idx = tree.attach(parent, row.id, row.name);
            stack.push((idx, row.right));
        }
        tree.number();
        tree
    }

    /// Load the tree from the backing store.
    pub fn load(backend: &dyn Backend) -> ChannelResult<Self> {
        let rows = backend.load_channels()?;
        let tree = Self::from_rows(rows);
        debug!(channels = tree.len(), "loaded channel tree");
        Ok(tree)
    }

    /// Number of channels, excluding the synthetic root.
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Returns `true` if the tree holds no channels.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ---------------------------------------------------------------
    // Mutation
    // ---------------------------------------------------------------

    fn attach(&mut self, parent: usize, id: ChannelId, name: String) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(Channel::new(id, name, Some(parent)));
        self.nodes[parent].children.push(idx);
        idx
    }

    /// Add a channel below `parent` (use [`ROOT_CHANNEL`] for a top-level
    /// channel). Ids are not checked here; [`validate`](Self::validate)
    /// runs before every save.
    pub fn add_channel(
        &mut self,
        parent: ChannelId,
        id: ChannelId,
        name: impl Into<String>,
    ) -> ChannelResult<()> {
        let parent_idx = self
            .index_of(parent)
            .ok_or(ChannelError::UnknownChannel(parent))?;
        self.attach(parent_idx, id, name.into());
        self.number();
        Ok(())
    }

    /// Rename a channel.
    pub fn rename_channel(&mut self, id: ChannelId, name: impl Into<String>) -> ChannelResult<()> {
        if id == ROOT_CHANNEL {
            return Err(ChannelError::RootChannel);
        }
        let idx = self.index_of(id).ok_or(ChannelError::UnknownChannel(id))?;
        self.nodes[idx].name = name.into();
        Ok(())
    }

    /// Remove a channel and its whole subtree. Returns the removed ids in
    /// pre-order.
    pub fn remove_channel(&mut self, id: ChannelId) -> ChannelResult<Vec<ChannelId>> {
        if id == ROOT_CHANNEL {
            return Err(ChannelError::RootChannel);
        }
        let idx = self.index_of(id).ok_or(ChannelError::UnknownChannel(id))?;
        let doomed: Vec<usize> = self.subtree(idx);
        let removed = doomed.iter().map(|&i| self.nodes[i].id).collect();
        let skip: HashSet<usize> = doomed.into_iter().collect();

        let mut fresh = Self {
            nodes: vec![Channel::new(ROOT_CHANNEL, String::new(), None)],
        };
        self.copy_children(ROOT, ROOT, &mut fresh, &skip);
        fresh.number();
        *self = fresh;
        Ok(removed)
    }

    fn copy_children(&self, old: usize, new: usize, fresh: &mut Self, skip: &HashSet<usize>) {
        for &child in &self.nodes[old].children {
            if skip.contains(&child) {
                continue;
            }
            let node = &self.nodes[child];
            let copied = fresh.attach(new, node.id, node.name.clone());
            self.copy_children(child, copied, fresh, skip);
        }
    }

    /// Recompute all MPTT boundaries in one pre-order pass. Each node takes
    /// the running counter as its left boundary, and the counter after its
    /// whole subtree as its right boundary.
    pub fn number(&mut self) {
        let mut counter = 0;
        self.number_from(ROOT, &mut counter);
    }

    fn number_from(&mut self, idx: usize, counter: &mut i32) {
        self.nodes[idx].left = *counter;
        *counter += 1;
        let children = self.nodes[idx].children.clone();
        for child in children {
            self.number_from(child, counter);
        }
        self.nodes[idx].right = *counter;
        *counter += 1;
    }

    // ---------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------

    /// Arena indices of a subtree in pre-order, starting with `idx`.
    fn subtree(&self, idx: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![idx];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.nodes[current].children.iter().rev());
        }
        out
    }

    /// Depth-first search for a channel's arena index.
    fn index_of(&self, id: ChannelId) -> Option<usize> {
        if id == ROOT_CHANNEL {
            return Some(ROOT);
        }
        self.subtree(ROOT)
            .into_iter()
            .skip(1)
            .find(|&idx| self.nodes[idx].id == id)
    }

    /// Find a channel by id. The synthetic root is found under id `0`.
    pub fn find_channel(&self, id: ChannelId) -> ChannelResult<&Channel> {
        self.index_of(id)
            .map(|idx| &self.nodes[idx])
            .ok_or(ChannelError::UnknownChannel(id))
    }

    /// Returns `true` if the channel exists.
    pub fn contains(&self, id: ChannelId) -> bool {
        self.index_of(id).is_some()
    }

    /// The parent of a channel, or `None` for top-level channels.
    pub fn parent(&self, id: ChannelId) -> ChannelResult<Option<&Channel>> {
        let idx = self.index_of(id).ok_or(ChannelError::UnknownChannel(id))?;
        Ok(self.nodes[idx]
            .parent
            .filter(|&p| p != ROOT)
            .map(|p| &self.nodes[p]))
    }

    /// Direct children of a channel, in insertion order.
    pub fn children(&self, id: ChannelId) -> ChannelResult<Vec<&Channel>> {
        let idx = self.index_of(id).ok_or(ChannelError::UnknownChannel(id))?;
        Ok(self.nodes[idx]
            .children
            .iter()
            .map(|&c| &self.nodes[c])
            .collect())
    }

    /// Top-level channels.
    pub fn roots(&self) -> Vec<&Channel> {
        self.nodes[ROOT]
            .children
            .iter()
            .map(|&c| &self.nodes[c])
            .collect()
    }

    /// All channels in pre-order, excluding the synthetic root.
    pub fn channels(&self) -> Vec<&Channel> {
        self.subtree(ROOT)
            .into_iter()
            .skip(1)
            .map(|idx| &self.nodes[idx])
            .collect()
    }

    /// All channels strictly below `id`, in pre-order.
    pub fn descendants(&self, id: ChannelId) -> ChannelResult<Vec<&Channel>> {
        let idx = self.index_of(id).ok_or(ChannelError::UnknownChannel(id))?;
        Ok(self
            .subtree(idx)
            .into_iter()
            .skip(1)
            .map(|i| &self.nodes[i])
            .collect())
    }

    /// The ordered path from a top-level channel down to `id`, found by
    /// depth-first search. For [`ROOT_CHANNEL`] the path is the root alone.
    pub fn channel_path(&self, id: ChannelId) -> ChannelResult<Vec<&Channel>> {
        if id == ROOT_CHANNEL {
            return Ok(vec![&self.nodes[ROOT]]);
        }
        let mut path = Vec::new();
        if self.path_to(ROOT, id, &mut path) {
            Ok(path.into_iter().map(|idx| &self.nodes[idx]).collect())
        } else {
            Err(ChannelError::UnknownChannel(id))
        }
    }

    /// Channel ids along [`channel_path`](Self::channel_path).
    pub fn channel_path_ids(&self, id: ChannelId) -> ChannelResult<Vec<ChannelId>> {
        Ok(self.channel_path(id)?.iter().map(|c| c.id).collect())
    }

    fn path_to(&self, idx: usize, target: ChannelId, path: &mut Vec<usize>) -> bool {
        for &child in &self.nodes[idx].children {
            path.push(child);
            if self.nodes[child].id == target || self.path_to(child, target, path) {
                return true;
            }
            path.pop();
        }
        false
    }

    /// MPTT ancestor test. A channel is not its own ancestor.
    pub fn is_ancestor(&self, ancestor: ChannelId, descendant: ChannelId) -> ChannelResult<bool> {
        let a = self.find_channel(ancestor)?;
        let d = self.find_channel(descendant)?;
        Ok(a.is_ancestor_of(d))
    }

    // ---------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------

    /// Reject duplicate and non-positive channel ids.
    pub fn validate(&self) -> ChannelResult<()> {
        let mut seen = HashSet::new();
        self.validate_from(ROOT, &mut seen)
    }

    fn validate_from(&self, idx: usize, seen: &mut HashSet<ChannelId>) -> ChannelResult<()> {
        for &child in &self.nodes[idx].children {
            let id = self.nodes[child].id;
            if id <= 0 {
                return Err(ChannelError::InvalidChannelId(id));
            }
            if !seen.insert(id) {
                return Err(ChannelError::DuplicateChannel(id));
            }
            self.validate_from(child, seen)?;
        }
        Ok(())
    }

    /// Rows for every channel, in pre-order.
    pub fn to_rows(&self) -> Vec<ChannelRow> {
        self.channels()
            .into_iter()
            .map(|c| ChannelRow::new(c.id, c.name.clone(), c.left, c.right))
            .collect()
    }

    /// Compute the statements that bring `stored` in line with this tree.
    ///
    /// Validates first, so an invalid tree produces no statements at all.
    /// Rows whose name and boundaries are unchanged are left alone; stored
    /// rows with no counterpart in the tree are deleted.
    pub fn save_plan(&mut self, stored: &[ChannelRow]) -> ChannelResult<Vec<Statement>> {
        self.validate()?;
        self.number();

        let stored: HashMap<ChannelId, &ChannelRow> = stored.iter().map(|r| (r.id, r)).collect();
        let rows = self.to_rows();
        let live: HashSet<ChannelId> = rows.iter().map(|r| r.id).collect();

        let mut statements = Vec::new();
        for row in rows {
            if stored.get(&row.id).map_or(true, |old| **old != row) {
                statements.push(Statement::UpsertChannel(row));
            }
        }
        let mut removed: Vec<ChannelId> = stored
            .keys()
            .copied()
            .filter(|id| !live.contains(id))
            .collect();
        removed.sort_unstable();
        statements.extend(removed.into_iter().map(|id| Statement::DeleteChannel { id }));
        Ok(statements)
    }

    /// Persist the tree. Returns the number of statements executed.
    pub fn save(&mut self, backend: &dyn Backend) -> ChannelResult<usize> {
        let stored = backend.load_channels()?;
        let statements = self.save_plan(&stored)?;
        if statements.is_empty() {
            return Ok(0);
        }
        let executed = backend.execute(&statements)?;
        info!(channels = self.len(), statements = executed, "saved channel tree");
        Ok(executed)
    }
}
