//! Channel selection, passed explicitly into every datasource call.

use cmap_channel::{ChannelTree, ROOT_CHANNEL};
use cmap_types::ChannelId;

use crate::error::DatasourceResult;

/// The channels one unit of work operates in.
///
/// Selected channels are leaves of the caller's view: objects are looked up
/// along each selected channel's path to the root, most specific first. A
/// pinned channel restricts channelset resolution to that channel alone.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelContext {
    selected: Vec<ChannelId>,
    pinned: Option<ChannelId>,
}

impl Default for ChannelContext {
    fn default() -> Self {
        Self::root()
    }
}

impl ChannelContext {
    /// Select the given channels in priority order. An empty selection
    /// selects the root channel.
    pub fn new(selected: impl IntoIterator<Item = ChannelId>) -> Self {
        let mut channels: Vec<ChannelId> = Vec::new();
        for channel in selected {
            if !channels.contains(&channel) {
                channels.push(channel);
            }
        }
        if channels.is_empty() {
            channels.push(ROOT_CHANNEL);
        }
        Self {
            selected: channels,
            pinned: None,
        }
    }

    /// Only the root channel.
    pub fn root() -> Self {
        Self::new([ROOT_CHANNEL])
    }

    /// Selected channels in priority order.
    pub fn selected(&self) -> &[ChannelId] {
        &self.selected
    }

    /// Channel channelset resolution is pinned to, if any.
    pub fn pinned(&self) -> Option<ChannelId> {
        self.pinned
    }

    /// Whether `channel` is one of the selected channels.
    pub fn is_selected(&self, channel: ChannelId) -> bool {
        self.selected.contains(&channel)
    }

    /// Pin channelset resolution to one channel.
    pub fn pin(mut self, channel: ChannelId) -> Self {
        self.pinned = Some(channel);
        self
    }

    /// A derived context selecting only `channel`. The original context is
    /// left untouched, so the caller's selection is restored by simply
    /// dropping the derived one.
    pub fn scoped(&self, channel: ChannelId) -> Self {
        Self::new([channel])
    }

    /// Channel new objects are written to: the pinned channel, else the
    /// first selected one.
    pub fn write_channel(&self) -> ChannelId {
        self.pinned.unwrap_or(self.selected[0])
    }

    /// Resolve the selection against a channel tree.
    pub fn scope(&self, tree: &ChannelTree) -> DatasourceResult<ChannelScope> {
        let paths = self
            .selected
            .iter()
            .map(|&leaf| tree.channel_path_ids(leaf))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(pinned) = self.pinned {
            tree.find_channel(pinned)?;
        }
        Ok(ChannelScope {
            leaves: self.selected.clone(),
            paths,
            pinned: self.pinned,
        })
    }
}

/// A [`ChannelContext`] resolved to root-to-leaf channel paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelScope {
    leaves: Vec<ChannelId>,
    paths: Vec<Vec<ChannelId>>,
    pinned: Option<ChannelId>,
}

impl ChannelScope {
    /// The selected channels, most important first.
    pub fn leaves(&self) -> &[ChannelId] {
        &self.leaves
    }

    /// Channel channelset resolution is pinned to, if any.
    pub fn pinned(&self) -> Option<ChannelId> {
        self.pinned
    }

    /// Whether `channel` is a selected channel rather than an ancestor.
    pub fn is_leaf(&self, channel: ChannelId) -> bool {
        self.leaves.contains(&channel)
    }

    /// Every channel on any selected path, ascending and de-duplicated.
    pub fn channels(&self) -> Vec<ChannelId> {
        let mut channels: Vec<ChannelId> = self.paths.iter().flatten().copied().collect();
        channels.sort_unstable();
        channels.dedup();
        channels
    }

    /// Channels channelset resolution searches.
    pub fn channelset_channels(&self) -> Vec<ChannelId> {
        match self.pinned {
            Some(pinned) => vec![pinned],
            None => self.channels(),
        }
    }

    /// How specific `channel` is for this scope; lower is better.
    ///
    /// Ranks by selected-leaf order first, then by distance from that leaf
    /// towards the root. `None` for channels outside every path.
    pub fn rank(&self, channel: ChannelId) -> Option<(usize, usize)> {
        self.paths.iter().enumerate().find_map(|(leaf, path)| {
            path.iter()
                .rev()
                .position(|&c| c == channel)
                .map(|distance| (leaf, distance))
        })
    }

    /// The single channel results of this scope can be cached under, if the
    /// scope is narrow enough to have one.
    pub fn cache_channel(&self) -> Option<ChannelId> {
        match (self.pinned, self.leaves.as_slice()) {
            (Some(pinned), _) => Some(pinned),
            (None, [leaf]) => Some(*leaf),
            _ => None,
        }
    }

    /// The channel content id resolutions can be cached under. Content id
    /// lookups ignore the pin outside their channelset fallback, so a pin
    /// on another channel than the single leaf leaves them uncached.
    pub fn content_id_cache_channel(&self) -> Option<ChannelId> {
        match (self.pinned, self.leaves.as_slice()) {
            (None, [leaf]) => Some(*leaf),
            (Some(pinned), [leaf]) if pinned == *leaf => Some(*leaf),
            _ => None,
        }
    }
}
