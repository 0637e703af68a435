//! The submix tree
//!
//! Nodes live in a fixed arena indexed by [`SubmixId`]; parents refer to
//! children by id only. Processing is a post-order walk from the master: each
//! node is taken out of the arena while it runs, so children can be processed
//! through `&mut self` and a malformed topology can never recurse forever.

use basedrop::Owned;

use super::node::{Format, SubmixNode};
use crate::engine::slot::SourceSlot;
use crate::spatial::SpeakerLayout;
use crate::types::{Sample, SlotId, SubmixId};

/// Render-side submix graph owned by the mixer device
pub struct SubmixGraph {
    nodes: Vec<Option<Owned<SubmixNode>>>,
    device: SpeakerLayout,
    yaw: f32,
}

impl SubmixGraph {
    /// Create a graph holding the master node plus room for `max_submixes` more
    pub fn new(mut master: Owned<SubmixNode>, max_submixes: usize, device: SpeakerLayout) -> Self {
        let mut nodes = Vec::with_capacity(max_submixes + 1);
        nodes.resize_with(max_submixes + 1, || None);
        master.configure();
        master.set_parent(None);
        nodes[SubmixId::MASTER.index()] = Some(master);
        Self {
            nodes,
            device,
            yaw: 0.0,
        }
    }

    pub fn node(&self, id: SubmixId) -> Option<&SubmixNode> {
        self.nodes.get(id.index()).and_then(|n| n.as_deref())
    }

    fn node_mut(&mut self, id: SubmixId) -> Option<&mut SubmixNode> {
        self.nodes.get_mut(id.index()).and_then(|n| n.as_deref_mut())
    }

    #[inline]
    pub fn device_layout(&self) -> &SpeakerLayout {
        &self.device
    }

    // ─────────────────────────────────────────────────────────────
    // Topology
    // ─────────────────────────────────────────────────────────────

    /// Insert a node under its parent (the master if the parent is missing)
    pub fn add(&mut self, mut node: Owned<SubmixNode>) {
        let id = node.id();
        if id.is_master() || id.index() >= self.nodes.len() {
            return;
        }
        let parent = node
            .parent()
            .filter(|p| self.node(*p).is_some())
            .unwrap_or(SubmixId::MASTER);
        node.set_parent(Some(parent));
        node.configure();
        self.nodes[id.index()] = Some(node);
        if let Some(parent) = self.node_mut(parent) {
            parent.add_child(id);
        }
    }

    /// Remove a node; its children move to its parent
    ///
    /// The node's memory goes to the collector when the `Owned` drops.
    pub fn remove(&mut self, id: SubmixId) {
        if id.is_master() {
            return;
        }
        let Some(mut node) = self.nodes.get_mut(id.index()).and_then(Option::take) else {
            return;
        };
        let parent = node.parent().unwrap_or(SubmixId::MASTER);
        if let Some(parent_node) = self.node_mut(parent) {
            parent_node.remove_child(id);
        }
        for i in 0..node.children().len() {
            let child = node.children()[i];
            if let Some(child_node) = self.node_mut(child) {
                child_node.set_parent(Some(parent));
            }
            if let Some(parent_node) = self.node_mut(parent) {
                parent_node.add_child(child);
            }
        }
        node.tear_down();
    }

    /// Move a node under a new parent; the control side has ruled out cycles
    pub fn set_parent(&mut self, id: SubmixId, parent: SubmixId) {
        if id.is_master() || id == parent || self.node(parent).is_none() {
            return;
        }
        let Some(old_parent) = self.node(id).map(|n| n.parent()) else {
            return;
        };
        if let Some(old) = old_parent.and_then(|p| self.node_mut(p)) {
            old.remove_child(id);
        }
        if let Some(node) = self.node_mut(id) {
            node.set_parent(Some(parent));
        }
        if let Some(parent_node) = self.node_mut(parent) {
            parent_node.add_child(id);
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Routing
    // ─────────────────────────────────────────────────────────────

    pub fn set_send(&mut self, slot: SlotId, submix: SubmixId, level: f32) {
        if let Some(node) = self.node_mut(submix) {
            node.set_send(slot, level);
        }
    }

    /// Drop every route of a slot
    pub fn clear_sends(&mut self, slot: SlotId) {
        for node in self.nodes.iter_mut().flatten() {
            node.remove_source(slot);
        }
    }

    pub fn set_effect_param(&mut self, submix: SubmixId, effect: usize, param: usize, value: f32) {
        if let Some(node) = self.node_mut(submix) {
            node.effects_mut().set_param(effect, param, value);
        }
    }

    pub fn set_effect_bypass(&mut self, submix: SubmixId, effect: usize, bypass: bool) {
        if let Some(node) = self.node_mut(submix) {
            node.effects_mut().set_bypass(effect, bypass);
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Device
    // ─────────────────────────────────────────────────────────────

    /// The output device changed channel count; device-layout nodes follow
    /// on their next block
    pub fn set_device_layout(&mut self, layout: SpeakerLayout) {
        self.device = layout;
    }

    /// Listener yaw in degrees clockwise, applied when decoding ambisonics
    pub fn set_listener_yaw(&mut self, yaw: f32) {
        self.yaw = yaw;
    }

    // ─────────────────────────────────────────────────────────────
    // Processing
    // ─────────────────────────────────────────────────────────────

    /// Mix one block and return the master output in device channels
    pub fn process(&mut self, slots: &[SourceSlot], frames: usize) -> &[Sample] {
        let target = Format::Speakers(self.device.channels());
        self.process_node(SubmixId::MASTER, target, slots, frames);
        match self.node(SubmixId::MASTER) {
            Some(master) => master.output(),
            None => &[],
        }
    }

    fn process_node(&mut self, id: SubmixId, target: Format, slots: &[SourceSlot], frames: usize) {
        let Some(mut node) = self.nodes.get_mut(id.index()).and_then(Option::take) else {
            return;
        };

        node.begin_block(frames, self.device.channels());
        let format = node.format();

        for i in 0..node.children().len() {
            let child = node.children()[i];
            self.process_node(child, format, slots, frames);
            if let Some(child_node) = self.node(child) {
                node.mix_child(child_node.output());
            }
        }

        node.mix_sources(slots, &self.device, frames);
        node.process_effects(frames);
        node.finish_block(target, self.yaw, frames);

        self.nodes[id.index()] = Some(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::SubmixEffectChain;
    use crate::submix::node::{ChannelLayout, SubmixState};
    use basedrop::Collector;

    fn make_node(
        collector: &Collector,
        id: usize,
        layout: ChannelLayout,
        parent: Option<usize>,
    ) -> Owned<SubmixNode> {
        let node = SubmixNode::new(
            SubmixId(id),
            layout,
            parent.map(SubmixId),
            SubmixEffectChain::default(),
            48000,
            2,
            64,
            4,
            8,
        )
        .unwrap();
        Owned::new(&collector.handle(), node)
    }

    fn graph(collector: &Collector) -> SubmixGraph {
        let master = make_node(collector, 0, ChannelLayout::Device, None);
        SubmixGraph::new(master, 4, SpeakerLayout::new(2).unwrap())
    }

    #[test]
    fn test_silent_graph_output_length() {
        let collector = Collector::new();
        let mut graph = graph(&collector);
        graph.add(make_node(&collector, 1, ChannelLayout::Fixed(6), Some(0)));
        graph.add(make_node(&collector, 2, ChannelLayout::Ambisonics, Some(1)));

        let out = graph.process(&[], 48);
        assert_eq!(out.len(), 48 * 2);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(graph.node(SubmixId(2)).unwrap().state(), SubmixState::Active);
    }

    #[test]
    fn test_add_attaches_to_parent() {
        let collector = Collector::new();
        let mut graph = graph(&collector);
        graph.add(make_node(&collector, 1, ChannelLayout::Device, Some(0)));
        graph.add(make_node(&collector, 2, ChannelLayout::Device, Some(1)));
        // Unknown parent falls back to the master
        graph.add(make_node(&collector, 3, ChannelLayout::Device, Some(4)));

        assert_eq!(graph.node(SubmixId::MASTER).unwrap().children(), &[SubmixId(1), SubmixId(3)]);
        assert_eq!(graph.node(SubmixId(1)).unwrap().children(), &[SubmixId(2)]);
        assert_eq!(graph.node(SubmixId(3)).unwrap().parent(), Some(SubmixId::MASTER));
    }

    #[test]
    fn test_remove_reparents_children() {
        let collector = Collector::new();
        let mut graph = graph(&collector);
        graph.add(make_node(&collector, 1, ChannelLayout::Device, Some(0)));
        graph.add(make_node(&collector, 2, ChannelLayout::Device, Some(1)));
        graph.set_send(SlotId(0), SubmixId(1), 1.0);

        graph.remove(SubmixId(1));
        assert!(graph.node(SubmixId(1)).is_none());
        assert_eq!(graph.node(SubmixId(2)).unwrap().parent(), Some(SubmixId::MASTER));
        assert_eq!(graph.node(SubmixId::MASTER).unwrap().children(), &[SubmixId(2)]);

        graph.remove(SubmixId::MASTER);
        assert!(graph.node(SubmixId::MASTER).is_some());
    }

    #[test]
    fn test_set_parent_moves_node() {
        let collector = Collector::new();
        let mut graph = graph(&collector);
        graph.add(make_node(&collector, 1, ChannelLayout::Device, Some(0)));
        graph.add(make_node(&collector, 2, ChannelLayout::Device, Some(0)));

        graph.set_parent(SubmixId(2), SubmixId(1));
        assert_eq!(graph.node(SubmixId::MASTER).unwrap().children(), &[SubmixId(1)]);
        assert_eq!(graph.node(SubmixId(1)).unwrap().children(), &[SubmixId(2)]);
        assert_eq!(graph.node(SubmixId(2)).unwrap().parent(), Some(SubmixId(1)));
    }

    #[test]
    fn test_clear_sends_everywhere() {
        let collector = Collector::new();
        let mut graph = graph(&collector);
        graph.add(make_node(&collector, 1, ChannelLayout::Device, Some(0)));
        graph.set_send(SlotId(3), SubmixId::MASTER, 1.0);
        graph.set_send(SlotId(3), SubmixId(1), 0.5);
        graph.set_send(SlotId(2), SubmixId(1), 0.5);

        graph.clear_sends(SlotId(3));
        assert!(graph.node(SubmixId::MASTER).unwrap().sources().is_empty());
        assert_eq!(graph.node(SubmixId(1)).unwrap().sources(), &[(SlotId(2), 0.5)]);
    }

    #[test]
    fn test_device_change_resizes_master() {
        let collector = Collector::new();
        let mut graph = graph(&collector);
        graph.set_device_layout(SpeakerLayout::new(6).unwrap());
        assert_eq!(graph.process(&[], 16).len(), 16 * 6);
    }
}
