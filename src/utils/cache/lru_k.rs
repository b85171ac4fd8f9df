use std::collections::{HashMap, VecDeque};

use super::Replacer;
use crate::buffer::FrameId;
use crate::error::{CopseError, CopseResult};

#[derive(Debug)]
struct LruKNode {
    // timestamps of the last k accesses, oldest first
    history: VecDeque<u64>,
    is_evictable: bool,
}

impl LruKNode {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            is_evictable: false,
        }
    }

    fn record_access(&mut self, timestamp: u64, k: usize) {
        self.history.push_back(timestamp);
        if self.history.len() > k {
            self.history.pop_front();
        }
    }
}

/// Evicts the evictable frame with the largest backward k-distance. Frames
/// with fewer than k recorded accesses have infinite distance and are
/// preferred, oldest first access winning ties.
#[derive(Debug)]
pub struct LruKReplacer {
    current_size: usize,
    replacer_size: usize,
    k: usize,
    node_store: HashMap<FrameId, LruKNode>,
    current_timestamp: u64,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        Self {
            current_size: 0,
            replacer_size: num_frames,
            k,
            node_store: HashMap::with_capacity(num_frames),
            current_timestamp: 0,
        }
    }
}

impl Replacer for LruKReplacer {
    fn record_access(&mut self, frame_id: FrameId) -> CopseResult<()> {
        if let Some(node) = self.node_store.get_mut(&frame_id) {
            node.record_access(self.current_timestamp, self.k);
        } else {
            if self.node_store.len() >= self.replacer_size {
                return Err(CopseError::Internal(
                    "frame count exceeds the replacer capacity".to_string(),
                ));
            }
            let mut node = LruKNode::new();
            node.record_access(self.current_timestamp, self.k);
            self.node_store.insert(frame_id, node);
        }
        self.current_timestamp += 1;
        Ok(())
    }

    fn evict(&mut self) -> Option<FrameId> {
        let mut victim: Option<(FrameId, u64, u64)> = None;
        for (frame_id, node) in self.node_store.iter() {
            if !node.is_evictable {
                continue;
            }
            let Some(&oldest) = node.history.front() else {
                continue;
            };
            let k_distance = if node.history.len() < self.k {
                u64::MAX
            } else {
                self.current_timestamp - oldest
            };
            let better = match victim {
                None => true,
                Some((_, best_distance, best_oldest)) => {
                    k_distance > best_distance
                        || (k_distance == best_distance && oldest < best_oldest)
                }
            };
            if better {
                victim = Some((*frame_id, k_distance, oldest));
            }
        }
        let frame_id = victim.map(|(frame_id, _, _)| frame_id)?;
        self.remove(frame_id);
        Some(frame_id)
    }

    fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) -> CopseResult<()> {
        let Some(node) = self.node_store.get_mut(&frame_id) else {
            return Err(CopseError::Internal(format!(
                "frame {} not found in replacer",
                frame_id
            )));
        };
        if evictable && !node.is_evictable {
            self.current_size += 1;
        } else if !evictable && node.is_evictable {
            self.current_size -= 1;
        }
        node.is_evictable = evictable;
        Ok(())
    }

    fn remove(&mut self, frame_id: FrameId) {
        if let Some(node) = self.node_store.get(&frame_id) {
            assert!(node.is_evictable, "frame is not evictable");
            self.node_store.remove(&frame_id);
            self.current_size -= 1;
        }
    }

    fn size(&self) -> usize {
        self.current_size
    }
}
