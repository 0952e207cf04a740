//! Per-priority hook
//!
//! Observers are called synchronously by the scheduler right after a level's
//! achieved constraints have been recorded, in ascending priority order.

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;

/// Snapshot of one solved priority level
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelSnapshot {
    pub priority: i32,
    pub objective_value: f64,
    /// Sum of the level's goal violations scaled by their nominals
    pub achieved_objective: f64,
    pub variables: IndexMap<String, Vec<f64>>,
}

pub trait PriorityObserver: Send + Sync {
    fn priority_completed(&self, snapshot: &LevelSnapshot);
}

/// Keeps every level's snapshot for later export
#[derive(Debug, Default)]
pub struct SnapshotRecorder {
    snapshots: Mutex<Vec<LevelSnapshot>>,
}

impl SnapshotRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<LevelSnapshot> {
        self.snapshots.lock().clone()
    }

    pub fn latest(&self) -> Option<LevelSnapshot> {
        self.snapshots.lock().last().cloned()
    }

    pub fn clear(&self) {
        self.snapshots.lock().clear();
    }
}

impl PriorityObserver for SnapshotRecorder {
    fn priority_completed(&self, snapshot: &LevelSnapshot) {
        self.snapshots.lock().push(snapshot.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(priority: i32) -> LevelSnapshot {
        let mut variables = IndexMap::new();
        variables.insert("level".to_string(), vec![11.0, 12.0]);
        LevelSnapshot {
            priority,
            objective_value: 0.0,
            achieved_objective: 0.0,
            variables,
        }
    }

    #[test]
    fn test_recorder_keeps_order() {
        let recorder = SnapshotRecorder::new();
        recorder.priority_completed(&snapshot(1));
        recorder.priority_completed(&snapshot(5));

        let priorities: Vec<i32> = recorder.snapshots().iter().map(|s| s.priority).collect();
        assert_eq!(priorities, vec![1, 5]);
        assert_eq!(recorder.latest().map(|s| s.priority), Some(5));

        recorder.clear();
        assert!(recorder.latest().is_none());
    }
}
