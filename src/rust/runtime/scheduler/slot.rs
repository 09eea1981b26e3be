// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::task::TaskId;

//======================================================================================================================
// Structures
//======================================================================================================================

/// The logical execution lanes of the cooperative scheduler. A slot runs at most one task at a time.
pub struct SlotTable {
    slots: Vec<Option<TaskId>>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SlotTable {
    pub fn new(count: usize) -> Self {
        Self {
            slots: vec![None; count],
        }
    }

    /// Lowest-numbered free slot.
    pub fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// Whether no slot is running anything.
    pub fn is_idle(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Puts `task_id` on `slot`. Two tasks on one slot is a scheduler bug.
    pub fn occupy(&mut self, slot: usize, task_id: TaskId) {
        if let Some(running) = self.slots[slot] {
            panic!(
                "slot {} already runs {:?}, cannot also run {:?}",
                slot, running, task_id
            );
        }
        self.slots[slot] = Some(task_id);
    }

    /// Takes `task_id` off `slot`. The slot must be running exactly that task.
    pub fn release(&mut self, slot: usize, task_id: TaskId) {
        assert_eq!(
            self.slots[slot],
            Some(task_id),
            "slot {} released by a task that does not run there",
            slot
        );
        self.slots[slot] = None;
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
