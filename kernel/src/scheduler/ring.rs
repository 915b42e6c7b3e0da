//! The ring-walk algorithm itself, factored out from [`super::Process`] so it
//! can run against a plain arena in tests instead of real kernel stacks and
//! page tables (§4.9, §8 scenario F).

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Running,
    Dead,
}

/// What the walker needs from a ring member: its state and which slot it
/// points to next. Nothing about what the slot actually runs.
pub trait RingNode {
    fn state(&self) -> ProcessState;
    fn set_state(&mut self, state: ProcessState);
    fn next(&self) -> SlotId;
    fn set_next(&mut self, next: SlotId);
}

/// Borrowed view over an arena of ring nodes addressed by `SlotId`. A freed
/// slot is `None`; a live one is always `Some`.
pub struct RingCore<'a, T: RingNode> {
    slots: &'a mut [Option<T>],
}

impl<'a, T: RingNode> RingCore<'a, T> {
    pub fn new(slots: &'a mut [Option<T>]) -> Self {
        RingCore { slots }
    }

    fn state_of(&self, slot: SlotId) -> ProcessState {
        self.slots[slot.0 as usize].as_ref().unwrap().state()
    }

    fn next_of(&self, slot: SlotId) -> SlotId {
        self.slots[slot.0 as usize].as_ref().unwrap().next()
    }

    fn relink(&mut self, slot: SlotId, next: SlotId) {
        self.slots[slot.0 as usize].as_mut().unwrap().set_next(next);
    }

    /// Walks forward from `current`, unlinking and reaping (via `on_reap`)
    /// every `Dead` node it passes over, and returns the first `Ready` slot
    /// found. If the walk comes all the way back around to `current` without
    /// finding one, `current` keeps running — a ring of one (or a ring where
    /// everyone else has died) never starves.
    pub fn advance_with(&mut self, current: SlotId, mut on_reap: impl FnMut(SlotId, T)) -> SlotId {
        let mut previous = current;
        let mut probe = self.next_of(current);

        while probe.0 != current.0 {
            match self.state_of(probe) {
                ProcessState::Dead => {
                    let after = self.next_of(probe);
                    self.relink(previous, after);
                    let node = self.slots[probe.0 as usize].take().unwrap();
                    on_reap(probe, node);
                    probe = after;
                }
                ProcessState::Ready => return probe,
                ProcessState::Running => {
                    previous = probe;
                    probe = self.next_of(probe);
                }
            }
        }

        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Node {
        state: ProcessState,
        next: SlotId,
    }

    impl RingNode for Node {
        fn state(&self) -> ProcessState {
            self.state
        }
        fn set_state(&mut self, state: ProcessState) {
            self.state = state;
        }
        fn next(&self) -> SlotId {
            self.next
        }
        fn set_next(&mut self, next: SlotId) {
            self.next = next;
        }
    }

    fn node(state: ProcessState, next: u32) -> Option<Node> {
        Some(Node { state, next: SlotId(next) })
    }

    #[test]
    fn advances_to_first_ready_after_current() {
        // 0 (running, current) -> 1 (ready) -> 2 (ready) -> 0
        let mut slots = [node(ProcessState::Running, 1), node(ProcessState::Ready, 2), node(ProcessState::Ready, 0)];
        let mut ring = RingCore::new(&mut slots);
        let next = ring.advance_with(SlotId(0), |_, _| panic!("nothing should be reaped"));
        assert_eq!(next, SlotId(1));
    }

    #[test]
    fn skips_and_reaps_dead_nodes() {
        // 0 (running, current) -> 1 (dead) -> 2 (dead) -> 3 (ready) -> 0
        let mut slots = [
            node(ProcessState::Running, 1),
            node(ProcessState::Dead, 2),
            node(ProcessState::Dead, 3),
            node(ProcessState::Ready, 0),
        ];
        let mut ring = RingCore::new(&mut slots);
        let mut reaped = alloc::vec::Vec::new();
        let next = ring.advance_with(SlotId(0), |id, _| reaped.push(id));
        assert_eq!(next, SlotId(3));
        assert_eq!(reaped, alloc::vec![SlotId(1), SlotId(2)]);
        // 0 now points straight to 3, the dead slots are gone.
        assert_eq!(slots[0].as_ref().unwrap().next, SlotId(3));
        assert!(slots[1].is_none());
        assert!(slots[2].is_none());
    }

    #[test]
    fn self_loop_when_all_others_dead() {
        // 0 (running, current) -> 1 (dead) -> 0
        let mut slots = [node(ProcessState::Running, 1), node(ProcessState::Dead, 0)];
        let mut ring = RingCore::new(&mut slots);
        let mut reaped = alloc::vec::Vec::new();
        let next = ring.advance_with(SlotId(0), |id, _| reaped.push(id));
        assert_eq!(next, SlotId(0));
        assert_eq!(reaped, alloc::vec![SlotId(1)]);
        assert_eq!(slots[0].as_ref().unwrap().next, SlotId(0));
    }
}
