//! Player action queue between connection tasks and the tick driver
//!
//! Connection tasks push without taking the game lock; `GameLoop::tick`
//! drains everything queued so far before it moves any tank.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::game::state::{TankAction, TankId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputMessage {
    pub tank_id: TankId,
    pub action: TankAction,
}

/// Bounded queue of tank actions. A full queue drops new actions.
pub struct InputBuffer {
    sender: Sender<InputMessage>,
    receiver: Receiver<InputMessage>,
    capacity: usize,
}

impl InputBuffer {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    pub fn sender(&self) -> InputSender {
        InputSender {
            sender: self.sender.clone(),
        }
    }

    /// `false` when the queue is full and the action was dropped
    #[inline]
    pub fn try_submit(&self, tank_id: TankId, action: TankAction) -> bool {
        send(&self.sender, tank_id, action).is_ok()
    }

    /// Everything queued so far, oldest first
    pub fn drain(&self) -> Vec<InputMessage> {
        self.receiver.try_iter().collect()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InputBuffer {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Producer half, held by tasks that never touch the game lock
#[derive(Clone)]
pub struct InputSender {
    sender: Sender<InputMessage>,
}

impl InputSender {
    #[inline]
    pub fn try_send(&self, tank_id: TankId, action: TankAction) -> Result<(), InputBufferError> {
        send(&self.sender, tank_id, action)
    }
}

fn send(sender: &Sender<InputMessage>, tank_id: TankId, action: TankAction) -> Result<(), InputBufferError> {
    sender.try_send(InputMessage { tank_id, action }).map_err(|e| match e {
        TrySendError::Full(_) => InputBufferError::Full,
        TrySendError::Disconnected(_) => InputBufferError::Disconnected,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InputBufferError {
    #[error("action queue full")]
    Full,
    /// The game loop owning the queue is gone
    #[error("action queue closed")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::grid::Direction;

    #[test]
    fn test_input_buffer_submit_and_drain() {
        let buffer = InputBuffer::new(10);

        assert!(buffer.try_submit(1, TankAction::Move(Direction::Up)));
        assert!(buffer.try_submit(1, TankAction::Fire));
        assert!(buffer.try_submit(1, TankAction::Move(Direction::Left)));
        assert_eq!(buffer.pending_count(), 3);

        let inputs = buffer.drain();
        assert_eq!(inputs.len(), 3);
        assert_eq!(inputs[0].action, TankAction::Move(Direction::Up));
        assert_eq!(inputs[1].action, TankAction::Fire);
        assert_eq!(inputs[2].action, TankAction::Move(Direction::Left));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_input_buffer_backpressure() {
        let buffer = InputBuffer::new(2);

        assert!(buffer.try_submit(1, TankAction::Fire));
        assert!(buffer.try_submit(1, TankAction::Fire));
        assert!(!buffer.try_submit(1, TankAction::Fire));

        buffer.drain();
        assert!(buffer.try_submit(1, TankAction::Fire));
    }

    #[test]
    fn test_input_sender_clone() {
        let buffer = InputBuffer::new(1);
        let sender1 = buffer.sender();
        let sender2 = buffer.sender();

        assert!(sender1.try_send(1, TankAction::Fire).is_ok());
        assert_eq!(sender2.try_send(2, TankAction::Fire), Err(InputBufferError::Full));
        assert_eq!(buffer.drain().len(), 1);
    }

    #[test]
    fn test_input_buffer_multiple_tanks_keep_order() {
        let buffer = InputBuffer::new(100);
        buffer.try_submit(1, TankAction::Fire);
        buffer.try_submit(2, TankAction::Fire);
        buffer.try_submit(3, TankAction::Fire);
        buffer.try_submit(1, TankAction::Turn(Direction::Down));

        let ids: Vec<TankId> = buffer.drain().iter().map(|m| m.tank_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 1]);
    }

    #[test]
    fn test_sender_outliving_game_is_closed() {
        let buffer = InputBuffer::new(4);
        let sender = buffer.sender();
        drop(buffer);
        assert_eq!(sender.try_send(1, TankAction::Fire), Err(InputBufferError::Disconnected));
    }

    #[test]
    fn test_input_buffer_default() {
        let buffer = InputBuffer::default();
        assert_eq!(buffer.capacity(), 1000);
    }
}
