use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Same-thread FIFO connecting producers (drivers, completion handlers) to a
/// consumer that drains it from the dispatch loop. No locking: everything runs
/// on the one firmware thread.
#[derive(Debug)]
pub struct EventQueue<T> {
    inner: Rc<RefCell<VecDeque<T>>>,
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(VecDeque::new())),
        }
    }

    pub fn sender(&self) -> EventSender<T> {
        EventSender {
            inner: Rc::clone(&self.inner),
        }
    }

    pub fn pop(&self) -> Option<T> {
        self.inner.borrow_mut().pop_front()
    }

    pub fn drain(&self) -> Vec<T> {
        self.inner.borrow_mut().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct EventSender<T> {
    inner: Rc<RefCell<VecDeque<T>>>,
}

impl<T> EventSender<T> {
    pub fn send(&self, event: T) {
        self.inner.borrow_mut().push_back(event);
    }
}

impl<T> Clone for EventSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn senders_feed_one_queue_in_order() {
        let queue = EventQueue::new();
        let a = queue.sender();
        let b = a.clone();
        a.send(1u32);
        b.send(2);
        a.send(3);
        assert_eq!(queue.drain(), vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_returns_events_front_first() {
        let queue = EventQueue::new();
        queue.sender().send("x");
        queue.sender().send("y");
        assert_eq!(queue.pop(), Some("x"));
        assert_eq!(queue.pop(), Some("y"));
        assert_eq!(queue.pop(), None);
    }
}
