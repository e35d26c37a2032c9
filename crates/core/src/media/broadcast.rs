use parking_lot::{Condvar, Mutex};

use super::Frame;

/// Latest-frame monitor shared by the capture thread and every viewer.
///
/// One producer calls [`publish`](Self::publish); any number of consumers
/// call [`await_next`](Self::await_next), which blocks until the *next*
/// publication after the call began. This is a condition-variable broadcast,
/// not a queue:
///
/// - only the newest frame is held; older ones are dropped as soon as they
///   are superseded, so memory does not grow with slow viewers;
/// - every thread waiting at the moment of a publish wakes up with that
///   publication (or a newer one, if several land before it is scheduled);
/// - a frame published while nobody waits is never handed out later.
///
/// Publishing never blocks on consumers beyond the brief monitor lock.
pub struct FrameBroadcaster {
    state: Mutex<Latest>,
    ready: Condvar,
}

struct Latest {
    frame: Option<Frame>,
    /// Incremented on every publish; waiters compare against the value they
    /// saw on entry.
    generation: u64,
    /// Threads currently parked in `await_next`.
    waiting: usize,
    closed: bool,
    /// The producer died. Sticky until the next device start clears it, so
    /// a waiter arriving after the failure is not parked forever.
    source_lost: bool,
}

impl FrameBroadcaster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Latest {
                frame: None,
                generation: 0,
                waiting: 0,
                closed: false,
                source_lost: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Replace the latest frame and wake every waiter.
    pub fn publish(&self, frame: Frame) {
        let mut state = self.state.lock();
        state.generation = state.generation.wrapping_add(1);
        tracing::trace!(
            generation = state.generation,
            bytes = frame.len(),
            "frame published"
        );
        state.frame = Some(frame);
        self.ready.notify_all();
    }

    /// Block until the next publish, then return that frame.
    ///
    /// Returns `None` once the broadcaster has been [closed](Self::close) or
    /// the producer has been [lost](Self::source_lost). There is no timeout:
    /// a viewer parked here is released by the next frame, a producer
    /// failure or shutdown.
    pub fn await_next(&self) -> Option<Frame> {
        let mut state = self.state.lock();
        let seen = state.generation;
        state.waiting += 1;
        while state.generation == seen && !state.closed && !state.source_lost {
            self.ready.wait(&mut state);
        }
        state.waiting -= 1;
        if state.closed || state.source_lost {
            return None;
        }
        state.frame.clone()
    }

    /// Snapshot of the most recent frame without waiting.
    pub fn latest(&self) -> Option<Frame> {
        self.state.lock().frame.clone()
    }

    /// Total number of frames published so far.
    pub fn published(&self) -> u64 {
        self.state.lock().generation
    }

    /// Number of threads currently blocked in [`await_next`](Self::await_next).
    pub fn waiting(&self) -> usize {
        self.state.lock().waiting
    }

    /// Release every waiter and make future waits return `None`.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.frame = None;
        self.ready.notify_all();
        tracing::debug!("frame broadcaster closed");
    }

    /// The producer stopped unexpectedly: release every waiter and keep
    /// failing waits until [`source_restored`](Self::source_restored).
    pub fn source_lost(&self) {
        let mut state = self.state.lock();
        state.source_lost = true;
        self.ready.notify_all();
        tracing::debug!("frame source lost");
    }

    /// A new producer is starting.
    pub fn source_restored(&self) {
        self.state.lock().source_lost = false;
    }

    pub fn is_source_lost(&self) -> bool {
        self.state.lock().source_lost
    }

    /// Undo [`close`](Self::close) so the broadcaster can be reused.
    pub fn reopen(&self) {
        self.state.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl Default for FrameBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, mpsc};
    use std::thread;
    use std::time::Duration;

    fn wait_for_parked(b: &FrameBroadcaster, n: usize) {
        while b.waiting() < n {
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Spawn a waiter and return once it is parked on the condition variable.
    fn parked_waiter(b: &Arc<FrameBroadcaster>) -> thread::JoinHandle<Option<Frame>> {
        let already = b.waiting();
        let handle = {
            let b = b.clone();
            thread::spawn(move || b.await_next())
        };
        wait_for_parked(b, already + 1);
        handle
    }

    #[test]
    fn waiter_receives_next_publish() {
        let b = Arc::new(FrameBroadcaster::new());
        let waiter = parked_waiter(&b);

        b.publish(Frame::from(vec![0xFF, 0xD8, 1]));
        let got = waiter.join().unwrap().unwrap();
        assert_eq!(got.as_bytes(), &[0xFF, 0xD8, 1]);
    }

    #[test]
    fn two_waiters_share_one_publication() {
        let b = Arc::new(FrameBroadcaster::new());
        let w1 = parked_waiter(&b);
        let w2 = parked_waiter(&b);

        let frame = Frame::from(vec![0xFF, 0xD8, 0xAB]);
        b.publish(frame.clone());

        let f1 = w1.join().unwrap().unwrap();
        let f2 = w2.join().unwrap().unwrap();
        assert!(Frame::ptr_eq(&f1, &frame));
        assert!(Frame::ptr_eq(&f2, &frame));
    }

    #[test]
    fn no_retroactive_delivery() {
        let b = Arc::new(FrameBroadcaster::new());
        b.publish(Frame::from(vec![0xFF, 0xD8, 0x01]));

        let waiter = parked_waiter(&b);
        // The earlier frame must not satisfy the new wait.
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        b.publish(Frame::from(vec![0xFF, 0xD8, 0x02]));
        let got = waiter.join().unwrap().unwrap();
        assert_eq!(got.as_bytes(), &[0xFF, 0xD8, 0x02]);
    }

    #[test]
    fn repeated_wait_does_not_return_same_frame() {
        let b = Arc::new(FrameBroadcaster::new());
        let (tx, rx) = mpsc::channel();
        let consumer = {
            let b = b.clone();
            thread::spawn(move || {
                let first = b.await_next();
                tx.send(()).unwrap();
                let second = b.await_next();
                (first, second)
            })
        };

        wait_for_parked(&b, 1);
        b.publish(Frame::from(vec![1]));
        rx.recv().unwrap();
        // Parked again on the second wait, not satisfied by frame 1.
        wait_for_parked(&b, 1);
        assert!(!consumer.is_finished());

        b.publish(Frame::from(vec![2]));
        let (first, second) = consumer.join().unwrap();
        assert_eq!(first.unwrap().as_bytes(), &[1]);
        assert_eq!(second.unwrap().as_bytes(), &[2]);
    }

    #[test]
    fn close_releases_waiters() {
        let b = Arc::new(FrameBroadcaster::new());
        let waiter = parked_waiter(&b);
        b.close();
        assert!(waiter.join().unwrap().is_none());
        assert!(b.is_closed());
        assert!(b.await_next().is_none());
    }

    #[test]
    fn lost_source_releases_current_and_later_waiters() {
        let b = Arc::new(FrameBroadcaster::new());
        let waiter = parked_waiter(&b);
        b.source_lost();
        assert!(waiter.join().unwrap().is_none());

        // A viewer that arrives after the failure must not park forever.
        assert!(b.is_source_lost());
        assert!(b.await_next().is_none());

        b.source_restored();
        let waiter = parked_waiter(&b);
        b.publish(Frame::from(vec![7]));
        assert_eq!(waiter.join().unwrap().unwrap().as_bytes(), &[7]);
    }

    #[test]
    fn reopen_after_close() {
        let b = Arc::new(FrameBroadcaster::new());
        b.close();
        b.reopen();
        assert!(!b.is_closed());

        let waiter = parked_waiter(&b);
        b.publish(Frame::from(vec![9]));
        assert_eq!(waiter.join().unwrap().unwrap().as_bytes(), &[9]);
    }

    #[test]
    fn latest_and_counter() {
        let b = FrameBroadcaster::new();
        assert!(b.latest().is_none());
        assert_eq!(b.published(), 0);

        b.publish(Frame::from(vec![1]));
        b.publish(Frame::from(vec![2]));
        assert_eq!(b.published(), 2);
        assert_eq!(b.latest().unwrap().as_bytes(), &[2]);
    }
}
