use std::sync::{Condvar, Mutex};

use common::proto::Status;

/** Per-user queue of outgoing [`Status`] objects.

A monitor in the classic sense: one mutex, one condition variable.
The writer task of the owning connection blocks in [`pop_all`] until
the dispatcher pushes something or the user is disconnected.
Insertion order is delivery order.

The push-versus-disconnect race resolves in favour of delivery:
anything pushed before the latch fires is returned by the next pop,
and only a pop that finds the queue empty returns the disconnect
sentinel (`None`).

[`pop_all`]: Mailbox::pop_all
*/
pub struct Mailbox {
  state: Mutex<MailboxState>,
  has_msg: Condvar,
}

struct MailboxState {
  queue: Vec<Status>,
  disconnected: bool,
}

impl Mailbox {
  pub fn new() -> Mailbox {
    Mailbox {
      state: Mutex::new(MailboxState {
        queue: Vec::new(),
        disconnected: false,
      }),
      has_msg: Condvar::new(),
    }
  }

  pub fn push(&self, status: Status) {
    let mut state = self.state.lock().unwrap();
    state.queue.push(status);
    self.has_msg.notify_one();
  }

  /** Block until the queue is non-empty or the disconnect latch is
  set, then drain the whole queue in FIFO order. `None` is the
  disconnect sentinel.
  */
  pub fn pop_all(&self) -> Option<Vec<Status>> {
    let mut state = self.state.lock().unwrap();
    while state.queue.is_empty() && !state.disconnected {
      state = self.has_msg.wait(state).unwrap();
    }
    if state.queue.is_empty() {
      None
    } else {
      Some(std::mem::take(&mut state.queue))
    }
  }

  /// Set the disconnect latch and wake the blocked consumer.
  pub fn release_on_disconnect(&self) {
    let mut state = self.state.lock().unwrap();
    state.disconnected = true;
    self.has_msg.notify_one();
  }

  #[cfg(test)]
  pub fn drain_now(&self) -> Vec<Status> {
    std::mem::take(&mut self.state.lock().unwrap().queue)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use common::proto::code;
  use std::sync::Arc;
  use std::thread;
  use std::time::Duration;

  #[test]
  fn pop_drains_in_fifo_order() {
    let mailbox = Mailbox::new();
    mailbox.push(Status::base(code::SUCCESS, "first"));
    mailbox.push(Status::base(code::SUCCESS, "second"));
    let batch = mailbox.pop_all().unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0], Status::base(code::SUCCESS, "first"));
    assert_eq!(batch[1], Status::base(code::SUCCESS, "second"));
    assert!(mailbox.drain_now().is_empty());
  }

  #[test]
  fn pop_blocks_until_a_push_arrives() {
    let mailbox = Arc::new(Mailbox::new());
    let popper = {
      let mailbox = Arc::clone(&mailbox);
      thread::spawn(move || mailbox.pop_all())
    };
    thread::sleep(Duration::from_millis(50));
    mailbox.push(Status::base(code::SUCCESS, "wake up"));
    let batch = popper.join().unwrap().unwrap();
    assert_eq!(batch.len(), 1);
  }

  #[test]
  fn latch_unblocks_with_the_sentinel() {
    let mailbox = Arc::new(Mailbox::new());
    let popper = {
      let mailbox = Arc::clone(&mailbox);
      thread::spawn(move || mailbox.pop_all())
    };
    thread::sleep(Duration::from_millis(50));
    mailbox.release_on_disconnect();
    assert_eq!(popper.join().unwrap(), None);
  }

  #[test]
  fn items_pushed_before_the_latch_are_still_delivered() {
    let mailbox = Mailbox::new();
    mailbox.push(Status::base(code::SUCCESS, "queued first"));
    mailbox.release_on_disconnect();
    let batch = mailbox.pop_all().unwrap();
    assert_eq!(batch.len(), 1);
    // Next pop finds the queue empty and reports the disconnect.
    assert_eq!(mailbox.pop_all(), None);
  }
}
