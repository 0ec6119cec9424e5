use std::sync::Mutex;

/** Mutex-protected boolean shared between the two tasks of one
connection (server reader/writer, client sender/receiver). Either
side may flip it to `false` to initiate joint shutdown; both sides
check it every iteration.
*/
pub struct RunningSignal {
  run: Mutex<bool>,
}

impl RunningSignal {
  pub fn new(initial_state: bool) -> RunningSignal {
    RunningSignal {
      run: Mutex::new(initial_state),
    }
  }

  pub fn set_stop(&self) {
    *self.run.lock().unwrap() = false;
  }

  pub fn is_run(&self) -> bool {
    *self.run.lock().unwrap()
  }
}
