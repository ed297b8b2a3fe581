/*
 * Copyright 2017-2023 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::cell::Cell;

use tokio::sync::Notify;

/// A level-triggered event for hand-offs between the connection's tasks.
///
/// `wait` suspends the task until the event is set, and does not clear it;
/// the waiter calls `clear` itself once it has drained whatever the event
/// announced. Setting an already-set event is a no-op. Only tasks on the
/// connection's executor touch this, so a plain `Cell` carries the state.
pub(crate) struct Event {
    flag: Cell<bool>,
    notify: Notify,
}

impl Event {
    pub(crate) fn new() -> Self {
        Event {
            flag: Cell::new(false),
            notify: Notify::new(),
        }
    }

    pub(crate) fn set(&self) {
        if !self.flag.replace(true) {
            self.notify.notify_waiters();
        }
    }

    pub(crate) fn clear(&self) {
        self.flag.set(false);
    }

    pub(crate) async fn wait(&self) {
        while !self.flag.get() {
            let notified = self.notify.notified();
            if self.flag.get() {
                break;
            }
            notified.await;
        }
    }
}
