use itertools::Itertools;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Mutex;

/// Threads of the debuggee currently stopped, as reported by external adapter events.
#[derive(Debug, Default)]
pub struct ThreadTracker {
    stopped: Mutex<BTreeSet<i64>>,
    known: Mutex<BTreeSet<i64>>,
}

impl ThreadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update state from an external adapter event. Non-event messages are ignored.
    pub fn observe(&self, message: &Value) {
        if message.get("type").and_then(Value::as_str) != Some("event") {
            return;
        }
        let body = message.get("body").unwrap_or(&Value::Null);
        let thread_id = body.get("threadId").and_then(Value::as_i64);
        let flag = |name: &str| body.get(name).and_then(Value::as_bool).unwrap_or(false);

        let (Ok(mut stopped), Ok(mut known)) = (self.stopped.lock(), self.known.lock()) else {
            return;
        };
        match message.get("event").and_then(Value::as_str) {
            Some("stopped") => {
                if let Some(id) = thread_id {
                    known.insert(id);
                    stopped.insert(id);
                }
                if flag("allThreadsStopped") {
                    stopped.extend(known.iter().copied());
                }
            }
            Some("continued") => {
                if flag("allThreadsContinued") {
                    stopped.clear();
                } else if let Some(id) = thread_id {
                    stopped.remove(&id);
                }
            }
            Some("thread") => {
                let Some(id) = thread_id else { return };
                match body.get("reason").and_then(Value::as_str) {
                    Some("started") => {
                        known.insert(id);
                    }
                    Some("exited") => {
                        known.remove(&id);
                        stopped.remove(&id);
                    }
                    _ => {}
                }
            }
            Some("terminated") | Some("exited") => {
                stopped.clear();
                known.clear();
            }
            _ => {}
        }
    }

    pub fn has_stopped(&self) -> bool {
        self.stopped.lock().map(|s| !s.is_empty()).unwrap_or(false)
    }

    pub fn stopped_threads(&self) -> Vec<i64> {
        self.stopped
            .lock()
            .map(|s| s.iter().copied().collect_vec())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut stopped) = self.stopped.lock() {
            stopped.clear();
        }
        if let Ok(mut known) = self.known.lock() {
            known.clear();
        }
    }
}
