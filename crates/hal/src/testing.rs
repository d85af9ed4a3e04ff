//! Host-test fixtures shared by the unit tests.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::console::{CONSOLE, Color, ConsoleSink};

/// Sink that records every write with its colors.
pub struct RecordingSink {
    writes: Mutex<Vec<(Color, Color, String)>>,
}

impl RecordingSink {
    pub const fn new() -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn writes(&self) -> Vec<(Color, Color, String)> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn text(&self) -> String {
        self.writes().into_iter().map(|(_, _, text)| text).collect()
    }

    pub fn lines(&self) -> Vec<String> {
        self.text().lines().map(str::to_owned).collect()
    }

    pub fn clear(&self) {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl ConsoleSink for RecordingSink {
    fn write_colored(&self, fg: Color, bg: Color, text: &str) {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((fg, bg, text.to_owned()));
    }
}

static GLOBAL_SINK: RecordingSink = RecordingSink::new();
static GLOBAL_CONSOLE_LOCK: Mutex<()> = Mutex::new(());

/// Exclusive, freshly cleared view of what reaches the global [`CONSOLE`].
pub struct ConsoleCapture {
    _serial: MutexGuard<'static, ()>,
}

impl ConsoleCapture {
    pub fn writes(&self) -> Vec<(Color, Color, String)> {
        GLOBAL_SINK.writes()
    }

    pub fn lines(&self) -> Vec<String> {
        GLOBAL_SINK.lines()
    }
}

pub fn capture_console() -> ConsoleCapture {
    let serial = GLOBAL_CONSOLE_LOCK
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    CONSOLE.attach(&GLOBAL_SINK);
    GLOBAL_SINK.clear();
    ConsoleCapture { _serial: serial }
}
