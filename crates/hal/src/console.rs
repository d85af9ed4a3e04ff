// Fault console.
//
// Exception diagnostics leave the core through a single external sink that
// accepts text plus a color pair. A diagnostic line is a handful of colored
// segments; the whole line is emitted under one IRQ-safe lock so lines from
// different cores do not interleave. A fault raised while a line is being
// emitted cannot wait for that lock (its holder will never run again), so it
// gives up after a bounded spin and writes anyway: the nested output lands
// between two segments of the interrupted line and never inside one.

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicUsize, Ordering};
use ks_utils::{Once, RingBuffer};

use crate::IrqSafeLock;

/// Longest formatted segment; longer text is truncated, never allocated.
pub const LINE_CAPACITY: usize = 192;
/// Bytes kept from before a sink was attached.
pub const BACKLOG_CAPACITY: usize = 2048;
const EMIT_SPIN_LIMIT: usize = 1 << 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Color {
    Black,
    Blue,
    Green,
    Cyan,
    Red,
    Magenta,
    Yellow,
    White,
}

/// Where diagnostics end up (serial port, VGA text buffer, framebuffer...).
pub trait ConsoleSink: Send + Sync {
    /// Must not block or fault, and must tolerate re-entry from a nested fault.
    fn write_colored(&self, fg: Color, bg: Color, text: &str);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment<'a> {
    pub fg: Color,
    pub bg: Color,
    pub text: &'a str,
}

impl<'a> Segment<'a> {
    pub const fn plain(text: &'a str) -> Self {
        Self::colored(Color::White, Color::Black, text)
    }

    pub const fn colored(fg: Color, bg: Color, text: &'a str) -> Self {
        Self { fg, bg, text }
    }
}

/// Stack-allocated `fmt::Write` target. Truncates on a char boundary.
pub struct LineBuffer<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> Default for LineBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> LineBuffer<N> {
    pub const fn new() -> Self {
        Self {
            buf: [0; N],
            len: 0,
        }
    }

    pub fn as_str(&self) -> &str {
        // Only whole chars are ever copied in.
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }
}

impl<const N: usize> Write for LineBuffer<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = N - self.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        // Truncation is not an error: a clipped diagnostic beats none.
        Ok(())
    }
}

pub struct Console {
    sink: Once<&'static dyn ConsoleSink>,
    emit: IrqSafeLock<()>,
    backlog: IrqSafeLock<RingBuffer<u8, BACKLOG_CAPACITY>>,
    forced: AtomicUsize,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    pub const fn new() -> Self {
        Self {
            sink: Once::new(),
            emit: IrqSafeLock::new(()),
            backlog: IrqSafeLock::new(RingBuffer::new(0)),
            forced: AtomicUsize::new(0),
        }
    }

    /// Attaches the sink and replays the backlog into it. Only the first
    /// call wins; returns whether this call attached.
    pub fn attach(&self, sink: &'static dyn ConsoleSink) -> bool {
        let mut attached = false;
        self.sink.call_once(|| {
            attached = true;
            sink
        });
        if attached {
            self.replay_backlog(sink);
        }
        attached
    }

    pub fn is_attached(&self) -> bool {
        self.sink.get().is_some()
    }

    /// Lines written without the emit lock because its holder could not be waited for.
    pub fn forced_writes(&self) -> usize {
        self.forced.load(Ordering::Relaxed)
    }

    /// Emits `segments` followed by a newline as one unit.
    pub fn write_line(&self, segments: &[Segment<'_>]) {
        let Some(sink) = self.sink.get() else {
            self.buffer_line(segments);
            return;
        };

        let guard = self.acquire_emit();
        if guard.is_none() {
            self.forced.fetch_add(1, Ordering::Relaxed);
        }
        for segment in segments {
            sink.write_colored(segment.fg, segment.bg, segment.text);
        }
        sink.write_colored(Color::White, Color::Black, "\n");
        drop(guard);
    }

    /// Formats `args` on the stack, then emits it as a single-segment line.
    pub fn write_fmt_line(&self, fg: Color, bg: Color, args: fmt::Arguments<'_>) {
        let mut text = LineBuffer::<LINE_CAPACITY>::new();
        let _ = text.write_fmt(args);
        self.write_line(&[Segment::colored(fg, bg, text.as_str())]);
    }

    fn acquire_emit(&self) -> Option<crate::IrqSafeLockGuard<'_, ()>> {
        for _ in 0..EMIT_SPIN_LIMIT {
            if let Some(guard) = self.emit.try_lock() {
                return Some(guard);
            }
            core::hint::spin_loop();
        }
        None
    }

    fn buffer_line(&self, segments: &[Segment<'_>]) {
        // Dropped rather than waited for: the backlog is best effort.
        let Some(mut backlog) = self.backlog.try_lock() else {
            return;
        };
        let bytes = segments.iter().flat_map(|s| s.text.bytes()).chain(Some(b'\n'));
        for byte in bytes {
            backlog.push_overwrite(if byte.is_ascii() { byte } else { b'?' });
        }
    }

    fn replay_backlog(&self, sink: &dyn ConsoleSink) {
        let mut backlog = self.backlog.lock();
        let mut chunk = [0u8; 64];
        let mut len = 0;
        while let Some(byte) = backlog.pop() {
            chunk[len] = byte;
            len += 1;
            if len == chunk.len() || byte == b'\n' {
                flush_ascii(sink, &chunk[..len]);
                len = 0;
            }
        }
        flush_ascii(sink, &chunk[..len]);
    }
}

fn flush_ascii(sink: &dyn ConsoleSink, bytes: &[u8]) {
    if let Ok(text) = core::str::from_utf8(bytes) {
        if !text.is_empty() {
            sink.write_colored(Color::White, Color::Black, text);
        }
    }
}

/// The kernel's fault console.
pub static CONSOLE: Console = Console::new();

// ============================================================================
// Unit Tests
// ============================================================================
