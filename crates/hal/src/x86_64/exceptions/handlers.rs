//! Exception handlers and the common dispatcher.
//!
//! Handlers write straight to the fault console. They never allocate,
//! never go through `log` and never wait on a lock the faulting context
//! might hold; the console itself bounds its emit lock.

use core::fmt::{self, Write};

use super::decode::{PageFaultErrorCode, SelectorErrorCode};
use super::snapshot::RegisterSnapshot;
use super::vectors::{ExceptionVector, Severity, VectorSlot, slot};
use crate::console::{CONSOLE, Color, Console, LINE_CAPACITY, LineBuffer, Segment};
use crate::x86_64::cpu::{halt, read_cr2};

/// Signature shared by every handler: the catalogue entry that routed
/// here, the saved state, and the error code if the vector has one.
pub type DivergingHandler = fn(&ExceptionVector, &RegisterSnapshot, Option<u64>) -> !;
pub type ReturningHandler = fn(&ExceptionVector, &RegisterSnapshot, Option<u64>);

/// A handler's contract, visible in its type.
#[derive(Clone, Copy)]
pub enum ExceptionHandler {
    /// Never returns to the interrupted context.
    Diverging(DivergingHandler),
    /// Returns, so the entry stub resumes the faulting instruction.
    Returning(ReturningHandler),
}

impl ExceptionHandler {
    pub const fn disposition(&self) -> Disposition {
        match self {
            Self::Diverging(_) => Disposition::Halt,
            Self::Returning(_) => Disposition::Return,
        }
    }
}

impl fmt::Debug for ExceptionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Diverging(handler) => write!(f, "Diverging({:#x})", *handler as usize),
            Self::Returning(handler) => write!(f, "Returning({:#x})", *handler as usize),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    Halt,
    Return,
}

/// Called by the common entry stub with the saved register snapshot.
pub extern "C" fn dispatch(snapshot: &RegisterSnapshot) {
    dispatch_snapshot(snapshot);
}

/// Routes `snapshot` to the handler of its vector. Returns only if that
/// handler returns.
pub fn dispatch_snapshot(snapshot: &RegisterSnapshot) {
    let Ok(number) = u8::try_from(snapshot.vector) else {
        unexpected(snapshot);
    };
    let VectorSlot::Defined(vector) = slot(number) else {
        unexpected(snapshot);
    };
    let error_code = vector.error_code.then_some(snapshot.error_code);
    match vector.handler {
        ExceptionHandler::Diverging(handler) => handler(&vector, snapshot, error_code),
        ExceptionHandler::Returning(handler) => handler(&vector, snapshot, error_code),
    }
}

/// Default handler: report, then halt.
pub fn fatal(vector: &ExceptionVector, snapshot: &RegisterSnapshot, error_code: Option<u64>) -> ! {
    report(&CONSOLE, vector, snapshot, error_code, None);
    halt()
}

/// #TS: report plus the decoded selector error code.
pub fn invalid_tss(
    vector: &ExceptionVector,
    snapshot: &RegisterSnapshot,
    error_code: Option<u64>,
) -> ! {
    report(&CONSOLE, vector, snapshot, error_code, None);
    report_selector(&CONSOLE, SelectorErrorCode::new(error_code.unwrap_or(0)));
    halt()
}

/// #GP: report and return to the interrupted context.
///
/// Unlike every other handler this one does not halt. Whether resuming
/// here is wanted depends on a fault-recovery policy that does not exist
/// yet, so the behavior is kept as is rather than folded into [`fatal`].
pub fn general_protection(
    vector: &ExceptionVector,
    snapshot: &RegisterSnapshot,
    error_code: Option<u64>,
) {
    report(&CONSOLE, vector, snapshot, error_code, None);
}

/// #PF: report with the faulting address plus the decoded error code.
pub fn page_fault(
    vector: &ExceptionVector,
    snapshot: &RegisterSnapshot,
    error_code: Option<u64>,
) -> ! {
    // CR2 first: any fault below would overwrite it.
    let fault_address = read_cr2();
    report(&CONSOLE, vector, snapshot, error_code, Some(fault_address));
    report_page_fault(&CONSOLE, PageFaultErrorCode::new(error_code.unwrap_or(0)));
    halt()
}

/// A vector with no catalogue entry reached the dispatcher.
pub fn unexpected(snapshot: &RegisterSnapshot) -> ! {
    report_unexpected(&CONSOLE, snapshot);
    halt()
}

/// Writes the one-line diagnostic for `vector`:
///
/// ```text
/// [ ERROR ] #PF page_fault(14), Error Code: 0x..., RSP: 0x..., RIP: 0x..., CR2: 0x...
/// ```
///
/// `Error Code` is left out for vectors without one, `CR2` unless given.
pub fn report(
    console: &Console,
    vector: &ExceptionVector,
    snapshot: &RegisterSnapshot,
    error_code: Option<u64>,
    fault_address: Option<u64>,
) {
    let mut detail = LineBuffer::<LINE_CAPACITY>::new();
    let _ = write!(
        detail,
        " ] {} {}({})",
        vector.mnemonic, vector.name, vector.number
    );
    write_frame(&mut detail, snapshot, error_code);
    if let Some(address) = fault_address {
        let _ = write!(detail, ", CR2: {address:#018x}");
    }
    write_tagged(console, vector.severity, detail.as_str());
}

fn report_unexpected(console: &Console, snapshot: &RegisterSnapshot) {
    let mut detail = LineBuffer::<LINE_CAPACITY>::new();
    let _ = write!(detail, " ] unexpected vector({})", snapshot.vector);
    write_frame(&mut detail, snapshot, Some(snapshot.error_code));
    write_tagged(console, Severity::Terminate, detail.as_str());
}

fn write_frame(
    detail: &mut LineBuffer<LINE_CAPACITY>,
    snapshot: &RegisterSnapshot,
    error_code: Option<u64>,
) {
    if let Some(code) = error_code {
        let _ = write!(detail, ", Error Code: {code:#018x}");
    }
    let _ = write!(
        detail,
        ", RSP: {:#018x}, RIP: {:#018x}",
        snapshot.stack_pointer(),
        snapshot.instruction_pointer()
    );
}

fn write_tagged(console: &Console, severity: Severity, detail: &str) {
    console.write_line(&[
        Segment::plain("[ "),
        Segment::colored(severity.color(), Color::Black, severity.label()),
        Segment::plain(detail),
    ]);
}

fn information(console: &Console) {
    console.write_line(&[Segment::colored(Color::Yellow, Color::Black, "Information:")]);
}

pub fn report_selector(console: &Console, code: SelectorErrorCode) {
    information(console);
    for cause in code.causes() {
        console.write_line(&[Segment::plain(cause)]);
    }
    console.write_fmt_line(
        Color::White,
        Color::Black,
        format_args!("Segment Selector Index: {:#x}", code.selector_index()),
    );
}

pub fn report_page_fault(console: &Console, code: PageFaultErrorCode) {
    information(console);
    for cause in code.causes() {
        console.write_line(&[Segment::plain(cause)]);
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::testing::{self, RecordingSink};
    use crate::x86_64::cpu::control::{HALT_MESSAGE, set_cr2};

    const RIP: u64 = 0xFFFF_FFFF_8010_2030;
    const RSP: u64 = 0xFFFF_FFFF_8020_0FF0;

    fn vector(number: u8) -> ExceptionVector {
        match slot(number) {
            VectorSlot::Defined(vector) => vector,
            other => panic!("vector {number} is not defined: {other:?}"),
        }
    }

    fn leaked_console() -> (&'static Console, &'static RecordingSink) {
        let console: &'static Console = Box::leak(Box::new(Console::new()));
        let sink: &'static RecordingSink = Box::leak(Box::new(RecordingSink::new()));
        assert!(console.attach(sink));
        (console, sink)
    }

    /// Runs `f`, which must halt, and returns whether it did.
    fn halts(f: impl FnOnce()) -> bool {
        let payload = match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(()) => return false,
            Err(payload) => payload,
        };
        let message = payload
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| payload.downcast_ref::<&str>().copied());
        message == Some(HALT_MESSAGE)
    }

    #[test]
    fn test_report_line_format() {
        let (console, sink) = leaked_console();
        let snapshot = RegisterSnapshot::new(13, 0x18, RIP, RSP);

        report(console, &vector(13), &snapshot, Some(0x18), None);

        let writes = sink.writes();
        assert_eq!(writes[0], (Color::White, Color::Black, "[ ".to_string()));
        assert_eq!(writes[1], (Color::Red, Color::Black, "ERROR".to_string()));
        assert_eq!(
            sink.text(),
            "[ ERROR ] #GP general_protection(13), Error Code: 0x0000000000000018, \
             RSP: 0xffffffff80200ff0, RIP: 0xffffffff80102030\n"
        );
    }

    #[test]
    fn test_report_without_error_code() {
        let (console, sink) = leaked_console();
        let snapshot = RegisterSnapshot::new(3, 0, RIP, RSP);

        report(console, &vector(3), &snapshot, None, None);

        assert_eq!(sink.writes()[1], (Color::Yellow, Color::Black, "TRAP".to_string()));
        assert_eq!(
            sink.text(),
            "[ TRAP ] #BP int3(3), RSP: 0xffffffff80200ff0, RIP: 0xffffffff80102030\n"
        );
    }

    #[test]
    fn test_report_with_fault_address() {
        let (console, sink) = leaked_console();
        let snapshot = RegisterSnapshot::new(14, 0x2, RIP, RSP);

        report(console, &vector(14), &snapshot, Some(0x2), Some(0xDEAD_B000));

        assert!(sink.text().ends_with(", CR2: 0x00000000deadb000\n"));
    }

    #[test]
    fn test_selector_report() {
        let (console, sink) = leaked_console();
        report_selector(console, SelectorErrorCode::new(0x15));

        assert_eq!(sink.writes()[0], (Color::Yellow, Color::Black, "Information:".to_string()));
        assert_eq!(
            sink.lines(),
            [
                "Information:",
                "The exception occurred during delivery of an event external to the program.",
                "Refers to a descriptor in the current LDT.",
                "Segment Selector Index: 0x10",
            ]
        );
    }

    #[test]
    fn test_fatal_reports_then_halts() {
        let capture = testing::capture_console();
        let de = vector(0);
        let snapshot = RegisterSnapshot::new(0, 0, RIP, RSP);

        assert!(halts(|| fatal(&de, &snapshot, None)));

        let lines = capture.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("[ ERROR ] #DE divide_error(0), RSP: "));
    }

    #[test]
    fn test_invalid_tss_decodes_selector() {
        let capture = testing::capture_console();

        assert!(halts(|| dispatch_snapshot(&RegisterSnapshot::new(10, 0x2, RIP, RSP))));

        let lines = capture.lines();
        assert!(lines[0].contains("#TS invalid_tss(10), Error Code: 0x0000000000000002"));
        assert_eq!(lines[2], "Refers to a descriptor in the IDT.");
        assert_eq!(lines[3], "Segment Selector Index: 0x0");
    }

    #[test]
    fn test_page_fault_reads_cr2() {
        let capture = testing::capture_console();
        set_cr2(0x0000_7FFF_0000_1000);

        assert!(halts(|| dispatch_snapshot(&RegisterSnapshot::new(14, 0x7, RIP, RSP))));

        let lines = capture.lines();
        assert!(lines[0].ends_with("CR2: 0x00007fff00001000"));
        assert_eq!(
            &lines[1..],
            [
                "Information:",
                "Page-level protection violation.",
                "Fault occurred during operation: writing",
                "Fault in user level(3).",
            ]
        );
    }

    /// Regression guard: #GP returns instead of halting. See `general_protection`.
    #[test]
    fn test_general_protection_returns() {
        let capture = testing::capture_console();
        assert_eq!(vector(13).handler.disposition(), Disposition::Return);

        dispatch_snapshot(&RegisterSnapshot::new(13, 0x0, RIP, RSP));

        let lines = capture.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("[ ERROR ] #GP general_protection(13), Error Code: "));
    }

    #[test]
    fn test_entry_dispatch_returns_for_general_protection() {
        let capture = testing::capture_console();

        dispatch(&RegisterSnapshot::new(13, 0x8, RIP, RSP));

        assert_eq!(capture.lines().len(), 1);
    }

    #[test]
    fn test_every_other_vector_halts() {
        let _capture = testing::capture_console();
        for number in (0..=20).filter(|&n| n != 13 && n != 15) {
            assert_eq!(vector(number).handler.disposition(), Disposition::Halt);
            assert!(halts(|| dispatch_snapshot(&RegisterSnapshot::new(number, 0, RIP, RSP))));
        }
    }

    #[test]
    fn test_error_code_ignored_for_vectors_without_one() {
        let capture = testing::capture_console();
        assert!(halts(|| dispatch_snapshot(&RegisterSnapshot::new(6, 0xFFFF, RIP, RSP))));
        assert!(!capture.lines()[0].contains("Error Code"));
    }

    #[test]
    fn test_unexpected_vector_terminates() {
        let capture = testing::capture_console();

        assert!(halts(|| dispatch_snapshot(&RegisterSnapshot::new(15, 0, RIP, RSP))));
        assert!(halts(|| dispatch_snapshot(&RegisterSnapshot::new(77, 0, RIP, RSP))));

        let writes = capture.writes();
        assert_eq!(writes[1], (Color::Red, Color::Black, "Terminate".to_string()));
        let lines = capture.lines();
        assert!(lines[0].starts_with("[ Terminate ] unexpected vector(15), "));
        assert!(lines[1].starts_with("[ Terminate ] unexpected vector(77), "));
    }

    /// Sink that raises a double fault the first time it sees a line start.
    struct NestingSink {
        console: &'static Console,
        inner: RecordingSink,
        armed: AtomicBool,
    }

    impl crate::ConsoleSink for NestingSink {
        fn write_colored(&self, fg: Color, bg: Color, text: &str) {
            self.inner.write_colored(fg, bg, text);
            if text == "[ " && self.armed.swap(false, Ordering::SeqCst) {
                let snapshot = RegisterSnapshot::new(8, 0, RIP, RSP);
                report(self.console, &vector(8), &snapshot, Some(0), None);
            }
        }
    }

    #[test]
    fn test_nested_fault_interleaves_between_segments() {
        let console: &'static Console = Box::leak(Box::new(Console::new()));
        let sink: &'static NestingSink = Box::leak(Box::new(NestingSink {
            console,
            inner: RecordingSink::new(),
            armed: AtomicBool::new(true),
        }));
        console.attach(sink);

        let snapshot = RegisterSnapshot::new(13, 0x28, RIP, RSP);
        report(console, &vector(13), &snapshot, Some(0x28), None);

        let texts: Vec<String> = sink.inner.writes().into_iter().map(|(_, _, text)| text).collect();
        assert_eq!(texts.len(), 8);
        // Outer line opened, then the whole nested line, then the outer rest.
        assert_eq!(texts[0], "[ ");
        assert_eq!(texts[1], "[ ");
        assert_eq!(texts[2], "Terminate");
        assert!(texts[3].starts_with(" ] #DF double_fault(8), Error Code: 0x0000000000000000"));
        assert_eq!(texts[4], "\n");
        assert_eq!(texts[5], "ERROR");
        assert!(
            texts[6].starts_with(" ] #GP general_protection(13), Error Code: 0x0000000000000028")
        );
        assert_eq!(texts[7], "\n");
        assert_eq!(console.forced_writes(), 1);

        // The outer writer released the emit lock; later lines are not forced.
        console.write_line(&[Segment::plain("after")]);
        assert_eq!(console.forced_writes(), 1);
    }
}
