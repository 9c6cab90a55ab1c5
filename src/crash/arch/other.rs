use super::{write_unwound_backtrace, CrashArch};
use crate::crash::writer::{ReportWriter, WriteFailed};

/// Targets without a known signal-context layout: no program counter and no
/// register dump, only what the unwinder can see.
pub(crate) struct Other;

impl CrashArch for Other {
    fn program_counter(_ctx: &libc::ucontext_t) -> usize {
        0
    }

    fn write_backtrace(
        w: &mut ReportWriter,
        _ctx: Option<&libc::ucontext_t>,
    ) -> Result<(), WriteFailed> {
        write_unwound_backtrace(w)?;
        Ok(())
    }
}
