use super::{write_frame_chain, write_unwound_backtrace, CrashArch};
use crate::crash::frames::FrameLayout;
use crate::crash::writer::{ReportWriter, WriteFailed};

pub(crate) struct Aarch64;

impl CrashArch for Aarch64 {
    fn program_counter(ctx: &libc::ucontext_t) -> usize {
        ctx.uc_mcontext.pc as usize
    }

    fn write_backtrace(
        w: &mut ReportWriter,
        ctx: Option<&libc::ucontext_t>,
    ) -> Result<(), WriteFailed> {
        let printed = write_unwound_backtrace(w)?;
        if printed == 0 {
            if let Some(ctx) = ctx {
                // x29 is the frame pointer.
                let fp = ctx.uc_mcontext.regs[29] as usize;
                write_frame_chain(w, fp, FrameLayout::FP_THEN_RETURN)?;
            }
        }
        Ok(())
    }

    fn write_registers(w: &mut ReportWriter, ctx: &libc::ucontext_t) -> Result<(), WriteFailed> {
        let mc = &ctx.uc_mcontext;
        for row in (0..28).step_by(4) {
            w.line(format_args!(
                "x{:<2} {:016x} x{:<2} {:016x} x{:<2} {:016x} x{:<2} {:016x}\n",
                row,
                mc.regs[row],
                row + 1,
                mc.regs[row + 1],
                row + 2,
                mc.regs[row + 2],
                row + 3,
                mc.regs[row + 3]
            ))?;
        }
        w.line(format_args!(
            "x28 {:016x} fp  {:016x} lr  {:016x}\n",
            mc.regs[28], mc.regs[29], mc.regs[30]
        ))?;
        w.line(format_args!(
            "sp  {:016x} pc  {:016x} pstate {:016x}\n",
            mc.sp, mc.pc, mc.pstate
        ))
    }
}
