use super::{write_frame_chain, write_unwound_backtrace, CrashArch};
use crate::crash::frames::FrameLayout;
use crate::crash::writer::{ReportWriter, WriteFailed};

pub(crate) struct X86_64;

fn reg(ctx: &libc::ucontext_t, index: libc::c_int) -> u64 {
    ctx.uc_mcontext.gregs[index as usize] as u64
}

impl CrashArch for X86_64 {
    fn program_counter(ctx: &libc::ucontext_t) -> usize {
        reg(ctx, libc::REG_RIP) as usize
    }

    fn write_backtrace(
        w: &mut ReportWriter,
        ctx: Option<&libc::ucontext_t>,
    ) -> Result<(), WriteFailed> {
        let printed = write_unwound_backtrace(w)?;
        if printed == 0 {
            if let Some(ctx) = ctx {
                write_frame_chain(w, reg(ctx, libc::REG_RBP) as usize, FrameLayout::FP_THEN_RETURN)?;
            }
        }
        Ok(())
    }

    fn write_registers(w: &mut ReportWriter, ctx: &libc::ucontext_t) -> Result<(), WriteFailed> {
        use libc::{
            REG_EFL, REG_R10, REG_R11, REG_R12, REG_R13, REG_R14, REG_R15, REG_R8, REG_R9,
            REG_RAX, REG_RBP, REG_RBX, REG_RCX, REG_RDI, REG_RDX, REG_RIP, REG_RSI, REG_RSP,
        };
        let r = |i| reg(ctx, i);
        w.line(format_args!(
            "rax {:016x} rbx {:016x} rcx {:016x} rdx {:016x}\n",
            r(REG_RAX),
            r(REG_RBX),
            r(REG_RCX),
            r(REG_RDX)
        ))?;
        w.line(format_args!(
            "rsi {:016x} rdi {:016x} rbp {:016x} rsp {:016x}\n",
            r(REG_RSI),
            r(REG_RDI),
            r(REG_RBP),
            r(REG_RSP)
        ))?;
        w.line(format_args!(
            "r8  {:016x} r9  {:016x} r10 {:016x} r11 {:016x}\n",
            r(REG_R8),
            r(REG_R9),
            r(REG_R10),
            r(REG_R11)
        ))?;
        w.line(format_args!(
            "r12 {:016x} r13 {:016x} r14 {:016x} r15 {:016x}\n",
            r(REG_R12),
            r(REG_R13),
            r(REG_R14),
            r(REG_R15)
        ))?;
        w.line(format_args!(
            "rip {:016x} eflags {:016x}\n",
            r(REG_RIP),
            r(REG_EFL)
        ))
    }
}
