//! 32-bit arm: no unwinder is trusted here, so the stack is walked by hand
//! through the APCS frame chain.

use super::CrashArch;
use crate::crash::frames::{self, FrameLayout};
use crate::crash::writer::{ReportWriter, WriteFailed};

pub(crate) struct Arm;

/// Rows of eight words dumped from the stack pointer.
const STACK_ROWS: usize = 32;

impl CrashArch for Arm {
    fn program_counter(ctx: &libc::ucontext_t) -> usize {
        ctx.uc_mcontext.arm_pc as usize
    }

    fn write_backtrace(
        w: &mut ReportWriter,
        ctx: Option<&libc::ucontext_t>,
    ) -> Result<(), WriteFailed> {
        let Some(ctx) = ctx else {
            return Ok(());
        };
        let mc = &ctx.uc_mcontext;
        w.line(format_args!("PC at {:08x}\n", mc.arm_pc))?;
        w.line(format_args!("LR at {:08x}\n", mc.arm_lr))?;

        // SAFETY: the walk is bounded; a wild pointer that still faults lands
        // in the default disposition because the report handler is one-shot.
        unsafe {
            frames::chase(mc.arm_fp as usize, FrameLayout::APCS, |_, ret| {
                w.line(format_args!("LR at {ret:08x}\n"))
            })?;
        }
        Ok(())
    }

    fn write_registers(w: &mut ReportWriter, ctx: &libc::ucontext_t) -> Result<(), WriteFailed> {
        let mc = &ctx.uc_mcontext;
        w.line(format_args!(
            "r0  {:08x} r1  {:08x} r2  {:08x} r3  {:08x} r4  {:08x}  r5  {:08x}\n",
            mc.arm_r0, mc.arm_r1, mc.arm_r2, mc.arm_r3, mc.arm_r4, mc.arm_r5
        ))?;
        w.line(format_args!(
            "r6  {:08x} r7  {:08x} r8  {:08x} r9  {:08x} r10 {:08x} cpsr {:08x}\n",
            mc.arm_r6, mc.arm_r7, mc.arm_r8, mc.arm_r9, mc.arm_r10, mc.arm_cpsr
        ))?;
        w.line(format_args!(
            "fp  {:08x} ip  {:08x} sp  {:08x} lr  {:08x} pc  {:08x}\n",
            mc.arm_fp, mc.arm_ip, mc.arm_sp, mc.arm_lr, mc.arm_pc
        ))?;
        w.line(format_args!(
            "STACK {:08x}, FRAME {:08x}\n",
            mc.arm_sp, mc.arm_fp
        ))?;

        let sp = mc.arm_sp as usize as *const u32;
        for row in 0..STACK_ROWS {
            // SAFETY: words just above the faulting stack pointer belong to
            // live frames; see write_backtrace for what happens otherwise.
            let words = unsafe {
                let base = sp.add(row * 8);
                let mut words = [0u32; 8];
                for (i, word) in words.iter_mut().enumerate() {
                    *word = std::ptr::read_volatile(base.add(i));
                }
                words
            };
            w.line(format_args!(
                "{:08x}: {:08x} {:08x} {:08x} {:08x} {:08x} {:08x} {:08x} {:08x}\n",
                sp as usize + row * 32,
                words[0],
                words[1],
                words[2],
                words[3],
                words[4],
                words[5],
                words[6],
                words[7]
            ))?;
        }
        Ok(())
    }
}
