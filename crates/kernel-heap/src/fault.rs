use core::fmt;

use bitflags::bitflags;

bitflags! {
    /// Hardware error code pushed alongside a page fault.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultCode: u64 {
        /// The fault was a protection violation on a present page; clear
        /// means the page was not present at all.
        const PROTECTION = 1 << 0;

        /// The faulting access was a write.
        const WRITE = 1 << 1;

        /// The fault happened in user mode.
        const USER = 1 << 2;

        /// A reserved bit was set in a paging structure entry.
        const RESERVED = 1 << 3;

        /// The fault came from an instruction fetch.
        const INSTRUCTION_FETCH = 1 << 4;
    }
}

/// Handler invoked with a decoded page fault. Never returns.
pub type PageFaultHandler = fn(&PageFault) -> !;

/// A page fault, decoded from what the hardware reports.
#[derive(Debug, Clone, Copy)]
pub struct PageFault {
    /// Faulting virtual address.
    pub addr: usize,
    /// Address of the faulting instruction.
    pub instruction: usize,
    /// Decoded hardware error code.
    pub code: FaultCode,
}

impl PageFault {
    /// Builds a fault record from the raw hardware error code.
    ///
    /// Code bits this module does not know about are dropped.
    #[must_use]
    pub fn new(addr: usize, instruction: usize, code: u64) -> Self {
        Self {
            addr,
            instruction,
            code: FaultCode::from_bits_truncate(code),
        }
    }
}

impl fmt::Display for PageFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cause = if self.code.contains(FaultCode::PROTECTION) {
            "protection violation"
        } else {
            "page not present"
        };
        let access = if self.code.contains(FaultCode::WRITE) {
            "write"
        } else {
            "read"
        };
        write!(f, "page fault at {:#018x}: {cause}, {access}", self.addr)?;
        if self.code.contains(FaultCode::USER) {
            write!(f, ", user mode")?;
        }
        if self.code.contains(FaultCode::INSTRUCTION_FETCH) {
            write!(f, ", instruction fetch")?;
        }
        write!(f, " (pc {:#018x})", self.instruction)
    }
}

/// Default page fault handler: logs the fault, then panics.
///
/// A page fault in kernel space means a wild pointer or a missing mapping.
/// There is nothing to recover, so the report goes out before halting.
///
/// # Panics
///
/// Always; this is the end of the line for the faulting context.
pub fn report(fault: &PageFault) -> ! {
    log::error!("{fault}");
    log::error!("fault code: {:#06x} ({:?})", fault.code.bits(), fault.code);
    panic!("unrecoverable page fault at {:#x}", fault.addr);
}
