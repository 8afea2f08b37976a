//! Method input record.

/// One try range of the exception table.
///
/// `start_pc..end_pc` is a half-open byte range; `handlers` are the pcs of
/// the catch entry points covering it, innermost first.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExceptionEntry {
    pub start_pc: u32,
    pub end_pc: u32,
    pub handlers: Vec<u32>,
}

impl ExceptionEntry {
    pub fn new(start_pc: u32, end_pc: u32, handlers: Vec<u32>) -> Self {
        ExceptionEntry {
            start_pc,
            end_pc,
            handlers,
        }
    }

    #[inline]
    pub fn covers(&self, pc: u32) -> bool {
        self.start_pc <= pc && pc < self.end_pc
    }
}

/// A method handed to the graph builder.
///
/// Registers are numbered `0..num_vregs`; the last `num_args` of them hold
/// the incoming arguments.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Method {
    pub code: Vec<u8>,
    pub exceptions: Vec<ExceptionEntry>,
    pub num_vregs: u16,
    pub num_args: u16,
}

impl Method {
    pub fn new(code: Vec<u8>, num_vregs: u16) -> Self {
        Method {
            code,
            exceptions: Vec::new(),
            num_vregs,
            num_args: 0,
        }
    }

    #[must_use]
    pub fn with_args(mut self, num_args: u16) -> Self {
        self.num_args = num_args;
        self
    }

    #[must_use]
    pub fn with_exceptions(mut self, exceptions: Vec<ExceptionEntry>) -> Self {
        self.exceptions = exceptions;
        self
    }

    /// Register holding argument `index`, if the method has that many.
    pub fn arg_register(&self, index: u16) -> Option<u16> {
        (index < self.num_args).then(|| self.num_vregs - self.num_args + index)
    }

    /// Argument index held by `vreg`, if it is an argument register.
    pub fn arg_index(&self, vreg: u16) -> Option<u16> {
        let first = self.num_vregs.checked_sub(self.num_args)?;
        (vreg >= first && vreg < self.num_vregs).then(|| vreg - first)
    }
}
