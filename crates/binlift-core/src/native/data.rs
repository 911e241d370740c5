/// Canonical internal name of the lifted global for the variable at `ea`.
pub fn lifted_variable_name(ea: u64) -> String {
    format!("data_{:x}", ea)
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeVariable {
    pub ea: u64,
    pub name: String,
    pub lifted_name: String,
    pub size: u64,
}

impl NativeVariable {
    pub fn new(ea: u64, name: impl Into<String>, size: u64) -> Self {
        Self {
            ea,
            name: name.into(),
            lifted_name: lifted_variable_name(ea),
            size,
        }
    }

    pub fn end(&self) -> u64 {
        self.ea + self.size
    }

    /// `None` when the variable runs past the end of the address space.
    pub fn checked_end(&self) -> Option<u64> {
        self.ea.checked_add(self.size)
    }
}

/// A contiguous range of recovered data.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeSegment {
    pub ea: u64,
    pub name: String,
    /// Initialized bytes; the rest of `size` is zero-filled.
    pub data: Vec<u8>,
    pub size: u64,
    pub is_read_only: bool,
    pub xrefs: Vec<DataXref>,
}

impl NativeSegment {
    pub fn new(ea: u64, name: impl Into<String>, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self {
            ea,
            name: name.into(),
            data,
            size,
            is_read_only: false,
            xrefs: Vec::new(),
        }
    }

    pub fn zero_filled(ea: u64, name: impl Into<String>, size: u64) -> Self {
        Self {
            ea,
            name: name.into(),
            data: Vec::new(),
            size,
            is_read_only: false,
            xrefs: Vec::new(),
        }
    }

    pub fn read_only(mut self) -> Self {
        self.is_read_only = true;
        self
    }

    pub fn with_xref(mut self, ea: u64, target: u64) -> Self {
        self.xrefs.push(DataXref { ea, target });
        self
    }

    pub fn end(&self) -> u64 {
        self.ea + self.size
    }

    pub fn checked_end(&self) -> Option<u64> {
        self.ea.checked_add(self.size)
    }

    pub fn contains(&self, ea: u64) -> bool {
        ea >= self.ea && ea < self.end()
    }

    /// Bytes of `[start, end)`, zero-extended past the initialized prefix.
    pub fn bytes_in(&self, start: u64, end: u64) -> Vec<u8> {
        (start..end)
            .map(|ea| {
                let offset = (ea - self.ea) as usize;
                self.data.get(offset).copied().unwrap_or(0)
            })
            .collect()
    }

    /// Whether `[start, end)` holds only zero bytes.
    pub fn is_zero_range(&self, start: u64, end: u64) -> bool {
        let lo = ((start - self.ea) as usize).min(self.data.len());
        let hi = ((end - self.ea) as usize).min(self.data.len());
        self.data[lo..hi].iter().all(|&b| b == 0)
    }
}

/// A pointer-sized slot at `ea` holding the address `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataXref {
    pub ea: u64,
    pub target: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeExternalFunction {
    pub ea: u64,
    pub name: String,
    pub num_args: usize,
    pub is_weak: bool,
}

impl NativeExternalFunction {
    pub fn new(ea: u64, name: impl Into<String>, num_args: usize) -> Self {
        Self {
            ea,
            name: name.into(),
            num_args,
            is_weak: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeExternalVariable {
    pub ea: u64,
    pub name: String,
    pub size: u64,
    pub is_weak: bool,
}

impl NativeExternalVariable {
    pub fn new(ea: u64, name: impl Into<String>, size: u64) -> Self {
        Self {
            ea,
            name: name.into(),
            size,
            is_weak: false,
        }
    }
}
