//! Symbol mangling keyed to the target data layout

/// How the target decorates global symbol names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManglingScheme {
    /// ELF targets: names pass through unchanged
    Elf,

    /// Mach-O targets: a leading underscore is prepended
    MachO,
}

/// The target description the engine links against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLayout {
    /// Pointer size in bytes
    pub pointer_width: u8,

    /// Symbol decoration scheme
    pub mangling: ManglingScheme,
}

impl DataLayout {
    /// Layout of the host platform
    #[must_use]
    pub fn host() -> Self {
        Self {
            pointer_width: std::mem::size_of::<usize>() as u8,
            mangling: if cfg!(target_os = "macos") {
                ManglingScheme::MachO
            } else {
                ManglingScheme::Elf
            },
        }
    }
}

impl Default for DataLayout {
    fn default() -> Self {
        Self::host()
    }
}

/// Decorates symbol names the way the target's linker expects
#[derive(Debug, Clone)]
pub struct Mangler {
    layout: DataLayout,
}

impl Mangler {
    /// Create a mangler for the given layout
    #[must_use]
    pub fn new(layout: DataLayout) -> Self {
        Self { layout }
    }

    /// The layout this mangler is keyed to
    #[must_use]
    pub fn layout(&self) -> DataLayout {
        self.layout
    }

    /// Decorate a symbol name
    #[must_use]
    pub fn mangle(&self, name: &str) -> String {
        match self.layout.mangling {
            ManglingScheme::Elf => name.to_string(),
            ManglingScheme::MachO => format!("_{name}"),
        }
    }
}
