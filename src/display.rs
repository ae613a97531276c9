//! Display relay and keyboard forwarding.

/// Display commands relayed from the unit to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayCommand {
    /// VGA output started. Both offsets are byte offsets into the shared heap.
    Start { vga_device: u32, vga_ram_offset: u32 },
    Mode(u32),
    Width(u32),
    Height(u32),
}

pub trait DisplaySink: Send + Sync {
    fn display(&self, command: DisplayCommand);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogDisplay;

impl DisplaySink for LogDisplay {
    fn display(&self, command: DisplayCommand) {
        tracing::debug!(?command, "display");
    }
}

/// A captured key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key_code: u32,
    pub ctrl: bool,
    pub shift: bool,
}

impl KeyEvent {
    pub fn new(key_code: u32) -> Self {
        Self {
            key_code,
            ctrl: false,
            shift: false,
        }
    }

    /// Ctrl+Shift combinations stay with the host.
    pub fn is_forwarded(&self) -> bool {
        !(self.ctrl && self.shift)
    }
}
