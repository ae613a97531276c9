//! Numeric message tags.
//!
//! Both directions share one numbering space; `JIT_GET_CUR_TRACES` is used as the request
//! (host → unit) and as the reply (unit → host).

macro_rules! tags {
    ($($(#[$meta:meta])* $name:ident = $value:literal => $wire:literal,)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum Tag {
            $($(#[$meta])* $name = $value,)*
        }

        impl Tag {
            pub const ALL: &'static [Tag] = &[$(Tag::$name,)*];

            pub fn from_u32(value: u32) -> Option<Tag> {
                match value {
                    $($value => Some(Tag::$name),)*
                    _ => None,
                }
            }

            /// Protocol name, as used in logs and CLI output.
            pub fn name(self) -> &'static str {
                match self {
                    $(Tag::$name => $wire,)*
                }
            }
        }
    };
}

tags! {
    /// Unit finished initializing; carries the shared heap.
    Init = 0 => "INIT",
    /// Unit's fast path failed; host should retry with the no-return-call core.
    InitRetry = 1 => "INIT_RETRY",
    InitFailed = 2 => "INIT_FAILED",

    InitSystem = 10 => "INIT_SYSTEM",
    CreateFloppyDisk = 11 => "CREATE_FLOPPY_DISK",
    SwapFloppy = 12 => "SWAP_FLOPPY",
    CreateIdeDisk = 13 => "CREATE_IDE_DISK",
    StartSystem = 14 => "START_SYSTEM",
    TimerPort = 15 => "TIMER_PORT",

    IoReadRequest = 20 => "IO_READ_REQUEST",
    IoWriteRequest = 21 => "IO_WRITE_REQUEST",
    IoResult = 22 => "IO_RESULT",

    CompileWasmRequest = 30 => "COMPILE_WASM_REQUEST",
    /// Compile reply the unit waits on through the completion flag word.
    CompileWasmResult = 31 => "COMPILE_WASM_RESULT",
    /// Compile reply consumed from the message queue only.
    CompileWasmResultAsync = 32 => "COMPILE_WASM_RESULT_ASYNC",

    StartVga = 40 => "START_VGA",
    VgaMode = 41 => "VGA_MODE",
    VgaSetWidth = 42 => "VGA_SET_WIDTH",
    VgaSetHeight = 43 => "VGA_SET_HEIGHT",
    QueueKeyDown = 44 => "QUEUE_KEYDOWN",
    QueueKeyUp = 45 => "QUEUE_KEYUP",

    AttachHud = 50 => "ATTACH_HUD",
    HudGlobalStat = 51 => "HUD_GLOBAL_STAT",
    HudAddContext = 52 => "HUD_ADD_CONTEXT",
    HudRemoveContext = 53 => "HUD_REMOVE_CONTEXT",
    HudUpdateContext = 54 => "HUD_UPDATE_CONTEXT",

    DbgAttach = 60 => "DBG_ATTACH",
    DbgDetach = 61 => "DBG_DETACH",
    DbgDisas16 = 62 => "DBG_DISAS_16",
    DbgDisas32 = 63 => "DBG_DISAS_32",
    DbgDumpWasm = 64 => "DBG_DUMP_WASM",
    DbgDisasResult = 65 => "DBG_DISAS_RESULT",

    JitBisect = 70 => "JIT_BISECT",
    JitGetCurTraces = 71 => "JIT_GET_CUR_TRACES",

    DumpData = 80 => "DUMP_DATA",

    /// Clock unit initialization (sent under the `kind` key).
    InitMemory = 90 => "INIT_MEMORY",
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tag_values_and_names_are_unique() {
        let values: HashSet<u32> = Tag::ALL.iter().map(|t| *t as u32).collect();
        let names: HashSet<&str> = Tag::ALL.iter().map(|t| t.name()).collect();
        assert_eq!(values.len(), Tag::ALL.len());
        assert_eq!(names.len(), Tag::ALL.len());
    }

    #[test]
    fn from_u32_inverts_discriminants() {
        for tag in Tag::ALL {
            assert_eq!(Tag::from_u32(*tag as u32), Some(*tag));
        }
        assert_eq!(Tag::from_u32(9999), None);
    }
}
