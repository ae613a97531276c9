//! Typed messages for each direction of the protocol.

use aero_host_shared::SharedHeap;
use serde_json::Value;

use crate::envelope::{Builder, Fields};
use crate::{Attachment, CompiledModule, DecodeError, Envelope, MessagePort, Tag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DiskType {
    HardDisk = 0,
    Cdrom = 1,
}

impl DiskType {
    fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::HardDisk),
            1 => Some(Self::Cdrom),
            _ => None,
        }
    }
}

/// Which view the unit should produce for a `DBG_DISAS_*` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisasMode {
    Bits16,
    Bits32,
    Wasm,
}

impl DisasMode {
    pub fn tag(self) -> Tag {
        match self {
            Self::Bits16 => Tag::DbgDisas16,
            Self::Bits32 => Tag::DbgDisas32,
            Self::Wasm => Tag::DbgDumpWasm,
        }
    }
}

/// Debugger state of one execution context inside the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DbgState {
    Detached = 0,
    Stopped = 1,
    SingleStep = 2,
}

impl DbgState {
    fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Detached),
            1 => Some(Self::Stopped),
            2 => Some(Self::SingleStep),
            _ => None,
        }
    }
}

/// How the unit expects the result of a compile request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileReply {
    /// `COMPILE_WASM_RESULT`: the unit also polls the completion flag word.
    Sync,
    /// `COMPILE_WASM_RESULT_ASYNC`: delivered through the message queue only.
    Async,
}

impl CompileReply {
    pub fn tag(self) -> Tag {
        match self {
            Self::Sync => Tag::CompileWasmResult,
            Self::Async => Tag::CompileWasmResultAsync,
        }
    }

    pub fn from_tag(tag: Tag) -> Option<Self> {
        match tag {
            Tag::CompileWasmResult => Some(Self::Sync),
            Tag::CompileWasmResultAsync => Some(Self::Async),
            _ => None,
        }
    }

    pub fn sets_completion_flag(self) -> bool {
        matches!(self, Self::Sync)
    }
}

/// Identity and state of a debuggable context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextInfo {
    pub ctx_type: u32,
    pub ctx_id: u32,
    pub dbg_state: DbgState,
}

/// Body of `IO_READ_REQUEST` / `IO_WRITE_REQUEST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoRequest {
    pub dev_id: u32,
    /// Byte offset within the device.
    pub start: u32,
    pub len: u32,
    pub io_transaction: u32,
    /// Byte offset within the shared heap.
    pub buffer_offset: u32,
}

/// Host → execution unit.
#[derive(Debug)]
pub enum HostMessage {
    InitSystem {
        mhz: u32,
        mem: u32,
        bios: Vec<u8>,
        vga_bios: Vec<u8>,
    },
    CreateFloppyDisk {
        index: u32,
        len: u32,
    },
    SwapFloppy {
        index: u32,
        dev_id: u32,
        len: u32,
        write_protected: bool,
    },
    CreateIdeDisk {
        disk_type: DiskType,
        index: u32,
        dev_id: u32,
        len: u32,
    },
    StartSystem,
    /// Clock-unit endpoint for the execution unit.
    TimerPort(MessagePort),
    IoResult {
        io_transaction: u32,
    },
    CompileResult {
        reply: CompileReply,
        module: CompiledModule,
    },
    AttachHud,
    DbgAttach {
        ctx_type: u32,
        ctx_id: u32,
    },
    DbgDetach {
        ctx_type: u32,
        ctx_id: u32,
    },
    DbgDisas {
        mode: DisasMode,
        ctx_type: u32,
        ctx_id: u32,
        addr: u32,
    },
    JitBisect {
        traces: Vec<u32>,
    },
    JitGetCurTraces,
    QueueKeyDown {
        key_code: u32,
    },
    QueueKeyUp {
        key_code: u32,
    },
}

impl HostMessage {
    pub fn tag(&self) -> Tag {
        match self {
            Self::InitSystem { .. } => Tag::InitSystem,
            Self::CreateFloppyDisk { .. } => Tag::CreateFloppyDisk,
            Self::SwapFloppy { .. } => Tag::SwapFloppy,
            Self::CreateIdeDisk { .. } => Tag::CreateIdeDisk,
            Self::StartSystem => Tag::StartSystem,
            Self::TimerPort(_) => Tag::TimerPort,
            Self::IoResult { .. } => Tag::IoResult,
            Self::CompileResult { reply, .. } => reply.tag(),
            Self::AttachHud => Tag::AttachHud,
            Self::DbgAttach { .. } => Tag::DbgAttach,
            Self::DbgDetach { .. } => Tag::DbgDetach,
            Self::DbgDisas { mode, .. } => mode.tag(),
            Self::JitBisect { .. } => Tag::JitBisect,
            Self::JitGetCurTraces => Tag::JitGetCurTraces,
            Self::QueueKeyDown { .. } => Tag::QueueKeyDown,
            Self::QueueKeyUp { .. } => Tag::QueueKeyUp,
        }
    }

    pub fn into_envelope(self) -> Envelope {
        let b = Builder::new(self.tag());
        let b = match self {
            Self::InitSystem {
                mhz,
                mem,
                bios,
                vga_bios,
            } => b
                .set("mhz", mhz)
                .set("mem", mem)
                .attach("bios", Attachment::Buffer(bios))
                .attach("vgaBios", Attachment::Buffer(vga_bios)),
            Self::CreateFloppyDisk { index, len } => b.set("index", index).set("len", len),
            Self::SwapFloppy {
                index,
                dev_id,
                len,
                write_protected,
            } => b
                .set("index", index)
                .set("devId", dev_id)
                .set("len", len)
                .set("writeProtected", write_protected),
            Self::CreateIdeDisk {
                disk_type,
                index,
                dev_id,
                len,
            } => b
                .set("diskType", disk_type as u32)
                .set("index", index)
                .set("devId", dev_id)
                .set("len", len),
            Self::TimerPort(port) => b.attach("value", Attachment::Port(port)),
            Self::IoResult { io_transaction } => b.set("ioTransaction", io_transaction),
            Self::CompileResult { module, .. } => {
                b.attach("wasmModule", Attachment::Module(module))
            }
            Self::DbgAttach { ctx_type, ctx_id } | Self::DbgDetach { ctx_type, ctx_id } => {
                b.set("ctxType", ctx_type).set("value", ctx_id)
            }
            Self::DbgDisas {
                ctx_type,
                ctx_id,
                addr,
                ..
            } => b
                .set("ctxType", ctx_type)
                .set("value", ctx_id)
                .set("addr", addr),
            Self::JitBisect { traces } => b.set("traces", traces),
            Self::QueueKeyDown { key_code } | Self::QueueKeyUp { key_code } => {
                b.set("value", key_code)
            }
            Self::StartSystem | Self::AttachHud | Self::JitGetCurTraces => b,
        };
        b.finish()
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self, DecodeError> {
        let tag = envelope.tag()?;
        let mut f = Fields::new(envelope);
        let msg = match tag {
            Tag::InitSystem => Self::InitSystem {
                mhz: f.u32("mhz")?,
                mem: f.u32("mem")?,
                bios: f.buffer("bios")?,
                vga_bios: f.buffer("vgaBios")?,
            },
            Tag::CreateFloppyDisk => Self::CreateFloppyDisk {
                index: f.u32("index")?,
                len: f.u32("len")?,
            },
            Tag::SwapFloppy => Self::SwapFloppy {
                index: f.u32("index")?,
                dev_id: f.u32("devId")?,
                len: f.u32("len")?,
                write_protected: f.bool("writeProtected")?,
            },
            Tag::CreateIdeDisk => Self::CreateIdeDisk {
                disk_type: DiskType::from_u32(f.u32("diskType")?)
                    .ok_or(DecodeError::InvalidField("diskType"))?,
                index: f.u32("index")?,
                dev_id: f.u32("devId")?,
                len: f.u32("len")?,
            },
            Tag::StartSystem => Self::StartSystem,
            Tag::TimerPort => Self::TimerPort(f.port("value")?),
            Tag::IoResult => Self::IoResult {
                io_transaction: f.u32("ioTransaction")?,
            },
            Tag::CompileWasmResult | Tag::CompileWasmResultAsync => Self::CompileResult {
                reply: CompileReply::from_tag(tag).ok_or(DecodeError::UnexpectedTag(tag))?,
                module: f.module("wasmModule")?,
            },
            Tag::AttachHud => Self::AttachHud,
            Tag::DbgAttach => Self::DbgAttach {
                ctx_type: f.u32("ctxType")?,
                ctx_id: f.u32("value")?,
            },
            Tag::DbgDetach => Self::DbgDetach {
                ctx_type: f.u32("ctxType")?,
                ctx_id: f.u32("value")?,
            },
            Tag::DbgDisas16 | Tag::DbgDisas32 | Tag::DbgDumpWasm => Self::DbgDisas {
                mode: match tag {
                    Tag::DbgDisas16 => DisasMode::Bits16,
                    Tag::DbgDisas32 => DisasMode::Bits32,
                    _ => DisasMode::Wasm,
                },
                ctx_type: f.u32("ctxType")?,
                ctx_id: f.u32("value")?,
                addr: f.u32("addr")?,
            },
            Tag::JitBisect => Self::JitBisect {
                traces: f.u32_list("traces")?,
            },
            Tag::JitGetCurTraces => Self::JitGetCurTraces,
            Tag::QueueKeyDown => Self::QueueKeyDown {
                key_code: f.u32("value")?,
            },
            Tag::QueueKeyUp => Self::QueueKeyUp {
                key_code: f.u32("value")?,
            },
            other => return Err(DecodeError::UnexpectedTag(other)),
        };
        Ok(msg)
    }
}

/// Execution unit → host.
#[derive(Debug)]
pub enum CoreMessage {
    Init {
        heap: SharedHeap,
        /// Byte offset of the async pointer block.
        async_ptr_offset: u32,
        /// Negative when the machine does not want a real-time clock unit.
        start_real_time: i64,
    },
    InitRetry,
    InitFailed {
        value: String,
    },
    IoRead(IoRequest),
    IoWrite(IoRequest),
    CompileRequest {
        start: u32,
        len: u32,
        reply: CompileReply,
    },
    HudGlobalStat {
        /// Byte offset of the counter word in the shared heap.
        int_wrapper: u32,
        stat_name: String,
        stat_type: u32,
    },
    HudAddContext(ContextInfo),
    HudRemoveContext(ContextInfo),
    HudUpdateContext(ContextInfo),
    DbgDisasResult {
        text: String,
    },
    CurTraces {
        traces: Vec<u32>,
    },
    DumpData {
        path: String,
        value: String,
    },
    StartVga {
        vga_device: u32,
        vga_ram_offset: u32,
    },
    VgaMode(u32),
    VgaSetWidth(u32),
    VgaSetHeight(u32),
}

impl CoreMessage {
    pub fn tag(&self) -> Tag {
        match self {
            Self::Init { .. } => Tag::Init,
            Self::InitRetry => Tag::InitRetry,
            Self::InitFailed { .. } => Tag::InitFailed,
            Self::IoRead(_) => Tag::IoReadRequest,
            Self::IoWrite(_) => Tag::IoWriteRequest,
            Self::CompileRequest { .. } => Tag::CompileWasmRequest,
            Self::HudGlobalStat { .. } => Tag::HudGlobalStat,
            Self::HudAddContext(_) => Tag::HudAddContext,
            Self::HudRemoveContext(_) => Tag::HudRemoveContext,
            Self::HudUpdateContext(_) => Tag::HudUpdateContext,
            Self::DbgDisasResult { .. } => Tag::DbgDisasResult,
            Self::CurTraces { .. } => Tag::JitGetCurTraces,
            Self::DumpData { .. } => Tag::DumpData,
            Self::StartVga { .. } => Tag::StartVga,
            Self::VgaMode(_) => Tag::VgaMode,
            Self::VgaSetWidth(_) => Tag::VgaSetWidth,
            Self::VgaSetHeight(_) => Tag::VgaSetHeight,
        }
    }

    pub fn into_envelope(self) -> Envelope {
        let b = Builder::new(self.tag());
        let b = match self {
            Self::Init {
                heap,
                async_ptr_offset,
                start_real_time,
            } => b
                .attach("buffer", Attachment::Heap(heap))
                .set("asyncPtrOffset", async_ptr_offset)
                .set("startRealTime", start_real_time),
            Self::InitRetry => b,
            Self::InitFailed { value } => b.set("value", value),
            Self::IoRead(req) | Self::IoWrite(req) => b
                .set("devId", req.dev_id)
                .set("start", req.start)
                .set("len", req.len)
                .set("ioTransaction", req.io_transaction)
                .set("value", req.buffer_offset),
            Self::CompileRequest { start, len, reply } => b
                .set("start", start)
                .set("len", len)
                .set("replyType", reply.tag() as u32),
            Self::HudGlobalStat {
                int_wrapper,
                stat_name,
                stat_type,
            } => b
                .set("intWrapper", int_wrapper)
                .set("statName", stat_name)
                .set("statType", stat_type),
            Self::HudAddContext(ctx) | Self::HudRemoveContext(ctx) | Self::HudUpdateContext(ctx) => {
                b.set("ctxType", ctx.ctx_type)
                    .set("value", ctx.ctx_id)
                    .set("dbgState", ctx.dbg_state as u32)
            }
            Self::DbgDisasResult { text } => b.set("text", text),
            Self::CurTraces { traces } => b.set("traces", traces),
            Self::DumpData { path, value } => b.set("path", path).set("value", value),
            Self::StartVga {
                vga_device,
                vga_ram_offset,
            } => b
                .set("vgaDevice", vga_device)
                .set("vgaRamOffset", vga_ram_offset),
            Self::VgaMode(v) | Self::VgaSetWidth(v) | Self::VgaSetHeight(v) => b.set("value", v),
        };
        b.finish()
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self, DecodeError> {
        let tag = envelope.tag()?;
        let mut f = Fields::new(envelope);
        let msg = match tag {
            Tag::Init => Self::Init {
                heap: f.heap("buffer")?,
                async_ptr_offset: f.u32("asyncPtrOffset")?,
                start_real_time: f.i64("startRealTime")?,
            },
            Tag::InitRetry => Self::InitRetry,
            Tag::InitFailed => Self::InitFailed {
                value: f.string("value")?,
            },
            Tag::IoReadRequest => Self::IoRead(io_request(&f)?),
            Tag::IoWriteRequest => Self::IoWrite(io_request(&f)?),
            Tag::CompileWasmRequest => {
                let reply_raw = f.u32("replyType")?;
                let reply = Tag::from_u32(reply_raw)
                    .and_then(CompileReply::from_tag)
                    .ok_or(DecodeError::InvalidField("replyType"))?;
                Self::CompileRequest {
                    start: f.u32("start")?,
                    len: f.u32("len")?,
                    reply,
                }
            }
            Tag::HudGlobalStat => Self::HudGlobalStat {
                int_wrapper: f.u32("intWrapper")?,
                stat_name: f.string("statName")?,
                stat_type: f.u32("statType")?,
            },
            Tag::HudAddContext => Self::HudAddContext(context_info(&f)?),
            Tag::HudRemoveContext => Self::HudRemoveContext(context_info(&f)?),
            Tag::HudUpdateContext => Self::HudUpdateContext(context_info(&f)?),
            Tag::DbgDisasResult => Self::DbgDisasResult {
                text: f.string("text")?,
            },
            Tag::JitGetCurTraces => Self::CurTraces {
                traces: f.u32_list("traces")?,
            },
            Tag::DumpData => Self::DumpData {
                path: f.string("path")?,
                value: f.string("value")?,
            },
            Tag::StartVga => Self::StartVga {
                vga_device: f.u32("vgaDevice")?,
                vga_ram_offset: f.u32("vgaRamOffset")?,
            },
            Tag::VgaMode => Self::VgaMode(f.u32("value")?),
            Tag::VgaSetWidth => Self::VgaSetWidth(f.u32("value")?),
            Tag::VgaSetHeight => Self::VgaSetHeight(f.u32("value")?),
            other => return Err(DecodeError::UnexpectedTag(other)),
        };
        Ok(msg)
    }
}

fn io_request(f: &Fields) -> Result<IoRequest, DecodeError> {
    Ok(IoRequest {
        dev_id: f.u32("devId")?,
        start: f.u32("start")?,
        len: f.u32("len")?,
        io_transaction: f.u32("ioTransaction")?,
        buffer_offset: f.u32("value")?,
    })
}

fn context_info(f: &Fields) -> Result<ContextInfo, DecodeError> {
    Ok(ContextInfo {
        ctx_type: f.u32("ctxType")?,
        ctx_id: f.u32("value")?,
        dbg_state: DbgState::from_u32(f.u32("dbgState")?)
            .ok_or(DecodeError::InvalidField("dbgState"))?,
    })
}

/// Host → clock unit. The clock unit answers with any message once it is running.
#[derive(Debug)]
pub enum ClockMessage {
    InitMemory {
        heap: SharedHeap,
        base_ptr: u32,
        start_real_time: i64,
        port: MessagePort,
    },
}

impl ClockMessage {
    pub fn into_envelope(self) -> Envelope {
        match self {
            Self::InitMemory {
                heap,
                base_ptr,
                start_real_time,
                port,
            } => Builder::keyed("kind", Tag::InitMemory)
                .attach("buffer", Attachment::Heap(heap))
                .set("basePtr", base_ptr)
                .set("startRealTime", Value::from(start_real_time))
                .attach("port", Attachment::Port(port))
                .finish(),
        }
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self, DecodeError> {
        let tag = envelope.tag()?;
        if tag != Tag::InitMemory {
            return Err(DecodeError::UnexpectedTag(tag));
        }
        let mut f = Fields::new(envelope);
        Ok(Self::InitMemory {
            heap: f.heap("buffer")?,
            base_ptr: f.u32("basePtr")?,
            start_real_time: f.i64("startRealTime")?,
            port: f.port("port")?,
        })
    }
}
