//! Host-side bookkeeping for the debug HUD.
//!
//! The HUD surface itself is external; it receives [`HudEvent`]s through a [`HudSink`] and drives
//! the unit through the command methods on [`crate::System`].

use aero_host_protocol::{ContextInfo, DbgState};
use aero_host_shared::SharedHeap;

use crate::error::HostError;

/// Global statistic registered by the unit. `word` indexes the shared heap's word view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalStat {
    pub name: String,
    pub word: usize,
    pub stat_type: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatSample {
    pub name: String,
    pub stat_type: u32,
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HudEvent {
    GlobalStat(GlobalStat),
    ContextAdded(ContextInfo),
    ContextRemoved(ContextInfo),
    ContextUpdated(ContextInfo),
    Disassembly(String),
    /// Current JIT trace list, one hex address per line.
    Traces(String),
    Stats(Vec<StatSample>),
}

pub trait HudSink: Send + Sync {
    fn event(&self, event: HudEvent);
}

/// Logs events at `debug` and drops them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHud;

impl HudSink for LogHud {
    fn event(&self, event: HudEvent) {
        tracing::debug!(?event, "hud");
    }
}

#[derive(Debug, Default)]
pub struct HudState {
    stats: Vec<GlobalStat>,
    contexts: Vec<ContextInfo>,
    disassembly: Option<String>,
    traces: String,
}

impl HudState {
    pub fn register_stat(&mut self, int_wrapper: u32, name: String, stat_type: u32) -> GlobalStat {
        let stat = GlobalStat {
            name,
            word: (int_wrapper >> 2) as usize,
            stat_type,
        };
        self.stats.push(stat.clone());
        stat
    }

    pub fn add_context(&mut self, ctx: ContextInfo) {
        self.contexts.push(ctx);
    }

    /// Remove every context with the same type and id. Returns true if any was removed.
    pub fn remove_context(&mut self, ctx_type: u32, ctx_id: u32) -> bool {
        let before = self.contexts.len();
        self.contexts
            .retain(|c| !(c.ctx_type == ctx_type && c.ctx_id == ctx_id));
        self.contexts.len() != before
    }

    /// Update the state of a known context. Unknown contexts are ignored.
    pub fn update_context(&mut self, ctx: ContextInfo) -> bool {
        match self
            .contexts
            .iter_mut()
            .find(|c| c.ctx_type == ctx.ctx_type && c.ctx_id == ctx.ctx_id)
        {
            Some(c) => {
                c.dbg_state = ctx.dbg_state;
                true
            }
            None => false,
        }
    }

    pub fn context(&self, ctx_type: u32, ctx_id: u32) -> Option<ContextInfo> {
        self.contexts
            .iter()
            .find(|c| c.ctx_type == ctx_type && c.ctx_id == ctx_id)
            .copied()
    }

    pub fn contexts(&self) -> &[ContextInfo] {
        &self.contexts
    }

    pub fn stats(&self) -> &[GlobalStat] {
        &self.stats
    }

    pub fn set_disassembly(&mut self, text: String) {
        self.disassembly = Some(text);
    }

    pub fn disassembly(&self) -> Option<&str> {
        self.disassembly.as_deref()
    }

    pub fn set_traces(&mut self, traces: &[u32]) -> &str {
        self.traces = format_traces(traces);
        &self.traces
    }

    pub fn traces(&self) -> &str {
        &self.traces
    }

    /// Read every registered statistic from the shared heap.
    pub fn sample(&self, heap: &SharedHeap) -> Vec<StatSample> {
        let words = heap.words();
        self.stats
            .iter()
            .filter_map(|s| {
                let value = words.try_get(s.word)?;
                Some(StatSample {
                    name: s.name.clone(),
                    stat_type: s.stat_type,
                    value,
                })
            })
            .collect()
    }
}

/// Whether the debugger toggle for a context in `state` attaches (true) or detaches (false).
/// `None` while the context is single-stepping.
pub fn toggle_attaches(state: DbgState) -> Option<bool> {
    match state {
        DbgState::Detached => Some(true),
        DbgState::Stopped => Some(false),
        DbgState::SingleStep => None,
    }
}

pub fn format_traces(traces: &[u32]) -> String {
    traces
        .iter()
        .map(|t| format!("{t:x}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a trace list: one hex address per line, blank lines ignored.
pub fn parse_traces(text: &str) -> Result<Vec<u32>, HostError> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let digits = line
                .strip_prefix("0x")
                .or_else(|| line.strip_prefix("0X"))
                .unwrap_or(line);
            u32::from_str_radix(digits, 16).map_err(|_| HostError::InvalidTrace(line.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(ctx_id: u32, dbg_state: DbgState) -> ContextInfo {
        ContextInfo {
            ctx_type: 1,
            ctx_id,
            dbg_state,
        }
    }

    #[test]
    fn traces_roundtrip_through_text() {
        let text = format_traces(&[0x1000, 0xdeadbeef, 7]);
        assert_eq!(text, "1000\ndeadbeef\n7");
        assert_eq!(parse_traces(&text).unwrap(), vec![0x1000, 0xdeadbeef, 7]);
        assert_eq!(parse_traces("  \n0x10\n\n").unwrap(), vec![0x10]);
        assert!(matches!(
            parse_traces("zz"),
            Err(HostError::InvalidTrace(_))
        ));
    }

    #[test]
    fn contexts_are_tracked_by_type_and_id() {
        let mut hud = HudState::default();
        hud.add_context(ctx(1, DbgState::Detached));
        hud.add_context(ctx(2, DbgState::Detached));

        assert!(hud.update_context(ctx(2, DbgState::Stopped)));
        assert!(!hud.update_context(ctx(9, DbgState::Stopped)));
        assert_eq!(hud.context(1, 2).unwrap().dbg_state, DbgState::Stopped);

        assert!(hud.remove_context(1, 1));
        assert!(!hud.remove_context(1, 1));
        assert_eq!(hud.contexts().len(), 1);
    }

    #[test]
    fn stats_are_sampled_from_heap_words() {
        let heap = SharedHeap::new(64);
        heap.words().set(4, 1234);
        let mut hud = HudState::default();
        let stat = hud.register_stat(16, "jit traces".to_string(), 0);
        assert_eq!(stat.word, 4);
        hud.register_stat(4096, "out of range".to_string(), 0);

        let samples = hud.sample(&heap);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 1234);
    }

    #[test]
    fn toggle_direction_follows_state() {
        assert_eq!(toggle_attaches(DbgState::Detached), Some(true));
        assert_eq!(toggle_attaches(DbgState::Stopped), Some(false));
        assert_eq!(toggle_attaches(DbgState::SingleStep), None);
    }
}
