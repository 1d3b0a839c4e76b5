use crate::record::{CommandMarker, RawEntry, Record, ToolTrace};
use regex::Regex;
use std::sync::OnceLock;

// ===================================================================
// Command marker tags
// ===================================================================

fn command_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<command-name>(.*?)</command-name>").expect("valid regex"))
}

fn command_args_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // (?s): args may span multiple lines. The name may not.
    RE.get_or_init(|| Regex::new(r"(?s)<command-args>(.*?)</command-args>").expect("valid regex"))
}

/// Whether message text looks like a slash-command marker.
fn is_command_marker(text: &str) -> bool {
    text.contains("<command-message>") && text.contains("<command-name>")
}

/// Parse the command name and args out of marker text. Returns `None` when
/// the name tag is malformed, in which case the record is treated as
/// ordinary content. A missing args tag yields empty args.
fn parse_command(text: &str) -> Option<(String, String)> {
    let name = command_name_re().captures(text)?.get(1)?.as_str().to_string();
    let args = command_args_re()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    Some((name, args))
}

// ===================================================================
// Collapser — the stateful single-pass stream rewriter
// ===================================================================

/// A command marker waiting for the template record that follows it.
struct PendingCommand {
    record: Record,
    name: String,
    args: String,
}

/// Collapses a normalized record stream, merging runs of empty tool markers
/// and command-marker/template pairs into single records.
///
/// Holds two pieces of state: the current run of consecutive tool markers
/// (flushed at the first non-marker record) and at most one pending command
/// marker (resolved by the very next record that carries text). Feed records
/// with [`Collapser::push`] and finish the stream with [`Collapser::finish`].
pub struct Collapser {
    minimal: bool,
    tool_run: Vec<Record>,
    pending_command: Option<PendingCommand>,
}

impl Collapser {
    pub fn new(minimal: bool) -> Self {
        Self {
            minimal,
            tool_run: Vec::new(),
            pending_command: None,
        }
    }

    /// Process one normalized record, appending any completed emissions to
    /// `out`. Emission may lag input: markers buffer until their pattern
    /// resolves.
    pub fn push(&mut self, record: Record, out: &mut Vec<Record>) {
        // Empty tool markers accumulate; a later marker may extend the run.
        if record.is_tool_marker() {
            self.tool_run.push(record);
            return;
        }
        self.flush_tool_run(out);

        if let Some(text) = record.text.as_deref() {
            if is_command_marker(text) {
                if let Some((name, args)) = parse_command(text) {
                    // A marker already pending is replaced, never emitted.
                    self.pending_command = Some(PendingCommand { record, name, args });
                    return;
                }
            }
        }

        // Any text record following a pending marker is its template,
        // by sequence position alone (timestamps may legitimately differ).
        if let Some(template) = record.text.as_deref() {
            if let Some(pending) = self.pending_command.take() {
                let mut collapsed = pending.record;
                collapsed.text = None;
                collapsed.command_marker = Some(CommandMarker {
                    name: pending.name,
                    args: pending.args,
                    template: template.to_string(),
                });
                collapsed.refresh_id();
                self.emit(collapsed, out);
                return;
            }
        }

        // Plain emission. Records with neither text nor tool output carry
        // nothing worth keeping and are dropped.
        if record.text.is_some() || record.tool_output().is_some() {
            self.emit(record, out);
        }
    }

    /// Flush end-of-stream state: any buffered tool run is emitted; an
    /// unresolved pending command marker is discarded.
    pub fn finish(&mut self, out: &mut Vec<Record>) {
        self.flush_tool_run(out);
        self.pending_command = None;
    }

    fn flush_tool_run(&mut self, out: &mut Vec<Record>) {
        if self.tool_run.is_empty() {
            return;
        }
        let mut run = std::mem::take(&mut self.tool_run);
        if run.len() == 1 {
            if let Some(single) = run.pop() {
                self.emit(single, out);
            }
            return;
        }
        let count = run.len();
        let mut collapsed = run.swap_remove(0);
        collapsed.tool = Some(ToolTrace::Collapsed {
            tools_collapsed: count,
        });
        // `tools` is outside the hash, so this is a no-op today; recomputed
        // anyway so the emitted id always reflects the emitted content.
        collapsed.refresh_id();
        self.emit(collapsed, out);
    }

    fn emit(&self, record: Record, out: &mut Vec<Record>) {
        if self.minimal && !keep_in_minimal(&record) {
            return;
        }
        out.push(record);
    }
}

/// Minimal-mode gate: dialogue and collapsed commands only, no tool
/// activity of any kind. Applied at emission; never changes how records
/// buffer or merge.
fn keep_in_minimal(record: &Record) -> bool {
    record.tool.is_none() && (record.text.is_some() || record.command_marker.is_some())
}

// ===================================================================
// Line-oriented entry point
// ===================================================================

/// Condense a JSONL transcript string. Returns the emitted records and any
/// lines that failed to decode (with 1-based line number and error).
/// Whitespace-only lines are skipped silently.
pub fn condense(contents: &str, minimal: bool) -> (Vec<Record>, Vec<(usize, String)>) {
    let mut out = Vec::new();
    let mut errors = Vec::new();
    let mut collapser = Collapser::new(minimal);

    for (i, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<RawEntry>(line) {
            Ok(entry) => {
                if let Some(record) = entry.normalize() {
                    collapser.push(record, &mut out);
                }
            }
            Err(e) => errors.push((i + 1, format!("{e}"))),
        }
    }

    collapser.finish(&mut out);
    (out, errors)
}
